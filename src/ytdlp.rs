use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{FormatType, Platform, VideoQuality};
use crate::output;
use crate::process::{LineTail, OutputLine, StreamKind, spawn_output_reader};

const PROGRESS_TAG: &str = "RG_PROGRESS|";
const TITLE_TAG: &str = "RG_TITLE|";
const FILEPATH_TAG: &str = "RG_FILEPATH|";

const STDERR_TAIL_LINES: usize = 30;
const MAX_ERROR_LINES: usize = 3;

/// Everything needed to build one yt-dlp invocation.
#[derive(Debug, Clone)]
pub struct YtDlpRequest<'a> {
    pub job_id: i64,
    pub url: &'a str,
    pub platform: Platform,
    pub format_type: FormatType,
    pub quality: VideoQuality,
    pub download_dir: &'a Path,
    pub audio_quality_kbps: u32,
    pub ffmpeg_location: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum YtDlpEvent {
    Title(String),
    Progress {
        downloaded: Option<u64>,
        total: Option<u64>,
    },
    Filepath(String),
}

impl YtDlpEvent {
    /// Percentage for `Progress` events; 0 when the total is unknown.
    pub fn percent(&self) -> f64 {
        match *self {
            Self::Progress {
                downloaded: Some(downloaded),
                total: Some(total),
            } if total > 0 => (downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct YtDlpOutcome {
    pub filepath: Option<PathBuf>,
}

pub fn format_selector(format_type: FormatType, platform: Platform, quality: VideoQuality) -> String {
    if format_type == FormatType::Audio {
        return "bestaudio/best".to_string();
    }
    if platform == Platform::Instagram {
        return "best".to_string();
    }

    match quality.max_height() {
        None => "best[ext=mp4][height<=720]/best[ext=mp4]/best[height<=720]/best".to_string(),
        Some(h) => format!("best[ext=mp4][height<={h}]/best[height<={h}]/best"),
    }
}

pub fn build_args(req: &YtDlpRequest<'_>) -> Vec<String> {
    let mut args: Vec<String> = [
        "--no-playlist",
        "--newline",
        "--progress",
        "--no-simulate",
        "--progress-template",
        "download:RG_PROGRESS|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s",
        "--print",
        "before_dl:RG_TITLE|%(title)s",
        "--print",
        "after_move:RG_FILEPATH|%(filepath)s",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();

    args.push("-f".to_string());
    args.push(format_selector(req.format_type, req.platform, req.quality));

    args.push("-o".to_string());
    args.push(
        req.download_dir
            .join(format!("%(title)s {}.%(ext)s", output::job_marker(req.job_id)))
            .to_string_lossy()
            .into_owned(),
    );

    if req.format_type == FormatType::Audio {
        args.push("-x".to_string());
        args.push("--audio-format".to_string());
        args.push("mp3".to_string());
        args.push("--audio-quality".to_string());
        args.push(format!("{}K", req.audio_quality_kbps));
    }

    if let Some(location) = req.ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(location.to_string_lossy().into_owned());
    }

    args.push("--".to_string());
    args.push(req.url.to_string());
    args
}

pub fn parse_line(line: &str) -> Option<YtDlpEvent> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_TAG) {
        let mut parts = rest.split('|');
        let downloaded = parts.next().and_then(parse_byte_count);
        let total = parts.next().and_then(parse_byte_count);
        let estimate = parts.next().and_then(parse_byte_count);
        return Some(YtDlpEvent::Progress {
            downloaded,
            total: total.or(estimate),
        });
    }

    if let Some(rest) = line.strip_prefix(TITLE_TAG) {
        let title = rest.trim();
        if title.is_empty() || title == "NA" {
            return None;
        }
        return Some(YtDlpEvent::Title(title.to_string()));
    }

    if let Some(rest) = line.strip_prefix(FILEPATH_TAG) {
        let path = rest.trim();
        if path.is_empty() || path == "NA" {
            return None;
        }
        return Some(YtDlpEvent::Filepath(path.to_string()));
    }

    None
}

// yt-dlp renders missing fields as "NA" and estimates as floats.
fn parse_byte_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "NA" || raw == "None" {
        return None;
    }
    let value = raw.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
}

/// Runs yt-dlp to completion, forwarding parsed events. The child is killed
/// if this future is dropped or the timeout elapses.
pub async fn run(
    cmd: &str,
    args: &[String],
    timeout: Option<Duration>,
    events: mpsc::UnboundedSender<YtDlpEvent>,
) -> Result<YtDlpOutcome> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {cmd}"))?;

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<OutputLine>();
    if let Some(stdout) = child.stdout.take() {
        spawn_output_reader(stdout, line_tx.clone(), StreamKind::Stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_output_reader(stderr, line_tx.clone(), StreamKind::Stderr);
    }
    drop(line_tx);

    let mut outcome = YtDlpOutcome::default();
    let mut tail = LineTail::new(STDERR_TAIL_LINES);
    let mut error_lines: Vec<String> = Vec::new();

    let deadline = tokio::time::sleep(timeout.unwrap_or_default());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline, if timeout.is_some() => {
                let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("{cmd} timed out after {secs}s");
                let _ = child.kill().await;
                bail!("Download timed out after {secs} seconds");
            }
            maybe_line = line_rx.recv() => {
                let Some(line) = maybe_line else {
                    break;
                };

                if line.text.starts_with("ERROR:") {
                    error_lines.push(line.text.clone());
                }

                match parse_line(&line.text) {
                    Some(event) => {
                        if let YtDlpEvent::Filepath(path) = &event {
                            outcome.filepath = Some(PathBuf::from(path));
                        }
                        let _ = events.send(event);
                    }
                    None => {
                        debug!("{cmd}: {}", line.text);
                        if line.stream == StreamKind::Stderr {
                            tail.push(&line.text);
                        }
                    }
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for {cmd} failed"))?;

    if !status.success() {
        return Err(anyhow!(failure_text(&error_lines, &tail, &status.to_string())));
    }

    Ok(outcome)
}

fn failure_text(error_lines: &[String], tail: &LineTail, status: &str) -> String {
    if !error_lines.is_empty() {
        let start = error_lines.len().saturating_sub(MAX_ERROR_LINES);
        return error_lines[start..].join("\n");
    }
    if !tail.is_empty() {
        return tail.joined();
    }
    format!("yt-dlp exited with {status}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_follow_format_platform_and_quality() {
        assert_eq!(
            format_selector(FormatType::Audio, Platform::Youtube, VideoQuality::P1080),
            "bestaudio/best"
        );
        assert_eq!(
            format_selector(FormatType::Video, Platform::Instagram, VideoQuality::P480),
            "best"
        );
        assert_eq!(
            format_selector(FormatType::Video, Platform::Youtube, VideoQuality::Best),
            "best[ext=mp4][height<=720]/best[ext=mp4]/best[height<=720]/best"
        );
        assert_eq!(
            format_selector(FormatType::Video, Platform::Other, VideoQuality::P1080),
            "best[ext=mp4][height<=1080]/best[height<=1080]/best"
        );
    }

    #[test]
    fn audio_args_request_mp3_extraction() {
        let dir = Path::new("/srv/downloads");
        let ffmpeg = Path::new("/opt/ffmpeg/bin");
        let args = build_args(&YtDlpRequest {
            job_id: 12,
            url: "https://youtu.be/abc",
            platform: Platform::Youtube,
            format_type: FormatType::Audio,
            quality: VideoQuality::Best,
            download_dir: dir,
            audio_quality_kbps: 192,
            ffmpeg_location: Some(ffmpeg),
        });

        let joined = args.join(" ");
        assert!(joined.contains("--no-playlist --newline --progress --no-simulate"));
        assert!(joined.contains("-x --audio-format mp3 --audio-quality 192K"));
        assert!(joined.contains("--ffmpeg-location /opt/ffmpeg/bin"));
        assert!(joined.contains("-o /srv/downloads/%(title)s [12].%(ext)s"));
        assert!(args.contains(&"after_move:RG_FILEPATH|%(filepath)s".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/abc"));
    }

    #[test]
    fn video_args_skip_extraction() {
        let args = build_args(&YtDlpRequest {
            job_id: 3,
            url: "https://www.instagram.com/reel/x/",
            platform: Platform::Instagram,
            format_type: FormatType::Video,
            quality: VideoQuality::Best,
            download_dir: Path::new("downloads"),
            audio_quality_kbps: 192,
            ffmpeg_location: None,
        });

        assert!(!args.contains(&"-x".to_string()));
        assert!(!args.contains(&"--ffmpeg-location".to_string()));
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "best");
    }

    #[test]
    fn progress_lines_parse_with_estimate_fallback() {
        assert_eq!(
            parse_line("RG_PROGRESS|512|1024|NA"),
            Some(YtDlpEvent::Progress {
                downloaded: Some(512),
                total: Some(1024)
            })
        );

        let estimated = parse_line("RG_PROGRESS|250|NA|1000.0").unwrap();
        assert_eq!(
            estimated,
            YtDlpEvent::Progress {
                downloaded: Some(250),
                total: Some(1000)
            }
        );
        assert_eq!(estimated.percent(), 25.0);

        let unknown = parse_line("RG_PROGRESS|250|NA|NA").unwrap();
        assert_eq!(unknown.percent(), 0.0);
    }

    #[test]
    fn title_and_filepath_lines_parse() {
        assert_eq!(
            parse_line("RG_TITLE|Never Gonna Give You Up"),
            Some(YtDlpEvent::Title("Never Gonna Give You Up".to_string()))
        );
        assert_eq!(
            parse_line("  RG_FILEPATH|/srv/downloads/clip.mp3  "),
            Some(YtDlpEvent::Filepath("/srv/downloads/clip.mp3".to_string()))
        );
        assert_eq!(parse_line("RG_TITLE|NA"), None);
        assert_eq!(parse_line("[download] Destination: clip.webm"), None);
        assert_eq!(parse_line("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn failure_text_prefers_error_lines() {
        let mut tail = LineTail::new(5);
        tail.push("WARNING: something");
        let errors = vec![
            "ERROR: first".to_string(),
            "ERROR: second".to_string(),
            "ERROR: third".to_string(),
            "ERROR: fourth".to_string(),
        ];
        assert_eq!(
            failure_text(&errors, &tail, "exit status: 1"),
            "ERROR: second\nERROR: third\nERROR: fourth"
        );
        assert_eq!(failure_text(&[], &tail, "exit status: 1"), "WARNING: something");
        assert_eq!(
            failure_text(&[], &LineTail::new(1), "exit status: 2"),
            "yt-dlp exited with exit status: 2"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_relays_events_and_reports_errors() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let script = "echo 'RG_TITLE|Demo'; echo 'RG_PROGRESS|5|10|NA'; echo 'ERROR: Video unavailable' >&2; exit 1";
        let err = run("sh", &["-c".to_string(), script.to_string()], None, tx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ERROR: Video unavailable");

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events[0], YtDlpEvent::Title("Demo".to_string()));
        assert_eq!(events[1].percent(), 50.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_returns_printed_filepath() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let script = "echo 'RG_FILEPATH|/tmp/out.mp4'";
        let outcome = run("sh", &["-c".to_string(), script.to_string()], None, tx)
            .await
            .unwrap();
        assert_eq!(outcome.filepath, Some(PathBuf::from("/tmp/out.mp4")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_honours_timeout() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = run(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            Some(Duration::from_millis(100)),
            tx,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
