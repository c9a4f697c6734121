use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::AppConfig;
use crate::process::{LineTail, OutputLine, StreamKind, spawn_output_reader};

static DURATION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").ok()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3Settings {
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Mp3Settings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            bitrate_kbps: cfg.convert_bitrate_kbps,
            sample_rate: cfg.convert_sample_rate,
            channels: cfg.convert_channels,
        }
    }
}

pub fn mp3_args(input: &Path, output: &Path, settings: &Mp3Settings) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        format!("{}k", settings.bitrate_kbps),
        "-ar".to_string(),
        settings.sample_rate.to_string(),
        "-ac".to_string(),
        settings.channels.to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Input duration in seconds from ffmpeg's banner (`Duration: 00:03:12.45`).
pub fn parse_duration(line: &str) -> Option<f64> {
    let caps = DURATION_RE.as_ref()?.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Encoded position in seconds from a `-progress` line. Both keys carry
/// microseconds.
pub fn parse_out_time(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    if key != "out_time_us" && key != "out_time_ms" {
        return None;
    }
    let micros = value.trim().parse::<i64>().ok()?;
    (micros >= 0).then(|| micros as f64 / 1_000_000.0)
}

/// Transcodes `input` into an MP3 at `output`, sending percent updates while
/// the duration is known.
pub async fn convert_to_mp3(
    cmd: &str,
    input: &Path,
    output: &Path,
    settings: &Mp3Settings,
    timeout: Option<Duration>,
    progress: mpsc::UnboundedSender<f64>,
) -> Result<()> {
    let mut child = Command::new(cmd)
        .args(mp3_args(input, output, settings))
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

    let mut duration: Option<f64> = None;
    let mut tail = LineTail::new(20);

    let deadline = tokio::time::sleep(timeout.unwrap_or_default());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline, if timeout.is_some() => {
                let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("{cmd} timed out after {secs}s");
                let _ = child.kill().await;
                bail!("Conversion timed out after {secs} seconds");
            }
            maybe_line = line_rx.recv() => {
                let Some(line) = maybe_line else {
                    break;
                };
                match line.stream {
                    StreamKind::Stderr => {
                        if duration.is_none() {
                            duration = parse_duration(&line.text).filter(|d| *d > 0.0);
                        }
                        tail.push(&line.text);
                    }
                    StreamKind::Stdout => {
                        if let (Some(total), Some(done)) = (duration, parse_out_time(&line.text)) {
                            let _ = progress.send((done / total * 100.0).clamp(0.0, 100.0));
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
        if tail.is_empty() {
            return Err(anyhow!("ffmpeg exited with {status}"));
        }
        return Err(anyhow!("ffmpeg conversion failed: {}", tail.joined()));
    }

    Ok(())
}

/// Where the external binaries resolved at startup, if at all.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub ytdlp_cmd: String,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_cmd: String,
    pub ffmpeg_path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn detect(cfg: &AppConfig) -> Self {
        Self {
            ytdlp_cmd: cfg.ytdlp_cmd.clone(),
            ytdlp_path: which::which(&cfg.ytdlp_cmd).ok(),
            ffmpeg_cmd: cfg.ffmpeg_cmd.clone(),
            ffmpeg_path: which::which(&cfg.ffmpeg_cmd).ok(),
        }
    }

    pub fn ytdlp_available(&self) -> bool {
        self.ytdlp_path.is_some()
    }

    pub fn ffmpeg_available(&self) -> bool {
        self.ffmpeg_path.is_some()
    }

    /// Directory handed to yt-dlp's `--ffmpeg-location`.
    pub fn ffmpeg_dir(&self) -> Option<&Path> {
        self.ffmpeg_path.as_deref().and_then(Path::parent)
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.ytdlp_available() {
            out.push(format!(
                "{} was not found on PATH; downloads will fail until it is installed.",
                self.ytdlp_cmd
            ));
        }
        if !self.ffmpeg_available() {
            out.push(format!(
                "{} was not found on PATH; MP3 extraction and file conversion are unavailable.",
                self.ffmpeg_cmd
            ));
        }
        out
    }

    pub fn as_json_value(&self) -> Value {
        json!({
            "ytdlp": {
                "command": self.ytdlp_cmd,
                "path": self.ytdlp_path,
                "available": self.ytdlp_available(),
            },
            "ffmpeg": {
                "command": self.ffmpeg_cmd,
                "path": self.ffmpeg_path,
                "available": self.ffmpeg_available(),
            },
        })
    }
}
