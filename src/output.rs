use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::warn;
use walkdir::WalkDir;

use crate::models::FormatType;

const IN_PROGRESS_MARKERS: [&str; 3] = [".part", ".tmp", ".ytdl"];

/// File names present in a directory at one point in time.
#[derive(Debug, Clone, Default)]
pub struct DirSnapshot {
    names: HashSet<String>,
}

impl DirSnapshot {
    pub fn capture(dir: &Path) -> Self {
        Self {
            names: list_files(dir).into_iter().map(|(name, _)| name).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

/// Finds the file a finished job produced. The path printed by the
/// downloader wins when it points at a file directly inside `dir`; otherwise
/// files that appeared since `before` and carry `marker` are considered.
pub fn locate_output(
    dir: &Path,
    printed: Option<&Path>,
    before: &DirSnapshot,
    format_type: FormatType,
    marker: &str,
) -> Option<LocatedFile> {
    if let Some(found) = printed.and_then(|p| printed_output(dir, p)) {
        return Some(found);
    }

    let mut candidates: Vec<(String, PathBuf)> = list_files(dir)
        .into_iter()
        .filter(|(name, _)| {
            !before.contains(name) && !is_in_progress(name) && name.contains(marker)
        })
        .collect();

    candidates.sort_by_key(|(name, path)| {
        let preferred = format_type == FormatType::Audio && has_extension(name, "mp3");
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        (preferred, modified)
    });

    let (filename, path) = candidates.pop()?;
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    Some(LocatedFile {
        path,
        filename,
        size,
    })
}

fn printed_output(dir: &Path, printed: &Path) -> Option<LocatedFile> {
    let meta = std::fs::metadata(printed).ok()?;
    if !meta.is_file() {
        return None;
    }

    let canonical = std::fs::canonicalize(printed).ok()?;
    let canonical_dir = std::fs::canonicalize(dir).ok()?;
    if canonical.parent() != Some(canonical_dir.as_path()) {
        warn!(
            "downloader reported {} outside {}; ignoring",
            printed.display(),
            dir.display()
        );
        return None;
    }

    let filename = canonical.file_name()?.to_string_lossy().into_owned();
    Some(LocatedFile {
        path: canonical_dir.join(&filename),
        filename,
        size: meta.len(),
    })
}

/// Joins `filename` onto `dir` when it is a single plain path component.
pub fn resolve_in_dir(dir: &Path, filename: &str) -> Option<PathBuf> {
    if filename.trim().is_empty() || filename.contains(['/', '\\']) {
        return None;
    }

    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(dir.join(filename)),
        _ => None,
    }
}

/// Removes a job's output file. Returns false when there was nothing to remove.
pub async fn remove_output(dir: &Path, filename: &str) -> Result<bool> {
    let Some(path) = resolve_in_dir(dir, filename) else {
        warn!("refusing to remove suspicious filename {filename:?}");
        return Ok(false);
    };

    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
    }
}

/// Reduces an uploaded file name to something safe to store on disk.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Claims `dir/stem.ext`, or `dir/stem (n).ext` for the first free `n`, by
/// creating it empty. Concurrent callers never receive the same path.
pub async fn reserve_unique_path(dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(format!("{stem}.{ext}"))
        } else {
            dir.join(format!("{stem} ({n}).{ext}"))
        };

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reserving {}", candidate.display()));
            }
        }
    }
}

/// Tag embedded in downloader output names so concurrent jobs with the same
/// title never share a file.
pub fn job_marker(job_id: i64) -> String {
    format!("[{job_id}]")
}

pub fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn is_in_progress(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IN_PROGRESS_MARKERS
        .iter()
        .any(|marker| lower.ends_with(marker) || lower.contains(&format!("{marker}-")))
}

fn list_files(dir: &Path) -> Vec<(String, PathBuf)> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                entry.into_path(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn touch(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[test]
    fn printed_path_wins_over_directory_diff() {
        let dir = tempfile::tempdir().unwrap();
        let before = DirSnapshot::capture(dir.path());
        let printed = touch(dir.path(), "Song.mp3", 7);
        touch(dir.path(), "Other.mp4", 3);

        let found =
            locate_output(dir.path(), Some(&printed), &before, FormatType::Video, "[1]").unwrap();
        assert_eq!(found.filename, "Song.mp3");
        assert_eq!(found.size, 7);
    }

    #[test]
    fn printed_path_outside_directory_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let stray = touch(elsewhere.path(), "stray.mp4", 1);
        let before = DirSnapshot::capture(dir.path());

        assert!(
            locate_output(dir.path(), Some(&stray), &before, FormatType::Video, "").is_none()
        );
    }

    #[test]
    fn fallback_ignores_old_and_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Existing Title.mp4", 4);
        let before = DirSnapshot::capture(dir.path());

        touch(dir.path(), "New Clip [4].mp4.part", 9);
        touch(dir.path(), "New Clip [4].f137.mp4.part-Frag3", 9);
        touch(dir.path(), "New Clip [4].mp4", 5);

        let found = locate_output(dir.path(), None, &before, FormatType::Video, "[4]").unwrap();
        assert_eq!(found.filename, "New Clip [4].mp4");
        assert_eq!(found.size, 5);
    }

    #[test]
    fn fallback_prefers_mp3_for_audio_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let before = DirSnapshot::capture(dir.path());
        touch(dir.path(), "Track [2].mp3", 2);
        std::thread::sleep(Duration::from_millis(20));
        touch(dir.path(), "Track [2].webm", 8);

        let audio = locate_output(dir.path(), None, &before, FormatType::Audio, "[2]").unwrap();
        assert_eq!(audio.filename, "Track [2].mp3");

        let video = locate_output(dir.path(), None, &before, FormatType::Video, "[2]").unwrap();
        assert_eq!(video.filename, "Track [2].webm");
    }

    #[test]
    fn nothing_new_means_no_output() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Same Title.mp4", 1);
        let before = DirSnapshot::capture(dir.path());
        assert!(locate_output(dir.path(), None, &before, FormatType::Video, "").is_none());
    }

    #[test]
    fn fallback_skips_files_from_other_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let before = DirSnapshot::capture(dir.path());
        touch(dir.path(), "Same Title [7].mp4", 3);
        std::thread::sleep(Duration::from_millis(20));
        touch(dir.path(), "Same Title [8].mp4", 6);

        let found = locate_output(dir.path(), None, &before, FormatType::Video, "[7]").unwrap();
        assert_eq!(found.filename, "Same Title [7].mp4");
        assert_eq!(found.size, 3);
        assert!(locate_output(dir.path(), None, &before, FormatType::Video, "[9]").is_none());
    }

    #[test]
    fn resolve_rejects_escapes() {
        let dir = Path::new("/srv/downloads");
        assert_eq!(
            resolve_in_dir(dir, "clip.mp4"),
            Some(PathBuf::from("/srv/downloads/clip.mp4"))
        );
        assert!(resolve_in_dir(dir, "../etc/passwd").is_none());
        assert!(resolve_in_dir(dir, "..").is_none());
        assert!(resolve_in_dir(dir, ".").is_none());
        assert!(resolve_in_dir(dir, "/etc/passwd").is_none());
        assert!(resolve_in_dir(dir, "a\\b.mp4").is_none());
        assert!(resolve_in_dir(dir, "  ").is_none());
    }

    #[tokio::test]
    async fn remove_is_noop_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "gone.mp4", 1);

        assert!(remove_output(dir.path(), "gone.mp4").await.unwrap());
        assert!(!dir.path().join("gone.mp4").exists());
        assert!(!remove_output(dir.path(), "gone.mp4").await.unwrap());
        assert!(!remove_output(dir.path(), "../gone.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn reserved_paths_skip_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let first = reserve_unique_path(dir.path(), "talk", "mp3").await.unwrap();
        assert_eq!(first, dir.path().join("talk.mp3"));
        assert!(first.exists());

        touch(dir.path(), "talk (1).mp3", 1);
        assert_eq!(
            reserve_unique_path(dir.path(), "talk", "mp3").await.unwrap(),
            dir.path().join("talk (2).mp3")
        );
    }

    #[tokio::test]
    async fn concurrent_reservations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let reservations = futures::future::join_all(
            (0..8).map(|_| reserve_unique_path(dir.path(), "song", "mp3")),
        )
        .await;

        let paths: HashSet<PathBuf> = reservations.into_iter().map(Result::unwrap).collect();
        assert_eq!(paths.len(), 8);
        assert!(paths.contains(&dir.path().join("song.mp3")));
        assert!(paths.contains(&dir.path().join("song (7).mp3")));
    }

    #[test]
    fn upload_names_are_sanitized() {
        assert_eq!(sanitize_filename("C:\\Users\\me\\song?.wav"), "song_.wav");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("...hidden.flac"), "hidden.flac");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("my track.m4a"), "my track.m4a");
    }
}
