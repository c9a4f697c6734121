use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Highest percentage a job may show before it reaches `completed`.
pub const MAX_RUNNING_PROGRESS: i64 = 99;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Downloading)
                | (Self::Pending, Self::Failed)
                | (Self::Downloading, Self::Completed)
                | (Self::Downloading, Self::Failed)
        )
    }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "downloading" => Self::Downloading,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Instagram,
    Other,
    Local,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
            Self::Other => "other",
            Self::Local => "local",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Youtube => "YouTube",
            Self::Instagram => "Instagram",
            Self::Other => "Other",
            Self::Local => "Local file",
        }
    }
}

impl FromStr for Platform {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "youtube" => Self::Youtube,
            "instagram" => Self::Instagram,
            "other" => Self::Other,
            "local" => Self::Local,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    #[default]
    Video,
    Audio,
}

impl FormatType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Video => "Video (MP4)",
            Self::Audio => "Audio (MP3)",
        }
    }
}

impl FromStr for FormatType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "video" | "mp4" => Self::Video,
            "audio" | "mp3" => Self::Audio,
            _ => return Err(()),
        })
    }
}

/// Upper bound on video height requested from the downloader.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum VideoQuality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "2160p")]
    P2160,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
}

impl VideoQuality {
    pub const ALL: [VideoQuality; 5] = [
        Self::Best,
        Self::P2160,
        Self::P1080,
        Self::P720,
        Self::P480,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::P2160 => "2160p",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Best => "Best available",
            Self::P2160 => "4K (2160p)",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
        }
    }

    pub fn max_height(self) -> Option<u32> {
        match self {
            Self::Best => None,
            Self::P2160 => Some(2160),
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
        }
    }
}

impl FromStr for VideoQuality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == normalized)
            .ok_or(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub platform: Platform,
    pub format_type: FormatType,
    pub quality: VideoQuality,
    pub status: JobStatus,
    pub progress: i64,
    pub filename: Option<String>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub is_local_file: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("Fetching title…")
    }

    pub fn file_size_display(&self) -> Option<String> {
        self.file_size.map(|bytes| format_file_size(bytes.max(0) as u64))
    }

    pub fn as_json_value(&self) -> Value {
        json!({
            "id": self.id,
            "url": self.url,
            "title": self.title,
            "platform": self.platform,
            "format_type": self.format_type,
            "quality": self.quality,
            "status": self.status,
            "progress": self.progress,
            "filename": self.filename,
            "file_size": self.file_size_display(),
            "file_size_bytes": self.file_size,
            "error_message": self.error_message,
            "is_local_file": self.is_local_file,
            "created_at": self.created_at.to_rfc3339(),
            "completed_at": self.completed_at.map(|t| t.to_rfc3339()),
        })
    }
}

/// Fields supplied when a job row is created.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub url: String,
    pub platform: Platform,
    pub format_type: FormatType,
    pub quality: VideoQuality,
    pub is_local_file: bool,
}

/// Partial update; only the `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub title: Option<String>,
    pub progress: Option<i64>,
    pub filename: Option<String>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.progress.is_none()
            && self.filename.is_none()
            && self.file_size.is_none()
            && self.error_message.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateDownloadRequest {
    pub url: String,
    #[serde(default)]
    pub format_type: FormatType,
    #[serde(default)]
    pub quality: VideoQuality,
}

pub fn clamp_progress(raw: i64) -> i64 {
    raw.clamp(0, MAX_RUNNING_PROGRESS)
}

pub fn format_file_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0 B".to_string();
    }

    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size_bytes as f64;
    let mut unit = 0usize;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{size:.1} {}", UNITS[unit])
}
