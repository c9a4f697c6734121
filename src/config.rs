use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Default)]
struct FileConfig {
    bind_addr: Option<String>,
    database_path: Option<String>,
    download_dir: Option<String>,
    upload_dir: Option<String>,
    jobs_max_concurrent: Option<usize>,
    #[serde(alias = "yt_dlp_cmd")]
    ytdlp_cmd: Option<String>,
    ffmpeg_cmd: Option<String>,
    audio_quality_kbps: Option<u32>,
    convert_bitrate_kbps: Option<u32>,
    convert_sample_rate: Option<u32>,
    convert_channels: Option<u32>,
    download_timeout_seconds: Option<u64>,
    allow_other_platforms: Option<bool>,
    max_upload_mb: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RootConfig {
    #[serde(default, flatten)]
    top: FileConfig,
    reelgrab: Option<FileConfig>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub download_dir: String,
    pub upload_dir: String,
    pub jobs_max_concurrent: usize,
    pub ytdlp_cmd: String,
    pub ffmpeg_cmd: String,
    pub audio_quality_kbps: u32,
    pub convert_bitrate_kbps: u32,
    pub convert_sample_rate: u32,
    pub convert_channels: u32,
    /// 0 disables the limit.
    pub download_timeout_seconds: u64,
    pub allow_other_platforms: bool,
    pub max_upload_mb: usize,
    pub config_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            database_path: "./reelgrab-data/downloads.db".to_string(),
            download_dir: "./downloads".to_string(),
            upload_dir: "./uploads".to_string(),
            jobs_max_concurrent: 2,
            ytdlp_cmd: "yt-dlp".to_string(),
            ffmpeg_cmd: "ffmpeg".to_string(),
            audio_quality_kbps: 192,
            convert_bitrate_kbps: 320,
            convert_sample_rate: 44100,
            convert_channels: 2,
            download_timeout_seconds: 3600,
            allow_other_platforms: false,
            max_upload_mb: 512,
            config_path: PathBuf::from("config.toml"),
        }
    }
}

impl AppConfig {
    pub fn load() -> Self {
        let mut cfg = Self::default();

        let config_path = find_config_file().unwrap_or_else(|| config_search_paths()[0].clone());
        cfg.config_path = config_path.clone();

        match load_root_config(&config_path) {
            Ok(root) => cfg.apply_root(root),
            Err(err) => warn!("ignoring config file {}: {err:#}", config_path.display()),
        }

        cfg.apply_env();
        cfg
    }

    fn apply_root(&mut self, root: RootConfig) {
        let RootConfig { top, reelgrab } = root;
        self.apply_file(top);
        if let Some(section) = reelgrab {
            self.apply_file(section);
        }
    }

    fn apply_file(&mut self, file_cfg: FileConfig) {
        set_opt(&mut self.bind_addr, file_cfg.bind_addr);
        set_opt(&mut self.database_path, file_cfg.database_path);
        set_opt(&mut self.download_dir, file_cfg.download_dir);
        set_opt(&mut self.upload_dir, file_cfg.upload_dir);
        set_opt_usize_min(
            &mut self.jobs_max_concurrent,
            file_cfg.jobs_max_concurrent,
            1,
        );
        set_opt(&mut self.ytdlp_cmd, file_cfg.ytdlp_cmd);
        set_opt(&mut self.ffmpeg_cmd, file_cfg.ffmpeg_cmd);
        set_opt_u32_min(
            &mut self.audio_quality_kbps,
            file_cfg.audio_quality_kbps,
            32,
        );
        set_opt_u32_min(
            &mut self.convert_bitrate_kbps,
            file_cfg.convert_bitrate_kbps,
            32,
        );
        set_opt_u32_min(
            &mut self.convert_sample_rate,
            file_cfg.convert_sample_rate,
            8000,
        );
        set_opt_u32_min(&mut self.convert_channels, file_cfg.convert_channels, 1);
        set_opt(
            &mut self.download_timeout_seconds,
            file_cfg.download_timeout_seconds,
        );
        set_opt(
            &mut self.allow_other_platforms,
            file_cfg.allow_other_platforms,
        );
        set_opt_usize_min(&mut self.max_upload_mb, file_cfg.max_upload_mb, 1);
    }

    fn apply_env(&mut self) {
        let env_cfg = FileConfig {
            bind_addr: env_string("REELGRAB_BIND_ADDR"),
            database_path: env_string("REELGRAB_DATABASE_PATH"),
            download_dir: env_string("REELGRAB_DOWNLOAD_DIR"),
            upload_dir: env_string("REELGRAB_UPLOAD_DIR"),
            jobs_max_concurrent: env_parse("REELGRAB_JOBS_MAX_CONCURRENT"),
            ytdlp_cmd: env_string("REELGRAB_YTDLP_CMD"),
            ffmpeg_cmd: env_string("REELGRAB_FFMPEG_CMD"),
            audio_quality_kbps: env_parse("REELGRAB_AUDIO_QUALITY_KBPS"),
            convert_bitrate_kbps: env_parse("REELGRAB_CONVERT_BITRATE_KBPS"),
            convert_sample_rate: env_parse("REELGRAB_CONVERT_SAMPLE_RATE"),
            convert_channels: env_parse("REELGRAB_CONVERT_CHANNELS"),
            download_timeout_seconds: env_parse("REELGRAB_DOWNLOAD_TIMEOUT_SECONDS"),
            allow_other_platforms: env_parse("REELGRAB_ALLOW_OTHER_PLATFORMS"),
            max_upload_mb: env_parse("REELGRAB_MAX_UPLOAD_MB"),
        };
        self.apply_file(env_cfg);
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.download_dir)
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.upload_dir)
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        (self.download_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.download_timeout_seconds))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("config.toml"), PathBuf::from("reelgrab.toml")];
    if let Some(home) = dirs_home() {
        paths.push(home.join(".config").join("reelgrab").join("config.toml"));
    }
    paths
}

pub fn find_config_file() -> Option<PathBuf> {
    config_search_paths().into_iter().find(|path| path.exists())
}

fn dirs_home() -> Option<PathBuf> {
    env::var("HOME").ok().map(PathBuf::from)
}

fn load_root_config(path: &Path) -> Result<RootConfig> {
    if !path.exists() {
        return Ok(RootConfig::default());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("failed reading {path:?}"))?;
    parse_root_config(&raw)
}

fn parse_root_config(raw: &str) -> Result<RootConfig> {
    toml::from_str::<RootConfig>(raw).context("failed parsing config as root structure")
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn set_opt<T>(dst: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *dst = v;
    }
}

fn set_opt_usize_min(dst: &mut usize, value: Option<usize>, min: usize) {
    if let Some(v) = value {
        *dst = v.max(min);
    }
}

fn set_opt_u32_min(dst: &mut u32, value: Option<u32>, min: u32) {
    if let Some(v) = value {
        *dst = v.max(min);
    }
}
