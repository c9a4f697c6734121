use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::db::JobDb;
use crate::events::ServerEvent;
use crate::ffmpeg::ToolStatus;
use crate::runner::JobRunner;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<JobDb>,
    pub runner: Arc<JobRunner>,
    pub events: broadcast::Sender<ServerEvent>,
    pub tools: Arc<ToolStatus>,
    pub build: BuildStamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildStamp {
    pub hash: String,
    pub timestamp: String,
    pub epoch: i64,
}

impl BuildStamp {
    pub fn capture() -> Self {
        let now = Utc::now();
        let epoch = option_env!("BUILD_EPOCH")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or_else(|| now.timestamp());
        let built_at = DateTime::<Utc>::from_timestamp(epoch, 0).unwrap_or(now);
        let hash = option_env!("BUILD_HASH")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("unknown")
            .to_string();

        Self {
            hash,
            timestamp: built_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            epoch: built_at.timestamp(),
        }
    }
}
