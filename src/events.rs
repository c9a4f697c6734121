use serde_json::{Value, json};

use crate::models::DownloadJob;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    JobUpdate(DownloadJob),
    JobRemoved { id: i64 },
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JobUpdate(_) => "job_update",
            Self::JobRemoved { .. } => "job_removed",
        }
    }

    pub fn as_json_value(&self) -> Value {
        match self {
            Self::JobUpdate(job) => json!({
                "type": self.event_name(),
                "job_id": job.id,
                "status": job.status,
                "progress": job.progress,
                "title": job.title,
                "job": job.as_json_value(),
            }),
            Self::JobRemoved { id } => json!({
                "type": self.event_name(),
                "job_id": id,
            }),
        }
    }
}
