use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::sync::{Mutex, Semaphore, broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db::JobDb;
use crate::events::ServerEvent;
use crate::ffmpeg::{self, Mp3Settings, ToolStatus};
use crate::models::{DownloadJob, JobPatch, JobStatus};
use crate::output::{self, DirSnapshot, LocatedFile};
use crate::ytdlp::{self, YtDlpEvent, YtDlpRequest};

#[derive(Clone)]
pub struct JobRunner {
    db: Arc<JobDb>,
    events: broadcast::Sender<ServerEvent>,
    queue_tx: mpsc::Sender<i64>,
    handles: Arc<Mutex<HashMap<i64, tokio::task::JoinHandle<()>>>>,
    config: Arc<AppConfig>,
    tools: Arc<ToolStatus>,
}

impl JobRunner {
    pub fn new(
        db: Arc<JobDb>,
        events: broadcast::Sender<ServerEvent>,
        config: Arc<AppConfig>,
        tools: Arc<ToolStatus>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<i64>(1024);

        let runner = Arc::new(Self {
            db,
            events,
            queue_tx,
            handles: Arc::new(Mutex::new(HashMap::new())),
            config,
            tools,
        });

        runner.clone().spawn_dispatcher(queue_rx);
        runner
    }

    fn spawn_dispatcher(self: Arc<Self>, mut queue_rx: mpsc::Receiver<i64>) {
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(self.config.jobs_max_concurrent.max(1)));

            while let Some(job_id) = queue_rx.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        error!("dispatcher semaphore closed: {err}");
                        break;
                    }
                };

                // Held across spawn so the task cannot deregister before it is registered.
                let mut handles = self.handles.lock().await;
                let runner = self.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = runner.execute_job(job_id).await {
                        error!(job_id = %job_id, "job execution failed: {err:#}");
                    }
                    runner.handles.lock().await.remove(&job_id);
                });
                handles.insert(job_id, handle);
            }
        });
    }

    pub async fn enqueue(&self, job_id: i64) -> Result<()> {
        self.queue_tx
            .send(job_id)
            .await
            .context("job queue is closed")
    }

    /// Stops any in-flight work for the job, then removes its row, its output
    /// file and, for conversions, the uploaded source.
    pub async fn delete(&self, job_id: i64) -> Result<bool> {
        if let Some(handle) = self.handles.lock().await.remove(&job_id) {
            handle.abort();
            info!(job_id = %job_id, "aborted in-flight job");
        }

        let Some(job) = self.db.delete_job(job_id).await? else {
            return Ok(false);
        };

        if let Some(filename) = job.filename.as_deref() {
            let removed = output::remove_output(&self.config.download_dir(), filename).await?;
            if !removed {
                warn!(job_id = %job_id, "output file {filename} was already gone");
            }
        }

        if job.is_local_file {
            if let Some(name) = Path::new(&job.url).file_name() {
                let name = name.to_string_lossy();
                output::remove_output(&self.config.upload_dir(), &name).await?;
            }
        }

        self.broadcast(ServerEvent::JobRemoved { id: job_id });
        info!(job_id = %job_id, "job deleted");
        Ok(true)
    }

    async fn execute_job(&self, job_id: i64) -> Result<()> {
        let Some(job) = self.db.get_job(job_id).await? else {
            return Ok(());
        };

        if !self
            .db
            .transition(job_id, JobStatus::Pending, JobStatus::Downloading)
            .await?
        {
            return Ok(());
        }
        self.publish(job_id).await;
        info!(job_id = %job_id, url = %job.url, format = job.format_type.as_str(), "job started");

        let result = if job.is_local_file {
            self.run_conversion(&job).await
        } else {
            self.run_download(&job).await
        };

        match result {
            Ok(located) => {
                let (filename, size) = match &located {
                    Some(file) => {
                        info!(job_id = %job_id, "output at {}", file.path.display());
                        (Some(file.filename.as_str()), Some(file.size as i64))
                    }
                    None => {
                        warn!(job_id = %job_id, "finished but the output file could not be located");
                        (None, None)
                    }
                };
                self.db.complete(job_id, filename, size).await?;
                info!(job_id = %job_id, filename = ?filename, "job completed");
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(job_id = %job_id, "job failed: {message}");
                self.db.fail(job_id, &message).await?;
            }
        }

        self.publish(job_id).await;
        Ok(())
    }

    async fn run_download(&self, job: &DownloadJob) -> Result<Option<LocatedFile>> {
        let download_dir = self.config.download_dir();
        tokio::fs::create_dir_all(&download_dir)
            .await
            .with_context(|| format!("failed creating {}", download_dir.display()))?;

        let before = DirSnapshot::capture(&download_dir);
        let args = ytdlp::build_args(&YtDlpRequest {
            job_id: job.id,
            url: &job.url,
            platform: job.platform,
            format_type: job.format_type,
            quality: job.quality,
            download_dir: &download_dir,
            audio_quality_kbps: self.config.audio_quality_kbps,
            ffmpeg_location: self.tools.ffmpeg_dir(),
        });

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<YtDlpEvent>();
        let run = ytdlp::run(
            &self.config.ytdlp_cmd,
            &args,
            self.config.download_timeout(),
            event_tx,
        );
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                result = &mut run => break result?,
                Some(event) = event_rx.recv() => self.apply_ytdlp_event(job.id, event).await?,
            }
        };
        while let Ok(event) = event_rx.try_recv() {
            self.apply_ytdlp_event(job.id, event).await?;
        }

        Ok(output::locate_output(
            &download_dir,
            outcome.filepath.as_deref(),
            &before,
            job.format_type,
            &output::job_marker(job.id),
        ))
    }

    async fn apply_ytdlp_event(&self, job_id: i64, event: YtDlpEvent) -> Result<()> {
        match event {
            YtDlpEvent::Title(title) => {
                let patch = JobPatch {
                    title: Some(title),
                    ..Default::default()
                };
                if self.db.update_job(job_id, &patch).await? {
                    self.publish(job_id).await;
                }
            }
            YtDlpEvent::Progress { .. } => {
                let percent = event.percent().floor() as i64;
                if self.db.record_progress(job_id, percent).await?.is_some() {
                    self.publish(job_id).await;
                }
            }
            YtDlpEvent::Filepath(_) => {}
        }
        Ok(())
    }

    async fn run_conversion(&self, job: &DownloadJob) -> Result<Option<LocatedFile>> {
        let input = PathBuf::from(&job.url);
        if !input.is_file() {
            return Err(anyhow!("Uploaded file {} no longer exists", input.display()));
        }

        let download_dir = self.config.download_dir();
        tokio::fs::create_dir_all(&download_dir)
            .await
            .with_context(|| format!("failed creating {}", download_dir.display()))?;

        let stem = job
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("converted-{}", job.id));
        let target =
            output::reserve_unique_path(&download_dir, &output::sanitize_filename(&stem), "mp3")
                .await?;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<f64>();
        let settings = Mp3Settings::from_config(&self.config);
        let result = {
            let convert = ffmpeg::convert_to_mp3(
                &self.config.ffmpeg_cmd,
                &input,
                &target,
                &settings,
                self.config.download_timeout(),
                progress_tx,
            );
            tokio::pin!(convert);

            loop {
                tokio::select! {
                    result = &mut convert => break result,
                    Some(percent) = progress_rx.recv() => {
                        match self.db.record_progress(job.id, percent.floor() as i64).await {
                            Ok(Some(_)) => self.publish(job.id).await,
                            Ok(None) => {}
                            Err(err) => warn!(job_id = %job.id, "failed recording progress: {err:#}"),
                        }
                    }
                }
            }
        };

        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(err);
        }

        let size = tokio::fs::metadata(&target)
            .await
            .with_context(|| format!("converted file {} is missing", target.display()))?
            .len();

        if let Err(err) = tokio::fs::remove_file(&input).await {
            warn!(job_id = %job.id, "failed removing upload {}: {err}", input.display());
        }

        let filename = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("converted file has no name")?;
        Ok(Some(LocatedFile {
            path: target,
            filename,
            size,
        }))
    }

    async fn publish(&self, job_id: i64) {
        match self.db.get_job(job_id).await {
            Ok(Some(job)) => self.broadcast(ServerEvent::JobUpdate(job)),
            Ok(None) => {}
            Err(err) => warn!(job_id = %job_id, "failed loading job for broadcast: {err:#}"),
        }
    }

    fn broadcast(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}
