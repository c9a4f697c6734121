mod api;
mod classifier;
mod config;
mod db;
mod events;
mod ffmpeg;
mod models;
mod output;
mod process;
mod runner;
mod state;
mod ui;
mod ytdlp;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db::JobDb;
use crate::events::ServerEvent;
use crate::ffmpeg::ToolStatus;
use crate::runner::JobRunner;
use crate::state::{AppState, BuildStamp};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::load());
    info!("configuration from {}", config.config_path.display());
    for dir in [config.download_dir(), config.upload_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed creating {}", dir.display()))?;
    }

    let db = Arc::new(JobDb::new(&config.database_path()).await?);
    let interrupted = db.fail_interrupted_jobs().await?;
    if interrupted > 0 {
        warn!("marked {interrupted} interrupted downloads from previous run as failed");
    }

    let tools = Arc::new(ToolStatus::detect(&config));
    for warning in tools.warnings() {
        warn!("{warning}");
    }

    let (events_tx, _events_rx) = broadcast::channel::<ServerEvent>(1024);
    let runner = JobRunner::new(db.clone(), events_tx.clone(), config.clone(), tools.clone());

    // Pending rows from previous sessions never started; run them now.
    for job_id in db.list_pending_job_ids().await? {
        if let Err(err) = runner.enqueue(job_id).await {
            warn!(job_id = %job_id, "failed to re-enqueue: {err:#}");
        }
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        runner,
        events: events_tx,
        tools,
        build: BuildStamp::capture(),
    });

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        build = %state.build.hash,
        download_dir = %config.download_dir().display(),
        "reelgrab-rs listening on http://{addr}"
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
