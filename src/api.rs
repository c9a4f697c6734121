use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_stream::stream;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Form, Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use mime_guess::MimeGuess;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::classifier::{self, UrlRejection};
use crate::db::CreateOutcome;
use crate::events::ServerEvent;
use crate::models::{
    CreateDownloadRequest, DownloadJob, FormatType, JobPatch, JobStatus, NewJob, Platform,
    VideoQuality,
};
use crate::output;
use crate::state::AppState;
use crate::ui::{self, PageContext};

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/health", get(health))
        .route("/", get(index_page))
        .route("/downloads/rows", get(job_rows))
        .route("/download", post(submit_download_form))
        .route("/convert", post(submit_convert_form))
        .route("/delete/{id}", post(delete_job_form))
        .route("/download_file/{id}", get(download_file))
        .route("/api/status", get(api_status))
        .route("/api/events", get(stream_events))
        .route("/api/downloads", get(list_downloads).post(create_download))
        .route(
            "/api/download/{id}",
            get(get_download).delete(delete_download),
        )
        .route("/api/download/{id}/stream", get(stream_download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn index_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let jobs = state.db.list_jobs().await?;
    let download_dir = state.config.download_dir();
    let ctx = PageContext {
        msg: query.get("msg").map(String::as_str),
        tools: &state.tools,
        build: &state.build,
        download_dir: &download_dir,
        allow_other_platforms: state.config.allow_other_platforms,
        max_upload_mb: state.config.max_upload_mb,
    };

    let page = ui::render_index_page(&ctx, &jobs);
    Ok(Html(page).into_response())
}

async fn job_rows(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let jobs = state.db.list_jobs().await?;
    let fragment = ui::render_job_rows(&jobs, &state.config.download_dir());
    Ok(Html(fragment).into_response())
}

enum Submission {
    Created(DownloadJob),
    Duplicate,
    Rejected(UrlRejection),
}

/// Classifies the URL, inserts the row unless an unfinished or successful job
/// for the same URL exists, then queues it.
async fn submit_download(
    state: &AppState,
    url: &str,
    format_type: FormatType,
    quality: VideoQuality,
) -> Result<Submission> {
    let platform = match classifier::classify(url, state.config.allow_other_platforms) {
        Ok(platform) => platform,
        Err(rejection) => return Ok(Submission::Rejected(rejection)),
    };

    let quality = match format_type {
        FormatType::Video => quality,
        FormatType::Audio => VideoQuality::Best,
    };
    let new_job = NewJob {
        url: url.trim().to_string(),
        platform,
        format_type,
        quality,
        is_local_file: false,
    };

    match state.db.create_job(&new_job).await? {
        CreateOutcome::Created(job) => {
            info!(job_id = %job.id, url = %job.url, format = format_type.as_str(), "download submitted");
            queue_job(state, &job).await?;
            Ok(Submission::Created(job))
        }
        CreateOutcome::Duplicate => {
            info!(url = %new_job.url, "duplicate submission ignored");
            Ok(Submission::Duplicate)
        }
    }
}

async fn queue_job(state: &AppState, job: &DownloadJob) -> Result<()> {
    let _ = state.events.send(ServerEvent::JobUpdate(job.clone()));
    state.runner.enqueue(job.id).await
}

async fn submit_download_form(
    State(state): State<Arc<AppState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let url = form.get("url").map(String::as_str).unwrap_or_default();
    let format_type = form
        .get("format_type")
        .and_then(|v| v.parse::<FormatType>().ok())
        .unwrap_or_default();
    let quality = form
        .get("quality")
        .and_then(|v| v.parse::<VideoQuality>().ok())
        .unwrap_or_default();

    let code = match submit_download(&state, url, format_type, quality).await {
        Ok(Submission::Created(job)) => match job.format_type {
            FormatType::Video => "submitted-video",
            FormatType::Audio => "submitted-audio",
        },
        Ok(Submission::Duplicate) => "duplicate",
        Ok(Submission::Rejected(rejection)) => rejection.code(),
        Err(err) => {
            error!("download submission failed: {err:#}");
            "error"
        }
    };

    Ok(redirect_with(code))
}

async fn submit_convert_form(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload_dir = state.config.upload_dir();
    let stored = match store_upload(&upload_dir, multipart).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return Ok(redirect_with("upload-empty")),
        Err(err) => {
            warn!("upload failed: {err:#}");
            return Ok(redirect_with("upload-failed"));
        }
    };

    match create_conversion_job(&state, &stored).await {
        Ok(()) => Ok(redirect_with("converting")),
        Err(err) => {
            error!("conversion submission failed: {err:#}");
            if let Err(cleanup) = tokio::fs::remove_file(&stored.path).await {
                warn!("failed removing upload {}: {cleanup}", stored.path.display());
            }
            Ok(redirect_with("error"))
        }
    }
}

struct StoredUpload {
    path: PathBuf,
    title: String,
}

/// Streams the first non-empty `file` field into `dir`. A partially written
/// file is removed before any error is returned.
async fn store_upload(dir: &FsPath, mut multipart: Multipart) -> Result<Option<StoredUpload>> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .context("malformed multipart body")?
    {
        if field.name() != Some("file") {
            continue;
        }
        let Some(original) = field.file_name().filter(|n| !n.trim().is_empty()) else {
            continue;
        };

        let safe_name = output::sanitize_filename(original);
        let title = FsPath::new(&safe_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| safe_name.clone());
        let path = dir.join(format!("{}-{safe_name}", uuid::Uuid::new_v4().simple()));

        let mut written = 0u64;
        let result: Result<()> = async {
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("failed creating {}", path.display()))?;
            while let Some(chunk) = field.chunk().await.context("upload interrupted")? {
                file.write_all(&chunk)
                    .await
                    .with_context(|| format!("failed writing {}", path.display()))?;
                written += chunk.len() as u64;
            }
            file.flush().await.context("failed flushing upload")?;
            Ok(())
        }
        .await;

        if result.is_err() || written == 0 {
            let _ = tokio::fs::remove_file(&path).await;
        }
        result?;
        if written == 0 {
            return Ok(None);
        }

        info!(bytes = written, "stored upload {}", path.display());
        return Ok(Some(StoredUpload { path, title }));
    }

    Ok(None)
}

async fn create_conversion_job(state: &AppState, stored: &StoredUpload) -> Result<()> {
    let new_job = NewJob {
        url: stored.path.to_string_lossy().into_owned(),
        platform: Platform::Local,
        format_type: FormatType::Audio,
        quality: VideoQuality::Best,
        is_local_file: true,
    };

    let CreateOutcome::Created(job) = state.db.create_job(&new_job).await? else {
        anyhow::bail!("upload {} is already queued", stored.path.display());
    };

    let patch = JobPatch {
        title: Some(stored.title.clone()),
        ..JobPatch::default()
    };
    state.db.update_job(job.id, &patch).await?;
    let job = DownloadJob {
        title: patch.title,
        ..job
    };

    info!(job_id = %job.id, "conversion submitted");
    queue_job(state, &job).await
}

async fn delete_job_form(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let code = match state.runner.delete(id).await {
        Ok(true) => "deleted",
        Ok(false) => "not-found",
        Err(err) => {
            error!(job_id = %id, "delete failed: {err:#}");
            "error"
        }
    };
    Ok(redirect_with(code))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let Some(job) = state.db.get_job(id).await? else {
        return Ok(redirect_with("not-found"));
    };

    let download_dir = state.config.download_dir();
    let path = job
        .filename
        .as_deref()
        .filter(|_| job.status == JobStatus::Completed)
        .and_then(|name| output::resolve_in_dir(&download_dir, name));
    let Some(path) = path else {
        return Ok(redirect_with("file-missing"));
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            warn!(job_id = %id, "cannot serve {}: {err}", path.display());
            return Ok(redirect_with("file-missing"));
        }
    };
    let metadata = file.metadata().await.map_err(ApiError::internal)?;
    if !metadata.is_file() {
        return Ok(redirect_with("file-missing"));
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("download-{id}"));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type_for(&filename)).map_err(ApiError::internal)?,
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&filename)).map_err(ApiError::internal)?,
    );

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

fn content_type_for(filename: &str) -> String {
    MimeGuess::from_path(filename)
        .first_or_octet_stream()
        .to_string()
}

/// `attachment` header with an ASCII fallback name plus the RFC 5987 form,
/// since titles are routinely non-ASCII.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn redirect_with(code: &str) -> Response {
    Redirect::to(&format!("/?msg={code}")).into_response()
}

async fn api_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let active = state.db.count_active().await?;
    Ok(Json(json!({
        "tools": state.tools.as_json_value(),
        "warnings": state.tools.warnings(),
        "active_jobs": active,
        "build": state.build,
        "config": {
            "path": state.config.config_path,
            "jobs_max_concurrent": state.config.jobs_max_concurrent,
            "allow_other_platforms": state.config.allow_other_platforms,
            "max_upload_mb": state.config.max_upload_mb,
            "download_dir": state.config.download_dir(),
        },
    })))
}

async fn list_downloads(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let jobs = state.db.list_jobs().await?;
    Ok(Json(jobs.iter().map(DownloadJob::as_json_value).collect()))
}

async fn get_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let Some(job) = state.db.get_job(id).await? else {
        return Err(ApiError::not_found("download not found"));
    };
    Ok(Json(job.as_json_value()))
}

async fn create_download(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDownloadRequest>,
) -> Result<Response, ApiError> {
    match submit_download(&state, &payload.url, payload.format_type, payload.quality).await? {
        Submission::Created(job) => {
            Ok((StatusCode::CREATED, Json(job.as_json_value())).into_response())
        }
        Submission::Duplicate => Err(ApiError::conflict(
            "this URL is already being downloaded or has been downloaded",
        )),
        Submission::Rejected(rejection) => Err(ApiError::bad_request(rejection.message())),
    }
}

async fn delete_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if !state.runner.delete(id).await? {
        return Err(ApiError::not_found("download not found"));
    }
    Ok(Json(json!({"deleted": true, "id": id})))
}

async fn stream_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before reading so a terminal update cannot slip in between.
    let mut rx = state.events.subscribe();
    let Some(initial_job) = state.db.get_job(id).await? else {
        return Err(ApiError::not_found("download not found"));
    };

    let db = state.db.clone();
    let stream = stream! {
        yield Ok(Event::default().event("progress").data(progress_payload(&initial_job).to_string()));

        if initial_job.status.is_terminal() {
            yield Ok(Event::default().event("complete").data(initial_job.as_json_value().to_string()));
            return;
        }

        loop {
            let latest = match rx.recv().await {
                Ok(ServerEvent::JobUpdate(job)) if job.id == id => Some(job),
                Ok(ServerEvent::JobRemoved { id: removed }) if removed == id => None,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(job_id = %id, "download stream lagged by {skipped} events; reloading");
                    match db.get_job(id).await {
                        Ok(job) => job,
                        Err(err) => {
                            error!(job_id = %id, "failed reloading job: {err:#}");
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(job) = latest else {
                yield Ok(Event::default().event("removed").data(json!({"job_id": id}).to_string()));
                break;
            };
            yield Ok(Event::default().event("progress").data(progress_payload(&job).to_string()));
            if job.status.is_terminal() {
                yield Ok(Event::default().event("complete").data(job.as_json_value().to_string()));
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10))))
}

fn progress_payload(job: &DownloadJob) -> Value {
    json!({
        "job_id": job.id,
        "status": job.status,
        "progress": job.progress,
        "title": job.title,
        "error_message": job.error_message,
    })
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Ok(Event::default().event(event.event_name()).data(event.as_json_value().to_string()));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("event stream lagged by {skipped} events");
                    yield Ok(Event::default().event("resync").data(json!({"skipped": skipped}).to_string()));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    detail: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        error!("request failed: {value:#}");
        Self::internal(format!("{value:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message.clone(),
            detail: self.message,
        });
        (self.status, body).into_response()
    }
}
