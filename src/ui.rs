use std::path::Path;

use html_compile::compile::build_component;
use html_compile::types::{Attribute, Child, Component};

use crate::classifier::UrlRejection;
use crate::ffmpeg::ToolStatus;
use crate::models::{DownloadJob, FormatType, JobStatus, VideoQuality};
use crate::output;
use crate::state::BuildStamp;

const BASE_CSS: &str = include_str!("ui_assets/base.css");
const INDEX_JS: &str = include_str!("ui_assets/index.js");

/// What the index page needs besides the job list.
pub struct PageContext<'a> {
    pub msg: Option<&'a str>,
    pub tools: &'a ToolStatus,
    pub build: &'a BuildStamp,
    pub download_dir: &'a Path,
    pub allow_other_platforms: bool,
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BannerKind {
    Success,
    Info,
    Error,
}

impl BannerKind {
    fn class(self) -> &'static str {
        match self {
            Self::Success => "banner banner-success",
            Self::Info => "banner banner-info",
            Self::Error => "banner banner-error",
        }
    }
}

#[derive(Debug, Clone)]
struct UiElement {
    tag: &'static str,
    attrs: Vec<(&'static str, String)>,
    content: UiContent,
}

#[derive(Debug, Clone)]
enum UiContent {
    Empty,
    Text(String),
    Children(Vec<UiElement>),
}

impl UiElement {
    fn new(tag: &'static str) -> Self {
        Self {
            tag,
            attrs: Vec::new(),
            content: UiContent::Empty,
        }
    }

    fn with_attr(mut self, label: &'static str, value: impl Into<String>) -> Self {
        self.attrs.push((label, value.into()));
        self
    }

    fn maybe_attr(
        mut self,
        condition: bool,
        label: &'static str,
        value: impl Into<String>,
    ) -> Self {
        if condition {
            self.attrs.push((label, value.into()));
        }
        self
    }

    fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content = UiContent::Text(text.into());
        self
    }

    fn with_children(mut self, children: Vec<UiElement>) -> Self {
        self.content = UiContent::Children(children);
        self
    }

    fn render(&self) -> String {
        build_component(&self.to_component())
    }

    fn to_component<'a>(&'a self) -> Component<'a> {
        let meta = if self.attrs.is_empty() {
            None
        } else {
            Some(
                self.attrs
                    .iter()
                    .map(|(label, value)| Attribute {
                        label,
                        value: value.as_str(),
                    })
                    .collect(),
            )
        };

        let child = match &self.content {
            UiContent::Empty => Child::NoChild,
            UiContent::Text(value) => Child::Text(value.as_str()),
            UiContent::Children(nodes) => Child::ComponentVec(
                nodes
                    .iter()
                    .map(|node| Box::new(node.to_component()))
                    .collect(),
            ),
        };

        Component {
            tag: self.tag,
            meta,
            child,
        }
    }
}

fn el(tag: &'static str) -> UiElement {
    UiElement::new(tag)
}

fn text_el(tag: &'static str, text: impl Into<String>) -> UiElement {
    UiElement::new(tag).with_text(text)
}

/// Text node content is not escaped by the renderer.
fn safe_text_el(tag: &'static str, text: &str) -> UiElement {
    text_el(tag, escape_html(text))
}

fn option(value: &str, label: &str, selected: bool) -> UiElement {
    el("option")
        .with_attr("value", value)
        .maybe_attr(selected, "selected", "selected")
        .with_text(label)
}

fn radio(name: &str, value: &str, label: &str, checked: bool) -> UiElement {
    el("label").with_attr("class", "radio").with_children(vec![
        el("input")
            .with_attr("type", "radio")
            .with_attr("name", name)
            .with_attr("value", value)
            .maybe_attr(checked, "checked", "checked"),
        text_el("span", label),
    ])
}

fn banner_for(code: &str) -> Option<(BannerKind, String)> {
    let (kind, text) = match code {
        "submitted-video" => (BannerKind::Success, "Video download queued."),
        "submitted-audio" => (BannerKind::Success, "Audio download queued."),
        "converting" => (BannerKind::Success, "File uploaded. Conversion to MP3 queued."),
        "duplicate" => (
            BannerKind::Info,
            "This URL is already being downloaded or has been downloaded.",
        ),
        "deleted" => (BannerKind::Info, "Download removed."),
        "not-found" => (BannerKind::Error, "That download no longer exists."),
        "file-missing" => (BannerKind::Error, "The file is no longer available on disk."),
        "upload-empty" => (BannerKind::Error, "Choose a file to convert."),
        "upload-failed" => (BannerKind::Error, "The upload could not be stored."),
        "error" => (BannerKind::Error, "Something went wrong. Check the server log."),
        "empty-url" => (BannerKind::Error, UrlRejection::Empty.message()),
        "invalid-url" => (BannerKind::Error, UrlRejection::Invalid.message()),
        "unsupported" => (BannerKind::Error, UrlRejection::Unsupported.message()),
        _ => return None,
    };
    Some((kind, text.to_string()))
}

fn render_banners(ctx: &PageContext<'_>) -> Vec<UiElement> {
    let mut banners = Vec::new();

    if let Some((kind, text)) = ctx.msg.and_then(banner_for) {
        banners.push(safe_text_el("div", &text).with_attr("class", kind.class()));
    }

    for warning in ctx.tools.warnings() {
        banners.push(safe_text_el("div", &warning).with_attr("class", BannerKind::Error.class()));
    }

    banners
}

fn render_download_form(allow_other: bool) -> UiElement {
    let hint = if allow_other {
        "YouTube, Instagram or any other site yt-dlp supports."
    } else {
        "YouTube (videos, Shorts, youtu.be links) and Instagram (posts, reels)."
    };

    let qualities = VideoQuality::ALL
        .iter()
        .map(|q| option(q.as_str(), q.label(), *q == VideoQuality::Best))
        .collect();

    el("section").with_attr("class", "card").with_children(vec![
        text_el("h2", "New download"),
        el("form")
            .with_attr("method", "POST")
            .with_attr("action", "/download")
            .with_attr("id", "download-form")
            .with_children(vec![
                text_el("label", "Media URL").with_attr("for", "url"),
                el("input")
                    .with_attr("type", "text")
                    .with_attr("name", "url")
                    .with_attr("id", "url")
                    .with_attr("placeholder", "https://www.youtube.com/watch?v=...")
                    .with_attr("autocomplete", "off")
                    .with_attr("autofocus", "autofocus"),
                text_el("p", hint).with_attr("class", "hint"),
                el("div").with_attr("class", "form-row").with_children(vec![
                    el("fieldset").with_children(vec![
                        text_el("legend", "Format"),
                        radio("format_type", FormatType::Video.as_str(), FormatType::Video.label(), true),
                        radio("format_type", FormatType::Audio.as_str(), FormatType::Audio.label(), false),
                    ]),
                    el("div")
                        .with_attr("class", "quality")
                        .with_attr("id", "quality-field")
                        .with_children(vec![
                            text_el("label", "Video quality").with_attr("for", "quality"),
                            el("select")
                                .with_attr("name", "quality")
                                .with_attr("id", "quality")
                                .with_children(qualities),
                        ]),
                ]),
                text_el("button", "Download").with_attr("type", "submit"),
            ]),
    ])
}

fn render_convert_form(ctx: &PageContext<'_>) -> UiElement {
    let mut children = vec![
        text_el("h2", "Convert a local file to MP3"),
        text_el(
            "p",
            format!(
                "Audio or video files up to {} MB are re-encoded to MP3.",
                ctx.max_upload_mb
            ),
        )
        .with_attr("class", "hint"),
    ];

    if ctx.tools.ffmpeg_available() {
        children.push(
            el("form")
                .with_attr("method", "POST")
                .with_attr("action", "/convert")
                .with_attr("enctype", "multipart/form-data")
                .with_children(vec![
                    el("input")
                        .with_attr("type", "file")
                        .with_attr("name", "file")
                        .with_attr("accept", "audio/*,video/*"),
                    text_el("button", "Convert").with_attr("type", "submit"),
                ]),
        );
    } else {
        children.push(
            text_el("p", "Conversion is unavailable until ffmpeg is installed.")
                .with_attr("class", "hint"),
        );
    }

    el("section")
        .with_attr("class", "card")
        .with_children(children)
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "Pending",
        JobStatus::Downloading => "Downloading",
        JobStatus::Completed => "Completed",
        JobStatus::Failed => "Failed",
    }
}

fn render_job_state(job: &DownloadJob, download_dir: &Path) -> Vec<UiElement> {
    let mut nodes = vec![
        text_el("span", status_label(job.status))
            .with_attr("class", format!("status status-{}", job.status.as_str())),
    ];

    match job.status {
        JobStatus::Pending => {
            nodes.push(text_el("span", "Waiting in queue").with_attr("class", "muted"));
        }
        JobStatus::Downloading => {
            nodes.push(
                el("div").with_attr("class", "progress").with_children(vec![
                    el("div")
                        .with_attr("class", "progress-bar")
                        .with_attr("style", format!("width: {}%;", job.progress)),
                ]),
            );
            nodes.push(text_el("span", format!("{}%", job.progress)).with_attr("class", "muted"));
        }
        JobStatus::Failed => {
            let message = job.error_message.as_deref().unwrap_or("Unknown error");
            nodes.push(safe_text_el("div", message).with_attr("class", "job-error"));
        }
        JobStatus::Completed => {
            if let Some(size) = job.file_size_display() {
                nodes.push(text_el("span", size).with_attr("class", "muted"));
            }
            let on_disk = job
                .filename
                .as_deref()
                .and_then(|name| output::resolve_in_dir(download_dir, name))
                .map(|path| path.is_file())
                .unwrap_or(false);
            if on_disk {
                nodes.push(
                    text_el("a", "Download file")
                        .with_attr("class", "btn")
                        .with_attr("href", format!("/download_file/{}", job.id)),
                );
            } else {
                nodes.push(text_el("span", "File not available").with_attr("class", "muted"));
            }
        }
    }

    nodes
}

fn render_job_row(job: &DownloadJob, download_dir: &Path) -> UiElement {
    let mut meta = vec![
        text_el("span", job.platform.label())
            .with_attr("class", format!("badge badge-{}", job.platform.as_str())),
        text_el("span", job.format_type.label()).with_attr("class", "badge"),
    ];
    if job.format_type == FormatType::Video && job.quality != VideoQuality::Best {
        meta.push(text_el("span", job.quality.label()).with_attr("class", "badge"));
    }
    meta.push(
        text_el("span", job.created_at.format("%Y-%m-%d %H:%M UTC").to_string())
            .with_attr("class", "muted"),
    );

    let mut main = vec![
        safe_text_el("div", job.display_title()).with_attr("class", "job-title"),
        el("div").with_attr("class", "job-meta").with_children(meta),
    ];
    if !job.is_local_file {
        main.push(safe_text_el("div", &job.url).with_attr("class", "job-url"));
    }

    el("div")
        .with_attr("class", "job-row")
        .with_attr("data-job-id", job.id.to_string())
        .with_attr("data-status", job.status.as_str())
        .with_children(vec![
            el("div").with_attr("class", "job-main").with_children(main),
            el("div")
                .with_attr("class", "job-state")
                .with_children(render_job_state(job, download_dir)),
            el("form")
                .with_attr("method", "POST")
                .with_attr("action", format!("/delete/{}", job.id))
                .with_attr("class", "job-delete")
                .with_attr("onsubmit", "return confirm('Delete this download?');")
                .with_children(vec![
                    text_el("button", "Delete")
                        .with_attr("type", "submit")
                        .with_attr("class", "secondary"),
                ]),
        ])
}

fn render_job_list(jobs: &[DownloadJob], download_dir: &Path) -> Vec<UiElement> {
    if jobs.is_empty() {
        return vec![text_el("p", "No downloads yet.").with_attr("class", "empty")];
    }
    jobs.iter()
        .map(|job| render_job_row(job, download_dir))
        .collect()
}

/// Job list fragment swapped into the page when events arrive.
pub fn render_job_rows(jobs: &[DownloadJob], download_dir: &Path) -> String {
    render_job_list(jobs, download_dir)
        .iter()
        .map(UiElement::render)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_index_page(ctx: &PageContext<'_>, jobs: &[DownloadJob]) -> String {
    let active = jobs.iter().filter(|j| !j.status.is_terminal()).count();

    let mut content = vec![el("header").with_children(vec![
        text_el("h1", "ReelGrab"),
        text_el("p", "Save YouTube and Instagram media as MP4 video or MP3 audio.")
            .with_attr("class", "hint"),
    ])];
    content.extend(render_banners(ctx));
    content.push(render_download_form(ctx.allow_other_platforms));
    content.push(render_convert_form(ctx));
    content.push(el("section").with_attr("class", "card").with_children(vec![
        el("div").with_attr("class", "list-header").with_children(vec![
            text_el("h2", "Downloads"),
            text_el("span", format!("{active} active"))
                .with_attr("class", "muted")
                .with_attr("id", "active-count"),
        ]),
        el("div")
            .with_attr("id", "job-list")
            .with_attr("data-rows-url", "/downloads/rows")
            .with_children(render_job_list(jobs, ctx.download_dir)),
    ]));

    let footer = text_el(
        "footer",
        format!(
            "build {} &middot; {}",
            escape_html(&ctx.build.hash),
            escape_html(&ctx.build.timestamp)
        ),
    )
    .with_attr("data-epoch", ctx.build.epoch.to_string());

    render_document(
        "ReelGrab",
        vec![
            el("main").with_children(content),
            footer,
            el("script").with_text(INDEX_JS),
        ],
    )
}

fn render_document(title: &str, body_nodes: Vec<UiElement>) -> String {
    let head_children = vec![
        el("meta").with_attr("charset", "UTF-8"),
        el("meta")
            .with_attr("name", "viewport")
            .with_attr("content", "width=device-width, initial-scale=1.0"),
        text_el("title", escape_html(title)),
        el("style").with_text(BASE_CSS),
    ];

    let html = el("html").with_attr("lang", "en").with_children(vec![
        el("head").with_children(head_children),
        el("body").with_children(body_nodes),
    ]);

    format!("<!DOCTYPE html>\n{}", html.render())
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::*;
    use crate::models::Platform;

    fn tools(ffmpeg: bool) -> ToolStatus {
        ToolStatus {
            ytdlp_cmd: "yt-dlp".to_string(),
            ytdlp_path: Some(PathBuf::from("/usr/bin/yt-dlp")),
            ffmpeg_cmd: "ffmpeg".to_string(),
            ffmpeg_path: ffmpeg.then(|| PathBuf::from("/usr/bin/ffmpeg")),
        }
    }

    fn build() -> BuildStamp {
        BuildStamp {
            hash: "deadbeef".to_string(),
            timestamp: "2026-02-06 10:00:00 UTC".to_string(),
            epoch: 1_770_000_000,
        }
    }

    fn job(id: i64, status: JobStatus) -> DownloadJob {
        DownloadJob {
            id,
            url: "https://youtu.be/abc".to_string(),
            title: None,
            platform: Platform::Youtube,
            format_type: FormatType::Video,
            quality: VideoQuality::Best,
            status,
            progress: 0,
            filename: None,
            file_size: None,
            error_message: None,
            is_local_file: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn index_page_shows_forms_banner_and_build() {
        let tools = tools(true);
        let build = build();
        let ctx = PageContext {
            msg: Some("duplicate"),
            tools: &tools,
            build: &build,
            download_dir: Path::new("/nonexistent"),
            allow_other_platforms: false,
            max_upload_mb: 512,
        };

        let html = render_index_page(&ctx, &[]);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("action=\"/download\""));
        assert!(html.contains("action=\"/convert\""));
        assert!(html.contains("<option value=\"best\" selected=\"selected\">"));
        assert!(html.contains("already being downloaded"));
        assert!(html.contains("deadbeef"));
        assert!(html.contains("No downloads yet."));
        assert!(html.contains("EventSource"));
    }

    #[test]
    fn unknown_banner_codes_are_ignored_and_missing_tools_warn() {
        let tools = tools(false);
        let build = build();
        let ctx = PageContext {
            msg: Some("<script>"),
            tools: &tools,
            build: &build,
            download_dir: Path::new("/nonexistent"),
            allow_other_platforms: false,
            max_upload_mb: 512,
        };

        let html = render_index_page(&ctx, &[]);
        // The stylesheet names every banner class, so match rendered elements.
        assert!(!html.contains("class=\"banner banner-success\""));
        assert!(!html.contains("class=\"banner banner-info\""));
        assert!(html.contains("class=\"banner banner-error\""));
        assert!(html.contains("ffmpeg was not found"));
        assert!(!html.contains("action=\"/convert\""));
    }

    #[test]
    fn rows_reflect_status() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"1234").unwrap();

        let pending = job(1, JobStatus::Pending);

        let mut running = job(2, JobStatus::Downloading);
        running.title = Some("Live <b>stream</b>".to_string());
        running.progress = 42;

        let mut failed = job(3, JobStatus::Failed);
        failed.error_message = Some("ERROR: Video unavailable".to_string());

        let mut done = job(4, JobStatus::Completed);
        done.progress = 100;
        done.filename = Some("clip.mp4".to_string());
        done.file_size = Some(1536);

        let mut vanished = job(5, JobStatus::Completed);
        vanished.filename = Some("deleted.mp4".to_string());

        let html = render_job_rows(&[pending, running, failed, done, vanished], dir.path());

        assert!(html.contains("Fetching title…"));
        assert!(html.contains("Live &lt;b&gt;stream&lt;/b&gt;"));
        assert!(html.contains("width: 42%;"));
        assert!(html.contains("ERROR: Video unavailable"));
        assert!(html.contains("1.5 KB"));
        assert!(html.contains("href=\"/download_file/4\""));
        assert!(!html.contains("href=\"/download_file/5\""));
        assert!(html.contains("File not available"));
        assert!(html.contains("action=\"/delete/5\""));
    }

    #[test]
    fn every_banner_code_has_text() {
        for code in [
            "submitted-video",
            "submitted-audio",
            "duplicate",
            "empty-url",
            "invalid-url",
            "unsupported",
            "file-missing",
        ] {
            assert!(banner_for(code).is_some(), "{code}");
        }
        assert!(banner_for("nope").is_none());
    }
}
