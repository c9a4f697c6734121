use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::models::Platform;

static YOUTUBE_HOST: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\.)(?:youtube\.com|youtu\.be|youtube-nocookie\.com)$").ok()
});

static INSTAGRAM_HOST: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|\.)(?:instagram\.com|instagr\.am)$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlRejection {
    Empty,
    Invalid,
    Unsupported,
}

impl UrlRejection {
    pub fn code(self) -> &'static str {
        match self {
            Self::Empty => "empty-url",
            Self::Invalid => "invalid-url",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Empty => "Please enter a URL.",
            Self::Invalid => "Invalid URL. Paste a full YouTube or Instagram link.",
            Self::Unsupported => "Unsupported platform. Only YouTube and Instagram are supported.",
        }
    }
}

pub fn is_valid_url(input: &str) -> bool {
    match Url::parse(input.trim()) {
        Ok(url) => {
            !url.scheme().is_empty() && url.host_str().map(|h| !h.is_empty()).unwrap_or(false)
        }
        Err(_) => false,
    }
}

pub fn detect_platform(input: &str) -> Option<Platform> {
    let url = Url::parse(input.trim()).ok()?;
    let host = url.host_str()?.trim_end_matches('.');

    if host_matches(&YOUTUBE_HOST, host) {
        return Some(Platform::Youtube);
    }
    if host_matches(&INSTAGRAM_HOST, host) {
        return Some(Platform::Instagram);
    }
    None
}

/// Validates a submitted URL and derives its platform. Unrecognised hosts are
/// accepted as `Other` only when `allow_other` is set.
pub fn classify(input: &str, allow_other: bool) -> Result<Platform, UrlRejection> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlRejection::Empty);
    }
    if !is_valid_url(trimmed) {
        return Err(UrlRejection::Invalid);
    }

    match detect_platform(trimmed) {
        Some(platform) => Ok(platform),
        None if allow_other => Ok(Platform::Other),
        None => Err(UrlRejection::Unsupported),
    }
}

fn host_matches(pattern: &LazyLock<Option<Regex>>, host: &str) -> bool {
    pattern
        .as_ref()
        .map(|re| re.is_match(host))
        .unwrap_or(false)
}
