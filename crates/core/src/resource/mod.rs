//! Fetched page model.

mod fetch_method;
mod tracking;

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

pub use tracking::{TRACKING_PARAMS, clean_url};
pub use fetch_method::FetchMethod;

/// Time to live applied when a page is saved without one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Descriptive fields extracted from a page.
///
/// Stored as a single JSON blob; everything else on [`WebPage`] has its own
/// column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sitename: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Publication date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub page_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
}

/// A fetched (or cached) web page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebPage {
    /// URL the page declares for itself. Content is stored under this URL.
    #[serde(rename = "url", default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<Url>,

    /// URL that was actually requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_url: Option<Url>,

    /// URL string exactly as the caller passed it. Never persisted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_url: String,

    #[serde(skip)]
    pub ttl: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "FetchMethod::is_unspecified")]
    pub fetch_method: FetchMethod,

    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_text: String,

    /// Set only on pages returned for a failed fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebPage {
    /// New page for `requested`, stamped with the current time.
    pub fn new(requested: Url) -> Self {
        Self { requested_url: Some(requested), fetch_time: Some(Utc::now().trunc_subsecs(0)), ..Self::default() }
    }

    /// Error page for a URL string that could not be fetched or parsed.
    pub fn failed(original_url: impl Into<String>, error: &crate::Error) -> Self {
        Self { original_url: original_url.into(), error: Some(error.to_string()), ..Self::default() }
    }

    /// Canonical URL, falling back to the requested URL.
    pub fn url(&self) -> Option<&Url> {
        self.canonical_url.as_ref().or(self.requested_url.as_ref())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
