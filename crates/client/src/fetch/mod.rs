//! HTTP extraction fetcher.
//!
//! ### Request
//! - One GET per URL with the configured user agent and an HTML-first
//!   `Accept` header.
//! - Redirects are followed up to `max_redirects`; the final URL is the
//!   fallback canonical URL.
//!
//! ### Safety Gates
//! - Non-2xx responses fail with `HTTP_ERROR` and keep the status code on
//!   the partial page. Timeouts are reported as 504.
//! - Bodies over `max_bytes` fail with `FETCH_TOO_LARGE`, checked against
//!   `Content-Length` first and again while streaming.
//! - Only HTML, XHTML and plain text are extracted; anything else fails with
//!   `UNSUPPORTED_CONTENT_TYPE`.

pub mod url;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use scrape_core::{AppConfig, Error, FetchFailure, FetchMethod, UrlFetcher, WebPage};

pub use self::url::{BatchInputs, UrlError, canonicalize, canonicalize_batch};
use crate::extract::{self, Extractor, HtmlExtractor};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.5";

/// Status recorded when the server does not answer in time.
const GATEWAY_TIMEOUT: u16 = 504;

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: config.max_redirects,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Html,
    PlainText,
}

impl BodyKind {
    /// Classify a `Content-Type` header value. A missing header is read as
    /// HTML.
    fn from_content_type(value: Option<&str>) -> Result<Self, Error> {
        let Some(value) = value else {
            return Ok(Self::Html);
        };
        let mime = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match mime.as_str() {
            "text/html" | "application/xhtml+xml" | "" => Ok(Self::Html),
            "text/plain" => Ok(Self::PlainText),
            _ => Err(Error::UnsupportedContentType(mime)),
        }
    }
}

/// `UrlFetcher` that downloads pages with reqwest and extracts them.
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
    extractor: Arc<dyn Extractor>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher").field("config", &self.config).finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Create a fetcher using the bundled HTML extractor.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        Self::with_extractor(config, Arc::new(HtmlExtractor::new()))
    }

    pub fn with_extractor(config: FetchConfig, extractor: Arc<dyn Extractor>) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config, extractor })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    async fn retrieve(&self, url: &Url, page: &mut WebPage) -> Result<(), Error> {
        let start = Instant::now();

        let response = self.http.get(url.as_str()).header(ACCEPT, ACCEPT_HTML).send().await.map_err(|e| {
            if e.is_timeout() {
                page.metadata.status_code = Some(GATEWAY_TIMEOUT);
                return Error::HttpError(format!(
                    "{url} did not reply within {} seconds",
                    self.config.timeout.as_secs_f64()
                ));
            }
            Error::HttpError(format!("network error: {e}"))
        })?;

        let status = response.status();
        page.metadata.status_code = Some(status.as_u16());
        if !status.is_success() {
            return Err(Error::HttpError(format!("status {status}")));
        }

        let kind = BodyKind::from_content_type(response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()))?;

        if let Some(len) = response.content_length()
            && exceeds(len, self.config.max_bytes)
        {
            return Err(Error::FetchTooLarge(format!("{len} bytes exceeds {}", self.config.max_bytes)));
        }

        let final_url = response.url().clone();
        let body = read_body(response, self.config.max_bytes).await?;
        let text = String::from_utf8_lossy(&body);

        let extracted = match kind {
            BodyKind::Html => self.extractor.extract(&text, &final_url)?,
            BodyKind::PlainText => extract::plain_text(&text),
        };
        extracted.apply_to(page, final_url);

        tracing::debug!(
            url = %url,
            canonical = ?page.canonical_url.as_ref().map(Url::as_str),
            status = status.as_u16(),
            bytes = body.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "fetched page"
        );
        Ok(())
    }
}

/// Read the body in chunks, failing as soon as it passes `max_bytes`.
async fn read_body(mut response: Response, max_bytes: usize) -> Result<Bytes, Error> {
    let mut body = BytesMut::new();
    while let Some(chunk) =
        response.chunk().await.map_err(|e| Error::HttpError(format!("failed to read response: {e}")))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Err(Error::FetchTooLarge(format!("body exceeds {max_bytes} bytes")));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

#[async_trait]
impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<WebPage, FetchFailure> {
        let mut page = WebPage::new(url.clone());
        page.fetch_method = FetchMethod::Direct;
        page.metadata.hostname = url.host_str().unwrap_or_default().to_string();

        match self.retrieve(url, &mut page).await {
            Ok(()) => Ok(page),
            Err(e) => {
                tracing::debug!(url = %url, status = ?page.metadata.status_code, error = %e, "fetch failed");
                Err(FetchFailure::new(page, e))
            }
        }
    }
}

/// Whether a declared length of `len` bytes is over `max`. Lengths that do
/// not fit in `usize` always are.
fn exceeds(len: u64, max: usize) -> bool {
    usize::try_from(len).map_or(true, |len| len > max)
}
