//! Headless browser fetching for JS-heavy pages.
//!
//! `HeadlessFetcher` drives Chrome/Chromium through chromiumoxide and runs
//! the rendered DOM through the same extractor as the HTTP fetcher. Pages it
//! produces are stored with the `chromium-headless` fetch method. Plug it
//! into storage with `StorageBackedFetcher::with_alternate_fetcher`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures_util::StreamExt;
use scrape_core::{Error, FetchFailure, FetchMethod, UrlFetcher, WebPage};
use url::Url;

use crate::extract::{Extractor, HtmlExtractor};

/// Options for rendering a page.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Timeout for navigation and settling (default: 30s).
    pub timeout: Duration,

    /// Time given to scripts after navigation before the DOM is read
    /// (default: 2s).
    pub settle: Duration,

    /// Viewport dimensions (default: 1280x720).
    pub viewport: (u32, u32),
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), settle: Duration::from_secs(2), viewport: (1280, 720) }
    }
}

/// Rendered DOM of one page.
struct Rendered {
    html: String,
    final_url: Url,
}

/// `UrlFetcher` backed by a headless Chrome/Chromium instance.
pub struct HeadlessFetcher {
    browser: Browser,
    options: RenderOptions,
    extractor: Arc<dyn Extractor>,
}

impl HeadlessFetcher {
    /// Launch a headless browser.
    ///
    /// A background task drives the DevTools protocol handler until the
    /// browser goes away.
    pub async fn launch(options: RenderOptions) -> Result<Self, Error> {
        let (width, height) = options.viewport;
        let config = BrowserConfig::builder().window_size(width, height).build().map_err(Error::RenderFailed)?;

        let (browser, mut handler) =
            Browser::launch(config).await.map_err(|e| Error::RenderFailed(format!("browser launch failed: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        Ok(Self { browser, options, extractor: Arc::new(HtmlExtractor::new()) })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    async fn render(&self, url: &Url) -> Result<Rendered, Error> {
        let page = tokio::time::timeout(self.options.timeout, self.browser.new_page(url.as_str()))
            .await
            .map_err(|_| Error::RenderFailed(format!("navigation timed out after {:?}", self.options.timeout)))?
            .map_err(|e| Error::RenderFailed(format!("navigation failed: {e}")))?;

        tokio::time::sleep(self.options.settle.min(self.options.timeout)).await;

        let html = page.content().await.map_err(|e| Error::RenderFailed(format!("content retrieval failed: {e}")));
        let page_url = page.url().await.map_err(|e| Error::RenderFailed(format!("content retrieval failed: {e}")));
        if let Err(e) = page.close().await {
            tracing::debug!(url = %url, error = %e, "failed to close browser tab");
        }

        let final_url = match page_url?.as_deref().map(Url::parse) {
            Some(Ok(final_url)) => final_url,
            Some(Err(e)) => return Err(Error::RenderFailed(format!("unusable page URL: {e}"))),
            None => url.clone(),
        };
        Ok(Rendered { html: html?, final_url })
    }
}

#[async_trait]
impl UrlFetcher for HeadlessFetcher {
    async fn fetch(&self, url: &Url) -> Result<WebPage, FetchFailure> {
        let start = Instant::now();
        let mut page = WebPage::new(url.clone());
        page.fetch_method = FetchMethod::ChromiumHeadless;
        page.metadata.hostname = url.host_str().unwrap_or_default().to_string();

        let result = self
            .render(url)
            .await
            .and_then(|rendered| Ok((self.extractor.extract(&rendered.html, &rendered.final_url)?, rendered.final_url)));

        match result {
            Ok((extracted, final_url)) => {
                extracted.apply_to(&mut page, final_url);
                tracing::debug!(url = %url, render_ms = start.elapsed().as_millis() as u64, "rendered page");
                Ok(page)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "headless fetch failed");
                Err(FetchFailure::new(page, e))
            }
        }
    }
}
