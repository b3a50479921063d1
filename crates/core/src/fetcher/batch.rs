//! Batch fetching.
//!
//! A loader task checks storage for each URL in input order. Hits go straight
//! to the output channel; misses are queued for a fetch task that runs
//! extraction with bounded concurrency. Output order is not input order.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use url::Url;

use super::StorageBackedFetcher;
use crate::Error;
use crate::resource::{WebPage, clean_url};

pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;
pub const MAX_BATCH_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Extraction fetches in flight at once, clamped to
    /// `1..=MAX_BATCH_CONCURRENCY`.
    pub max_concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { max_concurrency: DEFAULT_BATCH_CONCURRENCY }
    }
}

impl BatchOptions {
    fn concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_BATCH_CONCURRENCY)
    }
}

/// A URL that missed storage.
struct Unstored {
    original: String,
    url: Url,
}

async fn send(out: &mpsc::Sender<WebPage>, page: WebPage) -> bool {
    if out.send(page).await.is_err() {
        tracing::debug!("batch receiver dropped");
        return false;
    }
    true
}

impl StorageBackedFetcher {
    /// Fetch every URL in `urls`, yielding exactly one page per input.
    ///
    /// Malformed URLs and storage failures yield pages with `error` set. The
    /// receiver closes once every input has been answered.
    pub fn batch(&self, urls: Vec<String>, options: BatchOptions) -> mpsc::Receiver<WebPage> {
        let (out_tx, out_rx) = mpsc::channel(urls.len().max(1));
        let (miss_tx, miss_rx) = mpsc::channel(1);

        tracing::debug!(urls = urls.len(), concurrency = options.concurrency(), "starting batch");
        tokio::spawn(self.clone().load_batch(urls, miss_tx, out_tx.clone()));
        tokio::spawn(self.clone().fetch_unstored(miss_rx, out_tx, options.concurrency()));
        out_rx
    }

    async fn load_batch(self, urls: Vec<String>, misses: mpsc::Sender<Unstored>, out: mpsc::Sender<WebPage>) {
        for original in urls {
            let url = match Url::parse(&original) {
                Ok(url) => clean_url(&url),
                Err(e) => {
                    let page = WebPage::failed(original, &Error::InvalidUrl(e.to_string()));
                    if !send(&out, page).await {
                        return;
                    }
                    continue;
                }
            };

            let page = match self.store.fetch(&url).await {
                Ok(mut page) => {
                    page.original_url = original;
                    page
                }
                Err(e) if e.is_not_found() => {
                    if misses.send(Unstored { original, url }).await.is_err() {
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "storage lookup failed in batch");
                    let mut page = WebPage::failed(original, &e);
                    page.requested_url = Some(url);
                    page
                }
            };
            if !send(&out, page).await {
                return;
            }
        }
    }

    async fn fetch_unstored(
        self, mut misses: mpsc::Receiver<Unstored>, out: mpsc::Sender<WebPage>, concurrency: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();

        while let Some(Unstored { original, url }) = misses.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let fetcher = self.clone();
            let out = out.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let mut page = match fetcher.fetcher.fetch(&url).await {
                    Ok(page) => {
                        fetcher.save_in_background(page.clone());
                        page
                    }
                    Err(failure) => {
                        tracing::debug!(url = %url, error = %failure, "batch fetch failed");
                        failure.into_page()
                    }
                };
                page.original_url = original;
                send(&out, page).await;
            });

            while let Some(result) = join_set.try_join_next() {
                if let Err(e) = result {
                    tracing::error!(error = %e, "batch fetch task failed");
                }
            }
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "batch fetch task failed");
            }
        }
    }
}
