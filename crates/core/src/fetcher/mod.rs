//! Cache-aside fetching on top of [`UrlStore`].
//!
//! [`StorageBackedFetcher`] answers from storage when it can and otherwise
//! asks an extraction [`UrlFetcher`], saving successful results in the
//! background. Pending saves are drained before the database closes.

mod batch;

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use url::Url;

pub use batch::{BatchOptions, DEFAULT_BATCH_CONCURRENCY, MAX_BATCH_CONCURRENCY};

use crate::Error;
use crate::database::DbHandle;
use crate::resource::{WebPage, clean_url};
use crate::store::{StorageKey, UrlStore};

/// Retrieves and extracts a page.
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<WebPage, FetchFailure>;
}

/// A failed fetch, with whatever was learned about the page before it failed
/// (status code, final URL).
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct FetchFailure {
    pub page: Box<WebPage>,
    #[source]
    pub error: Error,
}

impl FetchFailure {
    pub fn new(page: WebPage, error: Error) -> Self {
        Self { page: Box::new(page), error }
    }

    /// Failure without a partial page.
    pub fn for_url(url: &Url, error: Error) -> Self {
        Self::new(WebPage::new(url.clone()), error)
    }

    /// The partial page with the error message attached.
    pub fn into_page(self) -> WebPage {
        let mut page = *self.page;
        page.error = Some(self.error.to_string());
        page
    }
}

/// Counts in-flight background saves.
#[derive(Debug, Default)]
struct SaveBarrier {
    pending: AtomicUsize,
    idle: Notify,
}

impl SaveBarrier {
    fn enter(self: &Arc<Self>) -> SaveGuard {
        self.pending.fetch_add(1, Ordering::SeqCst);
        SaveGuard(Arc::clone(self))
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            let mut idle = pin!(self.idle.notified());
            idle.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}

struct SaveGuard(Arc<SaveBarrier>);

impl Drop for SaveGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Serves pages from storage, fetching and saving on a miss.
#[derive(Clone)]
pub struct StorageBackedFetcher {
    fetcher: Arc<dyn UrlFetcher>,
    store: UrlStore,
    saving: Arc<SaveBarrier>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for StorageBackedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackedFetcher")
            .field("store", &self.store)
            .field("pending_saves", &self.saving.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl StorageBackedFetcher {
    /// Wrap `fetcher` with `store`.
    ///
    /// Registers a close listener on the store's database so pending saves
    /// finish before the connection is released.
    pub fn new(fetcher: Arc<dyn UrlFetcher>, store: UrlStore) -> Result<Self, Error> {
        let saving = Arc::new(SaveBarrier::default());
        let closed = Arc::new(AtomicBool::new(false));

        let (barrier, flag) = (Arc::clone(&saving), Arc::clone(&closed));
        store.database().add_close_listener(move || async move {
            let pending = barrier.pending();
            if pending > 0 {
                tracing::info!(pending, "waiting for pending saves");
            }
            barrier.wait().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })?;

        Ok(Self { fetcher, store, saving, closed })
    }

    /// Same storage and save barrier, different extraction fetcher.
    pub fn with_alternate_fetcher(&self, fetcher: Arc<dyn UrlFetcher>) -> Result<Self, Error> {
        if self.is_closed() {
            return Err(Error::FetcherClosed);
        }
        Ok(Self { fetcher, ..self.clone() })
    }

    /// Fetch `url` from storage, or from the extraction fetcher on a miss.
    ///
    /// Tracking parameters and the fragment are removed before lookup. The
    /// returned page (or the page inside the failure) carries `url` as
    /// passed in `original_url`.
    pub async fn fetch(&self, url: &Url) -> Result<WebPage, FetchFailure> {
        let original = url.to_string();
        let cleaned = clean_url(url);

        match self.fetch_cleaned(&cleaned).await {
            Ok(mut page) => {
                page.original_url = original;
                Ok(page)
            }
            Err(mut failure) => {
                failure.page.original_url = original;
                Err(failure)
            }
        }
    }

    async fn fetch_cleaned(&self, url: &Url) -> Result<WebPage, FetchFailure> {
        match self.store.fetch(url).await {
            Ok(page) => {
                tracing::debug!(url = %url, "served from storage");
                return Ok(page);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::error!(url = %url, error = %e, "storage lookup failed");
                return Err(FetchFailure::for_url(url, e));
            }
        }

        let page = self.fetcher.fetch(url).await?;
        self.save_in_background(page.clone());
        Ok(page)
    }

    fn save_in_background(&self, page: WebPage) {
        let guard = self.saving.enter();
        let store = self.store.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = store.save(&page).await {
                tracing::error!(url = ?page.url().map(Url::as_str), error = %e, "failed to save page");
            }
        });
    }

    /// Wait for pending saves, then mark the fetcher closed.
    pub async fn wait(&self) {
        self.saving.wait().await;
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pending_saves(&self) -> usize {
        self.saving.pending()
    }

    /// Delete the page stored under `url`; aliases are not followed.
    pub async fn delete(&self, url: &Url) -> Result<bool, Error> {
        self.store.delete(url).await
    }

    pub async fn save(&self, page: &WebPage) -> Result<StorageKey, Error> {
        self.store.save(page).await
    }

    pub fn store(&self) -> &UrlStore {
        &self.store
    }

    pub fn database(&self) -> &DbHandle {
        self.store.database()
    }
}

#[async_trait]
impl UrlFetcher for StorageBackedFetcher {
    async fn fetch(&self, url: &Url) -> Result<WebPage, FetchFailure> {
        StorageBackedFetcher::fetch(self, url).await
    }
}
