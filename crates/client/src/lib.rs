//! Extraction fetchers for scrape.
//!
//! This crate provides the HTTP fetch pipeline and content extraction that
//! the storage-backed fetcher delegates to on a storage miss, plus an
//! optional headless browser fetcher behind the `render` feature.

pub mod extract;
pub mod fetch;
#[cfg(feature = "render")]
pub mod render;

pub use extract::{Extracted, Extractor, HtmlExtractor};
pub use fetch::{BatchInputs, FetchConfig, HttpFetcher, UrlError, canonicalize, canonicalize_batch};
#[cfg(feature = "render")]
pub use render::{HeadlessFetcher, RenderOptions};
