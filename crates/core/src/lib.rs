//! Core types and shared functionality for scrape.
//!
//! This crate provides:
//! - A database handle with statement caching, maintenance and close hooks
//! - The SQLite engine and schema migrations
//! - The URL content store and its storage keys
//! - The storage-backed fetcher with batch support
//! - Unified error types and configuration

pub mod config;
pub mod database;
pub mod error;
pub mod fetcher;
pub mod resource;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use database::DbHandle;
pub use error::Error;
pub use fetcher::{BatchOptions, FetchFailure, StorageBackedFetcher, UrlFetcher};
pub use resource::{FetchMethod, Metadata, WebPage};
pub use store::{StorageKey, UrlStore};
