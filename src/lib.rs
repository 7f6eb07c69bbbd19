//! vine-harvest - harvester for the static Vine JSON archive.
//!
//! Scans a text corpus for `vine.co/v/<slug>` references, resolves each slug
//! to its author, and mirrors every profile and post reachable from those
//! authors into local or S3-compatible storage. Legacy CDN links are rewritten
//! to a living mirror host on the way through.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod ids;
pub mod json;
pub mod persist;
pub mod pipeline;
pub mod pool;
pub mod rewrite;
pub mod scanner;
pub mod storage;

pub use config::{Config, HarvestSettings};
pub use error::HarvestError;
pub use fetcher::{FetchError, Fetcher, RateGate};
pub use pipeline::{Harvester, RunSummary};
pub use pool::WorkerPool;
pub use rewrite::UrlRewriter;
pub use scanner::SlugScanner;
pub use storage::{Storage, StorageError, StorageLocation};
