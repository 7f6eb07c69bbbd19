//! Run-level error types.
//!
//! Anything here stops a run. Per-entity failures are [`JobError`]s and never
//! leave the worker that hit them.

use thiserror::Error;

use crate::fetcher::FetchError;
use crate::persist::PersistError;
use crate::storage::StorageError;

/// Fatal condition that aborts the whole run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("No vine slugs found in {input}")]
    NoSlugs { input: String },

    #[error("No users discovered from {slugs} slugs")]
    NoUsers { slugs: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Output location unavailable: {0}")]
    Output(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Persist error: {0}")]
    Persist(#[from] PersistError),
}

/// Failure of a single job. Logged by the worker and dropped.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unsafe id {0:?}")]
    UnsafeId(String),

    #[error("No user id in post record")]
    MissingUserId,
}

impl JobError {
    /// Whether the origin reported the entity as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::Fetch(e) if e.is_not_found())
    }

    /// Whether the origin refused the request.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, JobError::Fetch(e) if e.is_forbidden())
    }
}
