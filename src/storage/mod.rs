//! Storage backends for corpus input and harvest output.
//!
//! Both the scanner (reading the corpus) and the persister (writing the
//! harvest) talk to a [`Storage`]. A location string selects the backend:
//! `s3://bucket/prefix` uses an S3-compatible object store, anything else is
//! a local directory. Input and output choose their backends independently.

mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::{S3Storage, S3_ENDPOINT_ENV};

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Readable byte stream returned by [`Storage::open`]. Dropping it releases
/// the underlying file handle or HTTP body.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object storage configuration: {0}")]
    Config(String),

    #[error("Object storage error: {0}")]
    S3(String),

    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            key: key.into(),
            source,
        }
    }
}

/// Uniform list/read/write surface over files or objects.
///
/// Keys are relative, `/`-separated paths such as `posts/777/556.json`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable location for log lines.
    fn describe(&self) -> String;

    /// List keys under `prefix` whose name ends with `suffix`
    /// (case-insensitive, empty matches everything), in ascending order.
    async fn list(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StorageError>;

    /// Open a key for streaming reads.
    async fn open(&self, key: &str) -> Result<ByteReader, StorageError>;

    /// Write a key with overwrite semantics. A reader never observes a
    /// partially written value.
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Check whether a key is present.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Read a whole key into memory.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.open(key).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        Ok(buf)
    }
}

/// Parsed storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Local directory root.
    Local(PathBuf),
    /// Bucket plus key prefix (empty, or ending in `/`).
    S3 { bucket: String, prefix: String },
}

impl StorageLocation {
    /// Parse a local path or `s3://bucket/prefix` URI.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StorageError::InvalidLocation("empty location".to_string()));
        }

        if let Some(rest) = raw.strip_prefix("s3://") {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix),
                None => (rest, ""),
            };
            if bucket.is_empty() {
                return Err(StorageError::InvalidLocation(format!(
                    "missing bucket in {}",
                    raw
                )));
            }
            let prefix = prefix.trim_start_matches('/');
            let prefix = if prefix.is_empty() || prefix.ends_with('/') {
                prefix.to_string()
            } else {
                format!("{}/", prefix)
            };
            return Ok(StorageLocation::S3 {
                bucket: bucket.to_string(),
                prefix,
            });
        }

        let expanded = shellexpand::tilde(raw);
        Ok(StorageLocation::Local(PathBuf::from(expanded.as_ref())))
    }

    /// Whether this location uses the object store.
    pub fn is_s3(&self) -> bool {
        matches!(self, StorageLocation::S3 { .. })
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageLocation::Local(path) => write!(f, "{}", path.display()),
            StorageLocation::S3 { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
        }
    }
}

/// Open backends for an input and an output location, sharing one S3 client
/// when both live in object storage. A local output root is created.
pub async fn open_pair(
    input: &StorageLocation,
    output: &StorageLocation,
) -> Result<(Arc<dyn Storage>, Arc<dyn Storage>), StorageError> {
    let client = if input.is_s3() || output.is_s3() {
        Some(S3Storage::client_from_env().await?)
    } else {
        None
    };

    let input = open_with(input, client.as_ref(), false).await?;
    let output = open_with(output, client.as_ref(), true).await?;
    Ok((input, output))
}

async fn open_with(
    location: &StorageLocation,
    client: Option<&aws_sdk_s3::Client>,
    create_root: bool,
) -> Result<Arc<dyn Storage>, StorageError> {
    match location {
        StorageLocation::Local(root) if create_root => {
            Ok(Arc::new(LocalStorage::create(root).await?))
        }
        StorageLocation::Local(root) => Ok(Arc::new(LocalStorage::new(root))),
        StorageLocation::S3 { bucket, prefix } => {
            let client = client.ok_or_else(|| {
                StorageError::Config("no object storage client available".to_string())
            })?;
            Ok(Arc::new(S3Storage::new(client.clone(), bucket, prefix)))
        }
    }
}

/// Case-insensitive suffix match used by both backends.
pub(crate) fn matches_suffix(key: &str, suffix: &str) -> bool {
    suffix.is_empty() || key.to_lowercase().ends_with(&suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_location() {
        assert_eq!(
            StorageLocation::parse("vine_tweets").unwrap(),
            StorageLocation::Local(PathBuf::from("vine_tweets"))
        );
    }

    #[test]
    fn test_parse_s3_location_with_prefix() {
        let loc = StorageLocation::parse("s3://archive/harvest/2024").unwrap();
        assert_eq!(
            loc,
            StorageLocation::S3 {
                bucket: "archive".to_string(),
                prefix: "harvest/2024/".to_string(),
            }
        );
        assert!(loc.is_s3());
        assert_eq!(loc.to_string(), "s3://archive/harvest/2024/");
    }

    #[test]
    fn test_parse_s3_location_bucket_only() {
        let loc = StorageLocation::parse("s3://archive").unwrap();
        assert_eq!(
            loc,
            StorageLocation::S3 {
                bucket: "archive".to_string(),
                prefix: String::new(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_missing_bucket() {
        assert!(StorageLocation::parse("s3:///prefix").is_err());
        assert!(StorageLocation::parse("   ").is_err());
    }

    #[test]
    fn test_matches_suffix() {
        assert!(matches_suffix("tweets/part-1.TXT", ".txt"));
        assert!(matches_suffix("anything", ""));
        assert!(!matches_suffix("tweets/part-1.json", ".txt"));
    }
}
