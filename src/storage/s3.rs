//! S3-compatible object storage backend (AWS, Cloudflare R2, MinIO).

use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use super::{matches_suffix, ByteReader, Storage, StorageError};

/// Environment variable holding the object store endpoint URL.
pub const S3_ENDPOINT_ENV: &str = "S3_ENDPOINT";

/// Storage backed by a bucket and key prefix.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        }
    }

    /// Build a client from environment configuration.
    ///
    /// Requires `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `S3_ENDPOINT`.
    /// `AWS_REGION` defaults to `auto`, which non-AWS providers accept.
    /// Addressing is always path-style.
    pub async fn client_from_env() -> Result<Client, StorageError> {
        let endpoint = non_empty_env(S3_ENDPOINT_ENV);
        let access_key = non_empty_env("AWS_ACCESS_KEY_ID");
        let secret_key = non_empty_env("AWS_SECRET_ACCESS_KEY");

        let endpoint = match (endpoint, access_key, secret_key) {
            (Some(endpoint), Some(_), Some(_)) => endpoint,
            _ => {
                return Err(StorageError::Config(format!(
                    "AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY and {} must be set for s3:// locations",
                    S3_ENDPOINT_ENV
                )))
            }
        };
        let region = non_empty_env("AWS_REGION").unwrap_or_else(|| "auto".to_string());

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Client::from_conf(config))
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.trim_start_matches('/'))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[async_trait]
impl Storage for S3Storage {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    async fn list(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StorageError> {
        let list_prefix = self.full_key(prefix);
        debug!(
            "Listing objects in bucket={} prefix={}",
            self.bucket, list_prefix
        );

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if !list_prefix.is_empty() {
                req = req.prefix(&list_prefix);
            }
            if let Some(t) = token.as_deref() {
                req = req.continuation_token(t);
            }
            let resp = req.send().await.map_err(|e| {
                StorageError::S3(format!(
                    "list_objects_v2 {}: {}",
                    list_prefix,
                    DisplayErrorContext(&e)
                ))
            })?;
            pages += 1;

            if let Some(contents) = resp.contents {
                for object in contents {
                    let Some(full) = object.key else { continue };
                    if full.ends_with('/') {
                        continue;
                    }
                    let Some(key) = full.strip_prefix(&self.prefix) else {
                        continue;
                    };
                    if matches_suffix(key, suffix) {
                        keys.push(key.to_string());
                    }
                }
            }

            if resp.is_truncated.unwrap_or(false) {
                token = resp.next_continuation_token;
                if token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        debug!("Listed {} keys over {} page(s)", keys.len(), pages);
        keys.sort();
        Ok(keys)
    }

    async fn open(&self, key: &str) -> Result<ByteReader, StorageError> {
        let full = self.full_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(format!("get_object {}: {}", full, DisplayErrorContext(&e)))
                }
            })?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        // A single PUT has no visible partial state.
        let full = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                StorageError::S3(format!("put_object {}: {}", full, DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let full = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) => {
                Ok(false)
            }
            Err(e) => Err(StorageError::S3(format!(
                "head_object {}: {}",
                full,
                DisplayErrorContext(&e)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_joins_prefix() {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("auto"))
            .build();
        let storage = S3Storage::new(Client::from_conf(config), "bucket", "harvest/");
        assert_eq!(storage.full_key("posts/1/2.json"), "harvest/posts/1/2.json");
        assert_eq!(storage.full_key("/profiles/1.json"), "harvest/profiles/1.json");
        assert_eq!(storage.describe(), "s3://bucket/harvest/");
    }
}
