//! Media download for harvested posts.

use serde_json::Value;
use tracing::debug;

use super::Context;
use crate::error::JobError;
use crate::persist::media_key;

impl Context {
    /// Download every mirror-hosted media file referenced by `record` that
    /// no other job has claimed this iteration.
    pub(super) async fn harvest_media(&self, record: &Value) {
        for url in self.rewriter.media_urls(record) {
            if self.is_stopping() {
                break;
            }
            if !self.state.claim_media(&url) {
                continue;
            }
            match self.download_media(&url).await {
                Ok(true) => self.stats.bump(&self.stats.media_written),
                Ok(false) => {}
                Err(e) => self.job_failed("media", &url, &e),
            }
        }
    }

    /// Returns whether a file was written.
    async fn download_media(&self, url: &str) -> Result<bool, JobError> {
        let Some(key) = media_key(url) else {
            debug!("No storage key for media URL {}", url);
            return Ok(false);
        };
        if self.output.exists(&key).await? {
            return Ok(false);
        }

        let bytes = self.fetcher.get_bytes(url).await?;
        self.output.write(&key, bytes).await?;
        debug!("Saved {}", key);
        Ok(true)
    }
}
