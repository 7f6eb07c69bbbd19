//! Idempotent persistence of harvested records.
//!
//! A record's presence at its final key is the only completion marker. Writes
//! go through [`Storage::write`], which never exposes a partial value, so a
//! key that exists is always a complete record.

use serde_json::Value;
use thiserror::Error;

use crate::storage::{Storage, StorageError};

/// Root-level list of user ids discovered by the resolve stage.
pub const DISCOVERED_USERS_KEY: &str = "profiles.json";

/// Root-level list of slugs written by the scan command.
pub const SLUG_LIST_KEY: &str = "vine_slugs.txt";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("JSON error for {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// `profiles/<userId>.json`
pub fn profile_key(user_id: &str) -> String {
    format!("profiles/{}.json", user_id)
}

/// `posts/<userId>/<postId>.json`
pub fn post_key(user_id: &str, post_id: &str) -> String {
    format!("posts/{}/{}.json", user_id, post_id)
}

/// `media/<url path>`, or `None` when the URL has no usable path.
pub fn media_key(media_url: &str) -> Option<String> {
    let parsed = url::Url::parse(media_url).ok()?;
    let path = parsed.path().trim_start_matches('/');
    if path.is_empty() || path.ends_with('/') {
        return None;
    }
    let decoded = urlencoding::decode(path).ok()?;
    Some(format!("media/{}", decoded))
}

/// Encode a record as compact JSON with a trailing newline.
pub fn encode_record(key: &str, value: &Value) -> Result<Vec<u8>, PersistError> {
    let mut bytes = serde_json::to_vec(value).map_err(|source| PersistError::Json {
        key: key.to_string(),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write a record unconditionally.
pub async fn persist_json(
    storage: &dyn Storage,
    key: &str,
    value: &Value,
) -> Result<(), PersistError> {
    let bytes = encode_record(key, value)?;
    storage.write(key, bytes).await?;
    Ok(())
}

/// Write a record unless its key already exists. Returns whether it was
/// written.
///
/// The check and the write are not atomic together; the pipeline never
/// schedules the same key twice in one run, which makes that safe.
pub async fn persist_if_absent(
    storage: &dyn Storage,
    key: &str,
    value: &Value,
) -> Result<bool, PersistError> {
    if storage.exists(key).await? {
        return Ok(false);
    }
    persist_json(storage, key, value).await?;
    Ok(true)
}

/// Load a previously persisted record.
pub async fn load_json(storage: &dyn Storage, key: &str) -> Result<Value, PersistError> {
    let bytes = storage.read(key).await?;
    serde_json::from_slice(&bytes).map_err(|source| PersistError::Json {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_key_layout() {
        assert_eq!(profile_key("777"), "profiles/777.json");
        assert_eq!(post_key("777", "556"), "posts/777/556.json");
    }

    #[test]
    fn test_media_key() {
        assert_eq!(
            media_key("https://vines.s3.amazonaws.com/v/videos/a.mp4?versionId=3").unwrap(),
            "media/v/videos/a.mp4"
        );
        assert_eq!(media_key("https://vines.s3.amazonaws.com/"), None);
        assert_eq!(media_key("not a url"), None);
    }

    #[test]
    fn test_media_key_normalizes_dot_segments() {
        assert_eq!(
            media_key("https://vines.s3.amazonaws.com/a/../../b.jpg").unwrap(),
            "media/b.jpg"
        );
    }

    #[tokio::test]
    async fn test_persist_if_absent_keeps_first_write() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let key = post_key("777", "555");

        assert!(persist_if_absent(&storage, &key, &json!({ "v": 1 }))
            .await
            .unwrap());
        assert!(!persist_if_absent(&storage, &key, &json!({ "v": 2 }))
            .await
            .unwrap());

        assert_eq!(load_json(&storage, &key).await.unwrap(), json!({ "v": 1 }));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("posts/777/555.json")).unwrap(),
            "{\"v\":1}\n"
        );
    }
}
