//! Local filesystem backend.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{matches_suffix, ByteReader, Storage, StorageError};

/// Storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use an existing directory as the root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use `root`, creating it if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path below the root, refusing anything that would
    /// escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidKey(key.to_string())),
            }
        }
        Ok(path)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StorageError> {
        let start = self.path_for(prefix)?;
        let mut keys = Vec::new();
        let mut pending = vec![start.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Only the starting directory is required to exist
                Err(e) if dir == start => {
                    return Err(StorageError::io(dir.display().to_string(), e))
                }
                Err(e) => {
                    debug!("Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Error reading {}: {}", dir.display(), e);
                        break;
                    }
                };
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(e) => {
                        debug!("Skipping {}: {}", entry.path().display(), e);
                        continue;
                    }
                };
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(key) = self.key_for(&path) {
                        if matches_suffix(&key, suffix) {
                            keys.push(key);
                        }
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn open(&self, key: &str) -> Result<ByteReader, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?
            .to_string_lossy()
            .into_owned();

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(key, e))?;

        // Hidden temp name beside the destination so the rename stays on one
        // filesystem and suffix listings never pick it up.
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(key, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(key, e));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage
            .write("posts/777/556.json", b"{\"a\":1}\n".to_vec())
            .await
            .unwrap();

        assert!(storage.exists("posts/777/556.json").await.unwrap());
        let bytes = storage.read("posts/777/556.json").await.unwrap();
        assert_eq!(bytes, b"{\"a\":1}\n");
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.write("profiles/1.json", b"{}".to_vec()).await.unwrap();
        storage.write("profiles/1.json", b"[]".to_vec()).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join("profiles"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.json".to_string()]);
        assert_eq!(storage.read("profiles/1.json").await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write("b/two.txt", b"2".to_vec()).await.unwrap();
        storage.write("a/one.TXT", b"1".to_vec()).await.unwrap();
        storage.write("a/skip.json", b"{}".to_vec()).await.unwrap();

        let keys = storage.list("", ".txt").await.unwrap();
        assert_eq!(keys, vec!["a/one.TXT".to_string(), "b/two.txt".to_string()]);

        let keys = storage.list("a", "").await.unwrap();
        assert_eq!(keys, vec!["a/one.TXT".to_string(), "a/skip.json".to_string()]);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_error() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("missing"));
        assert!(storage.list("", "").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.write("../outside.json", Vec::new()).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.open("/etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.open("nope.json").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!storage.exists("nope.json").await.unwrap());
    }
}
