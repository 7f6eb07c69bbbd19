//! Slug extraction from a text corpus.
//!
//! Every source is read line by line and each `vine.co/v/<slug>` occurrence
//! on a line is collected. A reference split across two lines is not found.

use std::collections::{BTreeSet, HashSet};
use std::io;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::bytes::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::pool::WorkerPool;
use crate::storage::{Storage, StorageError};

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"vine\.co/v/([A-Za-z0-9]+)").unwrap());

/// Longest line the scanner will buffer.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Why one source could not be scanned to the end.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Read failed: {0}")]
    Io(#[from] io::Error),

    #[error("Line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Line-oriented slug scanner with a bounded line buffer.
#[derive(Debug, Clone)]
pub struct SlugScanner {
    max_line_bytes: usize,
}

impl Default for SlugScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl SlugScanner {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Slugs on one line, in order of appearance.
    pub fn slugs_in_line<'a>(&self, line: &'a [u8]) -> impl Iterator<Item = String> + 'a {
        SLUG_PATTERN
            .captures_iter(line)
            .filter_map(|caps| caps.get(1))
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
    }

    /// Scan one source into `slugs`. Returns the number of lines read.
    ///
    /// On error, slugs from the lines read so far are already in `slugs`.
    pub async fn scan_reader<R>(
        &self,
        mut reader: R,
        slugs: &mut HashSet<String>,
    ) -> Result<usize, ScanError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::with_capacity(READ_BUFFER_BYTES.min(self.max_line_bytes));
        let mut lines = 0;

        loop {
            line.clear();
            let mut eof = false;

            loop {
                let (done, used) = {
                    let buf = reader.fill_buf().await?;
                    if buf.is_empty() {
                        eof = true;
                        (true, 0)
                    } else {
                        let (chunk, done, used) = match buf.iter().position(|&b| b == b'\n') {
                            Some(i) => (&buf[..i], true, i + 1),
                            None => (buf, false, buf.len()),
                        };
                        if line.len() + chunk.len() > self.max_line_bytes {
                            return Err(ScanError::LineTooLong {
                                limit: self.max_line_bytes,
                            });
                        }
                        line.extend_from_slice(chunk);
                        (done, used)
                    }
                };
                reader.consume(used);
                if done {
                    break;
                }
            }

            if eof && line.is_empty() {
                break;
            }
            lines += 1;
            slugs.extend(self.slugs_in_line(&line));
            if eof {
                break;
            }
        }

        Ok(lines)
    }

    /// Scan one stored object.
    pub async fn scan_key(
        &self,
        storage: &dyn Storage,
        key: &str,
        slugs: &mut HashSet<String>,
    ) -> Result<usize, ScanError> {
        let reader = storage.open(key).await?;
        self.scan_reader(BufReader::with_capacity(READ_BUFFER_BYTES, reader), slugs)
            .await
    }

    /// Scan every source under `storage` whose key ends with `suffix`.
    ///
    /// Failing to list the corpus is fatal; a source that cannot be read is
    /// logged and skipped, keeping whatever it yielded before the failure.
    pub async fn scan_corpus(
        &self,
        storage: Arc<dyn Storage>,
        suffix: &str,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<BTreeSet<String>, StorageError> {
        let keys = storage.list("", suffix).await?;
        info!(
            "Scanning {} sources in {} for vine slugs",
            keys.len(),
            storage.describe()
        );

        let found: Arc<Mutex<BTreeSet<String>>> = Arc::default();

        let pool = {
            let scanner = self.clone();
            let storage = storage.clone();
            let found = found.clone();
            WorkerPool::spawn("scan", workers, workers * 2, shutdown, move |_, key: String| {
                let scanner = scanner.clone();
                let storage = storage.clone();
                let found = found.clone();
                async move {
                    let mut slugs = HashSet::new();
                    match scanner.scan_key(storage.as_ref(), &key, &mut slugs).await {
                        Ok(lines) => debug!("{}: {} lines, {} slugs", key, lines, slugs.len()),
                        Err(e) => warn!("Skipping rest of {}: {}", key, e),
                    }
                    found
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend(slugs);
                }
            })
        };

        for key in keys {
            if !pool.submit(key).await {
                break;
            }
        }
        pool.join().await;

        let slugs = std::mem::take(&mut *found.lock().unwrap_or_else(PoisonError::into_inner));
        info!("Found {} unique slugs", slugs.len());
        Ok(slugs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::tempdir;

    async fn scan_str(scanner: &SlugScanner, text: &str) -> Result<HashSet<String>, ScanError> {
        let mut slugs = HashSet::new();
        scanner.scan_reader(text.as_bytes(), &mut slugs).await?;
        Ok(slugs)
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_every_occurrence_on_a_line() {
        let scanner = SlugScanner::default();
        let slugs = scan_str(
            &scanner,
            "see https://vine.co/v/abc123 and http://vine.co/v/XyZ9, also vine.co/v/abc123!",
        )
        .await
        .unwrap();
        assert_eq!(slugs, set(&["abc123", "XyZ9"]));
    }

    #[tokio::test]
    async fn test_slugs_are_case_sensitive() {
        let scanner = SlugScanner::default();
        let slugs = scan_str(&scanner, "vine.co/v/AbC\nvine.co/v/abc\n")
            .await
            .unwrap();
        assert_eq!(slugs, set(&["AbC", "abc"]));
    }

    #[tokio::test]
    async fn test_reference_split_across_lines_is_missed() {
        let scanner = SlugScanner::default();
        let slugs = scan_str(&scanner, "vine.co/\nv/abc123\nvine.co/v/ok1")
            .await
            .unwrap();
        assert_eq!(slugs, set(&["ok1"]));
    }

    #[tokio::test]
    async fn test_overlong_line_keeps_earlier_slugs() {
        let scanner = SlugScanner::new(32);
        let text = format!("vine.co/v/first\n{}vine.co/v/late\n", "x".repeat(64));
        let mut slugs = HashSet::new();
        let err = scanner
            .scan_reader(text.as_bytes(), &mut slugs)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::LineTooLong { limit: 32 }));
        assert_eq!(slugs, set(&["first"]));
    }

    #[tokio::test]
    async fn test_corpus_dedups_across_sources_and_filters_suffix() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "vine.co/v/one vine.co/v/two\n").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.TXT"), "vine.co/v/two\nvine.co/v/three").unwrap();
        std::fs::write(dir.path().join("c.json"), "vine.co/v/ignored").unwrap();

        let (_stop, shutdown) = watch::channel(false);
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));
        let slugs = SlugScanner::default()
            .scan_corpus(storage, ".txt", 4, shutdown)
            .await
            .unwrap();

        assert_eq!(
            slugs.into_iter().collect::<Vec<_>>(),
            vec!["one", "three", "two"]
        );
    }

    #[tokio::test]
    async fn test_bad_source_does_not_stop_siblings() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.txt"),
            format!("vine.co/v/early\n{}vine.co/v/lost\n", "x".repeat(128)),
        )
        .unwrap();
        std::fs::write(dir.path().join("good.txt"), "vine.co/v/fine1\n").unwrap();

        let (_stop, shutdown) = watch::channel(false);
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));
        let slugs = SlugScanner::new(64)
            .scan_corpus(storage, ".txt", 2, shutdown)
            .await
            .unwrap();

        assert_eq!(
            slugs.into_iter().collect::<Vec<_>>(),
            vec!["early", "fine1"]
        );
    }

    #[tokio::test]
    async fn test_unlistable_corpus_is_error() {
        let dir = tempdir().unwrap();
        let (_stop, shutdown) = watch::channel(false);
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path().join("missing")));
        assert!(SlugScanner::default()
            .scan_corpus(storage, ".txt", 2, shutdown)
            .await
            .is_err());
    }
}
