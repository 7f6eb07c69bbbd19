//! Rewriting of dead CDN links to the mirror host.

use serde_json::Value;

use crate::json::{walk, walk_mut, Visitor, VisitorMut};

/// Default legacy hosts seen in archived posts and profiles.
pub const DEFAULT_LEGACY_HOSTS: &[&str] = &[
    "http://v.cdn.vine.co",
    "https://v.cdn.vine.co",
    "http://mtc.cdn.vine.co",
    "https://mtc.cdn.vine.co",
];

/// Default mirror that still serves the archived media.
pub const DEFAULT_MIRROR_HOST: &str = "https://vines.s3.amazonaws.com";

/// Extensions treated as downloadable media.
const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".jpg", ".jpeg", ".png", ".gif"];

/// Replaces legacy host substrings with the mirror host in every string leaf
/// of a record. The mirror host must not itself contain a legacy host, so
/// rewriting an already rewritten value is a no-op.
#[derive(Debug, Clone)]
pub struct UrlRewriter {
    legacy_hosts: Vec<String>,
    mirror_host: String,
}

impl UrlRewriter {
    pub fn new(legacy_hosts: Vec<String>, mirror_host: impl Into<String>) -> Self {
        let mirror_host = mirror_host.into().trim_end_matches('/').to_string();
        let legacy_hosts = legacy_hosts
            .into_iter()
            .map(|h| h.trim_end_matches('/').to_string())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            legacy_hosts,
            mirror_host,
        }
    }

    pub fn mirror_host(&self) -> &str {
        &self.mirror_host
    }

    /// Rewrite a single string, leaving path and query untouched.
    pub fn rewrite_str(&self, s: &str) -> String {
        let mut out = s.to_string();
        for host in &self.legacy_hosts {
            if out.contains(host.as_str()) {
                out = out.replace(host.as_str(), &self.mirror_host);
            }
        }
        out
    }

    /// Rewrite every string leaf of `value`. Structure, key order and
    /// non-string leaves are preserved.
    pub fn rewrite(&self, mut value: Value) -> Value {
        walk_mut(&mut value, &mut RewriteVisitor { rewriter: self });
        value
    }

    /// Collect media URLs on the mirror host, in document order, without
    /// duplicates.
    pub fn media_urls(&self, value: &Value) -> Vec<String> {
        let mut collector = MediaCollector {
            mirror_host: &self.mirror_host,
            urls: Vec::new(),
        };
        walk(value, &mut collector);
        collector.urls
    }
}

impl Default for UrlRewriter {
    fn default() -> Self {
        Self::new(
            DEFAULT_LEGACY_HOSTS.iter().map(|h| h.to_string()).collect(),
            DEFAULT_MIRROR_HOST,
        )
    }
}

struct RewriteVisitor<'a> {
    rewriter: &'a UrlRewriter,
}

impl VisitorMut for RewriteVisitor<'_> {
    fn visit_string(&mut self, value: &mut String) {
        if self
            .rewriter
            .legacy_hosts
            .iter()
            .any(|h| value.contains(h.as_str()))
        {
            *value = self.rewriter.rewrite_str(value);
        }
    }
}

struct MediaCollector<'a> {
    mirror_host: &'a str,
    urls: Vec<String>,
}

impl Visitor for MediaCollector<'_> {
    fn visit_str(&mut self, value: &str) {
        if !value.starts_with(self.mirror_host) {
            return;
        }
        let path = value.split(['?', '#']).next().unwrap_or_default().to_lowercase();
        if MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            && !self.urls.iter().any(|u| u == value)
        {
            self.urls.push(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewrite_str_replaces_host_only() {
        let rewriter = UrlRewriter::default();
        assert_eq!(
            rewriter.rewrite_str("http://v.cdn.vine.co/a/b.mp4?versionId=x"),
            "https://vines.s3.amazonaws.com/a/b.mp4?versionId=x"
        );
        assert_eq!(
            rewriter.rewrite_str("https://mtc.cdn.vine.co/r/avatars/1.jpg"),
            "https://vines.s3.amazonaws.com/r/avatars/1.jpg"
        );
        assert_eq!(rewriter.rewrite_str("just text"), "just text");
    }

    #[test]
    fn test_rewrite_nested_values() {
        let rewriter = UrlRewriter::default();
        let post = json!({
            "videoUrl": "http://v.cdn.vine.co/a/b.mp4",
            "loops": { "count": 12.0 },
            "entities": [ { "link": "https://v.cdn.vine.co/x.jpg" }, 7, null, true ],
            "description": "see http://v.cdn.vine.co/a/b.mp4 now"
        });

        let rewritten = rewriter.rewrite(post);
        assert_eq!(
            rewritten,
            json!({
                "videoUrl": "https://vines.s3.amazonaws.com/a/b.mp4",
                "loops": { "count": 12.0 },
                "entities": [ { "link": "https://vines.s3.amazonaws.com/x.jpg" }, 7, null, true ],
                "description": "see https://vines.s3.amazonaws.com/a/b.mp4 now"
            })
        );
    }

    #[test]
    fn test_rewrite_is_idempotent_and_keeps_key_order() {
        let rewriter = UrlRewriter::default();
        let original = json!({
            "z": "http://mtc.cdn.vine.co/thumb.jpg",
            "a": ["https://v.cdn.vine.co/v.mp4"],
            "m": 3
        });

        let once = rewriter.rewrite(original);
        let twice = rewriter.rewrite(once.clone());
        assert_eq!(once, twice);

        let keys: Vec<_> = once.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_custom_mirror_host() {
        let rewriter = UrlRewriter::new(
            vec!["http://v.cdn.vine.co/".to_string()],
            "https://mirror.example.org/",
        );
        assert_eq!(
            rewriter.rewrite_str("http://v.cdn.vine.co/a/b.mp4"),
            "https://mirror.example.org/a/b.mp4"
        );
        assert_eq!(rewriter.mirror_host(), "https://mirror.example.org");
    }

    #[test]
    fn test_media_urls() {
        let rewriter = UrlRewriter::default();
        let post = json!({
            "videoUrl": "https://vines.s3.amazonaws.com/v/a.mp4?versionId=1",
            "thumbnailUrl": "https://vines.s3.amazonaws.com/t/a.JPG",
            "again": "https://vines.s3.amazonaws.com/v/a.mp4?versionId=1",
            "page": "https://vines.s3.amazonaws.com/index.html",
            "other": "https://example.com/x.mp4"
        });

        assert_eq!(
            rewriter.media_urls(&post),
            vec![
                "https://vines.s3.amazonaws.com/v/a.mp4?versionId=1".to_string(),
                "https://vines.s3.amazonaws.com/t/a.JPG".to_string(),
            ]
        );
    }
}
