//! Rate-limited HTTP fetching of archive records and media.
//!
//! Every request waits on the shared [`RateGate`] first. Nothing is retried
//! here; a failed fetch is classified and handed back so the caller can drop
//! the job.

mod rate_gate;
mod user_agent;

pub use rate_gate::RateGate;
pub use user_agent::{UserAgent, HARVESTER_USER_AGENT};

use std::time::Duration;

use reqwest::header::{ACCEPT, REFERER};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Classified fetch failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP 404 Not Found for {url}")]
    NotFound { url: String },

    #[error("HTTP 403 Forbidden for {url}")]
    Forbidden { url: String },

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// 404s are routine in the archive and only worth a debug line.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }

    /// 403s usually mean the origin has started blocking us.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, FetchError::Forbidden { .. })
    }
}

/// Build `{base}/{urlEncodedId}.json`.
pub fn json_url(base: &str, id: &str) -> String {
    format!(
        "{}/{}.json",
        base.trim_end_matches('/'),
        urlencoding::encode(id)
    )
}

/// HTTP client shared by all workers.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    gate: RateGate,
    referer: Option<String>,
}

impl Fetcher {
    /// Create a fetcher with a bounded timeout and fixed request headers.
    pub fn new(
        gate: RateGate,
        timeout: Duration,
        user_agent: Option<&str>,
        referer: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(UserAgent::from_setting(user_agent).to_string())
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            gate,
            referer: referer.filter(|r| !r.is_empty()),
        })
    }

    /// The shared rate gate.
    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Fetch `{base}/{id}.json` and decode it as a JSON object.
    pub async fn fetch_record(&self, base: &str, id: &str) -> Result<Value, FetchError> {
        self.get_json(&json_url(base, id)).await
    }

    /// GET a URL and decode the body as a JSON object.
    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut request = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }

        let response = self.send(url, request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let value: Value = serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?;
        if !value.is_object() {
            return Err(FetchError::Decode {
                url: url.to_string(),
                source: serde::de::Error::custom("expected a JSON object"),
            });
        }
        Ok(value)
    }

    /// GET a URL and return the raw body.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request = self.client.get(url).header(ACCEPT, "*/*");
        let response = self.send(url, request).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })
    }

    /// Wait for the gate, send, and classify the status. Error bodies are
    /// drained so the connection can go back to the pool.
    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, FetchError> {
        self.gate.acquire().await;

        let response = request
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        if let Err(e) = response.bytes().await {
            debug!("Failed to drain error body from {}: {}", url, e);
        }

        let url = url.to_string();
        Err(match status {
            StatusCode::NOT_FOUND => FetchError::NotFound { url },
            StatusCode::FORBIDDEN => FetchError::Forbidden { url },
            other => FetchError::Http {
                status: other.as_u16(),
                url,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_url_encodes_id() {
        assert_eq!(
            json_url("https://archive.vine.co/posts/", "abc123"),
            "https://archive.vine.co/posts/abc123.json"
        );
        assert_eq!(
            json_url("https://archive.vine.co/posts", "a b/c"),
            "https://archive.vine.co/posts/a%20b%2Fc.json"
        );
    }

    #[test]
    fn test_error_classification() {
        let not_found = FetchError::NotFound {
            url: "u".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_forbidden());

        let forbidden = FetchError::Forbidden {
            url: "u".to_string(),
        };
        assert!(forbidden.is_forbidden());
        assert_eq!(forbidden.to_string(), "HTTP 403 Forbidden for u");

        let other = FetchError::Http {
            status: 502,
            url: "u".to_string(),
        };
        assert_eq!(other.to_string(), "HTTP 502 for u");
    }
}
