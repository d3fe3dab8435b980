//! Bounded download of release-asset content declared by URL.
//!
//! The forge credential is never sent to the remote host.

use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::client::ForgeClient;
use crate::error::{ForgeError, ForgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl Default for FetchLimits {
    fn default() -> Self { Self { max_bytes: 64 * 1024 * 1024, timeout: Duration::from_secs(60) } }
}

/// Only absolute http(s) URLs are fetchable.
pub fn fetchable_url(raw: &str) -> Option<Url> {
    Url::parse(raw).ok().filter(|u| matches!(u.scheme(), "http" | "https"))
}

impl ForgeClient {
    /// GET an external URL, aborting once the body grows past `limits.max_bytes`.
    pub async fn fetch_remote(&self, url: &str, limits: &FetchLimits) -> ForgeResult<Vec<u8>> {
        let parsed = fetchable_url(url).ok_or_else(|| ForgeError::InvalidResponse(format!("not an http(s) url: {url}")))?;
        let mut resp = self.http().get(parsed).timeout(limits.timeout).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(ForgeError::from_status(status, &headers, &body));
        }
        if let Some(len) = resp.content_length() {
            if len > limits.max_bytes {
                return Err(too_large(url, limits));
            }
        }
        let mut out = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if (out.len() + chunk.len()) as u64 > limits.max_bytes {
                return Err(too_large(url, limits));
            }
            out.extend_from_slice(&chunk);
        }
        debug!(url, bytes = out.len(), "forge: fetched remote asset");
        Ok(out)
    }
}

fn too_large(url: &str, limits: &FetchLimits) -> ForgeError {
    ForgeError::InvalidResponse(format!("asset at {url} exceeds {} bytes", limits.max_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_urls_are_fetchable() {
        assert!(fetchable_url("https://example.com/a.tgz").is_some());
        assert!(fetchable_url("http://example.com/a.tgz").is_some());
        assert!(fetchable_url("file:///etc/passwd").is_none());
        assert!(fetchable_url("a.tgz").is_none());
    }
}
