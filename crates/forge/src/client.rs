//! HTTP transport shared by every resource family.
//!
//! One public operation maps to exactly one request/response exchange. The client holds an
//! immutable configuration; the inner `reqwest::Client` pool is safe to share across tasks.

use std::time::{Duration, Instant};

use metrics::counter;
use reqwest::{multipart, Method, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{ForgeError, ForgeResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const API_PREFIX: &str = "/api/v1";

/// Everything needed to build a [`ForgeClient`].
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
    pub insecure_skip_tls_verify: bool,
    /// Extra PEM-encoded root certificates.
    pub ca_bundle_pem: Option<String>,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
            insecure_skip_tls_verify: false,
            ca_bundle_pem: None,
            user_agent: concat!("forgeplane/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("ca_bundle_pem", &self.ca_bundle_pem.as_ref().map(|_| "<pem>"))
            .finish()
    }
}

/// Authenticated forge client bound to one API root.
#[derive(Clone)]
pub struct ForgeClient {
    api_base: Url,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for ForgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgeClient").field("api_base", &self.api_base.as_str()).finish_non_exhaustive()
    }
}

impl ForgeClient {
    pub fn new(cfg: ClientConfig) -> ForgeResult<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(cfg.user_agent.clone())
            .danger_accept_invalid_certs(cfg.insecure_skip_tls_verify);
        if let Some(pem) = cfg.ca_bundle_pem.as_deref() {
            let certs = reqwest::Certificate::from_pem_bundle(pem.as_bytes())
                .map_err(|e| ForgeError::Transport(format!("parsing CA bundle: {e}")))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        let http = builder.build().map_err(|e| ForgeError::Transport(format!("building HTTP client: {e}")))?;
        Self::with_http_client(&cfg.base_url, &cfg.token, http)
    }

    /// Use a pre-built `reqwest::Client` (tests, custom transports).
    pub fn with_http_client(base_url: &str, token: &str, http: reqwest::Client) -> ForgeResult<Self> {
        Ok(Self { api_base: normalize_base(base_url)?, token: token.to_string(), http })
    }

    pub fn api_base(&self) -> &str { self.api_base.as_str() }

    pub(crate) fn http(&self) -> &reqwest::Client { &self.http }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> ForgeResult<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| ForgeError::Transport(format!("base url {} cannot carry a path", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, op: &'static str, url: Url) -> ForgeResult<T> {
        let resp = self.execute(op, self.http.get(url)).await?;
        decode(resp).await
    }

    pub(crate) async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        op: &'static str,
        method: Method,
        url: Url,
        body: &B,
    ) -> ForgeResult<T> {
        let resp = self.execute(op, self.http.request(method, url).json(body)).await?;
        decode(resp).await
    }

    pub(crate) async fn send_multipart<T: DeserializeOwned>(
        &self,
        op: &'static str,
        url: Url,
        form: multipart::Form,
    ) -> ForgeResult<T> {
        let resp = self.execute(op, self.http.post(url).multipart(form)).await?;
        decode(resp).await
    }

    pub(crate) async fn delete(&self, op: &'static str, url: Url) -> ForgeResult<()> {
        self.execute(op, self.http.delete(url)).await.map(|_| ())
    }

    /// Attach the credential, send, and classify non-success statuses.
    async fn execute(&self, op: &'static str, req: RequestBuilder) -> ForgeResult<Response> {
        let t0 = Instant::now();
        let resp = match req.bearer_auth(&self.token).send().await {
            Ok(r) => r,
            Err(e) => {
                counter!("forgeplane_forge_requests_total", 1, "op" => op, "status" => "error");
                debug!(op, error = %e, "forge: request failed");
                return Err(e.into());
            }
        };
        let status = resp.status();
        counter!("forgeplane_forge_requests_total", 1, "op" => op, "status" => status.as_u16().to_string());
        debug!(op, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "forge: response");
        if status.is_success() {
            return Ok(resp);
        }
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        Err(ForgeError::from_status(status, &headers, &body))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ForgeResult<T> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| ForgeError::InvalidResponse(format!("decoding response body: {e}")))
}

/// Accept `https://host`, `https://host/`, or `https://host/api/v1`; always yield the API root.
pub fn normalize_base(base_url: &str) -> ForgeResult<Url> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let full = if trimmed.ends_with(API_PREFIX) { trimmed.to_string() } else { format!("{trimmed}{API_PREFIX}") };
    let url = Url::parse(&full).map_err(|e| ForgeError::Transport(format!("invalid base url {base_url:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ForgeError::Transport(format!("base url {base_url:?} must be http(s)")));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized_to_api_root() {
        for raw in ["https://git.example.com", "https://git.example.com/", "https://git.example.com/api/v1/"] {
            assert_eq!(normalize_base(raw).unwrap().as_str(), "https://git.example.com/api/v1");
        }
        assert!(normalize_base("ftp://git.example.com").is_err());
        assert!(normalize_base("not a url").is_err());
    }

    #[test]
    fn endpoint_percent_encodes_segments() {
        let c = ForgeClient::with_http_client("http://localhost:3000", "t", reqwest::Client::new()).unwrap();
        let url = c.endpoint(&["repos", "o", "r", "releases", "tags", "release/v1.0"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/v1/repos/o/r/releases/tags/release%2Fv1.0");
    }

    #[test]
    fn debug_output_redacts_token() {
        let cfg = ClientConfig::new("https://x", "s3cr3t");
        assert!(!format!("{cfg:?}").contains("s3cr3t"));
        let c = ForgeClient::new(cfg).unwrap();
        assert!(!format!("{c:?}").contains("s3cr3t"));
    }
}
