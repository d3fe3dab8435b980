//! Forge error taxonomy. Every failure carries exactly one [`ErrorKind`].

use std::time::Duration;

use reqwest::{header::HeaderMap, StatusCode};

/// Discriminant the engine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    RateLimited,
    Transport,
    InvalidResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited{}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type ForgeResult<T> = Result<T, ForgeError>;

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl ForgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForgeError::NotFound(_) => ErrorKind::NotFound,
            ForgeError::Conflict(_) => ErrorKind::Conflict,
            ForgeError::Unauthorized(_) => ErrorKind::Unauthorized,
            ForgeError::Forbidden(_) => ErrorKind::Forbidden,
            ForgeError::RateLimited { .. } => ErrorKind::RateLimited,
            ForgeError::Transport(_) => ErrorKind::Transport,
            ForgeError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }

    pub fn is_not_found(&self) -> bool { self.kind() == ErrorKind::NotFound }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ForgeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map a non-success HTTP status (plus headers and body) into the taxonomy.
    pub fn from_status(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let detail = error_detail(status, body);
        match status.as_u16() {
            404 => ForgeError::NotFound(detail),
            409 => ForgeError::Conflict(detail),
            401 => ForgeError::Unauthorized(detail),
            403 => ForgeError::Forbidden(detail),
            429 => ForgeError::RateLimited { retry_after: parse_retry_after(headers) },
            408 | 500..=599 => ForgeError::Transport(format!("HTTP {}: {}", status.as_u16(), detail)),
            _ => ForgeError::InvalidResponse(format!("unexpected HTTP {}: {}", status.as_u16(), detail)),
        }
    }
}

impl From<reqwest::Error> for ForgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ForgeError::InvalidResponse(e.to_string())
        } else {
            ForgeError::Transport(e.to_string())
        }
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored (callers fall back to backoff).
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Forge error bodies look like `{"message": "..."}`; fall back to the raw text or the status line.
fn error_detail(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.canonical_reason().unwrap_or("no body").to_string();
    }
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(|s| s.to_string()))
        .unwrap_or_else(|| body.chars().take(256).collect())
}
