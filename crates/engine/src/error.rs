//! Cycle failures and how each one is retried.

use std::time::Duration;

use forgeplane_core::Reason;
use forgeplane_forge::ErrorKind;
use forgeplane_kubehub::{ConnectError, StoreError};

use crate::adapter::AdapterError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("reconcile exceeded deadline of {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Requeue class; the dispatcher turns it into a concrete delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Base delay, counter untouched.
    Fast,
    /// Exponential on the per-key counter.
    Backoff,
    /// Ceiling delay.
    Slow,
    /// `max(floor, backoff)`.
    After(Duration),
    /// Wait for the object to change.
    Never,
}

impl ReconcileError {
    /// Condition reason reported on `Synced`.
    pub fn reason(&self) -> Reason {
        match self {
            ReconcileError::Store(StoreError::Conflict(_)) => Reason::Conflict,
            ReconcileError::Store(_) => Reason::ReconcileError,
            ReconcileError::Connect(_) => Reason::CannotConnect,
            ReconcileError::Adapter(AdapterError::InvalidSpec(_)) => Reason::InvalidSpec,
            ReconcileError::Adapter(AdapterError::Forge { source, .. }) => match source.kind() {
                ErrorKind::Conflict => Reason::Conflict,
                ErrorKind::Unauthorized | ErrorKind::Forbidden => Reason::Auth,
                ErrorKind::RateLimited => Reason::RateLimited,
                ErrorKind::Transport => Reason::Transport,
                ErrorKind::InvalidResponse => Reason::Protocol,
                ErrorKind::NotFound => Reason::ReconcileError,
            },
            ReconcileError::Timeout(_) => Reason::Timeout,
        }
    }

    pub fn retry(&self) -> Retry {
        match self {
            ReconcileError::Store(StoreError::Conflict(_)) => Retry::Fast,
            ReconcileError::Store(_) | ReconcileError::Connect(_) | ReconcileError::Timeout(_) => Retry::Backoff,
            ReconcileError::Adapter(AdapterError::InvalidSpec(_)) => Retry::Never,
            ReconcileError::Adapter(AdapterError::Forge { source, .. }) => match source.kind() {
                ErrorKind::Conflict => Retry::Fast,
                ErrorKind::Unauthorized | ErrorKind::Forbidden | ErrorKind::InvalidResponse => Retry::Slow,
                ErrorKind::RateLimited => source.retry_after().map(Retry::After).unwrap_or(Retry::Backoff),
                ErrorKind::Transport | ErrorKind::NotFound => Retry::Backoff,
            },
        }
    }
}
