//! Forgeplane forge client: typed REST operations against a Gitea-compatible forge.
//!
//! Every error surfaces an [`ErrorKind`]; callers treat `NotFound` as data.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod labels;
pub mod models;
pub mod releases;
pub mod repos;

pub use client::{ClientConfig, ForgeClient};
pub use error::{ErrorKind, ForgeError, ForgeResult};
pub use fetch::FetchLimits;

/// Page size for list endpoints.
pub const PAGE_SIZE: usize = 50;
