//! Forgeplane managed kinds and their adapters.

#![forbid(unsafe_code)]

mod common;
pub mod label;
pub mod registry;
pub mod release;
pub mod repository;
pub mod webhook;

pub use label::{Label, LabelAdapter, LabelSpec};
pub use registry::{KindInfo, KINDS};
pub use release::{Release, ReleaseAdapter, ReleaseSpec};
pub use repository::{Repository, RepositoryAdapter, RepositorySpec};
pub use webhook::{Webhook, WebhookAdapter, WebhookSpec};
