//! The fixed set of kinds this controller serves.

use forgeplane_core::API_GROUP;
use forgeplane_engine::Manager;
use serde::Serialize;

use crate::{LabelAdapter, ReleaseAdapter, RepositoryAdapter, WebhookAdapter};

pub const API_VERSION: &str = "v1alpha1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindInfo {
    /// Lowercase selector used on the command line.
    pub name: &'static str,
    pub kind: &'static str,
}

impl KindInfo {
    pub fn gvk_key(&self) -> String { format!("{API_GROUP}/{API_VERSION}/{}", self.kind) }
}

pub const KINDS: &[KindInfo] = &[
    KindInfo { name: "repository", kind: "Repository" },
    KindInfo { name: "release", kind: "Release" },
    KindInfo { name: "label", kind: "Label" },
    KindInfo { name: "webhook", kind: "Webhook" },
];

#[derive(Debug, thiserror::Error)]
#[error("unknown kind {0:?} (known: repository, release, label, webhook)")]
pub struct UnknownKind(pub String);

/// Resolve a selection; empty means every kind. Matching is case-insensitive.
pub fn select(names: &[String]) -> Result<Vec<KindInfo>, UnknownKind> {
    if names.is_empty() {
        return Ok(KINDS.to_vec());
    }
    let mut out: Vec<KindInfo> = Vec::new();
    for raw in names {
        let wanted = raw.trim().to_ascii_lowercase();
        let info = KINDS
            .iter()
            .find(|k| k.name == wanted || k.kind.eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| UnknownKind(raw.clone()))?;
        if !out.contains(info) {
            out.push(*info);
        }
    }
    Ok(out)
}

/// Register one controller per selected kind.
pub fn register(manager: &mut Manager, kinds: &[KindInfo]) {
    for k in kinds {
        match k.name {
            "repository" => manager.register(RepositoryAdapter),
            "release" => manager.register(ReleaseAdapter::default()),
            "label" => manager.register(LabelAdapter),
            "webhook" => manager.register(WebhookAdapter),
            _ => {}
        }
    }
}
