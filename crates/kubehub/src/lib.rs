//! Forgeplane kubehub: the orchestrator-facing surface of the controller.
//!
//! - [`store`]: get / versioned update / status update / events over `kube::Api`
//! - [`provider`]: `ProviderConfig` kind and the credential resolver
//! - [`mock`]: in-memory doubles used by tests

#![forbid(unsafe_code)]

pub mod mock;
pub mod provider;
pub mod store;

use kube::{
    discovery::{Discovery, Scope},
    Client,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

pub use provider::{ConnectError, Connector, KubeConnector, ProviderConfig, ProviderConfigSpec};
pub use store::{KubeStore, Notice, ObjectStore, StoreError};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared kube client (kubeconfig or in-cluster), created on first use.
pub async fn get_kube_client() -> Result<Client, kube::Error> {
    CLIENT.get_or_try_init(Client::try_default).await.cloned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Kinds the API server currently serves for one API group.
pub async fn served_kinds(client: Client, group: &str) -> Result<Vec<DiscoveredResource>, kube::Error> {
    let discovery = Discovery::new(client).filter(&[group]).run().await?;
    let mut out = Vec::new();
    for g in discovery.groups() {
        for (ar, caps) in g.recommended_resources() {
            out.push(DiscoveredResource {
                group: ar.group.clone(),
                version: ar.version.clone(),
                kind: ar.kind.clone(),
                namespaced: matches!(caps.scope, Scope::Namespaced),
            });
        }
    }
    out.sort_by(|a, b| a.version.cmp(&b.version).then(a.kind.cmp(&b.kind)));
    debug!(group, count = out.len(), "kubehub: discovery done");
    Ok(out)
}

/// Expected `group/version/Kind` keys that the API server does not serve.
pub fn missing_kinds<'a>(served: &[DiscoveredResource], expected: &[&'a str]) -> Vec<&'a str> {
    expected
        .iter()
        .copied()
        .filter(|key| !served.iter().any(|r| r.gvk_key() == *key))
        .collect()
}
