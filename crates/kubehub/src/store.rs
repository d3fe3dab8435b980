//! Object store surface consumed by the engine: get by key, optimistic-concurrency updates,
//! status updates, and user-visible events.

use std::fmt::Debug;

use async_trait::async_trait;
use kube::{
    api::{Api, PostParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write carried a stale `resourceVersion`.
    #[error("stale write: {0}")]
    Conflict(String),
    #[error("object {0} not found")]
    NotFound(String),
    #[error("kube api: {0}")]
    Kube(#[source] kube::Error),
    #[error("serializing object: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(resp.message.clone()),
            _ => StoreError::Kube(e),
        }
    }
}

/// A user-visible event attached to a managed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: String,
}

impl Notice {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self { warning: false, reason: reason.to_string(), action: action.to_string(), note: note.into() }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self { warning: true, reason: reason.to_string(), action: action.to_string(), note: note.into() }
    }
}

/// Orchestrator surface for one kind. Writes are version-checked: a stale object yields
/// [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync,
{
    async fn get(&self, name: &str) -> Result<Option<K>, StoreError>;

    /// Replace metadata and spec. Status is ignored.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace the status subresource only.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;

    /// Best-effort; failures are logged, never returned.
    async fn record(&self, obj: &K, notice: Notice);
}

/// [`ObjectStore`] over a cluster-scoped `kube::Api`.
pub struct KubeStore<K> {
    api: Api<K>,
    client: Client,
    reporter: Reporter,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self { api: Api::all(client.clone()), client, reporter }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        Ok(self.api.replace(&obj.name_any(), &PostParams::default(), obj).await?)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let data = serde_json::to_vec(obj)?;
        Ok(self.api.replace_status(&obj.name_any(), &PostParams::default(), data).await?)
    }

    async fn record(&self, obj: &K, notice: Notice) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), obj.object_ref(&()));
        let event = Event {
            type_: if notice.warning { EventType::Warning } else { EventType::Normal },
            reason: notice.reason,
            note: Some(notice.note),
            action: notice.action,
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(name = %obj.name_any(), error = %e, "kubehub: event publish failed");
        }
    }
}
