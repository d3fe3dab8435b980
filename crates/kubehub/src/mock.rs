//! In-memory implementations of [`ObjectStore`] and [`Connector`] for tests.
//!
//! `MemoryStore` mimics the API server semantics the engine relies on: `resourceVersion`
//! checks, status as a subresource, and reaping of terminating objects once their last
//! finalizer is gone.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use forgeplane_core::ProviderConfigRef;
use forgeplane_forge::{ClientConfig, ForgeClient};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::provider::{ConnectError, Connector};
use crate::store::{Notice, ObjectStore, StoreError};

struct MemState<K> {
    objects: BTreeMap<String, K>,
    version: u64,
    notices: Vec<(String, Notice)>,
    writes: usize,
}

pub struct MemoryStore<K> {
    state: Mutex<MemState<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self { state: Mutex::new(MemState { objects: BTreeMap::new(), version: 0, notices: Vec::new(), writes: 0 }) }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned,
{
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, MemState<K>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object as a user would create it (status included).
    pub fn insert(&self, mut obj: K) -> K {
        let mut st = self.lock();
        st.version += 1;
        obj.meta_mut().resource_version = Some(st.version.to_string());
        st.objects.insert(obj.name_any(), obj.clone());
        obj
    }

    pub fn get_now(&self, name: &str) -> Option<K> {
        self.lock().objects.get(name).cloned()
    }

    /// Like `kubectl delete`: sets the deletion timestamp, reaps when no finalizers remain.
    pub fn mark_deleted(&self, name: &str) {
        let mut st = self.lock();
        st.version += 1;
        let version = st.version.to_string();
        let reap = match st.objects.get_mut(name) {
            Some(obj) => {
                obj.meta_mut().deletion_timestamp = Some(Time(chrono_now()));
                obj.meta_mut().resource_version = Some(version);
                obj.finalizers().is_empty()
            }
            None => false,
        };
        if reap {
            st.objects.remove(name);
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.lock().notices.iter().map(|(_, n)| n.clone()).collect()
    }

    /// Number of successful `update` + `update_status` calls.
    pub fn writes(&self) -> usize { self.lock().writes }

    fn check_version(st: &MemState<K>, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let current = st.objects.get(&name).cloned().ok_or_else(|| StoreError::NotFound(name.clone()))?;
        if current.meta().resource_version != obj.meta().resource_version {
            return Err(StoreError::Conflict(format!(
                "{name}: resourceVersion {:?} is stale (current {:?})",
                obj.meta().resource_version,
                current.meta().resource_version
            )));
        }
        Ok(current)
    }

    fn commit(st: &mut MemState<K>, mut obj: K) -> K {
        st.version += 1;
        st.writes += 1;
        obj.meta_mut().resource_version = Some(st.version.to_string());
        let name = obj.name_any();
        if obj.meta().deletion_timestamp.is_some() && obj.finalizers().is_empty() {
            st.objects.remove(&name);
        } else {
            st.objects.insert(name, obj.clone());
        }
        obj
    }
}

/// Copy `status` from `from` into `into`, through JSON so any kind works.
fn graft_status<K: Serialize + DeserializeOwned>(into: &K, from: &K) -> Result<K, StoreError> {
    let mut target = serde_json::to_value(into)?;
    let status = serde_json::to_value(from)?.get("status").cloned().unwrap_or(serde_json::Value::Null);
    if let Some(map) = target.as_object_mut() {
        if status.is_null() {
            map.remove("status");
        } else {
            map.insert("status".to_string(), status);
        }
    }
    Ok(serde_json::from_value(target)?)
}

fn chrono_now() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
    k8s_openapi::chrono::Utc::now()
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.get_now(name))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let mut st = self.lock();
        let current = Self::check_version(&st, obj)?;
        let mut next = graft_status(obj, &current)?;
        // deletionTimestamp is server-owned
        next.meta_mut().deletion_timestamp = current.meta().deletion_timestamp.clone();
        Ok(Self::commit(&mut st, next))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let mut st = self.lock();
        let current = Self::check_version(&st, obj)?;
        let next = graft_status(&current, obj)?;
        Ok(Self::commit(&mut st, next))
    }

    async fn record(&self, obj: &K, notice: Notice) {
        self.lock().notices.push((obj.name_any(), notice));
    }
}

/// [`Connector`] returning clients for a fixed forge, or a fixed failure.
pub struct StaticConnector {
    base_url: String,
    token: String,
    fail_with: Option<String>,
}

impl StaticConnector {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), token: token.into(), fail_with: None }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self { base_url: String::new(), token: String::new(), fail_with: Some(message.into()) }
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self, reference: &ProviderConfigRef) -> Result<ForgeClient, ConnectError> {
        if let Some(msg) = &self.fail_with {
            return Err(ConnectError::Credentials(format!("{}: {msg}", reference.name)));
        }
        Ok(ForgeClient::new(ClientConfig::new(self.base_url.clone(), self.token.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn cm(name: &str) -> ConfigMap {
        let mut c = ConfigMap::default();
        c.metadata.name = Some(name.into());
        c
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let store = MemoryStore::new();
        let seeded = store.insert(cm("a"));
        let mut first = seeded.clone();
        first.labels_mut().insert("k".into(), "v".into());
        store.update(&first).await.unwrap();
        let err = store.update(&seeded).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn terminating_object_is_reaped_when_finalizers_clear() {
        let store = MemoryStore::new();
        let mut c = cm("a");
        c.finalizers_mut().push("x".into());
        store.insert(c);
        store.mark_deleted("a");
        let mut live = store.get("a").await.unwrap().unwrap();
        assert!(live.meta().deletion_timestamp.is_some());
        live.finalizers_mut().clear();
        store.update(&live).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
