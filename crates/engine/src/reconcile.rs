//! The per-object control loop: fetch, finalize or observe, decide, act, report.

use std::sync::Arc;
use std::time::{Duration, Instant};

use forgeplane_core::meta::{add_finalizer, clear_external_name, external_name, has_finalizer, is_terminating, remove_finalizer, set_external_name};
use forgeplane_core::{ConditionStatus, ConditionType, DeletionPolicy, ManagedStatus, Reason};
use forgeplane_forge::ForgeClient;
use forgeplane_kubehub::{Connector, Notice, ObjectStore, StoreError};
use kube::{Resource, ResourceExt};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, ExternalResource, ManagedResource, Observation};
use crate::backoff::BackoffTracker;
use crate::error::ReconcileError;
use crate::settings::Settings;

type Observed<A> = <<A as ExternalResource>::Managed as ManagedResource>::Observation;
type Status<A> = ManagedStatus<Observed<A>>;

const TIMEOUT_REPORT_GRACE: Duration = Duration::from_secs(10);

/// Everything one kind needs to be reconciled.
pub struct Binding<A: ExternalResource> {
    pub adapter: A,
    pub store: Arc<dyn ObjectStore<A::Managed>>,
    pub connector: Arc<dyn Connector>,
    pub settings: Settings,
    pub backoff: BackoffTracker,
}

impl<A: ExternalResource> Binding<A> {
    pub fn new(
        adapter: A,
        store: Arc<dyn ObjectStore<A::Managed>>,
        connector: Arc<dyn Connector>,
        settings: Settings,
    ) -> Self {
        let backoff = BackoffTracker::new(settings.backoff_base, settings.backoff_ceiling);
        Self { adapter, store, connector, settings, backoff }
    }
}

/// What to do after a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing scheduled; the next watch event re-delivers the object.
    Done,
    After(Duration),
}

/// Run one cycle for `name` under the configured deadline.
pub async fn reconcile<A: ExternalResource>(b: &Binding<A>, name: &str) -> Result<Requeue, ReconcileError> {
    let kind = <A::Managed as Resource>::kind(&()).to_string();
    let t0 = Instant::now();
    let res = match tokio::time::timeout(b.settings.deadline, cycle(b, name)).await {
        Ok(res) => res,
        Err(_) => {
            let err = ReconcileError::Timeout(b.settings.deadline);
            report_timeout(b, name, &err).await;
            Err(err)
        }
    };
    let took_ms = t0.elapsed().as_millis() as u64;
    let result = match &res {
        Ok(_) => "ok",
        Err(e) => e.reason().as_str(),
    };
    counter!("forgeplane_reconcile_total", 1, "kind" => kind.clone(), "result" => result);
    histogram!("forgeplane_reconcile_ms", took_ms as f64, "kind" => kind.clone());
    match &res {
        Ok(requeue) => debug!(kind = %kind, name, took_ms, ?requeue, "reconcile: ok"),
        Err(e) => warn!(kind = %kind, name, took_ms, reason = %e.reason(), error = ?e, "reconcile: failed"),
    }
    res
}

async fn cycle<A: ExternalResource>(b: &Binding<A>, name: &str) -> Result<Requeue, ReconcileError> {
    let Some(mut obj) = b.store.get(name).await? else {
        debug!(name, "reconcile: object gone");
        return Ok(Requeue::Done);
    };
    if is_terminating(&obj) {
        return finalize(b, obj).await;
    }
    if add_finalizer(&mut obj) {
        b.store.update(&obj).await?;
        debug!(name, "reconcile: finalizer added");
        return Ok(Requeue::Done);
    }

    let before = obj.managed_status().cloned();
    let forge = match b.connector.connect(obj.provider_config_ref()).await {
        Ok(f) => f,
        Err(e) => return fail(b, obj, before.as_ref(), "Connect", e.into()).await,
    };

    let identity = external_name(&obj).map(str::to_owned);
    let observed = b.adapter.observe(&mut obj, &forge).await;
    let present = matches!(observed, Ok(Observation::Present { .. }));
    let adopted = guard_identity(&mut obj, identity.as_deref(), present);
    let observed = match observed {
        Ok(o) => o,
        Err(e) => return fail(b, obj, before.as_ref(), "Observe", e.into()).await,
    };

    if let Some(id) = adopted {
        obj = match persist_metadata(b, obj.clone()).await {
            Ok(fresh) => fresh,
            Err(e) => return fail(b, obj, before.as_ref(), "Adopt", e.into()).await,
        };
        info!(name, identity = %id, "reconcile: adopted existing forge object");
        b.store.record(&obj, Notice::normal("Adopted", "Adopt", format!("adopted forge object {id}"))).await;
    }

    match observed {
        Observation::Absent => match identity {
            Some(id) => missing(b, obj, before.as_ref(), &id).await,
            None => create(b, obj, before.as_ref(), &forge).await,
        },
        Observation::Present { observed, up_to_date: true } => {
            let st = obj.managed_status_mut();
            st.at_provider = Some(observed);
            mark_healthy(st);
            write_status(b, &obj, before.as_ref()).await?;
            Ok(Requeue::After(b.settings.poll_interval))
        }
        Observation::Present { observed, up_to_date: false } => {
            if let Err(e) = b.adapter.update(&obj, &observed, &forge).await {
                obj.managed_status_mut().at_provider = Some(observed);
                return fail(b, obj, before.as_ref(), "Update", e.into()).await;
            }
            let observed = reread(b, &mut obj, &forge, observed).await;
            let st = obj.managed_status_mut();
            st.at_provider = Some(observed);
            mark_healthy(st);
            info!(name, "reconcile: updated drifted fields");
            b.store.record(&obj, Notice::normal("Updated", "Update", "forge object updated")).await;
            write_status(b, &obj, before.as_ref()).await?;
            Ok(Requeue::After(b.settings.poll_interval))
        }
    }
}

async fn create<A: ExternalResource>(
    b: &Binding<A>,
    mut obj: A::Managed,
    before: Option<&Status<A>>,
    forge: &ForgeClient,
) -> Result<Requeue, ReconcileError> {
    // composite keys go on the object before the call; persisted only on success
    match b.adapter.external_key(&obj) {
        Ok(Some(key)) => set_external_name(&mut obj, &key),
        Ok(None) => {}
        Err(e) => return fail(b, obj, before, "Create", e.into()).await,
    }
    obj.managed_status_mut()
        .set_condition(ConditionType::Creating, ConditionStatus::True, Reason::Creating, "");
    let id = match b.adapter.create(&obj, forge).await {
        Ok(id) => id,
        Err(e) => {
            clear_external_name(&mut obj);
            return fail(b, obj, before, "Create", e.into()).await;
        }
    };
    set_external_name(&mut obj, &id);
    let st = obj.managed_status_mut();
    st.set_condition(ConditionType::Creating, ConditionStatus::False, Reason::ReconcileSuccess, "");
    st.set_condition(ConditionType::Ready, ConditionStatus::False, Reason::Creating, "awaiting first observation");
    st.set_condition(ConditionType::Synced, ConditionStatus::True, Reason::ReconcileSuccess, "");

    let obj = match persist_metadata(b, obj.clone()).await {
        Ok(fresh) => fresh,
        Err(e) => return fail(b, obj, before, "Create", e.into()).await,
    };
    info!(name = %obj.name_any(), identity = %id, "reconcile: created forge object");
    b.store.record(&obj, Notice::normal("Created", "Create", format!("created forge object {id}"))).await;
    write_status(b, &obj, before).await?;
    Ok(Requeue::After(b.settings.poll_interval))
}

async fn missing<A: ExternalResource>(
    b: &Binding<A>,
    mut obj: A::Managed,
    before: Option<&Status<A>>,
    identity: &str,
) -> Result<Requeue, ReconcileError> {
    let st = obj.managed_status_mut();
    st.set_condition(
        ConditionType::Synced,
        ConditionStatus::False,
        Reason::Missing,
        format!("forge object {identity} does not exist; remove the external-name annotation to recreate it"),
    );
    st.set_condition(ConditionType::Ready, ConditionStatus::False, Reason::Unavailable, "");
    if obj.managed_status() != before {
        warn!(name = %obj.name_any(), identity, "reconcile: forge object missing");
        b.store
            .record(&obj, Notice::warning("Missing", "Observe", format!("forge object {identity} not found")))
            .await;
    }
    write_status(b, &obj, before).await?;
    Ok(Requeue::After(b.settings.poll_interval))
}

async fn finalize<A: ExternalResource>(b: &Binding<A>, mut obj: A::Managed) -> Result<Requeue, ReconcileError> {
    if !has_finalizer(&obj) {
        debug!(name = %obj.name_any(), "reconcile: terminating without finalizer, skipping");
        return Ok(Requeue::Done);
    }
    if obj.deletion_policy() == DeletionPolicy::Orphan {
        return release(b, obj, "Orphaned", "forge object left in place").await;
    }

    let before = obj.managed_status().cloned();
    obj.managed_status_mut()
        .set_condition(ConditionType::Deleting, ConditionStatus::True, Reason::Deleting, "");
    let forge = match b.connector.connect(obj.provider_config_ref()).await {
        Ok(f) => f,
        Err(e) => return fail(b, obj, before.as_ref(), "Delete", e.into()).await,
    };

    let identity = external_name(&obj).map(str::to_owned);
    let observed = b.adapter.observe(&mut obj, &forge).await;
    let present = matches!(observed, Ok(Observation::Present { .. }));
    guard_identity(&mut obj, identity.as_deref(), present);
    match observed {
        Ok(Observation::Absent) => release(b, obj, "Deleted", "forge object already absent").await,
        Err(AdapterError::InvalidSpec(msg)) if identity.is_none() => {
            debug!(name = %obj.name_any(), %msg, "reconcile: invalid spec and no identity, nothing to delete");
            release(b, obj, "Deleted", "nothing was created").await
        }
        Err(e) => fail(b, obj, before.as_ref(), "Delete", e.into()).await,
        Ok(Observation::Present { .. }) => match b.adapter.delete(&obj, &forge).await {
            Ok(()) => release(b, obj, "Deleted", "forge object deleted").await,
            Err(e) if e.is_not_found() => release(b, obj, "Deleted", "forge object already absent").await,
            Err(e) => fail(b, obj, before.as_ref(), "Delete", e.into()).await,
        },
    }
}

async fn release<A: ExternalResource>(
    b: &Binding<A>,
    mut obj: A::Managed,
    reason: &str,
    note: &str,
) -> Result<Requeue, ReconcileError> {
    remove_finalizer(&mut obj);
    info!(name = %obj.name_any(), reason, "reconcile: finalizer released");
    b.store.record(&obj, Notice::normal(reason, "Delete", note)).await;
    b.store.update(&obj).await?;
    Ok(Requeue::Done)
}

/// Keep the external name write-once. Returns the identity when an observe adopted one.
fn guard_identity<K: Resource>(obj: &mut K, before: Option<&str>, present: bool) -> Option<String> {
    let now = external_name(obj).map(str::to_owned);
    match (before, now) {
        (Some(old), now) => {
            if now.as_deref() != Some(old) {
                warn!(name = %obj.name_any(), identity = old, "reconcile: adapter changed identity, restoring");
                set_external_name(obj, old);
            }
            None
        }
        (None, Some(new)) if present => Some(new),
        (None, Some(_)) => {
            clear_external_name(obj);
            None
        }
        (None, None) => None,
    }
}

/// Observe again after a successful update so `atProvider` reflects the patched object.
/// Falls back to the pre-update observation when the read-back fails.
async fn reread<A: ExternalResource>(
    b: &Binding<A>,
    obj: &mut A::Managed,
    forge: &ForgeClient,
    stale: Observed<A>,
) -> Observed<A> {
    let identity = external_name(obj).map(str::to_owned);
    let res = b.adapter.observe(obj, forge).await;
    guard_identity(obj, identity.as_deref(), matches!(res, Ok(Observation::Present { .. })));
    match res {
        Ok(Observation::Present { observed, .. }) => observed,
        Ok(Observation::Absent) => stale,
        Err(e) => {
            debug!(name = %obj.name_any(), error = %e, "reconcile: read-back after update failed");
            stale
        }
    }
}

fn mark_healthy<O>(st: &mut ManagedStatus<O>) {
    st.set_condition(ConditionType::Ready, ConditionStatus::True, Reason::Available, "");
    st.set_condition(ConditionType::Synced, ConditionStatus::True, Reason::ReconcileSuccess, "");
}

/// Persist metadata (identity, finalizers) and carry the in-memory status over to the fresh copy.
async fn persist_metadata<A: ExternalResource>(b: &Binding<A>, obj: A::Managed) -> Result<A::Managed, StoreError> {
    let status = obj.managed_status().cloned();
    let mut fresh = b.store.update(&obj).await?;
    if let Some(status) = status {
        *fresh.managed_status_mut() = status;
    }
    Ok(fresh)
}

async fn write_status<A: ExternalResource>(
    b: &Binding<A>,
    obj: &A::Managed,
    before: Option<&Status<A>>,
) -> Result<(), StoreError> {
    if obj.managed_status() == before {
        return Ok(());
    }
    b.store.update_status(obj).await?;
    Ok(())
}

async fn fail<A: ExternalResource>(
    b: &Binding<A>,
    mut obj: A::Managed,
    before: Option<&Status<A>>,
    action: &str,
    err: ReconcileError,
) -> Result<Requeue, ReconcileError> {
    let reason = err.reason();
    let message = err.to_string();
    obj.managed_status_mut()
        .set_condition(ConditionType::Synced, ConditionStatus::False, reason, message.clone());
    b.store.record(&obj, Notice::warning(reason.as_str(), action, message)).await;
    if let Err(e) = write_status(b, &obj, before).await {
        warn!(name = %obj.name_any(), error = %e, "reconcile: status write failed");
    }
    Err(err)
}

async fn report_timeout<A: ExternalResource>(b: &Binding<A>, name: &str, err: &ReconcileError) {
    match tokio::time::timeout(TIMEOUT_REPORT_GRACE, write_timeout(b, name, err)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(name, error = %e, "reconcile: timeout status write failed"),
        Err(_) => warn!(name, "reconcile: timeout status write timed out"),
    }
}

async fn write_timeout<A: ExternalResource>(b: &Binding<A>, name: &str, err: &ReconcileError) -> Result<(), StoreError> {
    let Some(mut obj) = b.store.get(name).await? else {
        return Ok(());
    };
    let before = obj.managed_status().cloned();
    obj.managed_status_mut()
        .set_condition(ConditionType::Synced, ConditionStatus::False, Reason::Timeout, err.to_string());
    write_status(b, &obj, before.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn cm() -> ConfigMap {
        let mut c = ConfigMap::default();
        c.metadata.name = Some("x".into());
        c
    }

    #[test]
    fn identity_is_write_once() {
        let mut c = cm();
        set_external_name(&mut c, "7");
        set_external_name(&mut c, "8");
        assert_eq!(guard_identity(&mut c, Some("7"), true), None);
        assert_eq!(external_name(&c), Some("7"));

        clear_external_name(&mut c);
        assert_eq!(guard_identity(&mut c, Some("7"), false), None);
        assert_eq!(external_name(&c), Some("7"));
    }

    #[test]
    fn adoption_only_counts_when_present() {
        let mut c = cm();
        set_external_name(&mut c, "9");
        assert_eq!(guard_identity(&mut c, None, true).as_deref(), Some("9"));

        let mut c = cm();
        set_external_name(&mut c, "9");
        assert_eq!(guard_identity(&mut c, None, false), None);
        assert_eq!(external_name(&c), None);
    }
}
