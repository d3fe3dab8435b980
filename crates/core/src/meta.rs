//! External-name annotation and finalizer helpers over any kube `Resource`.

use kube::{Resource, ResourceExt};

/// Annotation carrying the forge-side identity. The only stable cross-cycle channel.
pub const EXTERNAL_NAME_ANNOTATION: &str = "forgeplane.io/external-name";

/// Finalizer that blocks deletion until the forge object is gone (or orphaned).
pub const FINALIZER: &str = "forgeplane.io/finalizer";

/// Read the external identity; empty values count as unset.
pub fn external_name<K: Resource>(obj: &K) -> Option<&str> {
    obj.annotations()
        .get(EXTERNAL_NAME_ANNOTATION)
        .map(|s| s.as_str())
        .filter(|s| !s.trim().is_empty())
}

pub fn set_external_name<K: Resource>(obj: &mut K, identity: &str) {
    obj.annotations_mut().insert(EXTERNAL_NAME_ANNOTATION.to_string(), identity.to_string());
}

pub fn clear_external_name<K: Resource>(obj: &mut K) {
    obj.annotations_mut().remove(EXTERNAL_NAME_ANNOTATION);
}

pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Returns true when the finalizer was not present before.
pub fn add_finalizer<K: Resource>(obj: &mut K) -> bool {
    if has_finalizer(obj) {
        return false;
    }
    obj.finalizers_mut().push(FINALIZER.to_string());
    true
}

/// Returns true when the finalizer was present before.
pub fn remove_finalizer<K: Resource>(obj: &mut K) -> bool {
    let before = obj.finalizers().len();
    obj.finalizers_mut().retain(|f| f != FINALIZER);
    obj.finalizers().len() != before
}

pub fn is_terminating<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
