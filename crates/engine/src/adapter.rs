//! Per-kind adapter contract.
//!
//! An adapter knows how to locate, compare, create, update and delete one kind of forge
//! object. It holds no state between calls; everything it needs arrives through the
//! managed object and the forge client.

use std::fmt::Debug;

use async_trait::async_trait;
use forgeplane_core::{DeletionPolicy, ManagedStatus, ProviderConfigRef};
use forgeplane_forge::{ForgeClient, ForgeError};
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};

/// A declarative kind the engine can reconcile.
pub trait ManagedResource:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// Projection of the forge object stored under `status.atProvider`.
    type Observation: Clone + PartialEq + Serialize + DeserializeOwned + Debug + Send + Sync + 'static;

    fn provider_config_ref(&self) -> &ProviderConfigRef;

    fn deletion_policy(&self) -> DeletionPolicy;

    fn managed_status(&self) -> Option<&ManagedStatus<Self::Observation>>;

    /// Creates an empty status block when none exists yet.
    fn managed_status_mut(&mut self) -> &mut ManagedStatus<Self::Observation>;
}

/// Result of a successful observe.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<O> {
    Absent,
    Present { observed: O, up_to_date: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{context}: {source}")]
    Forge {
        context: &'static str,
        #[source]
        source: ForgeError,
    },
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
}

impl AdapterError {
    pub fn forge(context: &'static str) -> impl FnOnce(ForgeError) -> AdapterError {
        move |source| AdapterError::Forge { context, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::Forge { source, .. } if source.is_not_found())
    }
}

/// Lift a forge result where `NotFound` is data rather than failure.
pub fn found<T>(res: Result<T, ForgeError>, context: &'static str) -> Result<Option<T>, AdapterError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(source) => Err(AdapterError::Forge { context, source }),
    }
}

#[async_trait]
pub trait ExternalResource: Send + Sync + 'static {
    type Managed: ManagedResource;

    /// The identity to look the object up by: the external-name annotation when set,
    /// otherwise a key derivable from the spec, otherwise `None`.
    fn external_key(&self, obj: &Self::Managed) -> Result<Option<String>, AdapterError>;

    /// Read the forge object. May set the external-name annotation when it is unset and the
    /// object was found by a natural key; any other change to the annotation is discarded.
    async fn observe(
        &self,
        obj: &mut Self::Managed,
        forge: &ForgeClient,
    ) -> Result<Observation<<Self::Managed as ManagedResource>::Observation>, AdapterError>;

    /// Create the forge object and return its identity.
    async fn create(&self, obj: &Self::Managed, forge: &ForgeClient) -> Result<String, AdapterError>;

    /// Send only the declared fields that differ from `observed`.
    async fn update(
        &self,
        obj: &Self::Managed,
        observed: &<Self::Managed as ManagedResource>::Observation,
        forge: &ForgeClient,
    ) -> Result<(), AdapterError>;

    /// `NotFound` counts as success.
    async fn delete(&self, obj: &Self::Managed, forge: &ForgeClient) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_treats_not_found_as_absent() {
        let absent: Result<u8, ForgeError> = Err(ForgeError::NotFound("gone".into()));
        assert_eq!(found(absent, "get label").unwrap(), None);

        let err = found::<u8>(Err(ForgeError::Conflict("dup".into())), "get label").unwrap_err();
        assert!(err.to_string().starts_with("get label: "));
        assert!(!err.is_not_found());
    }
}
