//! Helpers shared by the adapters.

use chrono::{DateTime, SecondsFormat, Utc};
use forgeplane_engine::AdapterError;

/// Split `owner/repo`. Both halves must be non-empty and there must be exactly one slash.
pub fn split_repository(field: &str, raw: &str) -> Result<(String, String), AdapterError> {
    match raw.trim().split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(AdapterError::InvalidSpec(format!("{field} must be \"owner/repo\", got {raw:?}"))),
    }
}

/// Numeric forge id stored in the external-name annotation.
pub fn parse_id(identity: &str) -> Result<i64, AdapterError> {
    identity
        .trim()
        .parse()
        .map_err(|_| AdapterError::InvalidSpec(format!("external name {identity:?} is not a numeric id")))
}

pub fn rfc3339(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Implements `ManagedResource` for a kind whose spec carries `provider_config_ref` and
/// `deletion_policy` and whose status is `ManagedStatus<$obs>`.
macro_rules! managed_resource {
    ($kind:ty, $obs:ty) => {
        impl forgeplane_engine::ManagedResource for $kind {
            type Observation = $obs;

            fn provider_config_ref(&self) -> &forgeplane_core::ProviderConfigRef { &self.spec.provider_config_ref }

            fn deletion_policy(&self) -> forgeplane_core::DeletionPolicy { self.spec.deletion_policy.unwrap_or_default() }

            fn managed_status(&self) -> Option<&forgeplane_core::ManagedStatus<$obs>> { self.status.as_ref() }

            fn managed_status_mut(&mut self) -> &mut forgeplane_core::ManagedStatus<$obs> {
                self.status.get_or_insert_with(Default::default)
            }
        }
    };
}

pub(crate) use managed_resource;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_key_parsing() {
        assert_eq!(split_repository("repository", "acme/svc").unwrap(), ("acme".into(), "svc".into()));
        for bad in ["", "acme", "acme/", "/svc", "a/b/c"] {
            let err = split_repository("repository", bad).unwrap_err();
            assert!(matches!(err, AdapterError::InvalidSpec(_)), "{bad:?}");
        }
    }

    #[test]
    fn ids_must_be_numeric() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(parse_id("v1.0").is_err());
    }
}
