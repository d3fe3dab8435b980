//! Forgeplane core types shared by the engine, the adapters and the forge client glue.

#![forbid(unsafe_code)]

pub mod conditions;
pub mod drift;
pub mod meta;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use conditions::{Condition, ConditionStatus, ConditionType, Reason};
pub use drift::Drift;
pub use meta::{EXTERNAL_NAME_ANNOTATION, FINALIZER};

/// API group shared by every forgeplane kind.
pub const API_GROUP: &str = "forgeplane.io";

/// Names the forge connection profile (a cluster-scoped `ProviderConfig`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderConfigRef {
    pub name: String,
}

impl Default for ProviderConfigRef {
    fn default() -> Self { Self { name: "default".to_string() } }
}

/// What happens to the forge-side object when the declarative object is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    /// Release the finalizer without touching the forge.
    Orphan,
}

/// Controller-authored status block carried by every managed kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedStatus<O> {
    /// Projection of the last successful forge read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_provider: Option<O>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl<O> Default for ManagedStatus<O> {
    fn default() -> Self { Self { at_provider: None, conditions: Vec::new() } }
}

impl<O> ManagedStatus<O> {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Upsert a condition. `lastTransitionTime` only moves when the status flips.
    pub fn set_condition(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
    ) {
        let message = message.into();
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Some(conditions::now_rfc3339());
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                type_,
                status,
                reason,
                message,
                last_transition_time: Some(conditions::now_rfc3339()),
            }),
        }
    }

    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.condition(type_).map(|c| c.status == ConditionStatus::True).unwrap_or(false)
    }

    pub fn reason_of(&self, type_: ConditionType) -> Option<Reason> {
        self.condition(type_).map(|c| c.reason)
    }
}

pub mod prelude {
    pub use super::{
        Condition, ConditionStatus, ConditionType, DeletionPolicy, Drift, ManagedStatus, ProviderConfigRef, Reason,
    };
}
