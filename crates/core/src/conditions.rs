//! Lifecycle conditions reported on managed objects.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Ready,
    Synced,
    Creating,
    Deleting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason tokens. The set is closed so the engine and users agree on spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Reason {
    Available,
    Unavailable,
    Creating,
    Deleting,
    ReconcileSuccess,
    CannotConnect,
    Missing,
    Auth,
    RateLimited,
    Conflict,
    Transport,
    Protocol,
    InvalidSpec,
    Timeout,
    ReconcileError,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Available => "Available",
            Reason::Unavailable => "Unavailable",
            Reason::Creating => "Creating",
            Reason::Deleting => "Deleting",
            Reason::ReconcileSuccess => "ReconcileSuccess",
            Reason::CannotConnect => "CannotConnect",
            Reason::Missing => "Missing",
            Reason::Auth => "Auth",
            Reason::RateLimited => "RateLimited",
            Reason::Conflict => "Conflict",
            Reason::Transport => "Transport",
            Reason::Protocol => "Protocol",
            Reason::InvalidSpec => "InvalidSpec",
            Reason::Timeout => "Timeout",
            Reason::ReconcileError => "ReconcileError",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_display_matches_serde_spelling() {
        for r in [Reason::CannotConnect, Reason::InvalidSpec, Reason::RateLimited, Reason::ReconcileSuccess] {
            let json = serde_json::to_string(&r).unwrap();
            assert_eq!(json, format!("\"{}\"", r));
        }
    }
}
