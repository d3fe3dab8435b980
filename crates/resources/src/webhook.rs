//! `Webhook`: numeric id after create; adopted by target URL. The secret is write-only on
//! the forge, so it is sent on create and never compared.

use std::collections::BTreeMap;

use async_trait::async_trait;
use forgeplane_core::meta::{external_name, is_terminating, set_external_name};
use forgeplane_core::{DeletionPolicy, Drift, ManagedStatus, ProviderConfigRef};
use forgeplane_engine::{found, AdapterError, ExternalResource, Observation};
use forgeplane_forge::models::{CreateHookOption, EditHookOption, Hook};
use forgeplane_forge::ForgeClient;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{managed_resource, parse_id, rfc3339, split_repository};

pub const DEFAULT_HOOK_TYPE: &str = "gitea";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HookContentType {
    #[default]
    Json,
    Form,
}

impl HookContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookContentType::Json => "json",
            HookContentType::Form => "form",
        }
    }
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "forgeplane.io", version = "v1alpha1", kind = "Webhook", status = "WebhookStatus")]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    #[serde(default)]
    pub provider_config_ref: ProviderConfigRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    /// `owner/repo`
    pub repository: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<HookContentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookObservation {
    pub id: i64,
    #[serde(rename = "type")]
    pub type_: String,
    pub url: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch_filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

pub type WebhookStatus = ManagedStatus<WebhookObservation>;

managed_resource!(Webhook, WebhookObservation);

impl From<Hook> for WebhookObservation {
    fn from(h: Hook) -> Self {
        Self {
            id: h.id,
            url: h.target_url().to_string(),
            content_type: h.content_type().to_string(),
            type_: h.type_,
            events: h.events,
            active: h.active,
            branch_filter: h.branch_filter,
            created_at: rfc3339(h.created_at),
            updated_at: rfc3339(h.updated_at),
        }
    }
}

fn drift(spec: &WebhookSpec, o: &WebhookObservation) -> Drift {
    let mut d = Drift::new();
    d.required("url", &spec.url, &o.url)
        .optional_by("contentType", spec.content_type.as_ref(), o.content_type.as_str(), |want, have| want.as_str() == have)
        .unordered("events", spec.events.as_deref(), &o.events)
        .optional("active", &spec.active, &o.active)
        .optional("branchFilter", &spec.branch_filter, &o.branch_filter);
    d
}

fn hook_config(spec: &WebhookSpec, with_secret: bool) -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    config.insert("url".to_string(), spec.url.clone());
    config.insert("content_type".to_string(), spec.content_type.unwrap_or_default().as_str().to_string());
    if with_secret {
        if let Some(secret) = &spec.secret {
            config.insert("secret".to_string(), secret.clone());
        }
    }
    config
}

fn edit_options(spec: &WebhookSpec, d: &Drift) -> EditHookOption {
    EditHookOption {
        config: (d.contains("url") || d.contains("contentType")).then(|| hook_config(spec, false)),
        events: if d.contains("events") { spec.events.clone() } else { None },
        branch_filter: if d.contains("branchFilter") { spec.branch_filter.clone() } else { None },
        active: if d.contains("active") { spec.active } else { None },
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookAdapter;

impl WebhookAdapter {
    fn validate(spec: &WebhookSpec) -> Result<(String, String), AdapterError> {
        let repo = split_repository("repository", &spec.repository)?;
        if spec.url.trim().is_empty() {
            return Err(AdapterError::InvalidSpec("webhook url is required".into()));
        }
        Ok(repo)
    }
}

#[async_trait]
impl ExternalResource for WebhookAdapter {
    type Managed = Webhook;

    fn external_key(&self, obj: &Webhook) -> Result<Option<String>, AdapterError> {
        Ok(external_name(obj).map(str::to_owned))
    }

    async fn observe(
        &self,
        obj: &mut Webhook,
        forge: &ForgeClient,
    ) -> Result<Observation<WebhookObservation>, AdapterError> {
        let (owner, repo) = if is_terminating(obj) {
            split_repository("repository", &obj.spec.repository)?
        } else {
            Self::validate(&obj.spec)?
        };
        let hook = match external_name(obj) {
            Some(identity) => found(forge.get_hook(&owner, &repo, parse_id(identity)?).await, "get webhook")?,
            None => {
                let all = forge.list_hooks(&owner, &repo).await.map_err(AdapterError::forge("list webhooks"))?;
                let hit = all.into_iter().find(|h| h.target_url() == obj.spec.url);
                if let Some(h) = &hit {
                    debug!(url = %obj.spec.url, id = h.id, "webhook: found by target url");
                    set_external_name(obj, &h.id.to_string());
                }
                hit
            }
        };
        Ok(match hook {
            Some(h) => {
                let observed = WebhookObservation::from(h);
                let up_to_date = drift(&obj.spec, &observed).is_clean();
                Observation::Present { observed, up_to_date }
            }
            None => Observation::Absent,
        })
    }

    async fn create(&self, obj: &Webhook, forge: &ForgeClient) -> Result<String, AdapterError> {
        let (owner, repo) = Self::validate(&obj.spec)?;
        let spec = &obj.spec;
        let opts = CreateHookOption {
            type_: spec.type_.clone().unwrap_or_else(|| DEFAULT_HOOK_TYPE.to_string()),
            config: hook_config(spec, true),
            events: spec.events.clone(),
            branch_filter: spec.branch_filter.clone(),
            active: spec.active,
        };
        let hook = forge.create_hook(&owner, &repo, &opts).await.map_err(AdapterError::forge("create webhook"))?;
        Ok(hook.id.to_string())
    }

    async fn update(&self, obj: &Webhook, observed: &WebhookObservation, forge: &ForgeClient) -> Result<(), AdapterError> {
        let (owner, repo) = Self::validate(&obj.spec)?;
        let d = drift(&obj.spec, observed);
        if d.is_clean() {
            return Ok(());
        }
        forge
            .edit_hook(&owner, &repo, observed.id, &edit_options(&obj.spec, &d))
            .await
            .map_err(AdapterError::forge("edit webhook"))?;
        Ok(())
    }

    async fn delete(&self, obj: &Webhook, forge: &ForgeClient) -> Result<(), AdapterError> {
        let Some(identity) = external_name(obj) else {
            return Ok(());
        };
        let (owner, repo) = split_repository("repository", &obj.spec.repository)?;
        match forge.delete_hook(&owner, &repo, parse_id(identity)?).await {
            Err(e) if !e.is_not_found() => Err(AdapterError::Forge { context: "delete webhook", source: e }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WebhookSpec {
        serde_json::from_value(serde_json::json!({
            "repository": "o/r", "url": "https://ci.example.com/hook",
            "secret": "s3cr3t", "events": ["push", "issues"]
        }))
        .unwrap()
    }

    fn observed() -> WebhookObservation {
        WebhookObservation {
            id: 3,
            type_: "gitea".into(),
            url: "https://ci.example.com/hook".into(),
            content_type: "json".into(),
            events: vec!["issues".into(), "push".into()],
            active: true,
            ..Default::default()
        }
    }

    #[test]
    fn events_compare_as_set_and_secret_is_ignored() {
        assert!(drift(&spec(), &observed()).is_clean());
    }

    #[test]
    fn url_change_resends_config_without_secret() {
        let mut s = spec();
        s.url = "https://ci.example.com/v2".into();
        let d = drift(&s, &observed());
        assert_eq!(d.fields(), &["url"]);
        let opts = edit_options(&s, &d);
        let config = opts.config.unwrap();
        assert_eq!(config.get("url").map(String::as_str), Some("https://ci.example.com/v2"));
        assert!(!config.contains_key("secret"));
        assert!(opts.events.is_none());
    }

    #[test]
    fn create_config_carries_secret() {
        let c = hook_config(&spec(), true);
        assert_eq!(c.get("secret").map(String::as_str), Some("s3cr3t"));
        assert_eq!(c.get("content_type").map(String::as_str), Some("json"));
    }
}
