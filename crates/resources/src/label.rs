//! `Label`: numeric id after create; adopted by name when the annotation is missing.

use async_trait::async_trait;
use forgeplane_core::meta::{external_name, is_terminating, set_external_name};
use forgeplane_core::{DeletionPolicy, Drift, ManagedStatus, ProviderConfigRef};
use forgeplane_engine::{found, AdapterError, ExternalResource, Observation};
use forgeplane_forge::models::{CreateLabelOption, EditLabelOption, Label as ForgeLabel};
use forgeplane_forge::ForgeClient;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{managed_resource, parse_id, split_repository};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "forgeplane.io", version = "v1alpha1", kind = "Label", status = "LabelStatus")]
#[serde(rename_all = "camelCase")]
pub struct LabelSpec {
    #[serde(default)]
    pub provider_config_ref: ProviderConfigRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    /// `owner/repo`
    pub repository: String,
    pub name: String,
    /// Six hex digits, with or without a leading `#`.
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelObservation {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub description: String,
    pub exclusive: bool,
    pub url: String,
}

pub type LabelStatus = ManagedStatus<LabelObservation>;

managed_resource!(Label, LabelObservation);

impl From<ForgeLabel> for LabelObservation {
    fn from(l: ForgeLabel) -> Self {
        Self { id: l.id, name: l.name, color: l.color, description: l.description, exclusive: l.exclusive, url: l.url }
    }
}

/// Lowercase hex without `#`, or `None` when not six hex digits.
fn normalize_color(raw: &str) -> Option<String> {
    let hex = raw.trim().trim_start_matches('#');
    (hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit())).then(|| hex.to_ascii_lowercase())
}

fn same_color(desired: &String, observed: &str) -> bool {
    desired.trim().trim_start_matches('#').eq_ignore_ascii_case(observed.trim().trim_start_matches('#'))
}

fn drift(spec: &LabelSpec, o: &LabelObservation) -> Drift {
    let mut d = Drift::new();
    d.required("name", &spec.name, &o.name)
        .optional_by("color", Some(&spec.color), o.color.as_str(), same_color)
        .optional("description", &spec.description, &o.description)
        .optional("exclusive", &spec.exclusive, &o.exclusive);
    d
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LabelAdapter;

impl LabelAdapter {
    /// Parsed repository plus the validated color.
    fn validate(spec: &LabelSpec) -> Result<((String, String), String), AdapterError> {
        let repo = split_repository("repository", &spec.repository)?;
        if spec.name.trim().is_empty() {
            return Err(AdapterError::InvalidSpec("label name is required".into()));
        }
        let color = normalize_color(&spec.color)
            .ok_or_else(|| AdapterError::InvalidSpec(format!("color {:?} is not six hex digits", spec.color)))?;
        Ok((repo, color))
    }
}

#[async_trait]
impl ExternalResource for LabelAdapter {
    type Managed = Label;

    fn external_key(&self, obj: &Label) -> Result<Option<String>, AdapterError> {
        Ok(external_name(obj).map(str::to_owned))
    }

    async fn observe(&self, obj: &mut Label, forge: &ForgeClient) -> Result<Observation<LabelObservation>, AdapterError> {
        // deleting only needs the repository and the id
        let (owner, repo) = if is_terminating(obj) {
            split_repository("repository", &obj.spec.repository)?
        } else {
            Self::validate(&obj.spec)?.0
        };
        let label = match external_name(obj) {
            Some(identity) => found(forge.get_label(&owner, &repo, parse_id(identity)?).await, "get label")?,
            None => {
                let all = forge.list_labels(&owner, &repo).await.map_err(AdapterError::forge("list labels"))?;
                let hit = all.into_iter().find(|l| l.name == obj.spec.name);
                if let Some(l) = &hit {
                    debug!(label = %l.name, id = l.id, "label: found by name");
                    set_external_name(obj, &l.id.to_string());
                }
                hit
            }
        };
        Ok(match label {
            Some(l) => {
                let observed = LabelObservation::from(l);
                let up_to_date = drift(&obj.spec, &observed).is_clean();
                Observation::Present { observed, up_to_date }
            }
            None => Observation::Absent,
        })
    }

    async fn create(&self, obj: &Label, forge: &ForgeClient) -> Result<String, AdapterError> {
        let ((owner, repo), color) = Self::validate(&obj.spec)?;
        let opts = CreateLabelOption {
            name: obj.spec.name.clone(),
            color: format!("#{color}"),
            description: obj.spec.description.clone(),
            exclusive: obj.spec.exclusive,
        };
        let label = forge.create_label(&owner, &repo, &opts).await.map_err(AdapterError::forge("create label"))?;
        Ok(label.id.to_string())
    }

    async fn update(&self, obj: &Label, observed: &LabelObservation, forge: &ForgeClient) -> Result<(), AdapterError> {
        let ((owner, repo), color) = Self::validate(&obj.spec)?;
        let d = drift(&obj.spec, observed);
        if d.is_clean() {
            return Ok(());
        }
        let opts = EditLabelOption {
            name: d.contains("name").then(|| obj.spec.name.clone()),
            color: d.contains("color").then(|| format!("#{color}")),
            description: if d.contains("description") { obj.spec.description.clone() } else { None },
            exclusive: if d.contains("exclusive") { obj.spec.exclusive } else { None },
        };
        forge.edit_label(&owner, &repo, observed.id, &opts).await.map_err(AdapterError::forge("edit label"))?;
        Ok(())
    }

    async fn delete(&self, obj: &Label, forge: &ForgeClient) -> Result<(), AdapterError> {
        let Some(identity) = external_name(obj) else {
            return Ok(());
        };
        let (owner, repo) = split_repository("repository", &obj.spec.repository)?;
        match forge.delete_label(&owner, &repo, parse_id(identity)?).await {
            Err(e) if !e.is_not_found() => Err(AdapterError::Forge { context: "delete label", source: e }),
            _ => Ok(()),
        }
    }
}
