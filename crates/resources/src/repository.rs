//! `Repository`: identity is the composite natural key `owner/name`.

use async_trait::async_trait;
use forgeplane_core::meta::{external_name, set_external_name};
use forgeplane_core::{DeletionPolicy, Drift, ManagedStatus, ProviderConfigRef};
use forgeplane_engine::{found, AdapterError, ExternalResource, Observation};
use forgeplane_forge::models::{CreateRepoOption, EditRepoOption, RepoOwner, Repository as ForgeRepository};
use forgeplane_forge::ForgeClient;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{managed_resource, rfc3339, split_repository};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OwnerKind {
    User,
    #[default]
    Organization,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forgeplane.io",
    version = "v1alpha1",
    kind = "Repository",
    status = "RepositoryStatus",
    printcolumn = r#"{"name":"Name","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Owner","type":"string","jsonPath":".status.atProvider.owner"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    #[serde(default)]
    pub provider_config_ref: ProviderConfigRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    /// User or organization; omitted means the token's own account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_kind: Option<OwnerKind>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_issues: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_wiki: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_pull_requests: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    // create-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_init: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitignores: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryObservation {
    pub id: i64,
    pub full_name: String,
    pub owner: String,
    pub html_url: String,
    pub clone_url: String,
    pub ssh_url: String,
    pub default_branch: String,
    pub description: String,
    pub website: String,
    pub private: bool,
    pub template: bool,
    pub archived: bool,
    pub empty: bool,
    pub has_issues: bool,
    pub has_wiki: bool,
    pub has_pull_requests: bool,
    pub stars: i64,
    pub forks: i64,
    pub open_issues: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

pub type RepositoryStatus = ManagedStatus<RepositoryObservation>;

managed_resource!(Repository, RepositoryObservation);

impl From<ForgeRepository> for RepositoryObservation {
    fn from(r: ForgeRepository) -> Self {
        Self {
            id: r.id,
            full_name: r.full_name,
            owner: r.owner.login,
            html_url: r.html_url,
            clone_url: r.clone_url,
            ssh_url: r.ssh_url,
            default_branch: r.default_branch,
            description: r.description,
            website: r.website,
            private: r.private,
            template: r.template,
            archived: r.archived,
            empty: r.empty,
            has_issues: r.has_issues,
            has_wiki: r.has_wiki,
            has_pull_requests: r.has_pull_requests,
            stars: r.stars_count,
            forks: r.forks_count,
            open_issues: r.open_issues_count,
            created_at: rfc3339(r.created_at),
            updated_at: rfc3339(r.updated_at),
        }
    }
}

fn drift(spec: &RepositorySpec, o: &RepositoryObservation) -> Drift {
    let mut d = Drift::new();
    d.optional("description", &spec.description, &o.description)
        .optional("website", &spec.website, &o.website)
        .optional("private", &spec.private, &o.private)
        .optional("template", &spec.template, &o.template)
        .optional("hasIssues", &spec.has_issues, &o.has_issues)
        .optional("hasWiki", &spec.has_wiki, &o.has_wiki)
        .optional("hasPullRequests", &spec.has_pull_requests, &o.has_pull_requests)
        .optional("archived", &spec.archived, &o.archived);
    // an empty repository has no branches to point at
    if !o.empty {
        d.optional("defaultBranch", &spec.default_branch, &o.default_branch);
    }
    d
}

fn edit_options(spec: &RepositorySpec, d: &Drift) -> EditRepoOption {
    let pick = |field: &str, v: &Option<String>| if d.contains(field) { v.clone() } else { None };
    let flag = |field: &str, v: Option<bool>| if d.contains(field) { v } else { None };
    EditRepoOption {
        description: pick("description", &spec.description),
        website: pick("website", &spec.website),
        private: flag("private", spec.private),
        template: flag("template", spec.template),
        has_issues: flag("hasIssues", spec.has_issues),
        has_wiki: flag("hasWiki", spec.has_wiki),
        has_pull_requests: flag("hasPullRequests", spec.has_pull_requests),
        default_branch: pick("defaultBranch", &spec.default_branch),
        archived: flag("archived", spec.archived),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RepositoryAdapter;

impl RepositoryAdapter {
    fn create_target(spec: &RepositorySpec) -> RepoOwner {
        match (&spec.owner, spec.owner_kind.unwrap_or_default()) {
            (Some(owner), OwnerKind::Organization) => RepoOwner::Organization(owner.clone()),
            _ => RepoOwner::CurrentUser,
        }
    }

    fn identity(&self, obj: &Repository) -> Result<(String, String), AdapterError> {
        let key = self
            .external_key(obj)?
            .ok_or_else(|| AdapterError::InvalidSpec("repository owner is unknown".into()))?;
        split_repository("external name", &key)
    }
}

#[async_trait]
impl ExternalResource for RepositoryAdapter {
    type Managed = Repository;

    fn external_key(&self, obj: &Repository) -> Result<Option<String>, AdapterError> {
        if let Some(id) = external_name(obj) {
            return Ok(Some(id.to_string()));
        }
        if obj.spec.name.trim().is_empty() || obj.spec.name.contains('/') {
            return Err(AdapterError::InvalidSpec(format!("invalid repository name {:?}", obj.spec.name)));
        }
        Ok(obj.spec.owner.as_ref().filter(|o| !o.is_empty()).map(|owner| format!("{owner}/{}", obj.spec.name)))
    }

    async fn observe(
        &self,
        obj: &mut Repository,
        forge: &ForgeClient,
    ) -> Result<Observation<RepositoryObservation>, AdapterError> {
        let key = match self.external_key(obj)? {
            Some(key) => key,
            None => {
                // user-owned without an identity yet: rediscover under the token's account
                let me = forge.current_user().await.map_err(AdapterError::forge("resolve current user"))?;
                format!("{}/{}", me.login, obj.spec.name)
            }
        };
        let (owner, name) = split_repository("external name", &key)?;
        let Some(repo) = found(forge.get_repository(&owner, &name).await, "get repository")? else {
            return Ok(Observation::Absent);
        };
        let observed = RepositoryObservation::from(repo);
        if external_name(obj).is_none() {
            debug!(key = %observed.full_name, "repository: found by natural key");
            set_external_name(obj, &observed.full_name);
        }
        let up_to_date = drift(&obj.spec, &observed).is_clean();
        Ok(Observation::Present { observed, up_to_date })
    }

    async fn create(&self, obj: &Repository, forge: &ForgeClient) -> Result<String, AdapterError> {
        let spec = &obj.spec;
        let opts = CreateRepoOption {
            name: spec.name.clone(),
            description: spec.description.clone(),
            private: spec.private,
            template: spec.template,
            auto_init: spec.auto_init,
            gitignores: spec.gitignores.clone(),
            license: spec.license.clone(),
            readme: spec.readme.clone(),
            default_branch: spec.default_branch.clone(),
        };
        let repo = forge
            .create_repository(&Self::create_target(spec), &opts)
            .await
            .map_err(AdapterError::forge("create repository"))?;
        Ok(repo.full_name)
    }

    async fn update(
        &self,
        obj: &Repository,
        observed: &RepositoryObservation,
        forge: &ForgeClient,
    ) -> Result<(), AdapterError> {
        let d = drift(&obj.spec, observed);
        if d.is_clean() {
            return Ok(());
        }
        let (owner, name) = self.identity(obj)?;
        debug!(fields = ?d.fields(), "repository: patching drifted fields");
        forge
            .edit_repository(&owner, &name, &edit_options(&obj.spec, &d))
            .await
            .map_err(AdapterError::forge("edit repository"))?;
        Ok(())
    }

    async fn delete(&self, obj: &Repository, forge: &ForgeClient) -> Result<(), AdapterError> {
        let (owner, name) = self.identity(obj)?;
        match forge.delete_repository(&owner, &name).await {
            Err(e) if !e.is_not_found() => Err(AdapterError::Forge { context: "delete repository", source: e }),
            _ => Ok(()),
        }
    }
}
