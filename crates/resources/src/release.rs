//! `Release`: numeric id after create, rediscovered by tag when the annotation is lost.
//!
//! Assets are reconciled as a set keyed by name. Inline `content` (base64) also pins the
//! size; `url` content is downloaded with [`FetchLimits`] and compared by name only.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine as _;
use forgeplane_core::meta::{external_name, is_terminating, set_external_name};
use forgeplane_core::{DeletionPolicy, Drift, ManagedStatus, ProviderConfigRef};
use forgeplane_engine::{found, AdapterError, ExternalResource, Observation};
use forgeplane_forge::fetch::fetchable_url;
use forgeplane_forge::models::{AssetUpload, Attachment, CreateReleaseOption, EditReleaseOption, Release as ForgeRelease};
use forgeplane_forge::{FetchLimits, ForgeClient};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::{managed_resource, parse_id, rfc3339};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forgeplane.io",
    version = "v1alpha1",
    kind = "Release",
    status = "ReleaseStatus",
    printcolumn = r#"{"name":"Tag","type":"string","jsonPath":".spec.tagName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    #[serde(default)]
    pub provider_config_ref: ProviderConfigRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    pub owner: String,
    pub repository: String,
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_commitish: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<bool>,
    /// When set, the release carries exactly these assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<AssetSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Base64 payload; takes precedence over `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetObservation {
    pub id: i64,
    pub name: String,
    pub size: i64,
    pub download_count: i64,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseObservation {
    pub id: i64,
    pub tag_name: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
    pub target_commitish: String,
    pub html_url: String,
    pub tarball_url: String,
    pub zipball_url: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<AssetObservation>,
}

pub type ReleaseStatus = ManagedStatus<ReleaseObservation>;

managed_resource!(Release, ReleaseObservation);

impl From<&Attachment> for AssetObservation {
    fn from(a: &Attachment) -> Self {
        Self {
            id: a.id,
            name: a.name.clone(),
            size: a.size,
            download_count: a.download_count,
            browser_download_url: a.browser_download_url.clone(),
        }
    }
}

impl From<ForgeRelease> for ReleaseObservation {
    fn from(r: ForgeRelease) -> Self {
        Self {
            id: r.id,
            assets: r.assets.iter().map(AssetObservation::from).collect(),
            tag_name: r.tag_name,
            name: r.name,
            body: r.body,
            draft: r.draft,
            prerelease: r.prerelease,
            target_commitish: r.target_commitish,
            html_url: r.html_url,
            tarball_url: r.tarball_url,
            zipball_url: r.zipball_url,
            author: r.author.login,
            created_at: rfc3339(r.created_at),
            published_at: rfc3339(r.published_at),
        }
    }
}

/// Where a declared asset's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AssetSource {
    Inline(Vec<u8>),
    Remote(String),
    Unspecified,
}

fn asset_source(a: &AssetSpec) -> Result<AssetSource, AdapterError> {
    if let Some(content) = a.content.as_deref() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(content.trim())
            .map_err(|e| AdapterError::InvalidSpec(format!("asset {}: content is not base64: {e}", a.name)))?;
        return Ok(AssetSource::Inline(bytes));
    }
    match a.url.as_deref() {
        Some(url) if fetchable_url(url).is_some() => Ok(AssetSource::Remote(url.to_string())),
        Some(url) => Err(AdapterError::InvalidSpec(format!("asset {}: url {url:?} is not http(s)", a.name))),
        None => Ok(AssetSource::Unspecified),
    }
}

/// Asset changes needed to match the declared set.
#[derive(Debug, Default, PartialEq)]
struct AssetPlan {
    delete: Vec<i64>,
    upload: Vec<(AssetSpec, AssetSource)>,
}

impl AssetPlan {
    fn is_empty(&self) -> bool { self.delete.is_empty() && self.upload.is_empty() }
}

fn asset_plan(declared: Option<&[AssetSpec]>, observed: &[AssetObservation]) -> Result<AssetPlan, AdapterError> {
    let Some(declared) = declared else {
        return Ok(AssetPlan::default());
    };
    let mut plan = AssetPlan::default();
    let existing: BTreeMap<&str, &AssetObservation> = observed.iter().map(|a| (a.name.as_str(), a)).collect();
    for spec in declared {
        let source = asset_source(spec)?;
        match (existing.get(spec.name.as_str()), &source) {
            (None, AssetSource::Unspecified) => {}
            (None, _) => plan.upload.push((spec.clone(), source)),
            (Some(have), AssetSource::Inline(bytes)) if have.size != bytes.len() as i64 => {
                plan.delete.push(have.id);
                plan.upload.push((spec.clone(), source));
            }
            (Some(_), _) => {}
        }
    }
    for have in observed {
        if !declared.iter().any(|d| d.name == have.name) {
            plan.delete.push(have.id);
        }
    }
    Ok(plan)
}

fn drift(spec: &ReleaseSpec, o: &ReleaseObservation) -> Drift {
    let mut d = Drift::new();
    d.required("tagName", &spec.tag_name, &o.tag_name)
        .optional("name", &spec.name, &o.name)
        .optional("body", &spec.body, &o.body)
        .optional("draft", &spec.draft, &o.draft)
        .optional("prerelease", &spec.prerelease, &o.prerelease);
    // the forge reports the resolved commit once published; only drafts keep the branch name
    if o.draft {
        d.optional("targetCommitish", &spec.target_commitish, &o.target_commitish);
    }
    d
}

fn edit_options(spec: &ReleaseSpec, d: &Drift) -> EditReleaseOption {
    let pick = |field: &str, v: &Option<String>| if d.contains(field) { v.clone() } else { None };
    let flag = |field: &str, v: Option<bool>| if d.contains(field) { v } else { None };
    EditReleaseOption {
        tag_name: d.contains("tagName").then(|| spec.tag_name.clone()),
        target_commitish: pick("targetCommitish", &spec.target_commitish),
        name: pick("name", &spec.name),
        body: pick("body", &spec.body),
        draft: flag("draft", spec.draft),
        prerelease: flag("prerelease", spec.prerelease),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseAdapter {
    pub fetch_limits: FetchLimits,
}

impl ReleaseAdapter {
    fn repo(spec: &ReleaseSpec) -> Result<(&str, &str), AdapterError> {
        if spec.owner.trim().is_empty() || spec.repository.trim().is_empty() {
            return Err(AdapterError::InvalidSpec("owner and repository are required".into()));
        }
        Ok((spec.owner.as_str(), spec.repository.as_str()))
    }

    fn validate(spec: &ReleaseSpec) -> Result<(&str, &str), AdapterError> {
        let repo = Self::repo(spec)?;
        if spec.tag_name.trim().is_empty() {
            return Err(AdapterError::InvalidSpec("tagName is required".into()));
        }
        Ok(repo)
    }

    async fn apply_assets(&self, spec: &ReleaseSpec, id: i64, plan: AssetPlan, forge: &ForgeClient) -> Result<(), AdapterError> {
        let (owner, repo) = Self::repo(spec)?;
        for asset_id in plan.delete {
            match forge.delete_release_asset(owner, repo, id, asset_id).await {
                Err(e) if !e.is_not_found() => {
                    return Err(AdapterError::Forge { context: "delete release asset", source: e })
                }
                _ => {}
            }
        }
        for (asset, source) in plan.upload {
            let data = match source {
                AssetSource::Inline(bytes) => bytes,
                AssetSource::Remote(url) => forge
                    .fetch_remote(&url, &self.fetch_limits)
                    .await
                    .map_err(AdapterError::forge("fetch asset content"))?,
                AssetSource::Unspecified => continue,
            };
            let upload = AssetUpload { name: asset.name.clone(), content_type: asset.content_type.clone(), data };
            forge
                .upload_release_asset(owner, repo, id, upload)
                .await
                .map_err(AdapterError::forge("upload release asset"))?;
            info!(release = id, asset = %asset.name, "release: asset uploaded");
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalResource for ReleaseAdapter {
    type Managed = Release;

    fn external_key(&self, obj: &Release) -> Result<Option<String>, AdapterError> {
        Ok(external_name(obj).map(str::to_owned))
    }

    async fn observe(
        &self,
        obj: &mut Release,
        forge: &ForgeClient,
    ) -> Result<Observation<ReleaseObservation>, AdapterError> {
        let terminating = is_terminating(obj);
        let (owner, repo) = if terminating && external_name(obj).is_some() {
            Self::repo(&obj.spec)?
        } else {
            Self::validate(&obj.spec)?
        };
        let release = match external_name(obj) {
            Some(identity) => {
                let id = parse_id(identity)?;
                found(forge.get_release(owner, repo, id).await, "get release")?
            }
            None => found(forge.get_release_by_tag(owner, repo, &obj.spec.tag_name).await, "get release by tag")?,
        };
        let Some(release) = release else {
            return Ok(Observation::Absent);
        };
        let observed = ReleaseObservation::from(release);
        if external_name(obj).is_none() {
            debug!(tag = %observed.tag_name, id = observed.id, "release: found by tag");
            set_external_name(obj, &observed.id.to_string());
        }
        // assets are not validated while the release is being deleted
        let up_to_date = terminating
            || (drift(&obj.spec, &observed).is_clean()
                && asset_plan(obj.spec.assets.as_deref(), &observed.assets)?.is_empty());
        Ok(Observation::Present { observed, up_to_date })
    }

    async fn create(&self, obj: &Release, forge: &ForgeClient) -> Result<String, AdapterError> {
        let spec = &obj.spec;
        let (owner, repo) = Self::validate(spec)?;
        // validate asset sources before anything lands on the forge
        let plan = asset_plan(spec.assets.as_deref(), &[])?;
        let opts = CreateReleaseOption {
            tag_name: spec.tag_name.clone(),
            target_commitish: spec.target_commitish.clone(),
            name: spec.name.clone(),
            body: spec.body.clone(),
            draft: spec.draft,
            prerelease: spec.prerelease,
        };
        let release = forge.create_release(owner, repo, &opts).await.map_err(AdapterError::forge("create release"))?;
        self.apply_assets(spec, release.id, plan, forge).await?;
        Ok(release.id.to_string())
    }

    async fn update(&self, obj: &Release, observed: &ReleaseObservation, forge: &ForgeClient) -> Result<(), AdapterError> {
        let spec = &obj.spec;
        let (owner, repo) = Self::validate(spec)?;
        let d = drift(spec, observed);
        if !d.is_clean() {
            debug!(fields = ?d.fields(), id = observed.id, "release: patching drifted fields");
            forge
                .edit_release(owner, repo, observed.id, &edit_options(spec, &d))
                .await
                .map_err(AdapterError::forge("edit release"))?;
        }
        let plan = asset_plan(spec.assets.as_deref(), &observed.assets)?;
        if !plan.is_empty() {
            self.apply_assets(spec, observed.id, plan, forge).await?;
        }
        Ok(())
    }

    async fn delete(&self, obj: &Release, forge: &ForgeClient) -> Result<(), AdapterError> {
        let (owner, repo) = Self::repo(&obj.spec)?;
        let Some(identity) = external_name(obj) else {
            return Ok(());
        };
        let id = parse_id(identity)?;
        match forge.delete_release(owner, repo, id).await {
            Err(e) if !e.is_not_found() => Err(AdapterError::Forge { context: "delete release", source: e }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, content: Option<&str>, url: Option<&str>) -> AssetSpec {
        AssetSpec { name: name.into(), content_type: None, content: content.map(Into::into), url: url.map(Into::into) }
    }

    fn have(id: i64, name: &str, size: i64) -> AssetObservation {
        AssetObservation { id, name: name.into(), size, ..Default::default() }
    }

    #[test]
    fn content_wins_over_url() {
        let a = asset("a", Some("aGk="), Some("https://example.com/a"));
        assert_eq!(asset_source(&a).unwrap(), AssetSource::Inline(b"hi".to_vec()));
        assert_eq!(asset_source(&asset("a", None, None)).unwrap(), AssetSource::Unspecified);
        assert!(asset_source(&asset("a", Some("***"), None)).is_err());
        assert!(asset_source(&asset("a", None, Some("file:///etc/passwd"))).is_err());
    }

    #[test]
    fn undeclared_assets_are_left_alone() {
        let plan = asset_plan(None, &[have(1, "x", 3)]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn asset_set_reconciliation() {
        let declared = vec![
            asset("same", Some("aGk="), None),
            asset("resized", Some("aGk="), None),
            asset("new", None, Some("https://example.com/new")),
            asset("skipped", None, None),
            asset("by-url", None, Some("https://example.com/u")),
        ];
        let observed = vec![have(1, "same", 2), have(2, "resized", 9), have(3, "stray", 1), have(4, "by-url", 100)];
        let plan = asset_plan(Some(&declared), &observed).unwrap();
        assert_eq!(plan.delete, vec![2, 3]);
        let uploads: Vec<&str> = plan.upload.iter().map(|(a, _)| a.name.as_str()).collect();
        assert_eq!(uploads, vec!["resized", "new"]);
    }

    #[test]
    fn target_commitish_only_compared_on_drafts() {
        let spec: ReleaseSpec = serde_json::from_value(serde_json::json!({
            "owner": "o", "repository": "r", "tagName": "v1", "targetCommitish": "main"
        }))
        .unwrap();
        let mut o = ReleaseObservation { tag_name: "v1".into(), target_commitish: "3f2a9c".into(), ..Default::default() };
        assert!(drift(&spec, &o).is_clean());
        o.draft = true;
        assert_eq!(drift(&spec, &o).fields(), &["targetCommitish"]);
    }

    #[test]
    fn edit_sends_only_body_when_body_drifts() {
        let spec: ReleaseSpec = serde_json::from_value(serde_json::json!({
            "owner": "o", "repository": "r", "tagName": "v1", "name": "R1", "body": "new"
        }))
        .unwrap();
        let o = ReleaseObservation { tag_name: "v1".into(), name: "R1".into(), body: "old".into(), ..Default::default() };
        let d = drift(&spec, &o);
        assert_eq!(serde_json::to_value(edit_options(&spec, &d)).unwrap(), serde_json::json!({"body": "new"}));
    }
}
