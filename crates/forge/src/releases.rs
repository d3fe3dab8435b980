//! Release and release-asset operations.

use reqwest::{multipart, Method};

use crate::client::ForgeClient;
use crate::error::{ForgeError, ForgeResult};
use crate::models::{AssetUpload, Attachment, CreateReleaseOption, EditReleaseOption, Release};

/// Multipart part name the forge expects for asset uploads.
pub const ASSET_PART_NAME: &str = "attachment";
pub const DEFAULT_ASSET_CONTENT_TYPE: &str = "application/octet-stream";

impl ForgeClient {
    /// GET /repos/{owner}/{repo}/releases/{id}
    pub async fn get_release(&self, owner: &str, repo: &str, id: i64) -> ForgeResult<Release> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "releases", &id])?;
        self.get_json("get_release", url).await
    }

    /// GET /repos/{owner}/{repo}/releases/tags/{tag}
    pub async fn get_release_by_tag(&self, owner: &str, repo: &str, tag: &str) -> ForgeResult<Release> {
        let url = self.endpoint(&["repos", owner, repo, "releases", "tags", tag])?;
        self.get_json("get_release_by_tag", url).await
    }

    /// POST /repos/{owner}/{repo}/releases
    pub async fn create_release(&self, owner: &str, repo: &str, opts: &CreateReleaseOption) -> ForgeResult<Release> {
        let url = self.endpoint(&["repos", owner, repo, "releases"])?;
        self.send_json("create_release", Method::POST, url, opts).await
    }

    /// PATCH /repos/{owner}/{repo}/releases/{id}
    pub async fn edit_release(&self, owner: &str, repo: &str, id: i64, opts: &EditReleaseOption) -> ForgeResult<Release> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "releases", &id])?;
        self.send_json("edit_release", Method::PATCH, url, opts).await
    }

    /// DELETE /repos/{owner}/{repo}/releases/{id}
    pub async fn delete_release(&self, owner: &str, repo: &str, id: i64) -> ForgeResult<()> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "releases", &id])?;
        self.delete("delete_release", url).await
    }

    /// GET /repos/{owner}/{repo}/releases/{id}/assets
    pub async fn list_release_assets(&self, owner: &str, repo: &str, id: i64) -> ForgeResult<Vec<Attachment>> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "releases", &id, "assets"])?;
        self.get_json("list_release_assets", url).await
    }

    /// POST /repos/{owner}/{repo}/releases/{id}/assets?name={name} (multipart, part `attachment`)
    pub async fn upload_release_asset(&self, owner: &str, repo: &str, id: i64, asset: AssetUpload) -> ForgeResult<Attachment> {
        let id = id.to_string();
        let mut url = self.endpoint(&["repos", owner, repo, "releases", &id, "assets"])?;
        url.query_pairs_mut().append_pair("name", &asset.name);
        let content_type = asset.content_type.as_deref().unwrap_or(DEFAULT_ASSET_CONTENT_TYPE).to_string();
        let part = multipart::Part::bytes(asset.data)
            .file_name(asset.name)
            .mime_str(&content_type)
            .map_err(|e| ForgeError::InvalidResponse(format!("content type {content_type:?} rejected: {e}")))?;
        let form = multipart::Form::new().part(ASSET_PART_NAME, part);
        self.send_multipart("upload_release_asset", url, form).await
    }

    /// DELETE /repos/{owner}/{repo}/releases/{id}/assets/{asset_id}
    pub async fn delete_release_asset(&self, owner: &str, repo: &str, id: i64, asset_id: i64) -> ForgeResult<()> {
        let id = id.to_string();
        let asset_id = asset_id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "releases", &id, "assets", &asset_id])?;
        self.delete("delete_release_asset", url).await
    }
}
