//! Issue label operations.

use reqwest::Method;

use crate::client::ForgeClient;
use crate::error::ForgeResult;
use crate::models::{CreateLabelOption, EditLabelOption, Label};
use crate::PAGE_SIZE;

impl ForgeClient {
    /// GET /repos/{owner}/{repo}/labels/{id}
    pub async fn get_label(&self, owner: &str, repo: &str, id: i64) -> ForgeResult<Label> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "labels", &id])?;
        self.get_json("get_label", url).await
    }

    /// GET /repos/{owner}/{repo}/labels?page=N&limit=50, one request per page.
    pub async fn list_labels_page(&self, owner: &str, repo: &str, page: u32) -> ForgeResult<Vec<Label>> {
        let mut url = self.endpoint(&["repos", owner, repo, "labels"])?;
        url.query_pairs_mut().append_pair("page", &page.to_string()).append_pair("limit", &PAGE_SIZE.to_string());
        self.get_json("list_labels", url).await
    }

    /// Walk every page until the first short one.
    pub async fn list_labels(&self, owner: &str, repo: &str) -> ForgeResult<Vec<Label>> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.list_labels_page(owner, repo, page).await?;
            let n = batch.len();
            out.extend(batch);
            if n < PAGE_SIZE {
                return Ok(out);
            }
            page += 1;
        }
    }

    /// POST /repos/{owner}/{repo}/labels
    pub async fn create_label(&self, owner: &str, repo: &str, opts: &CreateLabelOption) -> ForgeResult<Label> {
        let url = self.endpoint(&["repos", owner, repo, "labels"])?;
        self.send_json("create_label", Method::POST, url, opts).await
    }

    /// PATCH /repos/{owner}/{repo}/labels/{id}
    pub async fn edit_label(&self, owner: &str, repo: &str, id: i64, opts: &EditLabelOption) -> ForgeResult<Label> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "labels", &id])?;
        self.send_json("edit_label", Method::PATCH, url, opts).await
    }

    /// DELETE /repos/{owner}/{repo}/labels/{id}
    pub async fn delete_label(&self, owner: &str, repo: &str, id: i64) -> ForgeResult<()> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "labels", &id])?;
        self.delete("delete_label", url).await
    }
}
