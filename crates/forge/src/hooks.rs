//! Repository webhook operations.

use reqwest::Method;

use crate::client::ForgeClient;
use crate::error::ForgeResult;
use crate::models::{CreateHookOption, EditHookOption, Hook};
use crate::PAGE_SIZE;

impl ForgeClient {
    /// GET /repos/{owner}/{repo}/hooks/{id}
    pub async fn get_hook(&self, owner: &str, repo: &str, id: i64) -> ForgeResult<Hook> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "hooks", &id])?;
        self.get_json("get_hook", url).await
    }

    pub async fn list_hooks_page(&self, owner: &str, repo: &str, page: u32) -> ForgeResult<Vec<Hook>> {
        let mut url = self.endpoint(&["repos", owner, repo, "hooks"])?;
        url.query_pairs_mut().append_pair("page", &page.to_string()).append_pair("limit", &PAGE_SIZE.to_string());
        self.get_json("list_hooks", url).await
    }

    pub async fn list_hooks(&self, owner: &str, repo: &str) -> ForgeResult<Vec<Hook>> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.list_hooks_page(owner, repo, page).await?;
            let n = batch.len();
            out.extend(batch);
            if n < PAGE_SIZE {
                return Ok(out);
            }
            page += 1;
        }
    }

    /// POST /repos/{owner}/{repo}/hooks
    pub async fn create_hook(&self, owner: &str, repo: &str, opts: &CreateHookOption) -> ForgeResult<Hook> {
        let url = self.endpoint(&["repos", owner, repo, "hooks"])?;
        self.send_json("create_hook", Method::POST, url, opts).await
    }

    /// PATCH /repos/{owner}/{repo}/hooks/{id}
    pub async fn edit_hook(&self, owner: &str, repo: &str, id: i64, opts: &EditHookOption) -> ForgeResult<Hook> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "hooks", &id])?;
        self.send_json("edit_hook", Method::PATCH, url, opts).await
    }

    /// DELETE /repos/{owner}/{repo}/hooks/{id}
    pub async fn delete_hook(&self, owner: &str, repo: &str, id: i64) -> ForgeResult<()> {
        let id = id.to_string();
        let url = self.endpoint(&["repos", owner, repo, "hooks", &id])?;
        self.delete("delete_hook", url).await
    }
}
