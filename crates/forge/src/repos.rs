//! Repository operations.

use reqwest::Method;

use crate::client::ForgeClient;
use crate::error::ForgeResult;
use crate::models::{CreateRepoOption, EditRepoOption, RepoOwner, Repository, ServerVersion, User};

impl ForgeClient {
    /// GET /version
    pub async fn server_version(&self) -> ForgeResult<ServerVersion> {
        let url = self.endpoint(&["version"])?;
        self.get_json("server_version", url).await
    }

    /// GET /user: the account the token belongs to.
    pub async fn current_user(&self) -> ForgeResult<User> {
        let url = self.endpoint(&["user"])?;
        self.get_json("current_user", url).await
    }

    /// GET /repos/{owner}/{repo}
    pub async fn get_repository(&self, owner: &str, repo: &str) -> ForgeResult<Repository> {
        let url = self.endpoint(&["repos", owner, repo])?;
        self.get_json("get_repository", url).await
    }

    /// POST /user/repos or POST /orgs/{org}/repos
    pub async fn create_repository(&self, owner: &RepoOwner, opts: &CreateRepoOption) -> ForgeResult<Repository> {
        let url = match owner {
            RepoOwner::CurrentUser => self.endpoint(&["user", "repos"])?,
            RepoOwner::Organization(org) => self.endpoint(&["orgs", org, "repos"])?,
        };
        self.send_json("create_repository", Method::POST, url, opts).await
    }

    /// PATCH /repos/{owner}/{repo}
    pub async fn edit_repository(&self, owner: &str, repo: &str, opts: &EditRepoOption) -> ForgeResult<Repository> {
        let url = self.endpoint(&["repos", owner, repo])?;
        self.send_json("edit_repository", Method::PATCH, url, opts).await
    }

    /// DELETE /repos/{owner}/{repo}
    pub async fn delete_repository(&self, owner: &str, repo: &str) -> ForgeResult<()> {
        let url = self.endpoint(&["repos", owner, repo])?;
        self.delete("delete_repository", url).await
    }
}
