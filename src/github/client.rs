//! Octocrab-backed implementation of [`GitHubApi`].

use octocrab::Octocrab;
use serde::Deserialize;
use tracing::debug;

use crate::types::{Comment, EntityKey, Issue, PullRequest, RepoId, Sha};

use super::api::GitHubApi;
use super::error::GitHubApiError;

/// Page size used when listing comments.
const COMMENTS_PER_PAGE: u8 = 100;

/// A GitHub API client.
///
/// Unlike a repo-scoped client, every call names its repository, since one
/// bot instance receives webhooks for any repository it is installed on.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
}

impl OctocrabClient {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    /// Creates a client from a GitHub token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    /// Fetches the combined status of a commit.
    ///
    /// The REST endpoint reports `pending` when no statuses exist, which is
    /// what the build poller should see for a commit CI has not picked up yet.
    async fn combined_status(
        &self,
        repo: &RepoId,
        sha: &Sha,
    ) -> Result<CombinedStatus, GitHubApiError> {
        let url = format!(
            "/repos/{}/{}/commits/{}/status",
            repo.owner,
            repo.repo,
            sha.as_str()
        );
        let status: CombinedStatus = self.client.get(&url, None::<&()>).await?;
        Ok(status)
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient").finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CombinedStatus {
    state: String,
    #[serde(default)]
    statuses: Vec<CommitStatus>,
}

#[derive(Debug, Deserialize)]
struct CommitStatus {
    #[serde(default)]
    target_url: Option<String>,
}

impl CombinedStatus {
    /// The first status that links somewhere, which is the CI build for
    /// repositories with a single status context.
    fn build_link(&self) -> String {
        self.statuses
            .iter()
            .find_map(|s| s.target_url.clone())
            .unwrap_or_default()
    }
}

impl GitHubApi for OctocrabClient {
    async fn fetch_issue(&self, repo: &RepoId, number: u64) -> Result<Issue, GitHubApiError> {
        let issue = self
            .client
            .issues(&repo.owner, &repo.repo)
            .get(number)
            .await?;

        Ok(Issue {
            key: EntityKey::new(repo.clone(), number),
            username: issue.user.login,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
        })
    }

    async fn fetch_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<PullRequest, GitHubApiError> {
        let pr = self
            .client
            .pulls(&repo.owner, &repo.repo)
            .get(number)
            .await?;

        let sha = Sha::new(pr.head.sha.clone());
        let status = self.combined_status(repo, &sha).await?;
        debug!(repo = %repo, number, state = %status.state, "Fetched combined status");

        Ok(PullRequest {
            key: EntityKey::new(repo.clone(), number),
            username: pr.user.map(|u| u.login).unwrap_or_default(),
            labels: pr
                .labels
                .unwrap_or_default()
                .into_iter()
                .map(|l| l.name)
                .collect(),
            git_ref: pr.head.ref_field.clone(),
            sha,
            build_link: status.build_link(),
            build_status: status.state,
        })
    }

    async fn list_comments(&self, key: &EntityKey) -> Result<Vec<Comment>, GitHubApiError> {
        let mut page = 1u32;
        let mut all_comments = Vec::new();

        loop {
            let page_result = self
                .client
                .issues(key.owner(), key.repo_name())
                .list_comments(key.number)
                .per_page(COMMENTS_PER_PAGE)
                .page(page)
                .send()
                .await?;

            let items = page_result.items;
            let is_last_page = items.len() < usize::from(COMMENTS_PER_PAGE);

            all_comments.extend(
                items
                    .into_iter()
                    .map(|c| Comment::new(c.user.login, c.body.unwrap_or_default())),
            );

            if is_last_page {
                break;
            }
            page += 1;
        }

        Ok(all_comments)
    }

    async fn post_comment(&self, key: &EntityKey, body: &str) -> Result<(), GitHubApiError> {
        self.client
            .issues(key.owner(), key.repo_name())
            .create_comment(key.number, body)
            .await?;
        Ok(())
    }
}
