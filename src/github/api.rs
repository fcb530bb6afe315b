//! The GitHub operations the reconciler depends on.
//!
//! The reconciler only talks to GitHub through this trait, so tests run
//! against an in-memory mock and production uses [`super::OctocrabClient`].

use std::future::Future;

use crate::types::{Comment, EntityKey, Issue, PullRequest, RepoId};

use super::error::GitHubApiError;

/// Read and comment access to issues and pull requests.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct StaticComments(Vec<Comment>);
///
/// impl GitHubApi for StaticComments {
///     async fn list_comments(&self, _key: &EntityKey) -> Result<Vec<Comment>, GitHubApiError> {
///         Ok(self.0.clone())
///     }
///     // ...
/// }
/// ```
pub trait GitHubApi: Send + Sync + 'static {
    /// Fetches the canonical state of an issue.
    fn fetch_issue(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> impl Future<Output = Result<Issue, GitHubApiError>> + Send;

    /// Fetches the canonical state of a pull request, including the combined
    /// build status of its head commit.
    fn fetch_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> impl Future<Output = Result<PullRequest, GitHubApiError>> + Send;

    /// Lists every comment on the entity, oldest first.
    fn list_comments(
        &self,
        key: &EntityKey,
    ) -> impl Future<Output = Result<Vec<Comment>, GitHubApiError>> + Send;

    /// Posts a comment as the bot account.
    fn post_comment(
        &self,
        key: &EntityKey,
        body: &str,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;
}
