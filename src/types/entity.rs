//! Tracked entities: issues, pull requests and the comments on them.

use serde::{Deserialize, Serialize};

use super::ids::{EntityKey, Sha};

/// Common view over issues and pull requests used by the diff engine.
pub trait Entity {
    /// Labels in the order GitHub reported them. May contain duplicates.
    fn labels(&self) -> &[String];

    /// Whether any non-label field that matters for reconciliation differs.
    fn scalar_changed(&self, other: &Self) -> bool;
}

/// An issue as tracked by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: EntityKey,
    pub username: String,
    pub labels: Vec<String>,
}

impl Entity for Issue {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn scalar_changed(&self, _other: &Self) -> bool {
        false
    }
}

/// A pull request as tracked by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub key: EntityKey,
    pub username: String,
    pub labels: Vec<String>,

    /// The head branch name.
    #[serde(rename = "ref")]
    pub git_ref: String,

    /// The head commit.
    pub sha: Sha,

    /// Combined commit status of the head commit (`pending`, `success`,
    /// `failure`, `error`), or empty if no status has been reported.
    pub build_status: String,

    /// Link to the build for the head commit, or empty.
    pub build_link: String,
}

impl Entity for PullRequest {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn scalar_changed(&self, other: &Self) -> bool {
        self.git_ref != other.git_ref
            || self.sha != other.sha
            || self.build_status != other.build_status
            || self.build_link != other.build_link
    }
}

/// Interpretation of a commit's combined status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Success,
    Failed,
}

impl BuildStatus {
    /// Anything other than the known terminal states counts as pending.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => BuildStatus::Success,
            "failure" | "error" => BuildStatus::Failed,
            _ => BuildStatus::Pending,
        }
    }
}

/// A comment on an issue or pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Login of the comment author.
    pub author: String,
    pub body: String,
}

impl Comment {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Comment {
            author: author.into(),
            body: body.into(),
        }
    }
}
