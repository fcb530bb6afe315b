//! Typed webhook events.
//!
//! Only the fields needed to locate the entity are kept. Everything else
//! (labels, author, head commit) is re-fetched from GitHub when the event is
//! handled, so a delayed or reordered delivery still reconciles against the
//! current state.

use std::fmt;

use crate::types::{EntityKey, RepoId};

/// A webhook event the reconciler handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubEvent {
    Issue(IssueEvent),
    PullRequest(PullRequestEvent),
}

impl GitHubEvent {
    /// The entity the event is about, if its repository can be determined.
    pub fn entity_key(&self) -> Option<EntityKey> {
        match self {
            GitHubEvent::Issue(e) => e.repo().map(|repo| EntityKey::new(repo, e.number)),
            GitHubEvent::PullRequest(e) => Some(EntityKey::new(e.repo.clone(), e.number)),
        }
    }
}

/// An `issues` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueEvent {
    /// API URL of the repository, e.g. `https://api.github.com/repos/o/r`.
    pub repository_url: String,
    pub action: String,
    pub number: u64,
}

impl IssueEvent {
    pub fn repo(&self) -> Option<RepoId> {
        RepoId::from_url(&self.repository_url)
    }
}

/// Action of a `pull_request` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrAction {
    Opened,
    Closed,
    Reopened,
    Labeled,
    Unlabeled,
    Synchronize,
    Edited,
    Other(String),
}

impl PrAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "opened" => PrAction::Opened,
            "closed" => PrAction::Closed,
            "reopened" => PrAction::Reopened,
            "labeled" => PrAction::Labeled,
            "unlabeled" => PrAction::Unlabeled,
            "synchronize" => PrAction::Synchronize,
            "edited" => PrAction::Edited,
            other => PrAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PrAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrAction::Opened => "opened",
            PrAction::Closed => "closed",
            PrAction::Reopened => "reopened",
            PrAction::Labeled => "labeled",
            PrAction::Unlabeled => "unlabeled",
            PrAction::Synchronize => "synchronize",
            PrAction::Edited => "edited",
            PrAction::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// A `pull_request` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub repo: RepoId,
    pub action: PrAction,
    pub number: u64,
}
