//! Errors surfaced while handling an event.

use thiserror::Error;

use crate::comments::GuardError;
use crate::github::GitHubApiError;
use crate::lifecycle::ProvisionError;
use crate::persistence::StoreError;
use crate::types::EntityKey;

/// Everything that can stop part of an event from being handled.
///
/// `Fetch` and `Store` abort the whole event. The others abort one action,
/// and the caller logs them and carries on with the remaining work.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: String,
        #[source]
        source: GitHubApiError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to list comments on {key}: {source}")]
    CommentList {
        key: EntityKey,
        #[source]
        source: GitHubApiError,
    },

    #[error("failed to post comment on {key}: {source}")]
    CommentPost {
        key: EntityKey,
        #[source]
        source: GitHubApiError,
    },

    #[error("no instance id recorded or recoverable for {key}")]
    RecoveryNotFound { key: EntityKey },

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("build of {key} at {sha} finished with status {status:?}")]
    BuildFailed {
        key: EntityKey,
        sha: String,
        status: String,
    },

    #[error("build of {key} still pending after {attempts} checks")]
    BuildTimeout { key: EntityKey, attempts: u32 },

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl From<GuardError> for ReconcileError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::List { key, source } => ReconcileError::CommentList { key, source },
            GuardError::Post { key, source } => ReconcileError::CommentPost { key, source },
        }
    }
}

impl ReconcileError {
    /// Whether retrying the same event later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Fetch { source, .. } => source.kind.is_transient(),
            ReconcileError::CommentList { source, .. }
            | ReconcileError::CommentPost { source, .. } => source.kind.is_transient(),
            ReconcileError::Store(StoreError::Io(_)) => true,
            ReconcileError::Store(StoreError::Unavailable(_)) => true,
            ReconcileError::BuildTimeout { .. } => true,
            _ => false,
        }
    }
}
