//! Webhook payload parsing.
//!
//! The event type comes from the `X-GitHub-Event` header. Event types the
//! reconciler does not handle parse to `Ok(None)`; malformed payloads of a
//! handled type are errors.

use serde::Deserialize;
use thiserror::Error;

use crate::types::RepoId;

use super::events::{GitHubEvent, IssueEvent, PrAction, PullRequestEvent};

#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a typed event.
///
/// ```
/// use label_reconciler::webhooks::{GitHubEvent, parse_webhook};
///
/// let payload = br#"{
///     "action": "labeled",
///     "issue": {
///         "number": 42,
///         "repository_url": "https://api.github.com/repos/octo-org/webapp"
///     }
/// }"#;
///
/// let event = parse_webhook("issues", payload).unwrap();
/// assert!(matches!(event, Some(GitHubEvent::Issue(_))));
/// assert!(parse_webhook("star", b"{}").unwrap().is_none());
/// ```
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<Option<GitHubEvent>, ParseError> {
    match event_type {
        "issues" => parse_issue(payload).map(|e| Some(GitHubEvent::Issue(e))),
        "pull_request" => parse_pull_request(payload).map(|e| Some(GitHubEvent::PullRequest(e))),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct RawIssuePayload {
    action: String,
    issue: RawIssue,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    repository_url: String,
}

fn parse_issue(payload: &[u8]) -> Result<IssueEvent, ParseError> {
    let raw: RawIssuePayload = serde_json::from_slice(payload)?;
    if RepoId::from_url(&raw.issue.repository_url).is_none() {
        return Err(ParseError::InvalidField {
            field: "issue.repository_url",
            value: raw.issue.repository_url,
        });
    }

    Ok(IssueEvent {
        repository_url: raw.issue.repository_url,
        action: raw.action,
        number: raw.issue.number,
    })
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    number: Option<u64>,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawOwner,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: String,
}

fn parse_pull_request(payload: &[u8]) -> Result<PullRequestEvent, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    Ok(PullRequestEvent {
        repo: RepoId::new(raw.repository.owner.login, raw.repository.name),
        action: PrAction::parse(&raw.action),
        number: raw.number.unwrap_or(raw.pull_request.number),
    })
}
