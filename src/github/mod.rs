//! GitHub API access.
//!
//! [`GitHubApi`] is the seam the reconciler depends on; [`OctocrabClient`]
//! implements it against the real API via octocrab.

mod api;
mod client;
mod error;

pub use api::GitHubApi;
pub use client::OctocrabClient;
pub use error::{GitHubApiError, GitHubErrorKind};
