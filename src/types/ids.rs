//! Newtype wrappers for domain identifiers.
//!
//! These types keep repository, entity and instance identities from being
//! mixed up with one another and give each a single display format for logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoId {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Extracts the repository from a GitHub API repository URL.
    ///
    /// Only the last two path segments are used, so both
    /// `https://api.github.com/repos/owner/repo` and
    /// `https://github.com/owner/repo` resolve to `owner/repo`.
    /// Returns `None` if fewer than two non-empty segments are present.
    pub fn from_url(url: &str) -> Option<Self> {
        let mut segments = url.trim_end_matches('/').rsplit('/');
        let repo = segments.next().filter(|s| !s.is_empty())?;
        let owner = segments.next().filter(|s| !s.is_empty() && !s.ends_with(':'))?;
        Some(RepoId::new(owner, repo))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Identity of a tracked issue or pull request: repository plus number.
///
/// Issues and pull requests share GitHub's number space within a repository,
/// so this key is unique across both kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub repo: RepoId,
    pub number: u64,
}

impl EntityKey {
    pub fn new(repo: RepoId, number: u64) -> Self {
        EntityKey { repo, number }
    }

    pub fn owner(&self) -> &str {
        &self.repo.owner
    }

    pub fn repo_name(&self) -> &str {
        &self.repo.repo
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// A git commit SHA.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: This does not validate the format.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

/// Identifier of an ephemeral environment, as reported by the provisioning backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        InstanceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        InstanceId(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod repo_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_format(
                owner in "[a-zA-Z][a-zA-Z0-9-]{0,38}",
                repo in "[a-zA-Z][a-zA-Z0-9_-]{0,99}"
            ) {
                let id = RepoId::new(&owner, &repo);
                prop_assert_eq!(format!("{}", id), format!("{}/{}", owner, repo));
            }

            #[test]
            fn from_api_url_roundtrip(
                owner in "[a-zA-Z][a-zA-Z0-9-]{0,38}",
                repo in "[a-zA-Z][a-zA-Z0-9_-]{0,99}"
            ) {
                let url = format!("https://api.github.com/repos/{}/{}", owner, repo);
                prop_assert_eq!(RepoId::from_url(&url), Some(RepoId::new(&owner, &repo)));
            }
        }

        #[test]
        fn from_url_tolerates_trailing_slash() {
            assert_eq!(
                RepoId::from_url("https://github.com/octocat/hello/"),
                Some(RepoId::new("octocat", "hello"))
            );
        }

        #[test]
        fn from_url_rejects_short_input() {
            assert_eq!(RepoId::from_url("hello"), None);
            assert_eq!(RepoId::from_url(""), None);
            assert_eq!(RepoId::from_url("https://github.com"), None);
        }
    }

    mod entity_key {
        use super::*;

        #[test]
        fn display_includes_repo_and_number() {
            let key = EntityKey::new(RepoId::new("octocat", "hello"), 42);
            assert_eq!(key.to_string(), "octocat/hello#42");
            assert_eq!(key.owner(), "octocat");
            assert_eq!(key.repo_name(), "hello");
        }
    }

    mod sha {
        use super::*;

        #[test]
        fn short_handles_short_input() {
            let sha = Sha::new("abc");
            assert_eq!(sha.short(), "abc");
        }

        #[test]
        fn short_truncates_to_seven() {
            let sha = Sha::new("0123456789abcdef");
            assert_eq!(sha.short(), "0123456");
        }
    }
}
