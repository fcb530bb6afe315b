//! Persisted state of an ephemeral test environment.

use serde::{Deserialize, Serialize};

use super::ids::{EntityKey, InstanceId};

/// Which flavour of environment was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinUpKind {
    /// A fresh server built from the PR head.
    Standard,
    /// A server running the previous release, upgraded to the PR head.
    Upgrade,
}

impl SpinUpKind {
    pub fn is_upgrade(&self) -> bool {
        matches!(self, SpinUpKind::Upgrade)
    }
}

/// Lifecycle state of an environment.
///
/// `Destroyed` is terminal: once recorded, no further teardown is attempted
/// for the entity even if the destroyed comment never made it to GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Requested,
    Ready,
    Destroyed,
}

/// The stored association between a pull request and its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub key: EntityKey,
    pub kind: SpinUpKind,
    pub state: ResourceState,

    /// Known once provisioning has succeeded.
    pub instance_id: Option<InstanceId>,

    /// Access link reported by the provisioning backend.
    pub link: Option<String>,
}

impl ResourceRecord {
    /// A record for an environment whose provisioning has just been requested.
    pub fn requested(key: EntityKey, kind: SpinUpKind) -> Self {
        ResourceRecord {
            key,
            kind,
            state: ResourceState::Requested,
            instance_id: None,
            link: None,
        }
    }

    /// Marks the environment as provisioned.
    pub fn mark_ready(&mut self, instance_id: InstanceId, link: String) {
        self.state = ResourceState::Ready;
        self.instance_id = Some(instance_id);
        self.link = Some(link);
    }

    pub fn mark_destroyed(&mut self) {
        self.state = ResourceState::Destroyed;
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == ResourceState::Destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepoId;

    #[test]
    fn record_walks_through_lifecycle() {
        let key = EntityKey::new(RepoId::new("o", "r"), 42);
        let mut record = ResourceRecord::requested(key, SpinUpKind::Upgrade);
        assert_eq!(record.state, ResourceState::Requested);
        assert!(record.instance_id.is_none());
        assert!(record.kind.is_upgrade());

        record.mark_ready(InstanceId::from("i-1"), "http://i-1".to_string());
        assert_eq!(record.state, ResourceState::Ready);
        assert_eq!(record.instance_id, Some(InstanceId::from("i-1")));

        record.mark_destroyed();
        assert!(record.is_destroyed());
        // The identifier survives so late provisioning results can still be matched.
        assert_eq!(record.instance_id, Some(InstanceId::from("i-1")));
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&ResourceState::Destroyed).unwrap();
        assert_eq!(json, "\"destroyed\"");
        let json = serde_json::to_string(&SpinUpKind::Standard).unwrap();
        assert_eq!(json, "\"standard\"");
    }
}
