//! Core domain types for the label reconciler.
//!
//! Identifiers, the tracked entities and the persisted environment records.

pub mod entity;
pub mod ids;
pub mod resource;

pub use entity::{BuildStatus, Comment, Entity, Issue, PullRequest};
pub use ids::{EntityKey, InstanceId, RepoId, Sha};
pub use resource::{ResourceRecord, ResourceState, SpinUpKind};
