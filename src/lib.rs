//! Label Reconciler - a GitHub bot that turns label changes into comments.
//!
//! Webhooks for issues and pull requests are reconciled against the last
//! persisted snapshot of each entity. Added labels trigger idempotent
//! comments, and a few reserved labels drive the lifecycle of per-PR test
//! environments.

pub mod comments;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod github;
pub mod lifecycle;
pub mod persistence;
pub mod reconcile;
pub mod server;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
