//! Diffing an incoming entity against its stored snapshot.
//!
//! Labels are compared as sets of strings. Order is kept only so that the
//! dispatcher sees additions in the order GitHub reported them.

use std::collections::HashSet;

use crate::types::Entity;

/// The outcome of comparing a stored snapshot with the incoming state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDiff {
    /// True when there was no stored snapshot.
    pub first_seen: bool,

    /// Labels present now but not before, in incoming order, without duplicates.
    pub added: Vec<String>,

    /// Labels present before but not now, in stored order, without duplicates.
    pub removed: Vec<String>,

    /// Whether a build-relevant scalar field changed. Always false when `first_seen`.
    pub scalar_changed: bool,
}

impl EntityDiff {
    /// Whether the caller must persist a new snapshot.
    ///
    /// A first-seen entity is always persisted, regardless of its labels.
    pub fn has_changes(&self) -> bool {
        self.first_seen
            || !self.added.is_empty()
            || !self.removed.is_empty()
            || self.scalar_changed
    }
}

/// Compares `new` with the stored `old` state.
pub fn diff<E: Entity>(old: Option<&E>, new: &E) -> EntityDiff {
    match old {
        None => EntityDiff {
            first_seen: true,
            added: distinct(new.labels()),
            removed: Vec::new(),
            scalar_changed: false,
        },
        Some(old) => EntityDiff {
            first_seen: false,
            added: difference(new.labels(), old.labels()),
            removed: difference(old.labels(), new.labels()),
            scalar_changed: old.scalar_changed(new),
        },
    }
}

/// Labels in `from` that are absent from `without`, first occurrence only.
fn difference(from: &[String], without: &[String]) -> Vec<String> {
    let exclude: HashSet<&str> = without.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    from.iter()
        .filter(|label| !exclude.contains(label.as_str()) && seen.insert(label.as_str()))
        .cloned()
        .collect()
}

fn distinct(labels: &[String]) -> Vec<String> {
    difference(labels, &[])
}
