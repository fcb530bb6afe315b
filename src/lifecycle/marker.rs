//! Recovering instance ids from completion comments.
//!
//! When an environment comes up, the bot posts the rendered "done" template,
//! which carries the instance id. If the resource record for a pull request
//! is missing (e.g. state written by an older deployment, or lost), the id
//! can still be read back from that comment.
//!
//! A template is turned into a regex by escaping its literal text and
//! substituting a pattern at each placeholder: anything (lazily) for the
//! link, a capture group of id characters for the instance id.

use regex::Regex;
use thiserror::Error;

use crate::config::{Messages, Placeholders};
use crate::types::{Comment, InstanceId, SpinUpKind};

/// Characters an instance id may consist of.
const INSTANCE_ID_PATTERN: &str = r"[A-Za-z0-9][A-Za-z0-9._:-]*";

const ID_GROUP: &str = "instance_id";

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("completion template {0:?} has no instance id placeholder")]
    MissingInstanceId(String),

    #[error("completion template does not compile: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Link,
    InstanceId,
}

/// A compiled completion template.
#[derive(Debug, Clone)]
pub struct CompletionMarker {
    pattern: Regex,
}

impl CompletionMarker {
    pub fn new(template: &str, placeholders: &Placeholders) -> Result<Self, MarkerError> {
        let mut slots: Vec<(&str, Slot)> = vec![(placeholders.instance_id.as_str(), Slot::InstanceId)];
        if !placeholders.link.is_empty() {
            slots.push((placeholders.link.as_str(), Slot::Link));
        }
        if placeholders.instance_id.is_empty() || !template.contains(&placeholders.instance_id) {
            return Err(MarkerError::MissingInstanceId(template.to_string()));
        }

        let mut pattern = String::new();
        let mut captured = false;
        let mut rest = template;
        loop {
            // Earliest placeholder wins; on a tie the longer token wins.
            let next = slots
                .iter()
                .filter_map(|(token, slot)| rest.find(token).map(|at| (at, token.len(), *slot)))
                .min_by_key(|(at, len, _)| (*at, std::cmp::Reverse(*len)));

            let Some((at, len, slot)) = next else {
                pattern.push_str(&regex::escape(rest));
                break;
            };

            pattern.push_str(&regex::escape(&rest[..at]));
            match slot {
                Slot::Link => pattern.push_str(".*?"),
                Slot::InstanceId if !captured => {
                    pattern.push_str(&format!("(?P<{ID_GROUP}>{INSTANCE_ID_PATTERN})"));
                    captured = true;
                }
                Slot::InstanceId => pattern.push_str(&format!("(?:{INSTANCE_ID_PATTERN})")),
            }
            rest = &rest[at + len..];
        }

        Ok(CompletionMarker {
            pattern: Regex::new(&pattern)?,
        })
    }

    /// Extracts the instance id if `body` contains a rendering of the template.
    pub fn extract(&self, body: &str) -> Option<InstanceId> {
        self.pattern
            .captures(body)
            .and_then(|caps| caps.name(ID_GROUP))
            .map(|m| InstanceId::new(m.as_str()))
    }
}

/// Markers for both spin-up variants.
#[derive(Debug, Clone)]
pub struct CompletionMarkers {
    standard: CompletionMarker,
    upgrade: CompletionMarker,
}

impl CompletionMarkers {
    pub fn from_config(messages: &Messages, placeholders: &Placeholders) -> Result<Self, MarkerError> {
        Ok(CompletionMarkers {
            standard: CompletionMarker::new(&messages.setup_spinmint_done, placeholders)?,
            upgrade: CompletionMarker::new(&messages.setup_spinmint_upgrade_done, placeholders)?,
        })
    }

    /// Finds the instance id in the first of the bot's comments that matches.
    ///
    /// `preferred` is tried first on each comment; the other variant is a
    /// fallback, since the label that was removed need not be the one that
    /// created the environment.
    pub fn recover(
        &self,
        comments: &[Comment],
        bot_username: &str,
        preferred: SpinUpKind,
    ) -> Option<InstanceId> {
        let (first, second) = match preferred {
            SpinUpKind::Standard => (&self.standard, &self.upgrade),
            SpinUpKind::Upgrade => (&self.upgrade, &self.standard),
        };
        comments
            .iter()
            .filter(|c| c.author == bot_username)
            .find_map(|c| first.extract(&c.body).or_else(|| second.extract(&c.body)))
    }
}
