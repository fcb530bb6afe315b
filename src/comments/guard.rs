//! Idempotent comment posting.
//!
//! The bot keeps no record of which messages it has posted. Instead, before
//! posting, it lists the comments on the entity and checks whether one of its
//! own comments already contains the rendered message. That check and the
//! post must not interleave with another handler doing the same for the same
//! entity, or both would see "not present" and post twice.
//!
//! # Locking
//!
//! Each entity gets its own async mutex, handed out from a shared map keyed
//! by [`EntityKey`]. Handlers for different entities never wait on each
//! other. Entries whose mutex nobody holds are pruned on the next lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::github::{GitHubApi, GitHubApiError};
use crate::types::{Comment, EntityKey};

/// Result of an idempotent post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// The message was not present and has now been posted.
    Posted,
    /// A comment by the bot already contains the message; nothing was written.
    AlreadyPosted,
}

impl PostOutcome {
    pub fn was_posted(&self) -> bool {
        matches!(self, PostOutcome::Posted)
    }
}

/// Errors from listing or posting comments.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("failed to list comments on {key}: {source}")]
    List {
        key: EntityKey,
        #[source]
        source: GitHubApiError,
    },

    #[error("failed to post comment on {key}: {source}")]
    Post {
        key: EntityKey,
        #[source]
        source: GitHubApiError,
    },
}

/// Whether any comment by `username` contains `message` verbatim.
pub fn message_by_user_contains(comments: &[Comment], username: &str, message: &str) -> bool {
    comments
        .iter()
        .any(|c| c.author == username && c.body.contains(message))
}

type LockMap = HashMap<EntityKey, Arc<AsyncMutex<()>>>;

/// Serializes list-then-post decisions per entity.
pub struct CommentGuard<G> {
    github: Arc<G>,
    bot_username: Arc<str>,
    locks: Arc<Mutex<LockMap>>,
}

impl<G> Clone for CommentGuard<G> {
    fn clone(&self) -> Self {
        CommentGuard {
            github: Arc::clone(&self.github),
            bot_username: Arc::clone(&self.bot_username),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<G: GitHubApi> CommentGuard<G> {
    pub fn new(github: Arc<G>, bot_username: impl Into<String>) -> Self {
        CommentGuard {
            github,
            bot_username: Arc::from(bot_username.into()),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    /// Enters the critical section for `key`, waiting for any current holder.
    pub async fn enter(&self, key: &EntityKey) -> CriticalSection<'_, G> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let lock = mutex.lock_owned().await;
        CriticalSection {
            guard: self,
            key: key.clone(),
            comments: None,
            _lock: lock,
        }
    }

    /// Posts `message` on `key` unless the bot already posted it.
    pub async fn try_post(&self, key: &EntityKey, message: &str) -> Result<PostOutcome, GuardError> {
        self.enter(key).await.post_once(message).await
    }

    /// Number of entities with a live lock entry. Exposed for tests.
    pub fn tracked_entities(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.retain(|_, m| Arc::strong_count(m) > 1);
        locks.len()
    }
}

/// Exclusive access to one entity's comment thread.
///
/// Comments are listed at most once per section and the cached list is kept
/// up to date with the section's own posts, so several checks and posts can
/// be made against one consistent view.
pub struct CriticalSection<'a, G> {
    guard: &'a CommentGuard<G>,
    key: EntityKey,
    comments: Option<Vec<Comment>>,
    _lock: OwnedMutexGuard<()>,
}

impl<G: GitHubApi> CriticalSection<'_, G> {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// The entity's comments, listed on first use.
    pub async fn comments(&mut self) -> Result<&[Comment], GuardError> {
        if self.comments.is_none() {
            let listed = self
                .guard
                .github
                .list_comments(&self.key)
                .await
                .map_err(|source| GuardError::List {
                    key: self.key.clone(),
                    source,
                })?;
            debug!(entity = %self.key, count = listed.len(), "Listed comments");
            self.comments = Some(listed);
        }
        Ok(self.comments.as_deref().unwrap_or_default())
    }

    /// Whether the bot has already posted a comment containing `message`.
    pub async fn posted_by_bot(&mut self, message: &str) -> Result<bool, GuardError> {
        let username = Arc::clone(&self.guard.bot_username);
        let comments = self.comments().await?;
        Ok(message_by_user_contains(comments, &username, message))
    }

    /// Posts `message` unconditionally.
    pub async fn post(&mut self, message: &str) -> Result<(), GuardError> {
        self.guard
            .github
            .post_comment(&self.key, message)
            .await
            .map_err(|source| GuardError::Post {
                key: self.key.clone(),
                source,
            })?;

        info!(entity = %self.key, "Posted comment");
        if let Some(comments) = self.comments.as_mut() {
            comments.push(Comment::new(&*self.guard.bot_username, message));
        }
        Ok(())
    }

    /// Posts `message` unless the bot already posted it.
    pub async fn post_once(&mut self, message: &str) -> Result<PostOutcome, GuardError> {
        if self.posted_by_bot(message).await? {
            debug!(entity = %self.key, "Message already posted");
            return Ok(PostOutcome::AlreadyPosted);
        }
        self.post(message).await?;
        Ok(PostOutcome::Posted)
    }
}
