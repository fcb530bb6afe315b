//! Routing label changes to actions.
//!
//! A small fixed set of reserved labels maps to dedicated handlers
//! ([`ReservedAction`]). Every other label is matched against the
//! configured generic rules, which post a templated comment. A reserved
//! label never falls through to the generic rules, even when its
//! confirmation was already posted.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::comments::{CommentGuard, PostOutcome, render_for_user};
use crate::config::{BotConfig, LabelRule, Messages, ReservedLabelNames};
use crate::error::ReconcileError;
use crate::github::GitHubApi;
use crate::lifecycle::{LifecycleController, Provisioner, TeardownOutcome, TeardownTrigger};
use crate::persistence::SnapshotStore;
use crate::types::{EntityKey, Issue, PullRequest, SpinUpKind};

/// What a reserved label does when added to a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedAction {
    SpinUp(SpinUpKind),
    BuildMobile,
    StartLoadTest,
}

impl ReservedAction {
    /// The comment posted when the action is accepted. Its presence also
    /// marks the action as already handled.
    pub fn confirmation<'a>(&self, messages: &'a Messages) -> &'a str {
        match self {
            ReservedAction::SpinUp(SpinUpKind::Standard) => &messages.setup_spinmint,
            ReservedAction::SpinUp(SpinUpKind::Upgrade) => &messages.setup_spinmint_upgrade,
            ReservedAction::BuildMobile => &messages.build_mobile_init,
            ReservedAction::StartLoadTest => &messages.start_load_test,
        }
    }
}

/// Label name to reserved action.
#[derive(Debug, Clone, Default)]
pub struct ReservedHandlers {
    by_label: HashMap<String, ReservedAction>,
}

impl ReservedHandlers {
    pub fn from_config(names: &ReservedLabelNames) -> Self {
        let by_label = [
            (&names.spin_up, ReservedAction::SpinUp(SpinUpKind::Standard)),
            (&names.spin_up_upgrade, ReservedAction::SpinUp(SpinUpKind::Upgrade)),
            (&names.build_mobile, ReservedAction::BuildMobile),
            (&names.start_load_test, ReservedAction::StartLoadTest),
        ]
        .into_iter()
        .map(|(label, action)| (label.clone(), action))
        .collect();
        ReservedHandlers { by_label }
    }

    pub fn lookup(&self, label: &str) -> Option<ReservedAction> {
        self.by_label.get(label).copied()
    }

    /// The spin-up variant a label requests, if it is a spin-up label.
    pub fn spin_up_kind(&self, label: &str) -> Option<SpinUpKind> {
        match self.lookup(label)? {
            ReservedAction::SpinUp(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Applies label changes on behalf of the reconciler.
pub struct ActionDispatcher<G, S, P> {
    guard: CommentGuard<G>,
    config: Arc<BotConfig>,
    reserved: ReservedHandlers,
    lifecycle: LifecycleController<G, S, P>,
}

impl<G, S, P> Clone for ActionDispatcher<G, S, P> {
    fn clone(&self) -> Self {
        ActionDispatcher {
            guard: self.guard.clone(),
            config: Arc::clone(&self.config),
            reserved: self.reserved.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<G, S, P> ActionDispatcher<G, S, P>
where
    G: GitHubApi,
    S: SnapshotStore,
    P: Provisioner,
{
    pub fn new(
        guard: CommentGuard<G>,
        config: Arc<BotConfig>,
        lifecycle: LifecycleController<G, S, P>,
    ) -> Self {
        let reserved = ReservedHandlers::from_config(&config.reserved_labels);
        ActionDispatcher {
            guard,
            config,
            reserved,
            lifecycle,
        }
    }

    pub fn reserved(&self) -> &ReservedHandlers {
        &self.reserved
    }

    /// Handles a label added to a pull request.
    ///
    /// Returns the number of comments posted.
    pub async fn pr_labeled(&self, pr: &PullRequest, label: &str) -> Result<usize, ReconcileError> {
        match self.reserved.lookup(label) {
            Some(action) => self.run_reserved(pr, action).await,
            None => {
                self.apply_rules(&self.config.pr_label_rules, &pr.key, &pr.username, label)
                    .await
            }
        }
    }

    /// Handles a label removed from a pull request. Only spin-up labels act.
    pub async fn pr_unlabeled(
        &self,
        pr: &PullRequest,
        label: &str,
    ) -> Result<Option<TeardownOutcome>, ReconcileError> {
        let Some(kind) = self.reserved.spin_up_kind(label) else {
            debug!(entity = %pr.key, label, "Removed label has no handler");
            return Ok(None);
        };
        let outcome = self
            .lifecycle
            .teardown(&pr.key, TeardownTrigger::LabelRemoved(kind))
            .await?;
        Ok(Some(outcome))
    }

    /// Handles a label added to an issue.
    pub async fn issue_labeled(&self, issue: &Issue, label: &str) -> Result<usize, ReconcileError> {
        self.apply_rules(&self.config.issue_label_rules, &issue.key, &issue.username, label)
            .await
    }

    /// Checks run once when a pull request is first seen.
    pub async fn pr_first_seen(&self, pr: &PullRequest) -> Result<usize, ReconcileError> {
        let Some(template) = self.config.messages.needs_to_sign_cla.as_deref() else {
            return Ok(0);
        };
        if self.config.has_signed_cla(&pr.username) {
            return Ok(0);
        }

        let mention = format!("@{}", pr.username);
        let message = render_for_user(&self.config.placeholders, template, &mention);
        let outcome = self.guard.try_post(&pr.key, &message).await?;
        if outcome.was_posted() {
            info!(entity = %pr.key, author = %pr.username, "Asked author to sign the CLA");
        }
        Ok(usize::from(outcome.was_posted()))
    }

    async fn run_reserved(&self, pr: &PullRequest, action: ReservedAction) -> Result<usize, ReconcileError> {
        let confirmation = action.confirmation(&self.config.messages);
        let outcome = self.guard.try_post(&pr.key, confirmation).await?;
        if outcome == PostOutcome::AlreadyPosted {
            debug!(entity = %pr.key, ?action, "Reserved action already handled");
            return Ok(0);
        }

        info!(entity = %pr.key, ?action, "Reserved label added");
        match action {
            ReservedAction::SpinUp(kind) => self.lifecycle.request_spin_up(pr, kind).await?,
            ReservedAction::BuildMobile => self.lifecycle.start_mobile_build(pr),
            ReservedAction::StartLoadTest => self.lifecycle.start_load_test(pr),
        }
        Ok(1)
    }

    /// Posts the message of every rule matching `label`, once each.
    ///
    /// A failed post does not stop the remaining rules; the first error is
    /// returned after all rules have been tried.
    async fn apply_rules(
        &self,
        rules: &[LabelRule],
        key: &EntityKey,
        username: &str,
        label: &str,
    ) -> Result<usize, ReconcileError> {
        let matching: Vec<&LabelRule> = rules.iter().filter(|rule| rule.label == label).collect();
        if matching.is_empty() {
            return Ok(0);
        }

        let mut section = self.guard.enter(key).await;
        let mut posted = 0;
        let mut first_error = None;
        for rule in matching {
            let message = render_for_user(&self.config.placeholders, &rule.message, username);
            match section.post_once(&message).await {
                Ok(PostOutcome::Posted) => posted += 1,
                Ok(PostOutcome::AlreadyPosted) => {}
                Err(e) => {
                    warn!(entity = %key, label, error = %e, "Label rule failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(posted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{BOT, TestHarness, issue, pull_request, test_config};

    #[test]
    fn reserved_table_follows_config() {
        let handlers = ReservedHandlers::from_config(&test_config().reserved_labels);

        assert_eq!(
            handlers.lookup("setup-spinmint"),
            Some(ReservedAction::SpinUp(SpinUpKind::Standard))
        );
        assert_eq!(handlers.spin_up_kind("setup-spinmint-upgrade"), Some(SpinUpKind::Upgrade));
        assert_eq!(handlers.lookup("build-mobile"), Some(ReservedAction::BuildMobile));
        assert_eq!(handlers.spin_up_kind("start-loadtest"), None);
        assert_eq!(handlers.lookup("needs-review"), None);
    }

    #[tokio::test]
    async fn reserved_label_skips_generic_rules() {
        let h = TestHarness::new();
        let pr = pull_request(42, &["setup-spinmint"]);

        let posted = h.dispatcher().pr_labeled(&pr, "setup-spinmint").await.unwrap();
        h.settle().await;

        assert_eq!(posted, 1);
        let comments = h.github.posted(&pr.key);
        assert_eq!(comments[0], test_config().messages.setup_spinmint);
        assert!(comments.iter().all(|c| !c.contains("Generic rule")));
        assert_eq!(h.provisioner.created().len(), 1);
    }

    #[tokio::test]
    async fn reserved_label_already_confirmed_does_nothing() {
        let h = TestHarness::new();
        let pr = pull_request(42, &["setup-spinmint"]);
        h.github.add_comment(&pr.key, BOT, &test_config().messages.setup_spinmint);

        let posted = h.dispatcher().pr_labeled(&pr, "setup-spinmint").await.unwrap();
        h.settle().await;

        assert_eq!(posted, 0);
        assert!(h.github.posted(&pr.key).is_empty());
        assert!(h.provisioner.created().is_empty());
    }

    #[tokio::test]
    async fn generic_rules_post_each_matching_message_once() {
        let h = TestHarness::new();
        let pr = pull_request(5, &["needs-review"]);
        let dispatcher = h.dispatcher();

        let first = dispatcher.pr_labeled(&pr, "needs-review").await.unwrap();
        let second = dispatcher.pr_labeled(&pr, "needs-review").await.unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(
            h.github.posted(&pr.key),
            vec![
                "Thanks alice, a reviewer will look soon".to_string(),
                "Added to the review queue".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn post_failure_is_reported_after_all_rules() {
        let h = TestHarness::new();
        let pr = pull_request(5, &["needs-review"]);
        h.github.fail_post_comment(true);

        let result = h.dispatcher().pr_labeled(&pr, "needs-review").await;

        assert!(matches!(result, Err(ReconcileError::CommentPost { .. })));
        assert_eq!(h.github.post_attempts(&pr.key), 2);
    }

    #[tokio::test]
    async fn unknown_label_is_ignored() {
        let h = TestHarness::new();
        let pr = pull_request(5, &["wontfix"]);

        let posted = h.dispatcher().pr_labeled(&pr, "wontfix").await.unwrap();

        assert_eq!(posted, 0);
        assert_eq!(h.github.list_calls(&pr.key), 0);
    }

    #[tokio::test]
    async fn issue_rules_are_separate_from_pr_rules() {
        let h = TestHarness::new();
        let issue = issue(8, &["needs-review", "bug"]);
        let dispatcher = h.dispatcher();

        assert_eq!(dispatcher.issue_labeled(&issue, "needs-review").await.unwrap(), 0);
        assert_eq!(dispatcher.issue_labeled(&issue, "bug").await.unwrap(), 1);

        assert_eq!(
            h.github.posted(&issue.key),
            vec!["Thanks for the report, alice".to_string()]
        );
    }

    #[tokio::test]
    async fn removing_non_spin_up_label_is_a_noop() {
        let h = TestHarness::new();
        let pr = pull_request(5, &[]);

        let outcome = h.dispatcher().pr_unlabeled(&pr, "build-mobile").await.unwrap();

        assert_eq!(outcome, None);
        assert_eq!(h.github.list_calls(&pr.key), 0);
    }

    #[tokio::test]
    async fn cla_reminder_for_unsigned_author_only() {
        let h = TestHarness::new();
        let dispatcher = h.dispatcher();
        let signed = pull_request(1, &[]);
        let mut unsigned = pull_request(2, &[]);
        unsigned.username = "mallory".to_string();

        assert_eq!(dispatcher.pr_first_seen(&signed).await.unwrap(), 0);
        assert_eq!(dispatcher.pr_first_seen(&unsigned).await.unwrap(), 1);
        assert_eq!(dispatcher.pr_first_seen(&unsigned).await.unwrap(), 0);

        assert!(h.github.posted(&signed.key).is_empty());
        assert_eq!(
            h.github.posted(&unsigned.key),
            vec!["Please sign the CLA, @mallory".to_string()]
        );
    }
}
