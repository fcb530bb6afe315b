//! The reconciliation entry points.
//!
//! A webhook only says *which* entity changed. The [`Reconciler`] fetches
//! the entity's current state, diffs it against the stored snapshot, hands
//! every label change to the [`ActionDispatcher`], and saves the new
//! snapshot when something changed.
//!
//! Handlers are safe to run twice for the same state: every comment goes
//! through the idempotency guard and the snapshot save is a full replace.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::comments::CommentGuard;
use crate::config::BotConfig;
use crate::diff::{EntityDiff, diff};
use crate::dispatch::ActionDispatcher;
use crate::error::ReconcileError;
use crate::github::{GitHubApi, GitHubApiError};
use crate::lifecycle::{
    LifecycleController, MarkerError, Provisioner, TaskKind, TaskStats, TaskSupervisor,
    TeardownTrigger,
};
use crate::persistence::SnapshotStore;
use crate::server::EventSink;
use crate::types::{EntityKey, Issue, PullRequest, RepoId};
use crate::webhooks::{GitHubEvent, IssueEvent, PrAction, PullRequestEvent};

pub struct Reconciler<G, S, P> {
    github: Arc<G>,
    store: Arc<S>,
    dispatcher: ActionDispatcher<G, S, P>,
    lifecycle: LifecycleController<G, S, P>,
    supervisor: TaskSupervisor,
}

impl<G, S, P> Clone for Reconciler<G, S, P> {
    fn clone(&self) -> Self {
        Reconciler {
            github: Arc::clone(&self.github),
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
            lifecycle: self.lifecycle.clone(),
            supervisor: self.supervisor.clone(),
        }
    }
}

impl<G, S, P> Reconciler<G, S, P>
where
    G: GitHubApi,
    S: SnapshotStore,
    P: Provisioner,
{
    /// Wires the guard, lifecycle controller and dispatcher together.
    ///
    /// Fails if a completion template cannot be turned into a marker.
    pub fn new(
        github: Arc<G>,
        store: Arc<S>,
        provisioner: Arc<P>,
        config: BotConfig,
        supervisor: TaskSupervisor,
    ) -> Result<Self, MarkerError> {
        let config = Arc::new(config);
        let guard = CommentGuard::new(Arc::clone(&github), config.username.clone());
        let lifecycle = LifecycleController::new(
            Arc::clone(&github),
            Arc::clone(&store),
            provisioner,
            guard.clone(),
            Arc::clone(&config),
            supervisor.clone(),
        )?;
        let dispatcher = ActionDispatcher::new(guard, config, lifecycle.clone());

        Ok(Reconciler {
            github,
            store,
            dispatcher,
            lifecycle,
            supervisor,
        })
    }

    pub fn dispatcher(&self) -> &ActionDispatcher<G, S, P> {
        &self.dispatcher
    }

    pub fn lifecycle(&self) -> &LifecycleController<G, S, P> {
        &self.lifecycle
    }

    pub async fn on_issue_event(&self, event: &IssueEvent) -> Result<EntityDiff, ReconcileError> {
        let repo = event.repo().ok_or_else(|| {
            ReconcileError::InvalidEvent(format!(
                "unparseable repository url {:?}",
                event.repository_url
            ))
        })?;
        debug!(repo = %repo, number = event.number, action = %event.action, "Issue event");

        let issue = self
            .github
            .fetch_issue(&repo, event.number)
            .await
            .map_err(|source| fetch_error(&repo, event.number, source))?;
        self.check_issue_for_changes(issue).await
    }

    pub async fn on_pull_request_event(
        &self,
        event: &PullRequestEvent,
    ) -> Result<EntityDiff, ReconcileError> {
        debug!(repo = %event.repo, number = event.number, action = %event.action, "Pull request event");

        let pr = self
            .github
            .fetch_pull_request(&event.repo, event.number)
            .await
            .map_err(|source| fetch_error(&event.repo, event.number, source))?;

        if event.action == PrAction::Closed {
            log_action_error(
                &pr.key,
                "teardown",
                self.lifecycle.teardown(&pr.key, TeardownTrigger::Closed).await,
            );
        }

        self.check_pull_request_for_changes(pr).await
    }

    /// Diffs `issue` against its snapshot and applies added labels.
    #[instrument(skip_all, fields(entity = %issue.key))]
    pub async fn check_issue_for_changes(&self, issue: Issue) -> Result<EntityDiff, ReconcileError> {
        let old: Option<Issue> = self.store.get(&issue.key).await?;
        let diff = diff(old.as_ref(), &issue);

        if diff.first_seen {
            info!(entity = %issue.key, labels = ?issue.labels, "First sighting of issue");
            self.store.save(&issue).await?;
        }

        for label in &diff.added {
            log_action_error(
                &issue.key,
                label,
                self.dispatcher.issue_labeled(&issue, label).await,
            );
        }

        if !diff.first_seen && diff.has_changes() {
            info!(entity = %issue.key, added = ?diff.added, removed = ?diff.removed, "Issue changed");
            self.store.save(&issue).await?;
        }
        Ok(diff)
    }

    /// Diffs `pr` against its snapshot, applies label changes and saves.
    #[instrument(skip_all, fields(entity = %pr.key))]
    pub async fn check_pull_request_for_changes(
        &self,
        pr: PullRequest,
    ) -> Result<EntityDiff, ReconcileError> {
        let old: Option<PullRequest> = self.store.get(&pr.key).await?;
        let diff = diff(old.as_ref(), &pr);

        if diff.first_seen {
            info!(entity = %pr.key, labels = ?pr.labels, "First sighting of pull request");
            self.store.save(&pr).await?;
            log_action_error(&pr.key, "first_seen", self.dispatcher.pr_first_seen(&pr).await);
        }

        for label in &diff.added {
            log_action_error(&pr.key, label, self.dispatcher.pr_labeled(&pr, label).await);
        }
        for label in &diff.removed {
            log_action_error(&pr.key, label, self.dispatcher.pr_unlabeled(&pr, label).await);
        }

        if !diff.first_seen && diff.has_changes() {
            info!(
                entity = %pr.key,
                added = ?diff.added,
                removed = ?diff.removed,
                scalar_changed = diff.scalar_changed,
                "Pull request changed"
            );
            self.store.save(&pr).await?;
        }
        Ok(diff)
    }

    async fn handle(&self, event: GitHubEvent) -> Result<(), ReconcileError> {
        match &event {
            GitHubEvent::Issue(e) => self.on_issue_event(e).await.map(drop),
            GitHubEvent::PullRequest(e) => self.on_pull_request_event(e).await.map(drop),
        }
    }
}

impl<G, S, P> EventSink for Reconciler<G, S, P>
where
    G: GitHubApi,
    S: SnapshotStore,
    P: Provisioner,
{
    fn submit(&self, event: GitHubEvent) {
        let Some(key) = event.entity_key() else {
            warn!(?event, "Dropping event without a resolvable repository");
            return;
        };
        let this = self.clone();
        self.supervisor
            .spawn(key, TaskKind::Event, async move { this.handle(event).await });
    }

    fn task_stats(&self) -> TaskStats {
        self.supervisor.stats()
    }
}

fn fetch_error(repo: &RepoId, number: u64, source: GitHubApiError) -> ReconcileError {
    ReconcileError::Fetch {
        what: format!("{repo}#{number}"),
        source,
    }
}

/// Logs a failed action without aborting the rest of the event.
fn log_action_error<T>(key: &EntityKey, action: &str, result: Result<T, ReconcileError>) {
    match result {
        Ok(_) => {}
        Err(e @ ReconcileError::RecoveryNotFound { .. }) => {
            warn!(entity = %key, action, error = %e, "Skipping teardown");
        }
        Err(e) => {
            warn!(entity = %key, action, transient = e.is_transient(), error = %e, "Action failed");
        }
    }
}
