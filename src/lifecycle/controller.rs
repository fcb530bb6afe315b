//! Spin-up and teardown of per-PR test environments.
//!
//! # Identity
//!
//! The [`ResourceRecord`] stored for a pull request is the source of truth
//! for which instance belongs to it. Comments are only consulted when no
//! record carries an id, by matching the bot's completion comments against
//! [`CompletionMarkers`].
//!
//! # Serialization
//!
//! Every read-modify-write of a record happens inside the entity's comment
//! critical section, so a teardown and a provisioning task that finishes at
//! the same moment cannot both act on a stale record. A record in the
//! `Destroyed` state is terminal: later teardowns are no-ops and a
//! provisioning task that finds it destroys what it just created.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::marker::{CompletionMarkers, MarkerError};
use super::provisioner::{Instance, Provisioner};
use super::supervisor::{TaskKind, TaskSupervisor};
use crate::comments::{CommentGuard, render, render_completion};
use crate::config::BotConfig;
use crate::error::ReconcileError;
use crate::github::{GitHubApi, GitHubApiError};
use crate::persistence::SnapshotStore;
use crate::types::{
    BuildStatus, EntityKey, InstanceId, PullRequest, ResourceRecord, ResourceState, SpinUpKind,
};

/// What caused a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownTrigger {
    Closed,
    LabelRemoved(SpinUpKind),
}

/// Where the instance id for a teardown came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    Record,
    Comments,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Destroy was scheduled and the destroyed message posted.
    TornDown {
        instance_id: InstanceId,
        source: IdSource,
    },
    /// Provisioning was still running; it will destroy the instance itself.
    Cancelled,
    AlreadyDestroyed,
    /// No environment was ever requested for this entity.
    NotRequested,
}

/// Jobs that post a link once the build is green and the backend answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkJob {
    MobileBuild,
    LoadTest,
}

impl LinkJob {
    fn task_kind(self) -> TaskKind {
        match self {
            LinkJob::MobileBuild => TaskKind::MobileBuild,
            LinkJob::LoadTest => TaskKind::LoadTest,
        }
    }
}

struct Inner<G, S, P> {
    github: Arc<G>,
    store: Arc<S>,
    provisioner: Arc<P>,
    guard: CommentGuard<G>,
    config: Arc<BotConfig>,
    markers: CompletionMarkers,
    supervisor: TaskSupervisor,
}

pub struct LifecycleController<G, S, P> {
    inner: Arc<Inner<G, S, P>>,
}

impl<G, S, P> Clone for LifecycleController<G, S, P> {
    fn clone(&self) -> Self {
        LifecycleController {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G, S, P> LifecycleController<G, S, P>
where
    G: GitHubApi,
    S: SnapshotStore,
    P: Provisioner,
{
    pub fn new(
        github: Arc<G>,
        store: Arc<S>,
        provisioner: Arc<P>,
        guard: CommentGuard<G>,
        config: Arc<BotConfig>,
        supervisor: TaskSupervisor,
    ) -> Result<Self, MarkerError> {
        let markers = CompletionMarkers::from_config(&config.messages, &config.placeholders)?;
        Ok(LifecycleController {
            inner: Arc::new(Inner {
                github,
                store,
                provisioner,
                guard,
                config,
                markers,
                supervisor,
            }),
        })
    }

    /// Records the request and provisions an environment in the background.
    ///
    /// A pull request has at most one live environment; a request while one
    /// is requested or ready is ignored.
    pub async fn request_spin_up(
        &self,
        pr: &PullRequest,
        kind: SpinUpKind,
    ) -> Result<(), ReconcileError> {
        {
            let _section = self.inner.guard.enter(&pr.key).await;
            let existing: Option<ResourceRecord> = self.inner.store.get(&pr.key).await?;
            if let Some(existing) = existing.filter(|r| !r.is_destroyed()) {
                warn!(
                    entity = %pr.key,
                    state = ?existing.state,
                    "Environment already requested; ignoring"
                );
                return Ok(());
            }
            self.inner
                .store
                .save(&ResourceRecord::requested(pr.key.clone(), kind))
                .await?;
        }

        info!(entity = %pr.key, ?kind, "Environment requested");
        let this = self.clone();
        let pr = pr.clone();
        self.inner.supervisor.spawn(
            pr.key.clone(),
            TaskKind::SpinUp,
            async move { this.provision(pr, kind).await },
        );
        Ok(())
    }

    pub fn start_mobile_build(&self, pr: &PullRequest) {
        self.spawn_link_job(pr, LinkJob::MobileBuild);
    }

    pub fn start_load_test(&self, pr: &PullRequest) {
        self.spawn_link_job(pr, LinkJob::LoadTest);
    }

    fn spawn_link_job(&self, pr: &PullRequest, job: LinkJob) {
        let this = self.clone();
        let pr = pr.clone();
        self.inner
            .supervisor
            .spawn(pr.key.clone(), job.task_kind(), async move {
                this.run_link_job(pr, job).await
            });
    }

    /// Tears down the environment of `key`, if it has one.
    #[instrument(skip(self, key), fields(entity = %key))]
    pub async fn teardown(
        &self,
        key: &EntityKey,
        trigger: TeardownTrigger,
    ) -> Result<TeardownOutcome, ReconcileError> {
        let messages = &self.inner.config.messages;
        let mut section = self.inner.guard.enter(key).await;

        let record: Option<ResourceRecord> = self.inner.store.get(key).await?;
        if record.as_ref().is_some_and(ResourceRecord::is_destroyed) {
            debug!(entity = %key, "Environment already destroyed");
            return Ok(TeardownOutcome::AlreadyDestroyed);
        }

        // A live record wins over comments: the destroyed message is the same
        // for every environment, so it may belong to an earlier one.
        if record.is_none() {
            if section.posted_by_bot(&messages.destroyed_spinmint).await? {
                debug!(entity = %key, "Destroyed message already posted");
                return Ok(TeardownOutcome::AlreadyDestroyed);
            }
            if !section.posted_by_bot(&messages.setup_spinmint).await?
                && !section.posted_by_bot(&messages.setup_spinmint_upgrade).await?
            {
                return Ok(TeardownOutcome::NotRequested);
            }
        }

        let preferred = match (trigger, &record) {
            (TeardownTrigger::LabelRemoved(kind), _) => kind,
            (TeardownTrigger::Closed, Some(record)) => record.kind,
            (TeardownTrigger::Closed, None) => SpinUpKind::Standard,
        };

        let recorded = record.as_ref().and_then(|r| r.instance_id.clone());
        let found = match recorded {
            Some(id) => Some((id, IdSource::Record)),
            None => {
                let bot = self.inner.guard.bot_username().to_string();
                let comments = section.comments().await?;
                self.inner
                    .markers
                    .recover(comments, &bot, preferred)
                    .map(|id| (id, IdSource::Comments))
            }
        };

        let provisioning = record
            .as_ref()
            .is_some_and(|r| r.state == ResourceState::Requested && r.instance_id.is_none());
        let mut record = record.unwrap_or_else(|| ResourceRecord::requested(key.clone(), preferred));

        let Some((instance_id, source)) = found else {
            if provisioning {
                // Provisioning sees the terminal state and cleans up after itself.
                record.mark_destroyed();
                self.inner.store.save(&record).await?;
                section.post(&messages.destroyed_spinmint).await?;
                info!(entity = %key, "Teardown requested while provisioning");
                return Ok(TeardownOutcome::Cancelled);
            }
            return Err(ReconcileError::RecoveryNotFound { key: key.clone() });
        };

        record.instance_id = Some(instance_id.clone());
        record.mark_destroyed();
        self.inner.store.save(&record).await?;

        let provisioner = Arc::clone(&self.inner.provisioner);
        let id = instance_id.clone();
        self.inner
            .supervisor
            .spawn(key.clone(), TaskKind::Teardown, async move {
                provisioner.destroy_instance(&id).await
            });

        section.post(&messages.destroyed_spinmint).await?;
        info!(entity = %key, instance_id = %instance_id, ?source, ?trigger, "Environment torn down");
        Ok(TeardownOutcome::TornDown {
            instance_id,
            source,
        })
    }

    async fn provision(self, pr: PullRequest, kind: SpinUpKind) -> Result<(), ReconcileError> {
        let key = pr.key.clone();
        let instance = match self.build_then_create(pr, kind).await {
            Ok(created) => created,
            Err(e) => {
                self.abandon_request(&key, &e).await;
                return Err(e);
            }
        };

        let mut section = self.inner.guard.enter(&key).await;
        let mut record: ResourceRecord = self
            .inner
            .store
            .get(&key)
            .await?
            .unwrap_or_else(|| ResourceRecord::requested(key.clone(), kind));

        if record.is_destroyed() {
            info!(
                entity = %key,
                instance_id = %instance.instance_id,
                "Environment was torn down while provisioning; destroying it"
            );
            record.instance_id = Some(instance.instance_id.clone());
            record.link = Some(instance.link.clone());
            self.inner.store.save(&record).await?;
            drop(section);
            self.inner
                .provisioner
                .destroy_instance(&instance.instance_id)
                .await?;
            return Ok(());
        }

        record.mark_ready(instance.instance_id.clone(), instance.link.clone());
        self.inner.store.save(&record).await?;

        let messages = &self.inner.config.messages;
        let template = match kind {
            SpinUpKind::Standard => &messages.setup_spinmint_done,
            SpinUpKind::Upgrade => &messages.setup_spinmint_upgrade_done,
        };
        let message = render_completion(
            &self.inner.config.placeholders,
            template,
            &instance.link,
            instance.instance_id.as_str(),
        );
        section.post_once(&message).await?;
        info!(entity = %key, instance_id = %instance.instance_id, "Environment ready");
        Ok(())
    }

    async fn build_then_create(
        &self,
        pr: PullRequest,
        kind: SpinUpKind,
    ) -> Result<Instance, ReconcileError> {
        let pr = self.wait_for_build(pr).await?;
        Ok(self.inner.provisioner.create_instance(&pr, kind).await?)
    }

    /// Closes the record of a spin-up that never produced an instance and
    /// reports the failure, unless a teardown already closed it.
    async fn abandon_request(&self, key: &EntityKey, error: &ReconcileError) {
        let torn_down = {
            let _section = self.inner.guard.enter(key).await;
            match self.inner.store.get::<ResourceRecord>(key).await {
                Ok(Some(record)) if record.is_destroyed() => true,
                Ok(Some(mut record)) => {
                    record.mark_destroyed();
                    if let Err(e) = self.inner.store.save(&record).await {
                        warn!(entity = %key, error = %e, "Failed to close abandoned record");
                    }
                    false
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(entity = %key, error = %e, "Failed to load abandoned record");
                    false
                }
            }
        };

        if torn_down {
            info!(entity = %key, error = %error, "Spin-up failed after teardown; not reporting");
            return;
        }
        let failed = self.inner.config.messages.setup_spinmint_failed.as_str();
        self.notify_failure(key, error, Some(failed)).await;
    }

    async fn run_link_job(self, pr: PullRequest, job: LinkJob) -> Result<(), ReconcileError> {
        let key = pr.key.clone();
        let pr = match self.wait_for_build(pr).await {
            Ok(pr) => pr,
            Err(e) => {
                self.notify_failure(&key, &e, None).await;
                return Err(e);
            }
        };

        let messages = &self.inner.config.messages;
        let (link, template) = match job {
            LinkJob::MobileBuild => (
                self.inner.provisioner.build_mobile_apps(&pr).await?,
                &messages.build_mobile_done,
            ),
            LinkJob::LoadTest => (
                self.inner.provisioner.start_load_test(&pr).await?,
                &messages.start_load_test_done,
            ),
        };

        let placeholders = &self.inner.config.placeholders;
        let message = render(
            template,
            &[
                (placeholders.link.as_str(), link.as_str()),
                (placeholders.username.as_str(), pr.username.as_str()),
            ],
        );
        self.inner.guard.try_post(&key, &message).await?;
        Ok(())
    }

    /// Posts the failure message matching `error`, logging instead of failing.
    async fn notify_failure(&self, key: &EntityKey, error: &ReconcileError, fallback: Option<&str>) {
        let messages = &self.inner.config.messages;
        let message = match error {
            ReconcileError::BuildFailed { .. } => Some(messages.build_failed.as_str()),
            _ => fallback,
        };
        let Some(message) = message else {
            return;
        };
        if let Err(e) = self.inner.guard.try_post(key, message).await {
            warn!(entity = %key, error = %e, "Failed to post failure message");
        }
    }

    /// Polls the pull request until its build succeeds.
    async fn wait_for_build(&self, mut pr: PullRequest) -> Result<PullRequest, ReconcileError> {
        let poll = &self.inner.config.build_poll;
        let mut attempts = 0;
        loop {
            match BuildStatus::parse(&pr.build_status) {
                BuildStatus::Success => return Ok(pr),
                BuildStatus::Failed => {
                    return Err(ReconcileError::BuildFailed {
                        key: pr.key.clone(),
                        sha: pr.sha.to_string(),
                        status: pr.build_status.clone(),
                    });
                }
                BuildStatus::Pending => {}
            }

            if attempts >= poll.max_attempts {
                return Err(ReconcileError::BuildTimeout {
                    key: pr.key.clone(),
                    attempts,
                });
            }
            attempts += 1;
            debug!(entity = %pr.key, attempts, status = %pr.build_status, "Waiting for build");
            tokio::time::sleep(Duration::from_secs(poll.interval_secs)).await;

            match self
                .inner
                .github
                .fetch_pull_request(&pr.key.repo, pr.key.number)
                .await
            {
                Ok(latest) => pr = latest,
                Err(e) if e.kind.is_transient() => {
                    warn!(entity = %pr.key, error = %e, "Build status check failed; will retry");
                }
                Err(source) => return Err(fetch_error(&pr.key, source)),
            }
        }
    }
}

fn fetch_error(key: &EntityKey, source: GitHubApiError) -> ReconcileError {
    ReconcileError::Fetch {
        what: key.to_string(),
        source,
    }
}
