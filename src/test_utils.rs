//! Shared test fixtures: in-memory GitHub and provisioner mocks, a standard
//! configuration and a harness wiring them into a [`Reconciler`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::{BotConfig, BuildPollConfig, LabelRule, Messages, Placeholders, ReservedLabelNames};
use crate::dispatch::ActionDispatcher;
use crate::github::{GitHubApi, GitHubApiError};
use crate::lifecycle::{
    Instance, LifecycleController, ProvisionCommands, ProvisionError, Provisioner, TaskSupervisor,
};
use crate::persistence::MemoryStore;
use crate::reconcile::Reconciler;
use crate::types::{Comment, EntityKey, InstanceId, Issue, PullRequest, RepoId, Sha, SpinUpKind};

/// Login of the bot account in [`test_config`]; [`MockGitHub`] posts as it.
pub const BOT: &str = "reconcile-bot";

pub fn repo() -> RepoId {
    RepoId::new("octo-org", "webapp")
}

pub fn pr_key(number: u64) -> EntityKey {
    EntityKey::new(repo(), number)
}

fn labels(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

/// A pull request by `alice` whose build has succeeded.
pub fn pull_request(number: u64, pr_labels: &[&str]) -> PullRequest {
    PullRequest {
        key: pr_key(number),
        username: "alice".to_string(),
        labels: labels(pr_labels),
        git_ref: format!("feature-{number}"),
        sha: Sha::new("a".repeat(40)),
        build_status: "success".to_string(),
        build_link: String::new(),
    }
}

pub fn issue(number: u64, issue_labels: &[&str]) -> Issue {
    Issue {
        key: pr_key(number),
        username: "alice".to_string(),
        labels: labels(issue_labels),
    }
}

pub fn test_config() -> BotConfig {
    let rule = |label: &str, message: &str| LabelRule {
        label: label.to_string(),
        message: message.to_string(),
    };

    BotConfig {
        username: BOT.to_string(),
        placeholders: Placeholders::default(),
        reserved_labels: ReservedLabelNames {
            spin_up: "setup-spinmint".to_string(),
            spin_up_upgrade: "setup-spinmint-upgrade".to_string(),
            build_mobile: "build-mobile".to_string(),
            start_load_test: "start-loadtest".to_string(),
        },
        messages: Messages {
            setup_spinmint: "Setting up a test server for this PR".to_string(),
            setup_spinmint_upgrade: "Setting up an upgrade test server for this PR".to_string(),
            setup_spinmint_done: "Test server created at: SPINMINT_LINK (instance INSTANCE_ID)"
                .to_string(),
            setup_spinmint_upgrade_done:
                "Upgrade test server created at: SPINMINT_LINK (instance INSTANCE_ID)".to_string(),
            setup_spinmint_failed: "Failed to set up a test server".to_string(),
            destroyed_spinmint: "Test server destroyed".to_string(),
            build_mobile_init: "Building mobile apps".to_string(),
            build_mobile_done: "Mobile apps built: SPINMINT_LINK".to_string(),
            start_load_test: "Starting a load test".to_string(),
            start_load_test_done: "Load test results: SPINMINT_LINK".to_string(),
            build_failed: "The build for this PR failed".to_string(),
            needs_to_sign_cla: Some("Please sign the CLA, USERNAME".to_string()),
        },
        pr_label_rules: vec![
            rule("needs-review", "Thanks USERNAME, a reviewer will look soon"),
            rule("needs-review", "Added to the review queue"),
            rule("setup-spinmint", "Generic rule for a reserved label"),
        ],
        issue_label_rules: vec![rule("bug", "Thanks for the report, USERNAME")],
        cla_signers: vec!["alice".to_string()],
        build_poll: BuildPollConfig {
            interval_secs: 0,
            max_attempts: 3,
        },
        provision_commands: ProvisionCommands::default(),
    }
}

#[derive(Default)]
struct GitHubState {
    issues: HashMap<EntityKey, Issue>,
    pulls: HashMap<EntityKey, PullRequest>,
    comments: HashMap<EntityKey, Vec<Comment>>,
    posted: HashMap<EntityKey, Vec<String>>,
    post_attempts: HashMap<EntityKey, usize>,
    list_calls: HashMap<EntityKey, usize>,
    fetches: usize,
}

/// In-memory GitHub. Comments posted through the API are authored by [`BOT`].
#[derive(Default)]
pub struct MockGitHub {
    state: Mutex<GitHubState>,
    list_delay: Mutex<Duration>,
    fail_list: AtomicBool,
    fail_post: AtomicBool,
    fail_fetch: AtomicBool,
}

impl MockGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GitHubState> {
        self.state.lock().unwrap()
    }

    pub fn set_issue(&self, issue: Issue) {
        self.state().issues.insert(issue.key.clone(), issue);
    }

    pub fn set_pull_request(&self, pr: PullRequest) {
        self.state().pulls.insert(pr.key.clone(), pr);
    }

    /// Adds a pre-existing comment without counting it as posted.
    pub fn add_comment(&self, key: &EntityKey, author: &str, body: impl Into<String>) {
        self.state()
            .comments
            .entry(key.clone())
            .or_default()
            .push(Comment::new(author, body));
    }

    pub fn comments(&self, key: &EntityKey) -> Vec<Comment> {
        self.state().comments.get(key).cloned().unwrap_or_default()
    }

    /// Bodies successfully posted through the API, in order.
    pub fn posted(&self, key: &EntityKey) -> Vec<String> {
        self.state().posted.get(key).cloned().unwrap_or_default()
    }

    pub fn post_attempts(&self, key: &EntityKey) -> usize {
        self.state().post_attempts.get(key).copied().unwrap_or(0)
    }

    pub fn list_calls(&self, key: &EntityKey) -> usize {
        self.state().list_calls.get(key).copied().unwrap_or(0)
    }

    /// Number of pull request fetches.
    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    pub fn fail_list_comments(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_post_comment(&self, fail: bool) {
        self.fail_post.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Delays every comment listing, widening race windows in tests.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    fn check_fetch(&self) -> Result<(), GitHubApiError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(GitHubApiError::transient_without_source("fetch disabled"));
        }
        Ok(())
    }
}

impl GitHubApi for MockGitHub {
    async fn fetch_issue(&self, repo: &RepoId, number: u64) -> Result<Issue, GitHubApiError> {
        self.check_fetch()?;
        let key = EntityKey::new(repo.clone(), number);
        self.state()
            .issues
            .get(&key)
            .cloned()
            .ok_or_else(|| GitHubApiError::permanent_without_source(format!("no issue {key}")))
    }

    async fn fetch_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<PullRequest, GitHubApiError> {
        self.check_fetch()?;
        let key = EntityKey::new(repo.clone(), number);
        let mut state = self.state();
        state.fetches += 1;
        state
            .pulls
            .get(&key)
            .cloned()
            .ok_or_else(|| GitHubApiError::permanent_without_source(format!("no pull request {key}")))
    }

    async fn list_comments(&self, key: &EntityKey) -> Result<Vec<Comment>, GitHubApiError> {
        *self.state().list_calls.entry(key.clone()).or_default() += 1;
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(GitHubApiError::transient_without_source("list disabled"));
        }
        Ok(self.comments(key))
    }

    async fn post_comment(&self, key: &EntityKey, body: &str) -> Result<(), GitHubApiError> {
        let mut state = self.state();
        *state.post_attempts.entry(key.clone()).or_default() += 1;
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(GitHubApiError::transient_without_source("post disabled"));
        }
        state
            .comments
            .entry(key.clone())
            .or_default()
            .push(Comment::new(BOT, body));
        state.posted.entry(key.clone()).or_default().push(body.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct ProvisionerState {
    created: Vec<(EntityKey, SpinUpKind)>,
    destroyed: Vec<InstanceId>,
    mobile_builds: Vec<EntityKey>,
    load_tests: Vec<EntityKey>,
}

/// Records every call. Instances are named `i-<number>`.
#[derive(Default)]
pub struct MockProvisioner {
    state: Mutex<ProvisionerState>,
    fail_create: AtomicBool,
    create_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<(EntityKey, SpinUpKind)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn destroyed(&self) -> Vec<InstanceId> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn mobile_builds(&self) -> Vec<EntityKey> {
        self.state.lock().unwrap().mobile_builds.clone()
    }

    pub fn load_tests(&self) -> Vec<EntityKey> {
        self.state.lock().unwrap().load_tests.clone()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Makes `create_instance` wait until the returned gate is notified.
    pub fn gate_create(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

impl Provisioner for MockProvisioner {
    async fn create_instance(&self, pr: &PullRequest, kind: SpinUpKind) -> Result<Instance, ProvisionError> {
        let gate = self.create_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProvisionError::Backend("no capacity".to_string()));
        }
        self.state.lock().unwrap().created.push((pr.key.clone(), kind));
        Ok(Instance {
            instance_id: InstanceId::new(format!("i-{}", pr.key.number)),
            link: format!("http://env.test/{}", pr.key.number),
        })
    }

    async fn destroy_instance(&self, instance_id: &InstanceId) -> Result<(), ProvisionError> {
        self.state.lock().unwrap().destroyed.push(instance_id.clone());
        Ok(())
    }

    async fn build_mobile_apps(&self, pr: &PullRequest) -> Result<String, ProvisionError> {
        self.state.lock().unwrap().mobile_builds.push(pr.key.clone());
        Ok(format!("http://mobile.test/{}", pr.key.number))
    }

    async fn start_load_test(&self, pr: &PullRequest) -> Result<String, ProvisionError> {
        self.state.lock().unwrap().load_tests.push(pr.key.clone());
        Ok(format!("http://loadtest.test/{}", pr.key.number))
    }
}

/// A reconciler over mocks, with handles to everything it touches.
pub struct TestHarness {
    pub github: Arc<MockGitHub>,
    pub store: Arc<MemoryStore>,
    pub provisioner: Arc<MockProvisioner>,
    pub supervisor: TaskSupervisor,
    pub reconciler: Reconciler<MockGitHub, MemoryStore, MockProvisioner>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: BotConfig) -> Self {
        let github = Arc::new(MockGitHub::new());
        let store = Arc::new(MemoryStore::new());
        let provisioner = Arc::new(MockProvisioner::new());
        let supervisor = TaskSupervisor::new();
        let reconciler = Reconciler::new(
            Arc::clone(&github),
            Arc::clone(&store),
            Arc::clone(&provisioner),
            config,
            supervisor.clone(),
        )
        .unwrap();

        TestHarness {
            github,
            store,
            provisioner,
            supervisor,
            reconciler,
        }
    }

    pub fn controller(&self) -> LifecycleController<MockGitHub, MemoryStore, MockProvisioner> {
        self.reconciler.lifecycle().clone()
    }

    pub fn dispatcher(&self) -> ActionDispatcher<MockGitHub, MemoryStore, MockProvisioner> {
        self.reconciler.dispatcher().clone()
    }

    /// Waits for every background task, including ones they spawn.
    pub async fn settle(&self) {
        self.supervisor.wait_idle().await;
    }
}
