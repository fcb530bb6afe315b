//! Tracking background work.
//!
//! Provisioning, teardown, mobile builds and load tests outlive the webhook
//! that triggered them. They run under a [`TaskSupervisor`] so that every
//! task is accounted for: its outcome is logged, failures are counted for
//! the health endpoint, and shutdown can wait for in-flight tasks instead of
//! dropping them.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, info_span, warn};

use crate::types::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Handling of one webhook event.
    Event,
    SpinUp,
    Teardown,
    MobileBuild,
    LoadTest,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Event => "event",
            TaskKind::SpinUp => "spin_up",
            TaskKind::Teardown => "teardown",
            TaskKind::MobileBuild => "mobile_build",
            TaskKind::LoadTest => "load_test",
        };
        f.write_str(name)
    }
}

/// A background task that finished with an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub entity: String,
    pub kind: TaskKind,
    pub error: String,
}

/// Counters shown on the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub in_flight: usize,
    pub failed: usize,
    pub last_failure: Option<TaskFailure>,
}

#[derive(Debug, Default)]
struct Failures {
    count: usize,
    last: Option<TaskFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    failures: Arc<Mutex<Failures>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F, E>(&self, key: EntityKey, kind: TaskKind, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let failures = Arc::clone(&self.failures);
        let span = info_span!("task", entity = %key, kind = %kind);
        self.tracker.spawn(
            async move {
                match task.await {
                    Ok(()) => info!("Background task finished"),
                    Err(error) => {
                        let error = error.to_string();
                        warn!(error = %error, "Background task failed");
                        let mut failures = failures.lock().unwrap_or_else(|p| p.into_inner());
                        failures.count += 1;
                        failures.last = Some(TaskFailure {
                            entity: key.to_string(),
                            kind,
                            error,
                        });
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn stats(&self) -> TaskStats {
        let failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        TaskStats {
            in_flight: self.in_flight(),
            failed: failures.count,
            last_failure: failures.last.clone(),
        }
    }

    /// Waits until no task is running, including tasks spawned while waiting.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
