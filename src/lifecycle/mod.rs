//! Test environment lifecycle: provisioning, teardown and the background
//! jobs started by reserved labels.

pub mod controller;
pub mod marker;
pub mod provisioner;
pub mod supervisor;

pub use controller::{IdSource, LifecycleController, TeardownOutcome, TeardownTrigger};
pub use marker::{CompletionMarker, CompletionMarkers, MarkerError};
pub use provisioner::{CommandProvisioner, Instance, ProvisionCommands, ProvisionError, Provisioner};
pub use supervisor::{TaskFailure, TaskKind, TaskStats, TaskSupervisor};
