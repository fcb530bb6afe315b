//! The backend that creates and destroys test environments.
//!
//! [`CommandProvisioner`] shells out to operator-configured commands. Each
//! command receives the pull request as environment variables and, where a
//! result is expected, prints a single JSON object on stdout:
//!
//! | Operation           | stdout                                   |
//! |---------------------|------------------------------------------|
//! | `create`            | `{"instance_id": "...", "link": "..."}`  |
//! | `destroy`           | ignored (`INSTANCE_ID` is set)           |
//! | `build_mobile`      | `{"link": "..."}`                        |
//! | `load_test`         | `{"link": "..."}`                        |

use std::future::Future;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::types::{InstanceId, PullRequest, SpinUpKind};

/// A freshly provisioned environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub link: String,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no {0} command is configured")]
    NotConfigured(&'static str),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from {program}: {source}")]
    Output {
        program: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("provisioning backend error: {0}")]
    Backend(String),
}

/// Creates, destroys and exercises test environments for pull requests.
pub trait Provisioner: Send + Sync + 'static {
    fn create_instance(
        &self,
        pr: &PullRequest,
        kind: SpinUpKind,
    ) -> impl Future<Output = Result<Instance, ProvisionError>> + Send;

    fn destroy_instance(
        &self,
        instance_id: &InstanceId,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Builds the mobile apps for the PR head and returns a download link.
    fn build_mobile_apps(
        &self,
        pr: &PullRequest,
    ) -> impl Future<Output = Result<String, ProvisionError>> + Send;

    /// Starts a load test against the PR head and returns a results link.
    fn start_load_test(
        &self,
        pr: &PullRequest,
    ) -> impl Future<Output = Result<String, ProvisionError>> + Send;
}

/// Command lines (program followed by arguments) for each operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionCommands {
    pub create: Vec<String>,
    pub destroy: Vec<String>,
    pub build_mobile: Vec<String>,
    pub load_test: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LinkOutput {
    link: String,
}

/// A [`Provisioner`] that runs external commands.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    commands: ProvisionCommands,
}

impl CommandProvisioner {
    pub fn new(commands: ProvisionCommands) -> Self {
        CommandProvisioner { commands }
    }

    async fn run(
        &self,
        operation: &'static str,
        argv: &[String],
        env: Vec<(&'static str, String)>,
    ) -> Result<(String, Vec<u8>), ProvisionError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(ProvisionError::NotConfigured(operation));
        };

        debug!(operation, program = %program, "Running provisioning command");
        let output = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProvisionError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProvisionError::Failed {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok((program.clone(), output.stdout))
    }
}

fn pr_env(pr: &PullRequest) -> Vec<(&'static str, String)> {
    vec![
        ("PR_OWNER", pr.key.owner().to_string()),
        ("PR_REPO", pr.key.repo_name().to_string()),
        ("PR_NUMBER", pr.key.number.to_string()),
        ("PR_REF", pr.git_ref.clone()),
        ("PR_SHA", pr.sha.to_string()),
        ("PR_AUTHOR", pr.username.clone()),
    ]
}

fn parse_output<T: for<'de> Deserialize<'de>>(program: String, stdout: &[u8]) -> Result<T, ProvisionError> {
    serde_json::from_slice(stdout).map_err(|source| ProvisionError::Output { program, source })
}

impl Provisioner for CommandProvisioner {
    async fn create_instance(&self, pr: &PullRequest, kind: SpinUpKind) -> Result<Instance, ProvisionError> {
        let mut env = pr_env(pr);
        env.push(("SPIN_UP_UPGRADE", kind.is_upgrade().to_string()));
        let (program, stdout) = self.run("create", &self.commands.create, env).await?;
        let instance: Instance = parse_output(program, &stdout)?;
        info!(entity = %pr.key, instance_id = %instance.instance_id, "Instance created");
        Ok(instance)
    }

    async fn destroy_instance(&self, instance_id: &InstanceId) -> Result<(), ProvisionError> {
        let env = vec![("INSTANCE_ID", instance_id.to_string())];
        self.run("destroy", &self.commands.destroy, env).await?;
        info!(instance_id = %instance_id, "Instance destroyed");
        Ok(())
    }

    async fn build_mobile_apps(&self, pr: &PullRequest) -> Result<String, ProvisionError> {
        let (program, stdout) = self
            .run("build_mobile", &self.commands.build_mobile, pr_env(pr))
            .await?;
        Ok(parse_output::<LinkOutput>(program, &stdout)?.link)
    }

    async fn start_load_test(&self, pr: &PullRequest) -> Result<String, ProvisionError> {
        let (program, stdout) = self
            .run("load_test", &self.commands.load_test, pr_env(pr))
            .await?;
        Ok(parse_output::<LinkOutput>(program, &stdout)?.link)
    }
}
