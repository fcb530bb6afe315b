//! Bot configuration.
//!
//! Behavioural configuration (account name, reserved labels, message
//! templates, label rules) is read from a JSON file. Secrets and process
//! settings come from the environment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::ProvisionCommands;

/// Default path of the JSON configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default HTTP port.
const DEFAULT_PORT: u16 = 3000;

/// Default interval between build status checks.
const DEFAULT_BUILD_POLL_INTERVAL_SECS: u64 = 30;

/// Default number of build status checks before giving up (one hour at 30s).
const DEFAULT_BUILD_POLL_MAX_ATTEMPTS: u32 = 120;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),

    #[error("{name} has an invalid value: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A generic label rule: when `label` is added, post `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRule {
    pub label: String,

    /// Template; the username placeholder is replaced by the entity author.
    pub message: String,
}

/// Placeholder tokens used inside message templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placeholders {
    pub username: String,
    pub link: String,
    pub instance_id: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Placeholders {
            username: "USERNAME".to_string(),
            link: "SPINMINT_LINK".to_string(),
            instance_id: "INSTANCE_ID".to_string(),
        }
    }
}

/// Names of the labels with dedicated handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedLabelNames {
    pub spin_up: String,
    pub spin_up_upgrade: String,
    pub build_mobile: String,
    pub start_load_test: String,
}

/// Message templates posted by the reserved handlers and the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Messages {
    pub setup_spinmint: String,
    pub setup_spinmint_upgrade: String,

    /// Must contain the instance-id placeholder; usually also the link placeholder.
    pub setup_spinmint_done: String,
    pub setup_spinmint_upgrade_done: String,

    pub setup_spinmint_failed: String,
    pub destroyed_spinmint: String,

    pub build_mobile_init: String,
    pub build_mobile_done: String,
    pub start_load_test: String,
    pub start_load_test_done: String,

    /// Posted when the build a background task was waiting for fails.
    pub build_failed: String,

    /// Posted on first sighting of a PR whose author has not signed the CLA.
    #[serde(default)]
    pub needs_to_sign_cla: Option<String>,
}

/// How the background tasks wait for a PR build to finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildPollConfig {
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for BuildPollConfig {
    fn default() -> Self {
        BuildPollConfig {
            interval_secs: DEFAULT_BUILD_POLL_INTERVAL_SECS,
            max_attempts: DEFAULT_BUILD_POLL_MAX_ATTEMPTS,
        }
    }
}

/// The behavioural configuration of the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    /// The bot's GitHub login. Only comments by this account count as "already posted".
    pub username: String,

    #[serde(default)]
    pub placeholders: Placeholders,

    pub reserved_labels: ReservedLabelNames,

    pub messages: Messages,

    #[serde(default)]
    pub pr_label_rules: Vec<LabelRule>,

    #[serde(default)]
    pub issue_label_rules: Vec<LabelRule>,

    /// Logins that have signed the contributor license agreement.
    #[serde(default)]
    pub cla_signers: Vec<String>,

    #[serde(default)]
    pub build_poll: BuildPollConfig,

    #[serde(default)]
    pub provision_commands: ProvisionCommands,
}

impl BotConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BotConfig =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid("username must not be empty".to_string()));
        }

        let reserved = [
            &self.reserved_labels.spin_up,
            &self.reserved_labels.spin_up_upgrade,
            &self.reserved_labels.build_mobile,
            &self.reserved_labels.start_load_test,
        ];
        let mut seen = HashSet::new();
        for label in reserved {
            if label.is_empty() {
                return Err(ConfigError::Invalid(
                    "reserved label names must not be empty".to_string(),
                ));
            }
            if !seen.insert(label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "reserved label {label:?} is configured twice"
                )));
            }
        }

        for (name, template) in [
            ("setup_spinmint_done", &self.messages.setup_spinmint_done),
            (
                "setup_spinmint_upgrade_done",
                &self.messages.setup_spinmint_upgrade_done,
            ),
        ] {
            if !template.contains(&self.placeholders.instance_id) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must contain the {} placeholder",
                    self.placeholders.instance_id
                )));
            }
        }

        Ok(())
    }

    /// Whether `username` has signed the CLA (case-insensitive, like GitHub logins).
    pub fn has_signed_cla(&self, username: &str) -> bool {
        self.cla_signers
            .iter()
            .any(|signer| signer.eq_ignore_ascii_case(username))
    }
}

/// Process settings read from the environment.
#[derive(Clone)]
pub struct ServerSettings {
    pub github_token: String,
    pub webhook_secret: String,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub port: u16,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let github_token =
            std::env::var("GITHUB_TOKEN").map_err(|_| ConfigError::MissingEnv("GITHUB_TOKEN"))?;

        let webhook_secret = std::env::var("GITHUB_WEBHOOK_SECRET")
            .map_err(|_| ConfigError::MissingEnv("GITHUB_WEBHOOK_SECRET"))?;

        let config_path = std::env::var("LABEL_RECONCILER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let state_dir = std::env::var("LABEL_RECONCILER_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("state"));

        let port = match std::env::var("LABEL_RECONCILER_PORT") {
            Ok(value) => value.parse::<u16>().map_err(|_| ConfigError::InvalidEnv {
                name: "LABEL_RECONCILER_PORT",
                value,
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(ServerSettings {
            github_token,
            webhook_secret,
            config_path,
            state_dir,
            port,
        })
    }
}

impl std::fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSettings")
            .field("config_path", &self.config_path)
            .field("state_dir", &self.state_dir)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
