// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Runtime Configuration Types
//
// Defines the YAML configuration for the handoff core:
// - A2A endpoint and retry policy for delegation calls
// - History ledger cap and oversized-artifact preview sizes
// - Task defaults (conversation id fallback, transfer reason)
// - Relation description depth

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "HANDOFF_CONFIG_PATH";
pub const A2A_BASE_URL_ENV: &str = "HANDOFF_A2A_BASE_URL";
pub const MAX_LEDGER_MESSAGES_ENV: &str = "HANDOFF_MAX_LEDGER_MESSAGES";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub a2a: A2aConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub task: TaskConfig,

    #[serde(default)]
    pub relations: RelationsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aConfig {
    /// Base URL of this deployment's agent endpoints, used for internal and
    /// team delegation (e.g. "http://localhost:3003")
    #[serde(default = "default_a2a_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-attempt HTTP timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for A2aConfig {
    fn default() -> Self {
        Self {
            base_url: default_a2a_base_url(),
            retry: RetryConfig::default(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Exponential backoff for delegate calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval", with = "humantime_serde")]
    pub initial_interval: Duration,

    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,

    #[serde(default = "default_exponent")]
    pub exponent: f64,

    /// Upper bound on total time spent in one delegate call, sleeps included
    #[serde(default = "default_max_elapsed_time", with = "humantime_serde")]
    pub max_elapsed_time: Duration,

    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            exponent: default_exponent(),
            max_elapsed_time: default_max_elapsed_time(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Cap on the full-ledger fetch. Unset means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ledger_messages: Option<usize>,

    #[serde(default = "default_args_preview_chars")]
    pub artifact_args_preview_chars: usize,

    #[serde(default = "default_summary_preview_chars")]
    pub artifact_summary_preview_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_ledger_messages: None,
            artifact_args_preview_chars: default_args_preview_chars(),
            artifact_summary_preview_chars: default_summary_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_conversation_id")]
    pub default_conversation_id: String,

    /// Reason attached to a transfer when the model gave neither text nor reasoning
    #[serde(default = "default_transfer_reason")]
    pub default_transfer_reason: String,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_conversation_id: default_conversation_id(),
            default_transfer_reason: default_transfer_reason(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationsConfig {
    /// How many levels of a target's own relations go into its description
    #[serde(default = "default_description_depth")]
    pub description_depth: usize,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            description_depth: default_description_depth(),
        }
    }
}

fn default_a2a_base_url() -> String {
    "http://localhost:3003".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_exponent() -> f64 {
    1.5
}

fn default_max_elapsed_time() -> Duration {
    Duration::from_secs(20)
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_args_preview_chars() -> usize {
    200
}

fn default_summary_preview_chars() -> usize {
    300
}

fn default_conversation_id() -> String {
    "default".to_string()
}

fn default_transfer_reason() -> String {
    "Transferring to a better-suited agent.".to_string()
}

fn default_description_depth() -> usize {
    1
}

impl RuntimeConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. HANDOFF_CONFIG_PATH environment variable
    /// 2. ./handoff-config.yaml (working directory)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./handoff-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(path)?
        } else {
            tracing::warn!("No configuration file found. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(A2A_BASE_URL_ENV) {
            tracing::info!("Environment override: {}={}", A2A_BASE_URL_ENV, url);
            self.a2a.base_url = url;
        }

        if let Some(val) = lookup(MAX_LEDGER_MESSAGES_ENV) {
            match val.trim().parse::<usize>() {
                Ok(0) => {
                    tracing::info!("Environment override: {}=0 (unbounded)", MAX_LEDGER_MESSAGES_ENV);
                    self.history.max_ledger_messages = None;
                }
                Ok(n) => {
                    tracing::info!("Environment override: {}={}", MAX_LEDGER_MESSAGES_ENV, n);
                    self.history.max_ledger_messages = Some(n);
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for {}: '{}'. Expected a non-negative integer. Ignoring.",
                        MAX_LEDGER_MESSAGES_ENV,
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.a2a.base_url.is_empty() {
            anyhow::bail!("a2a.base_url cannot be empty");
        }
        url::Url::parse(&self.a2a.base_url)
            .map_err(|e| anyhow::anyhow!("a2a.base_url '{}' is not a valid URL: {}", self.a2a.base_url, e))?;

        let retry = &self.a2a.retry;
        if retry.exponent < 1.0 {
            anyhow::bail!("a2a.retry.exponent must be >= 1.0, got {}", retry.exponent);
        }
        if retry.initial_interval > retry.max_interval {
            anyhow::bail!("a2a.retry.initial_interval cannot exceed a2a.retry.max_interval");
        }

        if self.task.default_conversation_id.is_empty() {
            anyhow::bail!("task.default_conversation_id cannot be empty");
        }

        Ok(())
    }
}
