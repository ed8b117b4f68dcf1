use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level keyflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on nodes executing at once (1 = strictly sequential).
    #[serde(default = "default_max_concurrent_nodes")]
    pub max_concurrent_nodes: usize,
    /// Per-invocation timeout in milliseconds (0 = unlimited).
    #[serde(default)]
    pub node_timeout_ms: u64,
    /// Fail the run if nothing can make progress for this long (0 = never).
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    /// How long an empty pending set must stay empty before the run counts
    /// as complete, so nodes spawned right after start are not missed.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Capacity of the progress event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: default_max_concurrent_nodes(),
            node_timeout_ms: 0,
            stall_timeout_ms: default_stall_timeout_ms(),
            settle_ms: default_settle_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ExecutorConfig {
    /// Set the concurrency bound.
    pub fn with_max_concurrent_nodes(mut self, n: usize) -> Self {
        self.max_concurrent_nodes = n;
        self
    }

    /// Set the per-node timeout.
    pub fn with_node_timeout_ms(mut self, ms: u64) -> Self {
        self.node_timeout_ms = ms;
        self
    }

    /// Set the stall watchdog timeout.
    pub fn with_stall_timeout_ms(mut self, ms: u64) -> Self {
        self.stall_timeout_ms = ms;
        self
    }

    /// Set the completion settle window.
    pub fn with_settle_ms(mut self, ms: u64) -> Self {
        self.settle_ms = ms;
        self
    }
}

fn default_max_concurrent_nodes() -> usize { 1 }
fn default_stall_timeout_ms() -> u64 { 120_000 }
fn default_settle_ms() -> u64 { 100 }
fn default_event_capacity() -> usize { 256 }

/// How a replay treats node-run entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Restore recorded writes only; node logic is never invoked.
    #[default]
    Restore,
    /// Re-invoke node logic and compare against the recorded outputs.
    Verify,
}

/// Replay behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub mode: ReplayMode,
    /// Whether the replaying executor keeps its own run log.
    #[serde(default = "default_record_log")]
    pub record_log: bool,
    /// Verify mode: bound on each re-invoked node, in milliseconds
    /// (0 = unlimited). A node's own timeout takes precedence.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: ReplayMode::default(),
            record_log: default_record_log(),
            verify_timeout_ms: default_verify_timeout_ms(),
        }
    }
}

fn default_record_log() -> bool { true }
fn default_verify_timeout_ms() -> u64 { 30_000 }

impl FlowConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: FlowConfig =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.executor.max_concurrent_nodes == 0 {
            return Err(FlowError::Config(
                "executor.max_concurrent_nodes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` and `${ENV_VAR:-fallback}` patterns in a string.
///
/// Unset variables without a fallback are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };
        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };
        match (std::env::var(name), fallback) {
            (Ok(val), _) => result.push_str(&val),
            (Err(_), Some(fallback)) => result.push_str(fallback),
            (Err(_), None) => result.push_str(&rest[start..start + 3 + end]),
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    result
}
