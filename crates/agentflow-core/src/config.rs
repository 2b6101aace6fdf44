use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AgentflowError, Result};

/// Top-level agentflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub handlers: HandlersConfig,
    /// Runtime JSONL logging configuration.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Execution engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size per stage. 0 means available parallelism.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Handler timeout for kinds that declare none.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Per-kind timeout overrides, keyed by kind label (e.g. "GPT-4o").
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            default_timeout_secs: default_timeout_secs(),
            timeouts: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Effective worker pool size.
    pub fn worker_count(&self) -> usize {
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 10_000 }
fn default_timeout_secs() -> u64 { 30 }

/// Graph persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `~/` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.agentflow/graphs.db".to_string() }

/// Publish-time gates applied on top of structural validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Reject publish when the graph has no Trigger node.
    #[serde(default)]
    pub require_trigger: bool,
    /// Reject publish when the graph has no edges.
    #[serde(default)]
    pub require_edges: bool,
}

/// Settings for the built-in handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlersConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Characters kept from scraped content.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            http_timeout_secs: default_http_timeout(),
            max_content_length: default_max_content_length(),
        }
    }
}

fn default_user_agent() -> String { "agentflow/0.3".to_string() }
fn default_http_timeout() -> u64 { 30 }
fn default_max_content_length() -> usize { 30_000 }

/// JSONL runtime logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable runtime logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ~/.agentflow/logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Verbosity: 1=run summary, 2=per-node outcome, 3=every attempt.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: None,
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AgentflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| AgentflowError::Config(e.to_string()))
    }

    /// Resolve the store path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }

    /// Resolve the JSONL log directory, if runtime logging is enabled.
    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref().filter(|l| l.enabled)?;
        Some(match &log.log_dir {
            Some(dir) => expand_home(dir),
            None => expand_home("~/.agentflow/logs"),
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_AGENTFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_AGENTFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_AGENTFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_AGENTFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_AGENTFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_retries, 2);
        assert_eq!(config.engine.max_concurrency, 0);
        assert_eq!(config.engine.default_timeout_secs, 30);
        assert!(config.engine.timeouts.is_empty());
        assert!(!config.publish.require_trigger);
        assert!(!config.publish.require_edges);
        assert!(config.log.is_none());
        assert!(config.log_dir().is_none());
    }

    #[test]
    fn test_worker_count_defaults_to_parallelism() {
        let config = EngineConfig::default();
        assert!(config.worker_count() >= 1);

        let fixed = EngineConfig {
            max_concurrency: 3,
            ..EngineConfig::default()
        };
        assert_eq!(fixed.worker_count(), 3);
    }

    #[test]
    fn test_timeout_overrides() {
        let toml_str = r#"
[engine]
max_retries = 4

[engine.timeouts]
"GPT-4o" = 90
"Wait" = 600
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_retries, 4);
        assert_eq!(config.engine.initial_backoff_ms, 500);
        assert_eq!(config.engine.timeouts.get("GPT-4o"), Some(&90));
        assert_eq!(config.engine.timeouts.get("Wait"), Some(&600));
    }

    #[test]
    fn test_log_section_enables_logging() {
        let toml_str = r#"
[log]
log_dir = "/tmp/agentflow-logs"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_dir(), Some(PathBuf::from("/tmp/agentflow-logs")));
        assert_eq!(config.log.unwrap().level, 2);
    }
}
