use std::io::Write;

use agentflow_core::config::AppConfig;
use agentflow_core::AgentflowError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_concurrency = 4
max_retries = 3
initial_backoff_ms = 250
max_backoff_ms = 4000
default_timeout_secs = 45

[engine.timeouts]
"URL Scraper" = 20

[store]
path = "/tmp/agentflow-test/graphs.db"

[publish]
require_trigger = true
require_edges = true

[handlers]
user_agent = "agentflow-test/1.0"
http_timeout_secs = 10
max_content_length = 500

[log]
log_dir = "/tmp/agentflow-test/logs"
level = 3
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.worker_count(), 4);
    assert_eq!(config.engine.max_retries, 3);
    assert_eq!(config.engine.initial_backoff_ms, 250);
    assert_eq!(config.engine.max_backoff_ms, 4000);
    assert_eq!(config.engine.default_timeout_secs, 45);
    assert_eq!(config.engine.timeouts.get("URL Scraper"), Some(&20));

    assert_eq!(
        config.store_path(),
        std::path::PathBuf::from("/tmp/agentflow-test/graphs.db")
    );
    assert!(config.publish.require_trigger);
    assert!(config.publish.require_edges);

    assert_eq!(config.handlers.user_agent, "agentflow-test/1.0");
    assert_eq!(config.handlers.http_timeout_secs, 10);
    assert_eq!(config.handlers.max_content_length, 500);

    let log = config.log.as_ref().expect("log present");
    assert!(log.enabled);
    assert_eq!(log.level, 3);
    assert_eq!(
        config.log_dir(),
        Some(std::path::PathBuf::from("/tmp/agentflow-test/logs"))
    );
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("AGENTFLOW_TEST_STORE", "/tmp/expanded.db");

    let toml_content = r#"
[store]
path = "${AGENTFLOW_TEST_STORE}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.store.path, "/tmp/expanded.db");

    std::env::remove_var("AGENTFLOW_TEST_STORE");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[engine]
max_retries = 1
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_retries, 1);
    assert_eq!(config.engine.initial_backoff_ms, 500);
    assert_eq!(config.engine.max_backoff_ms, 10_000);
    assert_eq!(config.engine.default_timeout_secs, 30);
    assert!(config.engine.worker_count() >= 1);
    assert!(config.store.path.ends_with("graphs.db"));
    assert!(!config.publish.require_trigger);
    assert_eq!(config.handlers.max_content_length, 30_000);
    assert!(config.log.is_none());
    assert!(config.log_dir().is_none());
}

#[test]
fn test_disabled_log_section() {
    let toml_content = r#"
[log]
enabled = false
log_dir = "/tmp/never"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert!(config.log_dir().is_none());
}

#[test]
fn test_missing_and_malformed_files() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/agentflow.toml")).unwrap_err();
    assert!(matches!(err, AgentflowError::ConfigNotFound(_)));

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nmax_retries = \"many\"\n").expect("write toml");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, AgentflowError::Config(_)));
}
