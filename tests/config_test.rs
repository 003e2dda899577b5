use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::ExposeSecret;
use workpool::config::{Config, DEFAULT_LOCK_DIR};

fn config_from(vars: &[(&str, &str)]) -> workpool::error::Result<Config> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_vars(|name| vars.get(name).cloned())
}

#[test]
fn defaults_apply_when_nothing_is_set() {
    let config = config_from(&[]).unwrap();
    assert_eq!(config.lock_dir, PathBuf::from(DEFAULT_LOCK_DIR));
    assert_eq!(config.tracker_command, "bd");
    assert_eq!(config.max_agents, 3);
    assert_eq!(config.timeout, Duration::from_secs(30 * 60));
    assert_eq!(config.log_level, "info");
    assert!(config.otel_endpoint.is_none());
    assert!(config.worker_api_key.is_none());
}

#[test]
fn variables_override_defaults() {
    let config = config_from(&[
        ("WORKPOOL_LOCK_DIR", "/var/tmp/locks"),
        ("WORKPOOL_LOG_DIR", "/var/tmp/logs"),
        ("WORKPOOL_TRACKER", "/opt/bin/bd"),
        ("WORKPOOL_MAX_AGENTS", " 8 "),
        ("WORKPOOL_TIMEOUT_MINUTES", "5"),
        ("OTEL_ENDPOINT", "http://localhost:4317"),
        ("LOG_LEVEL", "workpool=debug"),
        ("ANTHROPIC_API_KEY", "sk-test-key"),
    ])
    .unwrap();

    assert_eq!(config.lock_dir, PathBuf::from("/var/tmp/locks"));
    assert_eq!(config.log_dir, PathBuf::from("/var/tmp/logs"));
    assert_eq!(config.tracker_command, "/opt/bin/bd");
    assert_eq!(config.max_agents, 8);
    assert_eq!(config.timeout, Duration::from_secs(300));
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(config.log_level, "workpool=debug");
    assert_eq!(
        config.worker_api_key.as_ref().map(|k| k.expose_secret()),
        Some("sk-test-key")
    );
}

#[test]
fn api_key_is_not_printed_in_debug_output() {
    let config = config_from(&[("ANTHROPIC_API_KEY", "sk-very-secret")]).unwrap();
    assert!(!format!("{config:?}").contains("sk-very-secret"));
}

#[test]
fn empty_endpoint_counts_as_unset() {
    let config = config_from(&[("OTEL_ENDPOINT", "")]).unwrap();
    assert!(config.otel_endpoint.is_none());
}

#[test]
fn malformed_numbers_are_rejected() {
    assert!(config_from(&[("WORKPOOL_MAX_AGENTS", "many")]).is_err());
    assert!(config_from(&[("WORKPOOL_TIMEOUT_MINUTES", "-1")]).is_err());
}

#[test]
fn zero_agents_or_timeout_is_rejected() {
    let err = config_from(&[("WORKPOOL_MAX_AGENTS", "0")]).unwrap_err();
    assert!(err.to_string().contains("WORKPOOL_MAX_AGENTS"));
    assert!(config_from(&[("WORKPOOL_TIMEOUT_MINUTES", "0")]).is_err());
}
