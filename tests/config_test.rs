//! Config loading and defaults integration tests

use std::path::PathBuf;

use safespeak_node::config::{Config, RemoteBackend};
use tempfile::TempDir;

#[test]
fn test_full_config_parses() {
    let toml_str = r#"
[node]
device_id = "front-desk"
data_dir = "/tmp/safespeak-test"
staff_name = "Counselor office"

[remote]
enabled = true
backend = "memory"
base_url = "https://store.school.example"
api_key = "secret"
write_timeout_secs = 20
upload_timeout_secs = 40

[sync]
reconnect_interval_secs = 5

[rate_limit]
window_secs = 300
max_submissions = 3
ban_secs = 30

[storage]
max_reports = 500

[api]
http_port = 9090
"#;

    let config: Config = toml::from_str(toml_str).expect("valid config");
    assert_eq!(config.node.device_id, "front-desk");
    assert_eq!(config.node.data_dir, PathBuf::from("/tmp/safespeak-test"));
    assert_eq!(config.node.staff_name, "Counselor office");
    assert_eq!(config.remote.backend, RemoteBackend::Memory);
    assert_eq!(config.remote.resolved_ws_url(), "wss://store.school.example");
    assert_eq!(config.remote.write_timeout().as_secs(), 20);
    assert_eq!(config.sync.reconnect_interval().as_secs(), 5);

    let policy = config.rate_limit.policy();
    assert_eq!(policy.window_ms, 300_000);
    assert_eq!(policy.max_submissions, 3);
    assert_eq!(policy.ban_ms, 30_000);

    assert_eq!(config.storage.max_reports, 500);
    assert_eq!(config.api.http_port, 9090);
}

#[test]
fn test_omitted_sections_take_defaults() {
    let config: Config = toml::from_str("[node]\n").unwrap();
    assert!(config.node.device_id.starts_with("device-"));
    assert_eq!(config.node.staff_name, "School board");
    assert!(config.remote.enabled);
    assert_eq!(config.remote.backend, RemoteBackend::Http);
    assert_eq!(config.remote.upload_timeout().as_secs(), 45);
    assert_eq!(config.storage.max_reports, 10_000);
}

#[test]
fn test_serialized_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("safespeak-node.toml");

    let mut config = Config::default();
    config.node.device_id = "tablet-7".to_string();
    config.remote.enabled = false;
    std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

    let loaded = Config::load_or_default(&path).unwrap();
    assert_eq!(loaded.node.device_id, "tablet-7");
    assert!(!loaded.remote.enabled);
    assert_eq!(loaded.sync.reconnect_interval_secs, 10);
}

#[test]
fn test_invalid_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[node\ndevice_id = ").unwrap();
    assert!(Config::load_or_default(&path).is_err());
}

#[test]
fn test_zero_reconnect_interval_is_raised_to_one_second() {
    let config: Config = toml::from_str("[node]\n\n[sync]\nreconnect_interval_secs = 0\n").unwrap();
    assert_eq!(config.sync.reconnect_interval_secs, 0);
    assert_eq!(config.sync.reconnect_interval().as_secs(), 1);
}
