use std::io::Write;

use conductor_core::config::{AppConfig, BrokerType};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_from_explicit_file() {
    let file = write_config(
        r#"
        [coordinator]
        name = "main-coordinator"
        heartbeat_interval_seconds = 10

        [coordinator.queues]
        completed = 4
        pending = 2

        [worker.probe]
        max_attempts = 5
        interval_seconds = 1
        "#,
    );

    let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.coordinator.name, "main-coordinator");
    assert_eq!(config.coordinator.heartbeat_interval_seconds, 10);
    assert_eq!(config.coordinator.queues.get("completed"), Some(&4));
    assert_eq!(config.worker.probe.max_attempts, 5);
    assert_eq!(config.worker.probe.interval_seconds, 1);
    assert_eq!(config.broker.r#type, BrokerType::InMemory);
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/conductor.toml"));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("配置文件不存在"));
}

#[test]
fn test_load_rejects_invalid_values() {
    let file = write_config(
        r#"
        [worker]
        heartbeat_interval_seconds = 0
        "#,
    );

    assert!(AppConfig::load(Some(file.path().to_str().unwrap())).is_err());
}

#[test]
fn test_bundled_sample_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/conductor.toml");
    let config = AppConfig::load(Some(path)).unwrap();

    assert_eq!(config.worker.queues.get("default"), Some(&2));
    assert_eq!(config.worker.limits.timeout_seconds, Some(3600));
    assert!(!config.observability.metrics_enabled);
}
