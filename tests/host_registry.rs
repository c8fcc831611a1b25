use sshmcp::config::{Config, HostRecord};
use sshmcp::services::logger::{LogLevel, Logger};
use sshmcp::ssh::hosts::HostRegistry;
use std::collections::BTreeMap;
use std::io::Write;

fn write_config_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&path).expect("create config");
    write!(
        file,
        "server:\n  name: sshmcp\nsession:\n  max_sessions: 42\nhosts: {{}}\n"
    )
    .expect("write config");
    path
}

fn record() -> HostRecord {
    HostRecord {
        host: "203.0.113.10".to_string(),
        port: 0,
        username: "ops".to_string(),
        password: Some("hunter2".to_string()),
        private_key_path: None,
        description: Some("build box".to_string()),
    }
}

fn registry_at(path: std::path::PathBuf) -> HostRegistry {
    HostRegistry::new(
        BTreeMap::new(),
        Some(path),
        Logger::with_level("test", LogLevel::Error),
    )
}

#[test]
fn save_then_remove_restores_prior_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config_file(&dir);
    let registry = registry_at(path.clone());

    let before = std::fs::read_to_string(&path).expect("read config");

    registry.save_host("build", record()).expect("save");
    assert!(registry.host_exists("build"));
    let with_host = std::fs::read_to_string(&path).expect("read config");
    assert!(with_host.contains("203.0.113.10"));
    assert!(with_host.contains("build"));

    registry.remove_host("build").expect("remove");
    assert!(!registry.host_exists("build"));
    let after = std::fs::read_to_string(&path).expect("read config");
    assert!(!after.contains("203.0.113.10"));

    // Other sections survive the round trip.
    assert!(before.contains("max_sessions: 42"));
    assert!(after.contains("max_sessions: 42"));
}

#[test]
fn port_zero_defaults_to_22_on_save() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry_at(write_config_file(&dir));

    registry.save_host("web", record()).expect("save");
    assert_eq!(registry.get_host("web").expect("get").port, 22);
}

#[test]
fn duplicate_name_is_a_conflict() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry_at(write_config_file(&dir));

    registry.save_host("db", record()).expect("save");
    let err = registry.save_host("db", record()).unwrap_err();
    assert_eq!(err.code, "CONFLICT");
}

#[test]
fn persist_failure_rolls_back_memory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope").join("config.yaml");
    let registry = registry_at(missing);

    assert!(registry.save_host("ghost", record()).is_err());
    assert!(!registry.host_exists("ghost"));
}

#[test]
fn saved_hosts_load_back_through_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config_file(&dir);
    let registry = registry_at(path.clone());
    registry.save_host("edge", record()).expect("save");

    let config = Config::load(Some(&path)).expect("reload config");
    assert!(config.hosts.contains_key("edge"));
    assert_eq!(config.hosts["edge"].username, "ops");
    assert_eq!(config.hosts["edge"].port, 22);
}
