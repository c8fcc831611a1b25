mod common;
use common::ENV_LOCK;

use sshmcp::config::Config;
use std::io::Write;

fn restore_env(key: &str, previous: Option<String>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

#[tokio::test]
async fn explicit_config_path_is_loaded() {
    let _guard = ENV_LOCK.lock().await;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&path).expect("create");
    write!(
        file,
        "ssh:\n  default_port: 2222\nsession:\n  max_sessions: 7\nlogging:\n  level: debug\n"
    )
    .expect("write");

    let config = Config::load(Some(&path)).expect("load");
    assert_eq!(config.ssh.default_port, 2222);
    assert_eq!(config.session.max_sessions, 7);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
}

#[tokio::test]
async fn missing_explicit_path_is_fatal() {
    let _guard = ENV_LOCK.lock().await;

    let err = Config::load(Some(std::path::Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert_eq!(err.code, "CONFIG_INVALID");
}

#[tokio::test]
async fn malformed_yaml_is_fatal() {
    let _guard = ENV_LOCK.lock().await;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "session: [not, a, mapping\n").expect("write");

    let err = Config::load(Some(&path)).unwrap_err();
    assert_eq!(err.code, "CONFIG_INVALID");
}

#[tokio::test]
async fn environment_overrides_scalar_fields() {
    let _guard = ENV_LOCK.lock().await;

    let prev_max = std::env::var("SSHMCP_SESSION_MAX_SESSIONS").ok();
    let prev_port = std::env::var("SSHMCP_SSH_DEFAULT_PORT").ok();
    std::env::set_var("SSHMCP_SESSION_MAX_SESSIONS", "3");
    std::env::set_var("SSHMCP_SSH_DEFAULT_PORT", "2200");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "session:\n  max_sessions: 50\n").expect("write");

    let config = Config::load(Some(&path)).expect("load");
    assert_eq!(config.session.max_sessions, 3);
    assert_eq!(config.ssh.default_port, 2200);

    restore_env("SSHMCP_SESSION_MAX_SESSIONS", prev_max);
    restore_env("SSHMCP_SSH_DEFAULT_PORT", prev_port);
}
