//! Integration tests against a real SSH server.
//!
//! Ignored by default; run with `cargo test -- --ignored` after exporting
//! SSHMCP_TEST_HOST, SSHMCP_TEST_USER, and SSHMCP_TEST_PASSWORD (and
//! optionally SSHMCP_TEST_PORT).

use sshmcp::services::logger::{LogLevel, Logger};
use sshmcp::ssh::registry::{RegistryConfig, SessionRegistry};
use sshmcp::ssh::shell::{AnsiMode, Shell, ShellConfig, TerminalMode};
use sshmcp::ssh::transport::{AuthConfig, AuthMethod, Endpoint};
use std::sync::Arc;
use std::time::Duration;

fn test_endpoint() -> Option<(Endpoint, AuthConfig)> {
    let host = std::env::var("SSHMCP_TEST_HOST").ok()?;
    let username = std::env::var("SSHMCP_TEST_USER").ok()?;
    let password = std::env::var("SSHMCP_TEST_PASSWORD").ok()?;
    let port = std::env::var("SSHMCP_TEST_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(22);
    Some((
        Endpoint {
            host,
            port,
            username,
        },
        AuthConfig {
            method: AuthMethod::Password(password),
            sudo_password: None,
        },
    ))
}

fn registry() -> Arc<SessionRegistry> {
    SessionRegistry::new(
        RegistryConfig {
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        },
        Logger::with_level("live-test", LogLevel::Error),
    )
}

#[tokio::test]
#[ignore]
async fn echo_round_trip_through_shell_buffer() {
    let Some((endpoint, auth)) = test_endpoint() else {
        panic!("SSHMCP_TEST_HOST / _USER / _PASSWORD must be set");
    };
    let registry = registry();
    let session = registry
        .create_session(endpoint, auth, None)
        .await
        .expect("connect");

    let transport = session.transport().clone();
    let username = session.endpoint().username.clone();
    let shell = tokio::task::spawn_blocking(move || {
        Shell::create(
            transport,
            &username,
            "xterm-256color",
            24,
            80,
            ShellConfig {
                mode: TerminalMode::Cooked,
                ansi_mode: AnsiMode::Raw,
                ..Default::default()
            },
        )
    })
    .await
    .expect("spawn")
    .expect("shell");

    shell.write_input(b"echo 'hello'\n").expect("write");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let lines = shell.read_latest_lines(10);
    assert!(
        lines.iter().any(|line| line.contains("hello")),
        "expected an echoed line, got {:?}",
        lines
    );

    shell.close();
    registry.close().await;
}

#[tokio::test]
#[ignore]
async fn timeout_returns_partial_output_and_minus_one() {
    let Some((endpoint, auth)) = test_endpoint() else {
        panic!("SSHMCP_TEST_HOST / _USER / _PASSWORD must be set");
    };
    let registry = registry();
    let session = registry
        .create_session(endpoint, auth, None)
        .await
        .expect("connect");

    let runner = session.clone();
    let err = tokio::task::spawn_blocking(move || {
        runner.execute("echo start; sleep 10; echo end", Duration::from_secs(1))
    })
    .await
    .expect("spawn")
    .expect_err("must time out");

    assert_eq!(err.code, "TIMEOUT");
    let details = err.details.expect("details carry partial output");
    let stdout = details.get("stdout").and_then(|v| v.as_str()).unwrap_or("");
    assert!(stdout.contains("start"));
    assert!(!stdout.contains("end"));
    assert_eq!(
        details.get("exit_code").and_then(|v| v.as_i64()),
        Some(-1)
    );

    registry.close().await;
}

#[tokio::test]
#[ignore]
async fn batch_stops_on_first_failure() {
    let Some((endpoint, auth)) = test_endpoint() else {
        panic!("SSHMCP_TEST_HOST / _USER / _PASSWORD must be set");
    };
    let registry = registry();
    let session = registry
        .create_session(endpoint, auth, None)
        .await
        .expect("connect");

    let commands = vec![
        "true".to_string(),
        "false".to_string(),
        "echo should-not-run".to_string(),
    ];
    let runner = session.clone();
    let (results, summary, error) = tokio::task::spawn_blocking(move || {
        runner.execute_batch(&commands, true, Duration::from_secs(5))
    })
    .await
    .expect("spawn");

    assert_eq!(results.len(), 2);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.success, 1);
    assert_eq!(summary.failed, 1);
    assert!(error.is_some());

    registry.close().await;
}

#[tokio::test]
#[ignore]
async fn broken_session_is_replaced_on_alias_collision() {
    let Some((endpoint, auth)) = test_endpoint() else {
        panic!("SSHMCP_TEST_HOST / _USER / _PASSWORD must be set");
    };
    let registry = registry();
    let first = registry
        .create_session(endpoint.clone(), auth.clone(), Some("x".to_string()))
        .await
        .expect("connect first");

    // Simulate a broken-but-unreaped session.
    first.transport().disconnect();

    let second = registry
        .create_session(endpoint, auth, Some("x".to_string()))
        .await
        .expect("second connect must silently replace the broken session");
    assert_eq!(second.alias, "x");
    assert_ne!(second.id, first.id);
    assert_eq!(registry.live_count(), 1);

    registry.close().await;
}
