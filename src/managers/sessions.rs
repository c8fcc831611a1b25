//! Session lifecycle and one-shot execution tools.

use crate::config::Config;
use crate::errors::ToolError;
use crate::managers::ToolHandler;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::ssh::hosts::HostRegistry;
use crate::ssh::registry::SessionRegistry;
use crate::ssh::session::{HistorySource, Session};
use crate::ssh::transport::{AuthConfig, AuthMethod, Endpoint};
use crate::utils::format::format_duration;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_EXEC_TIMEOUT_SECS: f64 = 30.0;

pub struct SessionManager {
    logger: Logger,
    validation: Validation,
    registry: Arc<SessionRegistry>,
    hosts: Arc<HostRegistry>,
    default_port: u16,
}

impl SessionManager {
    pub fn new(
        logger: Logger,
        validation: Validation,
        registry: Arc<SessionRegistry>,
        hosts: Arc<HostRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            logger: logger.child("sessions"),
            validation,
            registry,
            hosts,
            default_port: config.ssh.default_port,
        }
    }

    fn resolve_session(&self, args: &Value) -> Result<Arc<Session>, ToolError> {
        let key = self.validation.ensure_string(
            args.get("session_id").unwrap_or(&Value::Null),
            "session_id",
            true,
        )?;
        self.registry.get_by_id_or_alias(&key)
    }

    async fn connect(&self, args: &Value) -> Result<String, ToolError> {
        let mut host = string_arg(args, "host");
        let mut username = string_arg(args, "username");
        let mut port = args.get("port").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
        let mut auth_type = string_arg(args, "auth_type");
        let mut password = string_arg(args, "password");
        let mut private_key = string_arg(args, "private_key");
        let passphrase = string_arg(args, "passphrase");
        let sudo_password = string_arg(args, "sudo_password");
        let alias = string_arg(args, "alias");

        // A saved host fills in whatever was not passed explicitly.
        if let Some(hostname) = string_arg(args, "hostname") {
            let record = self.hosts.get_host(&hostname)?;
            if host.is_none() {
                host = Some(record.host.clone());
            }
            if username.is_none() {
                username = Some(record.username.clone());
            }
            if port == 0 && record.port > 0 {
                port = record.port;
            }
            if password.is_none() {
                if let Some(saved) = record.password.clone() {
                    password = Some(saved);
                    auth_type.get_or_insert_with(|| "password".to_string());
                }
            }
            if private_key.is_none() {
                if let Some(path) = record.private_key_path.clone() {
                    private_key = Some(path);
                    auth_type.get_or_insert_with(|| "private_key".to_string());
                }
            }
        }

        let host = host.ok_or_else(|| {
            ToolError::invalid_params("Host address is required")
                .with_hint("Provide either host or hostname.")
        })?;
        let username =
            username.ok_or_else(|| ToolError::invalid_params("Username is required"))?;
        if port == 0 {
            port = self.default_port;
        }

        let auth_type = auth_type.unwrap_or_else(|| "password".to_string());
        let method = match auth_type.as_str() {
            "password" => AuthMethod::Password(password.unwrap_or_default()),
            "private_key" => AuthMethod::PrivateKey {
                key: private_key.ok_or_else(|| {
                    ToolError::invalid_params("private_key is required for auth_type=private_key")
                })?,
                passphrase,
            },
            "keyboard" | "keyboard_interactive" => {
                AuthMethod::KeyboardInteractive(password.unwrap_or_default())
            }
            "agent" | "ssh_agent" => AuthMethod::Agent,
            other => {
                return Err(ToolError::invalid_params(format!(
                    "Unsupported auth type: {}",
                    other
                )))
            }
        };

        let endpoint = Endpoint {
            host: host.clone(),
            port,
            username: username.clone(),
        };
        let auth = AuthConfig {
            method,
            sudo_password,
        };

        let session = self.registry.create_session(endpoint, auth, alias).await?;

        Ok(format!(
            "Successfully connected to {}@{}:{}\nSession ID: {}\nAlias: {}",
            username, host, port, session.id, session.alias
        ))
    }

    async fn disconnect(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let id = session.id.clone();
        drop(session);
        self.registry.remove_session(&id).await?;
        Ok(format!("Session {} closed successfully", id))
    }

    async fn list_sessions(&self) -> Result<String, ToolError> {
        let sessions = self.registry.list_sessions();
        let mut out = format!("Total sessions: {}\n\n", sessions.len());
        for session in sessions {
            out.push_str(&format!("- Session ID: {}\n", session.id));
            if !session.alias.is_empty() {
                out.push_str(&format!("  Alias: {}\n", session.alias));
            }
            let endpoint = session.endpoint();
            out.push_str(&format!("  Host: {}:{}\n", endpoint.host, endpoint.port));
            out.push_str(&format!("  Username: {}\n", endpoint.username));
            out.push_str(&format!("  State: {}\n", session.state()));
            out.push_str(&format!(
                "  Created: {}\n",
                session.created_at.to_rfc3339()
            ));
            out.push_str(&format!(
                "  Last Used: {}\n\n",
                session.last_used_at().to_rfc3339()
            ));
        }
        Ok(out)
    }

    async fn exec(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let command =
            self.validation
                .ensure_string(args.get("command").unwrap_or(&Value::Null), "command", false)?;
        let working_dir = string_arg(args, "working_dir");
        let timeout = timeout_arg(args);

        self.logger.debug(
            "exec",
            Some(&serde_json::json!({"session_id": session.id, "command": command})),
        );

        let result = tokio::task::spawn_blocking(move || match working_dir {
            Some(dir) => session.execute_with_working_dir(&command, &dir, timeout),
            None => session.execute(&command, timeout),
        })
        .await
        .map_err(|_| ToolError::internal("Exec task failed"))??;

        let mut out = format!("Exit Code: {}\n\n", result.exit_code);
        if !result.stdout.is_empty() {
            out.push_str(&format!("STDOUT:\n{}\n\n", result.stdout));
        }
        if !result.stderr.is_empty() {
            out.push_str(&format!("STDERR:\n{}\n\n", result.stderr));
        }
        out.push_str(&format!(
            "Execution Time: {}",
            format_duration(result.duration)
        ));
        Ok(out)
    }

    async fn exec_batch(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let commands = self
            .validation
            .ensure_string_array(args.get("commands").unwrap_or(&Value::Null), "commands")?;
        let stop_on_error = args
            .get("stop_on_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let compact = args.get("compact").and_then(|v| v.as_bool()).unwrap_or(false);
        let timeout = timeout_arg(args);

        let commands_for_run = commands.clone();
        let (results, summary, error) = tokio::task::spawn_blocking(move || {
            session.execute_batch(&commands_for_run, stop_on_error, timeout)
        })
        .await
        .map_err(|_| ToolError::internal("Batch task failed"))?;

        let mut out = if compact {
            let mut out = String::from("Batch execution completed\n");
            out.push_str(&format!(
                "  Total: {} | Success: {} | Failed: {}\n",
                summary.total, summary.success, summary.failed
            ));
            if summary.failed > 0 {
                out.push_str("\nFailed commands:\n");
                for (i, result) in results.iter().enumerate() {
                    if result.exit_code != 0 {
                        out.push_str(&format!(
                            "  {}. {} (exit: {})\n",
                            i + 1,
                            commands.get(i).map(String::as_str).unwrap_or(""),
                            result.exit_code
                        ));
                    }
                }
            }
            out
        } else {
            let mut out = String::from("Batch Execution Summary:\n");
            out.push_str(&format!(
                "Total: {}, Success: {}, Failed: {}\n\n",
                summary.total, summary.success, summary.failed
            ));
            for (i, result) in results.iter().enumerate() {
                out.push_str(&format!(
                    "Command {}: {}\n",
                    i + 1,
                    commands.get(i).map(String::as_str).unwrap_or("")
                ));
                out.push_str(&format!("Exit Code: {}\n", result.exit_code));
                if !result.stdout.is_empty() {
                    out.push_str(&format!("STDOUT: {}\n", result.stdout));
                }
                if !result.stderr.is_empty() {
                    out.push_str(&format!("STDERR: {}\n", result.stderr));
                }
                out.push('\n');
            }
            out
        };

        if let Some(err) = error {
            out.push_str(&format!("\nAborted: {}\n", err.message));
        }
        Ok(out)
    }

    async fn exec_script(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let script =
            self.validation
                .ensure_string(args.get("script").unwrap_or(&Value::Null), "script", false)?;
        let timeout = timeout_arg(args);

        let result =
            tokio::task::spawn_blocking(move || session.execute_script(&script, timeout))
                .await
                .map_err(|_| ToolError::internal("Script task failed"))??;

        let mut out = format!("Exit Code: {}\n", result.exit_code);
        if !result.stdout.is_empty() {
            out.push_str(&format!("\nSTDOUT:\n{}", result.stdout));
        }
        if !result.stderr.is_empty() {
            out.push_str(&format!("\nSTDERR:\n{}", result.stderr));
        }
        Ok(out)
    }

    async fn history(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let source_filter = match string_arg(args, "source").as_deref() {
            Some("exec") => Some(HistorySource::Exec),
            Some("shell") => Some(HistorySource::Shell),
            Some(other) => {
                return Err(ToolError::invalid_params(format!(
                    "Unknown history source: {}",
                    other
                )))
            }
            None => None,
        };

        let history = session.history_snapshot();
        let filtered: Vec<_> = history
            .into_iter()
            .filter(|entry| source_filter.map(|s| entry.source == s).unwrap_or(true))
            .collect();

        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .filter(|v| *v > 0)
            .unwrap_or(filtered.len());
        let start = filtered.len().saturating_sub(limit);
        let recent = &filtered[start..];

        if recent.is_empty() {
            let source_note = source_filter
                .map(|s| format!(" (source: {})", s))
                .unwrap_or_default();
            return Ok(format!(
                "No command history yet{}. Execute some commands first using ssh_exec or ssh_exec_batch.\n",
                source_note
            ));
        }

        let mut out = format!(
            "Command History (showing {} of {} total):\n\n",
            recent.len(),
            filtered.len()
        );
        for (i, entry) in recent.iter().enumerate() {
            let marker = if entry.success { "ok" } else { "failed" };
            out.push_str(&format!(
                "{}. [{}] {} [source: {}]\n",
                i + 1,
                marker,
                entry.command,
                entry.source
            ));
            out.push_str(&format!("   Exit Code: {}\n", entry.exit_code));
            out.push_str(&format!(
                "   Time: {}\n",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S")
            ));
            out.push_str(&format!(
                "   Duration: {}\n\n",
                format_duration(entry.duration)
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl ToolHandler for SessionManager {
    async fn handle(&self, tool: &str, args: &Value) -> Result<String, ToolError> {
        match tool {
            "ssh_connect" => self.connect(args).await,
            "ssh_disconnect" => self.disconnect(args).await,
            "ssh_list_sessions" => self.list_sessions().await,
            "ssh_exec" => self.exec(args).await,
            "ssh_exec_batch" => self.exec_batch(args).await,
            "ssh_exec_script" => self.exec_script(args).await,
            "ssh_history" => self.history(args).await,
            other => Err(ToolError::not_found(format!("Unknown tool: {}", other))),
        }
    }
}

pub(crate) fn string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Timeout in seconds from tool args; absent or non-positive falls back to
/// the 30-second default.
pub(crate) fn timeout_arg(args: &Value) -> Duration {
    let seconds = args
        .get("timeout")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS);
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timeout_arg_defaults_and_clamps() {
        assert_eq!(timeout_arg(&json!({})), Duration::from_secs(30));
        assert_eq!(timeout_arg(&json!({"timeout": 5})), Duration::from_secs(5));
        assert_eq!(timeout_arg(&json!({"timeout": -1})), Duration::from_secs(30));
    }

    #[test]
    fn string_arg_trims_and_drops_empty() {
        assert_eq!(string_arg(&json!({"k": " v "}), "k").as_deref(), Some("v"));
        assert_eq!(string_arg(&json!({"k": "  "}), "k"), None);
        assert_eq!(string_arg(&json!({}), "k"), None);
    }
}
