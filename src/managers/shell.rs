//! Interactive shell tools.

use crate::constants::shell as shell_constants;
use crate::errors::ToolError;
use crate::managers::sessions::string_arg;
use crate::managers::ToolHandler;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::ssh::registry::SessionRegistry;
use crate::ssh::session::Session;
use crate::ssh::shell::{AnsiMode, Shell, ShellConfig, TerminalMode};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct ShellManager {
    logger: Logger,
    validation: Validation,
    registry: Arc<SessionRegistry>,
}

impl ShellManager {
    pub fn new(logger: Logger, validation: Validation, registry: Arc<SessionRegistry>) -> Self {
        Self {
            logger: logger.child("shell"),
            validation,
            registry,
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

    fn resolve_shell(&self, args: &Value) -> Result<(Arc<Session>, Arc<Shell>), ToolError> {
        let session = self.resolve_session(args)?;
        let shell = session
            .shell()
            .ok_or_else(|| ToolError::shell_not_started(&session.id))?;
        Ok((session, shell))
    }

    async fn create_shell(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        if session.shell().is_some() {
            return Err(ToolError::conflict(format!(
                "Session {} already has an interactive shell",
                session.id
            ))
            .with_hint("Use ssh_write_input / ssh_read_output against the existing shell."));
        }

        let rows = args
            .get("rows")
            .and_then(|v| v.as_u64())
            .filter(|v| *v > 0)
            .unwrap_or(shell_constants::DEFAULT_ROWS as u64) as u16;
        let cols = args
            .get("cols")
            .and_then(|v| v.as_u64())
            .filter(|v| *v > 0)
            .unwrap_or(shell_constants::DEFAULT_COLS as u64) as u16;
        let working_dir = string_arg(args, "working_dir");

        // Interactive programs need raw keystrokes and untouched ANSI.
        let config = ShellConfig {
            mode: TerminalMode::Raw,
            ansi_mode: AnsiMode::Raw,
            ..Default::default()
        };

        let transport = session.transport().clone();
        let username = session.endpoint().username.clone();
        let shell = tokio::task::spawn_blocking(move || {
            Shell::create(
                transport,
                &username,
                shell_constants::DEFAULT_TERM,
                rows,
                cols,
                config,
            )
        })
        .await
        .map_err(|_| ToolError::internal("Shell creation task failed"))??;

        if let Some(dir) = &working_dir {
            shell.write_input(format!("cd {}\n", dir).as_bytes())?;
        }
        session.set_shell(shell.clone());

        self.logger.info(
            "created interactive shell",
            Some(&serde_json::json!({
                "session_id": session.id,
                "rows": rows,
                "cols": cols,
            })),
        );

        let mut out = String::from("Interactive shell started (background mode)\n\n");
        out.push_str(&format!("Session: {}\n", display_key(&session)));
        out.push_str(&format!("Terminal: {}x{} (raw mode, raw ANSI)\n", cols, rows));
        out.push_str(&format!(
            "Buffer: {} lines, background reader running\n",
            shell.buffer().capacity()
        ));
        out.push_str("Keepalive: TCP + SSH every 30s, application heartbeat every 60s\n");
        if let Some(dir) = working_dir {
            out.push_str(&format!("Initial directory: {}\n", dir));
        }
        out.push_str("\nNext steps:\n");
        out.push_str("  1. ssh_write_input to send commands or keystrokes\n");
        out.push_str("  2. ssh_terminal_snapshot to view full-screen programs\n");
        out.push_str("  3. ssh_read_output for plain text output\n");
        out.push_str("  4. ssh_shell_status for liveness and buffer state\n");
        Ok(out)
    }

    async fn write_input(&self, args: &Value) -> Result<String, ToolError> {
        let (session, shell) = self.resolve_shell(args)?;

        if let Some(special) = string_arg(args, "special_char") {
            let shell_for_write = shell.clone();
            let special_clone = special.clone();
            tokio::task::spawn_blocking(move || shell_for_write.write_special_char(&special_clone))
                .await
                .map_err(|_| ToolError::internal("Write task failed"))??;
            return Ok(format!(
                "Special character '{}' sent to shell session {}",
                special, session.id
            ));
        }

        let input = string_arg(args, "input").ok_or_else(|| {
            ToolError::invalid_params("Either input or special_char is required")
        })?;

        // A newline in the input means "type each line and press Enter".
        let auto_enter = input.contains('\n');
        let session_id = session.id.clone();
        tokio::task::spawn_blocking(move || {
            if auto_enter {
                let lines: Vec<&str> = input.split('\n').collect();
                let last = lines.len().saturating_sub(1);
                for (i, line) in lines.iter().enumerate() {
                    if !line.is_empty() {
                        shell.write_input(line.as_bytes())?;
                    }
                    if i < last || line.is_empty() {
                        shell.write_special_char("enter")?;
                    }
                }
                Ok::<_, ToolError>(())
            } else {
                shell.write_input(input.as_bytes())
            }
        })
        .await
        .map_err(|_| ToolError::internal("Write task failed"))??;

        if auto_enter {
            Ok(format!(
                "Input written to shell session {} (auto-sent Enter due to newline)",
                session_id
            ))
        } else {
            Ok(format!("Input written to shell session {}", session_id))
        }
    }

    async fn read_output(&self, args: &Value) -> Result<String, ToolError> {
        let (session, shell) = self.resolve_shell(args)?;
        let strategy = string_arg(args, "strategy").unwrap_or_else(|| "latest_lines".to_string());
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .filter(|v| *v > 0)
            .unwrap_or(20) as usize;

        let output = match strategy.as_str() {
            "latest_lines" => shell.read_latest_lines(limit).join("\n"),
            "all_unread" => shell.read_all_unread().join("\n"),
            "latest_bytes" => shell.read_latest_bytes(limit),
            other => {
                return Err(ToolError::invalid_params(format!(
                    "Invalid strategy: {}. Valid strategies: latest_lines, all_unread, latest_bytes",
                    other
                )))
            }
        };

        let used = shell.buffer().len();
        let total = shell.buffer().capacity();
        let percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        if output.is_empty() {
            return Ok(format!(
                "No new output (strategy: {}).\nBuffer: {}/{} lines ({:.1}%).\n\
                 Send input with ssh_write_input or check ssh_shell_status.",
                strategy, used, total, percent
            ));
        }

        Ok(format!(
            "Output (strategy: {}, buffer {}/{} lines, {:.1}%):\n\
             --- output start ---\n{}\n--- output end ---\n\
             Session: {}",
            strategy, used, total, percent, output, session.id
        ))
    }

    async fn resize_pty(&self, args: &Value) -> Result<String, ToolError> {
        let (session, shell) = self.resolve_shell(args)?;
        let rows = args.get("rows").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
        let cols = args.get("cols").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
        if rows == 0 || cols == 0 {
            return Err(ToolError::invalid_params("rows and cols must be positive"));
        }

        tokio::task::spawn_blocking(move || shell.resize(rows, cols))
            .await
            .map_err(|_| ToolError::internal("Resize task failed"))??;

        Ok(format!(
            "Terminal resized to {}x{} for session {}",
            rows, cols, session.id
        ))
    }

    async fn terminal_snapshot(&self, args: &Value) -> Result<String, ToolError> {
        let (session, shell) = self.resolve_shell(args)?;
        let with_color = args
            .get("with_color")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let include_cursor = args
            .get("include_cursor_info")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let snapshot = if with_color {
            shell.terminal_snapshot_with_color()
        } else {
            shell.terminal_snapshot()
        };

        let mut out = format!("Terminal snapshot for session {}\n\n", session.id);
        if include_cursor {
            let (x, y) = shell.cursor_position();
            let (cols, rows) = shell.terminal_size();
            out.push_str(&format!("Cursor Position: ({}, {})\n", x, y));
            out.push_str(&format!("Terminal Size: {}x{}\n\n", cols, rows));
        }
        out.push_str("```\n");
        out.push_str(&snapshot);
        out.push_str("\n```");
        Ok(out)
    }

    async fn shell_status(&self, args: &Value) -> Result<String, ToolError> {
        let (session, shell) = self.resolve_shell(args)?;

        // The status probe performs network I/O; keep it off the async pool.
        let status = tokio::task::spawn_blocking(move || shell.status())
            .await
            .map_err(|_| ToolError::internal("Status task failed"))?;

        let percent = if status.buffer_total > 0 {
            status.buffer_used as f64 / status.buffer_total as f64 * 100.0
        } else {
            0.0
        };

        let mut out = String::from("Shell session status\n\n");
        out.push_str(&format!("Session ID: {}\n", session.id));
        if !session.alias.is_empty() {
            out.push_str(&format!("Alias: {}\n", session.alias));
        }
        out.push_str(&format!(
            "State: {}\n",
            if status.is_active { "active" } else { "inactive" }
        ));
        out.push_str(&format!("Current directory: {}\n", status.current_dir));
        out.push_str(&format!(
            "Terminal: {} ({}x{})\n",
            status.terminal_type, status.cols, status.rows
        ));
        out.push_str(&format!("Mode: {}\n", status.mode));
        out.push_str(&format!("ANSI handling: {}\n\n", status.ansi_mode));

        out.push_str(&format!(
            "Last read: {}\n",
            format_time(status.last_read_time)
        ));
        out.push_str(&format!(
            "Last write: {}\n\n",
            format_time(status.last_write_time)
        ));

        out.push_str(&format!(
            "Buffer: {}/{} lines ({:.1}%)\n",
            status.buffer_used, status.buffer_total, percent
        ));
        out.push_str(&format!(
            "Unread output: {}\n\n",
            if status.has_unread_output { "yes" } else { "no" }
        ));

        out.push_str("Keepalive: TCP + SSH every 30s, heartbeat every 60s\n");
        out.push_str(&format!(
            "Last keepalive: {}\n",
            format_time(status.last_keepalive)
        ));
        out.push_str(&format!(
            "Consecutive keepalive failures: {}\n",
            status.keepalive_fails
        ));
        if status.keepalive_fails >= 3 {
            out.push_str("Warning: session is likely broken; reconnect recommended\n");
        }
        Ok(out)
    }
}

fn format_time(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}

fn display_key(session: &Session) -> String {
    if session.alias.is_empty() {
        session.id.clone()
    } else {
        session.alias.clone()
    }
}

#[async_trait]
impl ToolHandler for ShellManager {
    async fn handle(&self, tool: &str, args: &Value) -> Result<String, ToolError> {
        match tool {
            "ssh_shell" => self.create_shell(args).await,
            "ssh_write_input" => self.write_input(args).await,
            "ssh_read_output" => self.read_output(args).await,
            "ssh_resize_pty" => self.resize_pty(args).await,
            "ssh_terminal_snapshot" => self.terminal_snapshot(args).await,
            "ssh_shell_status" => self.shell_status(args).await,
            other => Err(ToolError::not_found(format!("Unknown tool: {}", other))),
        }
    }
}
