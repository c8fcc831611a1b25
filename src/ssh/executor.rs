//! One-shot command execution over fresh subordinate channels.

use crate::constants::network;
use crate::errors::ToolError;
use crate::ssh::session::{CommandHistoryEntry, HistorySource, Session};
use chrono::Utc;
use serde::Serialize;
use std::io::Read;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip)]
    pub duration: Duration,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

/// Quote a value for POSIX shells.
pub(crate) fn escape_shell_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Rewrite `sudo ...` to deliver the sudo password on stdin via `sudo -S`.
///
/// The password still appears in the remote process listing for the duration
/// of the command; an askpass helper would avoid that.
fn inject_sudo_password(command: &str, sudo_password: &str) -> String {
    let rest = command.trim_start_matches("sudo ").trim_start();
    format!(
        "printf '%s\\n' {} | sudo -S -p '' {}",
        escape_shell_value(sudo_password),
        rest
    )
}

impl Session {
    /// Execute one command on a fresh channel, with separate stdout/stderr
    /// capture and a timeout. Timeout yields exit code −1, partial output,
    /// and a timeout error; a remote non-zero exit is not an error. Every
    /// call is recorded in the session history, on both paths.
    pub fn execute(&self, command: &str, timeout: Duration) -> Result<CommandResult, ToolError> {
        self.touch();

        let effective = match self.auth().sudo_password.as_deref() {
            Some(password) if command.trim_start().starts_with("sudo ") => {
                inject_sudo_password(command.trim_start(), password)
            }
            _ => command.to_string(),
        };

        let started = Instant::now();
        let outcome = self.run_channel_command(&effective, timeout);
        let duration = started.elapsed();

        match outcome {
            Ok(mut result) => {
                result.duration = duration;
                self.record_history(CommandHistoryEntry {
                    command: command.to_string(),
                    exit_code: result.exit_code,
                    duration,
                    timestamp: Utc::now(),
                    success: result.exit_code == 0 && !result.timed_out,
                    source: HistorySource::Exec,
                });
                if result.timed_out {
                    // Partial output travels with the error details.
                    return Err(ToolError::timeout(format!(
                        "Command timed out after {:?}",
                        timeout
                    ))
                    .with_details(serde_json::json!({
                        "exit_code": result.exit_code,
                        "stdout": result.stdout,
                        "stderr": result.stderr,
                    })));
                }
                Ok(result)
            }
            Err(err) => {
                self.record_history(CommandHistoryEntry {
                    command: command.to_string(),
                    exit_code: -1,
                    duration,
                    timestamp: Utc::now(),
                    success: false,
                    source: HistorySource::Exec,
                });
                Err(err)
            }
        }
    }

    /// `execute` with a `cd <dir> && ` prefix.
    pub fn execute_with_working_dir(
        &self,
        command: &str,
        working_dir: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ToolError> {
        let full = format!("cd {} && {}", escape_shell_value(working_dir), command);
        self.execute(&full, timeout)
    }

    /// Execute commands in sequence. With `stop_on_error`, the first failed
    /// or erroring command aborts the batch; the partial results and an
    /// aggregate error are returned together.
    pub fn execute_batch(
        &self,
        commands: &[String],
        stop_on_error: bool,
        timeout: Duration,
    ) -> (Vec<CommandResult>, BatchSummary, Option<ToolError>) {
        let mut results = Vec::with_capacity(commands.len());
        let mut summary = BatchSummary {
            total: commands.len(),
            ..Default::default()
        };

        for (index, command) in commands.iter().enumerate() {
            match self.execute(command, timeout) {
                Ok(result) => {
                    let ok = result.exit_code == 0;
                    results.push(result);
                    if ok {
                        summary.success += 1;
                    } else {
                        summary.failed += 1;
                        if stop_on_error {
                            let err = ToolError::internal(format!(
                                "Command {} failed with exit code {}",
                                index + 1,
                                results.last().map(|r| r.exit_code).unwrap_or(-1)
                            ));
                            return (results, summary, Some(err));
                        }
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    results.push(CommandResult {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: err.message.clone(),
                        duration: Duration::default(),
                        timed_out: err.code == "TIMEOUT",
                    });
                    if stop_on_error {
                        let aggregate = ToolError::internal(format!(
                            "Command {} failed: {}",
                            index + 1,
                            err.message
                        ));
                        return (results, summary, Some(aggregate));
                    }
                }
            }
        }

        (results, summary, None)
    }

    /// Execute a multi-line script: blank lines and `#` comments are
    /// dropped, the rest runs as a stop-on-error batch with merged output.
    pub fn execute_script(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ToolError> {
        let commands: Vec<String> = script
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        if commands.is_empty() {
            return Ok(CommandResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: "No commands to execute".to_string(),
                duration: Duration::default(),
                timed_out: false,
            });
        }

        let started = Instant::now();
        let (results, _summary, error) = self.execute_batch(&commands, true, timeout);

        let mut stdout = String::new();
        let mut stderr = String::new();
        for result in &results {
            if !result.stdout.is_empty() {
                stdout.push_str(&result.stdout);
                if !result.stdout.ends_with('\n') {
                    stdout.push('\n');
                }
            }
            if !result.stderr.is_empty() {
                stderr.push_str(&result.stderr);
                if !result.stderr.ends_with('\n') {
                    stderr.push('\n');
                }
            }
        }

        if let Some(err) = error {
            return Err(err.with_details(serde_json::json!({
                "stdout": stdout,
                "stderr": stderr,
            })));
        }

        Ok(CommandResult {
            exit_code: 0,
            stdout,
            stderr,
            duration: started.elapsed(),
            timed_out: false,
        })
    }

    /// `execute` with stdout and stderr merged into one string.
    pub fn execute_output(&self, command: &str, timeout: Duration) -> Result<String, ToolError> {
        let result = self.execute(command, timeout)?;
        let mut output = result.stdout;
        if !result.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&result.stderr);
        }
        Ok(output)
    }

    /// The channel-level run loop. Non-blocking reads with short sleeps so
    /// the transport mutex is never held across a wait; on timeout the
    /// channel is closed and given a bounded grace period to reach EOF.
    fn run_channel_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ToolError> {
        let transport = self.transport().clone();

        let mut channel = {
            let session = transport.lock();
            let mut channel = session.channel_session().map_err(ToolError::from)?;
            match channel.exec(command) {
                Ok(()) => channel,
                Err(err) => {
                    drop(channel);
                    drop(session);
                    return Err(ToolError::from(err));
                }
            }
        };

        let started = Instant::now();
        let driven = drive_exec_channel(&transport, &mut channel, timeout, started);

        // Finalize and release the channel while serialized; the libssh2
        // teardown path touches the session.
        let session = transport.lock();
        let exit_code = match &driven {
            Ok(captured) if !captured.timed_out => {
                let _ = channel.wait_close();
                channel.exit_status().unwrap_or(-1)
            }
            _ => -1,
        };
        drop(channel);
        drop(session);

        let captured = driven?;
        Ok(CommandResult {
            exit_code,
            stdout: String::from_utf8_lossy(&captured.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&captured.stderr).into_owned(),
            duration: started.elapsed(),
            timed_out: captured.timed_out,
        })
    }
}

struct ExecCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    timed_out: bool,
}

fn drive_exec_channel(
    transport: &crate::ssh::transport::Transport,
    channel: &mut ssh2::Channel,
    timeout: Duration,
    started: Instant,
) -> Result<ExecCapture, ToolError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];
    let unlimited = timeout.is_zero();
    let mut timed_out = false;

    loop {
        let (progressed, eof) = {
            let session = transport.lock();
            session.set_blocking(false);
            let mut progressed = false;
            let mut failure = None;
            match channel.read(&mut buf) {
                Ok(n) if n > 0 => {
                    stdout.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => failure = Some(format!("SSH stdout read failed: {}", err)),
            }
            if failure.is_none() {
                match channel.stderr().read(&mut buf) {
                    Ok(n) if n > 0 => {
                        stderr.extend_from_slice(&buf[..n]);
                        progressed = true;
                    }
                    Ok(_) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => failure = Some(format!("SSH stderr read failed: {}", err)),
                }
            }
            let eof = channel.eof();
            session.set_blocking(true);
            if let Some(message) = failure {
                return Err(ToolError::transport(message));
            }
            (progressed, eof)
        };

        if eof {
            break;
        }
        if !unlimited && started.elapsed() > timeout {
            timed_out = true;
            break;
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    if timed_out {
        {
            let session = transport.lock();
            session.set_blocking(false);
            let _ = channel.close();
            session.set_blocking(true);
        }
        let deadline = Instant::now() + Duration::from_millis(network::EXEC_HARD_GRACE_MS);
        while Instant::now() < deadline {
            let done = {
                let session = transport.lock();
                session.set_blocking(false);
                let done = channel.eof();
                session.set_blocking(true);
                done
            };
            if done {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    Ok(ExecCapture {
        stdout,
        stderr,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_escaping_wraps_and_quotes() {
        assert_eq!(escape_shell_value("plain"), "'plain'");
        assert_eq!(escape_shell_value("it's"), "'it'\\''s'");
    }

    #[test]
    fn sudo_rewrite_uses_stdin_delivery() {
        let rewritten = inject_sudo_password("sudo systemctl restart nginx", "p'w");
        assert!(rewritten.starts_with("printf '%s\\n' 'p'\\''w' | sudo -S -p ''"));
        assert!(rewritten.ends_with("systemctl restart nginx"));
        assert!(!rewritten.contains("sudo systemctl"));
    }
}
