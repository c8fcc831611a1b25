//! Interactive PTY shell with background workers.
//!
//! Three workers keep a shell usable while idle: a stdout pump feeding the
//! circular buffer and the terminal capturer, a protocol keepalive every
//! 30 s, and an application heartbeat every 60 s writing an invisible
//! cursor save/restore. Each worker owns an mpsc receiver; close drops the
//! senders, and a worker's next receive ends it within its poll interval.

use crate::constants::{network, shell as shell_constants};
use crate::errors::ToolError;
use crate::output::strip_ansi_str;
use crate::ssh::buffer::{CircularBuffer, DEFAULT_BUFFER_LINES};
use crate::ssh::transport::Transport;
use crate::term::TerminalCapturer;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use ssh2::{Channel, ExtendedData, PtyModeOpcode, PtyModes};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Interactive programs that need raw mode to behave.
const INTERACTIVE_PROGRAMS: &[&str] = &[
    "vim", "vi", "nano", "emacs", "gdb", "lldb", "top", "htop", "iotop", "python", "python3",
    "node", "irb", "mysql", "psql", "mongosh", "tmux", "screen", "less", "more", "most",
];

pub fn is_interactive_program(command: &str) -> bool {
    let lower = command.to_lowercase();
    INTERACTIVE_PROGRAMS.iter().any(|prog| lower.contains(prog))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalMode {
    /// Line buffering with echo and signal characters.
    Cooked,
    /// Keystrokes pass through untouched; required for htop/vim.
    Raw,
}

impl std::fmt::Display for TerminalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalMode::Cooked => write!(f, "cooked"),
            TerminalMode::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnsiMode {
    /// Pass escape sequences through unchanged.
    Raw,
    /// Remove escape sequences.
    Strip,
    /// Reserved for structured output.
    Parse,
}

impl std::fmt::Display for AnsiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnsiMode::Raw => write!(f, "raw"),
            AnsiMode::Strip => write!(f, "strip"),
            AnsiMode::Parse => write!(f, "parse"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub mode: TerminalMode,
    pub ansi_mode: AnsiMode,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: TerminalMode::Cooked,
            ansi_mode: AnsiMode::Strip,
            read_timeout: Duration::from_millis(shell_constants::DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_secs(5),
            buffer_size: DEFAULT_BUFFER_LINES,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminalInfo {
    pub term: String,
    pub rows: u16,
    pub cols: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShellStatus {
    pub is_active: bool,
    pub current_dir: String,
    pub has_unread_output: bool,
    pub last_read_time: Option<DateTime<Utc>>,
    pub last_write_time: Option<DateTime<Utc>>,
    pub terminal_type: String,
    pub rows: u16,
    pub cols: u16,
    pub mode: String,
    pub ansi_mode: String,
    pub buffer_used: usize,
    pub buffer_total: usize,
    pub last_keepalive: Option<DateTime<Utc>>,
    pub keepalive_fails: u32,
}

#[derive(Default)]
struct ShellState {
    last_read: Option<DateTime<Utc>>,
    last_write: Option<DateTime<Utc>>,
    last_keepalive: Option<DateTime<Utc>>,
    keepalive_fails: u32,
    current_dir: String,
}

#[derive(Default)]
struct StopSenders {
    reader: Option<Sender<()>>,
    keepalive: Option<Sender<()>>,
    heartbeat: Option<Sender<()>>,
}

pub struct Shell {
    transport: Arc<Transport>,
    /// `None` once closed; the channel must be released under the
    /// transport lock, so teardown takes it out of the option.
    channel: Mutex<Option<Channel>>,
    config: ShellConfig,
    terminal: Mutex<TerminalInfo>,
    buffer: Arc<CircularBuffer>,
    capturer: Arc<TerminalCapturer>,
    state: Mutex<ShellState>,
    stops: Mutex<StopSenders>,
    active: AtomicBool,
    username: String,
}

static PROMPT_USER_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w-]+@[\w-]+:([~$/\w\-.{}]+)[$%#]").expect("prompt regex"));
static PROMPT_BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\w-]+@[\w-]+ ([~$/\w\-.{}]+)\][$%#]").expect("prompt regex"));
static PROMPT_BARE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([~$/\w\-.{}]+)[$%#]$").expect("prompt regex"));

/// Match the final line of a read against the known prompt shapes and pull
/// out the working directory. Observational only; no match is not an error.
fn extract_current_dir(output: &str, username: &str) -> Option<String> {
    let last_line = output.lines().last()?.trim();
    let captured = PROMPT_USER_HOST
        .captures(last_line)
        .or_else(|| PROMPT_BRACKETED.captures(last_line))
        .or_else(|| PROMPT_BARE_PATH.captures(last_line))?;
    let dir = captured.get(1)?.as_str();
    if dir == "~" {
        Some(format!("/home/{}", username))
    } else {
        Some(dir.to_string())
    }
}

fn pty_modes(mode: TerminalMode) -> PtyModes {
    let mut modes = PtyModes::new();
    match mode {
        TerminalMode::Cooked => {
            modes.set_boolean(PtyModeOpcode::ECHO, true);
            modes.set_u32(PtyModeOpcode::TTY_OP_ISPEED, shell_constants::TTY_SPEED);
            modes.set_u32(PtyModeOpcode::TTY_OP_OSPEED, shell_constants::TTY_SPEED);
        }
        TerminalMode::Raw => {
            modes.set_boolean(PtyModeOpcode::ECHO, false);
            modes.set_u32(PtyModeOpcode::TTY_OP_ISPEED, shell_constants::TTY_SPEED);
            modes.set_u32(PtyModeOpcode::TTY_OP_OSPEED, shell_constants::TTY_SPEED);
            // Let Ctrl-C and friends reach the remote program untouched.
            modes.set_character(PtyModeOpcode::VINTR, None);
            modes.set_character(PtyModeOpcode::VQUIT, None);
            modes.set_character(PtyModeOpcode::VERASE, None);
            modes.set_character(PtyModeOpcode::VKILL, None);
            modes.set_character(PtyModeOpcode::VEOF, None);
        }
    }
    modes
}

impl Shell {
    /// Open a PTY channel, start the login shell, and spawn the three
    /// background workers. Never blocks on remote output.
    pub fn create(
        transport: Arc<Transport>,
        username: &str,
        term: &str,
        rows: u16,
        cols: u16,
        config: ShellConfig,
    ) -> Result<Arc<Self>, ToolError> {
        let term = if term.is_empty() {
            shell_constants::DEFAULT_TERM
        } else {
            term
        };

        let channel = {
            let session = transport.lock();
            let mut channel = session.channel_session().map_err(ToolError::from)?;
            channel
                .handle_extended_data(ExtendedData::Merge)
                .map_err(ToolError::from)?;
            channel
                .request_pty(
                    term,
                    Some(pty_modes(config.mode)),
                    Some((cols as u32, rows as u32, 0, 0)),
                )
                .map_err(ToolError::from)?;
            channel.shell().map_err(ToolError::from)?;
            channel
        };

        let buffer_size = if config.buffer_size > 0 {
            config.buffer_size
        } else {
            DEFAULT_BUFFER_LINES
        };

        let (reader_tx, reader_rx) = mpsc::channel();
        let (keepalive_tx, keepalive_rx) = mpsc::channel();
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel();

        let shell = Arc::new(Self {
            transport,
            channel: Mutex::new(Some(channel)),
            config,
            terminal: Mutex::new(TerminalInfo {
                term: term.to_string(),
                rows,
                cols,
            }),
            buffer: Arc::new(CircularBuffer::new(buffer_size)),
            capturer: Arc::new(TerminalCapturer::new(cols, rows)),
            state: Mutex::new(ShellState {
                last_keepalive: Some(Utc::now()),
                ..Default::default()
            }),
            stops: Mutex::new(StopSenders {
                reader: Some(reader_tx),
                keepalive: Some(keepalive_tx),
                heartbeat: Some(heartbeat_tx),
            }),
            active: AtomicBool::new(true),
            username: username.to_string(),
        });

        let pump = shell.clone();
        std::thread::spawn(move || pump.run_stdout_pump(reader_rx));
        let keepalive = shell.clone();
        std::thread::spawn(move || keepalive.run_keepalive(keepalive_rx));
        let heartbeat = shell.clone();
        std::thread::spawn(move || heartbeat.run_heartbeat(heartbeat_rx));

        Ok(shell)
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn buffer(&self) -> &CircularBuffer {
        &self.buffer
    }

    pub fn capturer(&self) -> &TerminalCapturer {
        &self.capturer
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn mark_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Run a closure against the live channel, serialized on the transport.
    fn with_channel<T>(
        &self,
        f: impl FnOnce(&mut Channel) -> Result<T, ToolError>,
    ) -> Result<T, ToolError> {
        let mut guard = self.lock_channel();
        let channel = guard
            .as_mut()
            .ok_or_else(|| ToolError::transport("Shell channel is closed"))?;
        let session = self.transport.lock();
        let result = f(channel);
        drop(session);
        result
    }

    /// Write raw bytes to the remote stdin, in call order.
    pub fn write_input(&self, input: &[u8]) -> Result<(), ToolError> {
        self.with_channel(|channel| {
            channel
                .write_all(input)
                .map_err(|err| ToolError::transport(format!("Shell stdin write failed: {}", err)))?;
            channel.flush().ok();
            Ok(())
        })?;
        self.lock_state().last_write = Some(Utc::now());
        Ok(())
    }

    /// Map an enumerated key name to its byte sequence and send it.
    pub fn write_special_char(&self, name: &str) -> Result<(), ToolError> {
        let bytes: &[u8] = match name.to_lowercase().as_str() {
            "ctrl+c" | "sigint" => &[0x03],
            "ctrl+d" | "eof" => &[0x04],
            "ctrl+z" | "sigtstp" => &[0x1A],
            "ctrl+l" | "clear" => &[0x0C],
            "enter" | "return" => &[0x0D],
            "tab" => &[0x09],
            "esc" => &[0x1B],
            "up" => &[0x1B, 0x5B, 0x41],
            "down" => &[0x1B, 0x5B, 0x42],
            "right" => &[0x1B, 0x5B, 0x43],
            "left" => &[0x1B, 0x5B, 0x44],
            other => {
                return Err(ToolError::invalid_params(format!(
                    "Unsupported special character: {}",
                    other
                )))
            }
        };
        self.write_input(bytes)
    }

    /// Most recent `n` buffered lines, oldest first. Does not consume.
    pub fn read_latest_lines(&self, n: usize) -> Vec<String> {
        self.buffer.read_latest_lines(n)
    }

    /// Drain the unread window of the buffer.
    pub fn read_all_unread(&self) -> Vec<String> {
        self.buffer.read_all_unread()
    }

    /// Up to `n` bytes from the tail of the buffer.
    pub fn read_latest_bytes(&self, n: usize) -> String {
        self.buffer.read_latest_bytes(n)
    }

    /// Blocking drain: wait up to `timeout` for unread output, then return
    /// it with the configured ANSI handling applied.
    pub fn read_output(&self, timeout: Duration) -> Result<String, ToolError> {
        let timeout = if timeout.is_zero() {
            self.config.read_timeout
        } else {
            timeout
        };
        let deadline = Instant::now() + timeout;
        loop {
            let drained = self.read_output_nonblocking()?;
            if !drained.is_empty() {
                return Ok(drained);
            }
            if Instant::now() >= deadline {
                return Ok(String::new());
            }
            std::thread::sleep(Duration::from_millis(
                shell_constants::READ_POLL_MS.min(50),
            ));
        }
    }

    /// Non-blocking drain of whatever is unread right now.
    pub fn read_output_nonblocking(&self) -> Result<String, ToolError> {
        let lines = self.buffer.read_all_unread();
        let joined = lines.join("\n");
        let output = match self.config.ansi_mode {
            AnsiMode::Raw => joined,
            AnsiMode::Strip => strip_ansi_str(&joined),
            AnsiMode::Parse => {
                return Err(ToolError::invalid_params(
                    "ANSI mode 'parse' is reserved and not implemented",
                ))
            }
        };
        if !output.is_empty() {
            let mut state = self.lock_state();
            state.last_read = Some(Utc::now());
            if let Some(dir) = extract_current_dir(&output, &self.username) {
                state.current_dir = dir;
            }
        }
        Ok(output)
    }

    /// Rendered virtual screen, plain text.
    pub fn terminal_snapshot(&self) -> String {
        self.capturer.screen_snapshot()
    }

    /// Rendered virtual screen with minimal colour sequences.
    pub fn terminal_snapshot_with_color(&self) -> String {
        self.capturer.screen_snapshot_with_color()
    }

    pub fn cursor_position(&self) -> (u16, u16) {
        self.capturer.cursor_position()
    }

    pub fn terminal_size(&self) -> (u16, u16) {
        let terminal = self.lock_terminal();
        (terminal.cols, terminal.rows)
    }

    /// Send the window-change request and update the stored geometry.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), ToolError> {
        self.with_channel(|channel| {
            channel
                .request_pty_size(cols as u32, rows as u32, None, None)
                .map_err(ToolError::from)
        })?;
        {
            let mut terminal = self.lock_terminal();
            terminal.rows = rows;
            terminal.cols = cols;
        }
        self.capturer.resize(cols, rows);
        Ok(())
    }

    /// One-off liveness probe with a one-second bound.
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive_probe()
    }

    /// Point-in-time status. Fields are snapshotted under the shell locks,
    /// which are released before the liveness probe runs.
    pub fn status(&self) -> ShellStatus {
        let (current_dir, last_read, last_write, last_keepalive, keepalive_fails) = {
            let state = self.lock_state();
            (
                state.current_dir.clone(),
                state.last_read,
                state.last_write,
                state.last_keepalive,
                state.keepalive_fails,
            )
        };
        let (term, rows, cols) = {
            let terminal = self.lock_terminal();
            (terminal.term.clone(), terminal.rows, terminal.cols)
        };
        let buffer_used = self.buffer.len();
        let buffer_total = self.buffer.capacity();
        let was_active = self.is_active();

        // Probe outside every lock; it performs network I/O.
        let is_active = was_active && self.is_alive();

        ShellStatus {
            is_active,
            current_dir,
            has_unread_output: buffer_used > 0,
            last_read_time: last_read,
            last_write_time: last_write,
            terminal_type: term,
            rows,
            cols,
            mode: self.config.mode.to_string(),
            ansi_mode: self.config.ansi_mode.to_string(),
            buffer_used,
            buffer_total,
            last_keepalive,
            keepalive_fails,
        }
    }

    /// Idempotent shutdown: stop all three workers, close stdin and the
    /// channel, mark inactive. Safe under concurrent invocation.
    pub fn close(&self) {
        {
            let mut stops = self.lock_stops();
            // Dropping a sender ends its worker at the next receive.
            stops.reader.take();
            stops.keepalive.take();
            stops.heartbeat.take();
        }
        {
            let mut guard = self.lock_channel();
            if let Some(mut channel) = guard.take() {
                let session = self.transport.lock();
                let _ = channel.send_eof();
                let _ = channel.close();
                drop(channel);
                drop(session);
            }
        }
        self.mark_inactive();
    }

    // Worker #1: pump stdout into the capturer and the line buffer.
    fn run_stdout_pump(self: Arc<Self>, stop: Receiver<()>) {
        let mut buf = [0u8; shell_constants::READ_CHUNK_BYTES];
        let mut fragment = String::new();

        loop {
            match stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => return,
            }

            let read = {
                let mut guard = self.lock_channel();
                let Some(channel) = guard.as_mut() else {
                    // Closed from under us.
                    return;
                };
                let session = self.transport.lock();
                session.set_blocking(false);
                let read = channel.read(&mut buf);
                session.set_blocking(true);
                drop(session);
                read
            };

            match read {
                Ok(0) => {
                    self.mark_inactive();
                    return;
                }
                Ok(n) => {
                    let chunk = &buf[..n];
                    self.capturer.feed(chunk);

                    let text = String::from_utf8_lossy(chunk);
                    let combined = format!("{}{}", fragment, text);
                    let mut parts: Vec<&str> = combined.split('\n').collect();
                    // The final piece is an incomplete line; carry it over.
                    fragment = parts.pop().unwrap_or_default().to_string();
                    for line in parts {
                        self.buffer.write(line.trim_end_matches('\r'));
                    }

                    {
                        let mut state = self.lock_state();
                        state.last_read = Some(Utc::now());
                        let stripped = strip_ansi_str(&text);
                        if let Some(dir) = extract_current_dir(&stripped, &self.username) {
                            state.current_dir = dir;
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    match stop.recv_timeout(Duration::from_millis(shell_constants::READ_POLL_MS)) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => return,
                    }
                }
                Err(_) => {
                    self.mark_inactive();
                    return;
                }
            }
        }
    }

    // Worker #2: protocol keepalive every 30 s, three strikes and out.
    fn run_keepalive(self: Arc<Self>, stop: Receiver<()>) {
        let interval = Duration::from_secs(network::KEEPALIVE_INTERVAL_SECS);
        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            match self.transport.send_keepalive() {
                Ok(()) => {
                    let mut state = self.lock_state();
                    state.keepalive_fails = 0;
                    state.last_keepalive = Some(Utc::now());
                }
                Err(_) => {
                    let fails = {
                        let mut state = self.lock_state();
                        state.keepalive_fails += 1;
                        state.keepalive_fails
                    };
                    if fails >= network::KEEPALIVE_MAX_FAILS {
                        self.mark_inactive();
                        return;
                    }
                }
            }
        }
    }

    // Worker #3: invisible cursor save/restore every 60 s keeps NAT state
    // warm without touching the remote screen.
    fn run_heartbeat(self: Arc<Self>, stop: Receiver<()>) {
        let interval = Duration::from_secs(network::HEARTBEAT_INTERVAL_SECS);
        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            if self.write_input(shell_constants::HEARTBEAT_SEQUENCE).is_err() {
                self.mark_inactive();
                return;
            }
        }
    }

    fn lock_channel(&self) -> MutexGuard<'_, Option<Channel>> {
        self.channel.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_terminal(&self) -> MutexGuard<'_, TerminalInfo> {
        self.terminal.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_stops(&self) -> MutexGuard<'_, StopSenders> {
        self.stops.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        // The channel teardown must be serialized on the transport even if
        // the owner never called close.
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_interactive_programs() {
        assert!(is_interactive_program("htop"));
        assert!(is_interactive_program("sudo vim /etc/hosts"));
        assert!(!is_interactive_program("ls -la"));
    }

    #[test]
    fn extracts_dir_from_debian_prompt() {
        let out = "some output\nuser@web-01:/var/log$";
        assert_eq!(
            extract_current_dir(out, "user").as_deref(),
            Some("/var/log")
        );
    }

    #[test]
    fn extracts_dir_from_rhel_prompt() {
        let out = "[root@db-02 /etc]#";
        assert_eq!(extract_current_dir(out, "root").as_deref(), Some("/etc"));
    }

    #[test]
    fn extracts_dir_from_bare_prompt() {
        assert_eq!(
            extract_current_dir("/opt/app$", "deploy").as_deref(),
            Some("/opt/app")
        );
    }

    #[test]
    fn expands_tilde_to_user_home() {
        let out = "user@host:~$";
        assert_eq!(
            extract_current_dir(out, "user").as_deref(),
            Some("/home/user")
        );
    }

    #[test]
    fn unmatched_prompt_is_not_an_error() {
        assert!(extract_current_dir("no prompt here", "user").is_none());
        assert!(extract_current_dir("", "user").is_none());
    }

    #[test]
    fn modes_render_lowercase_labels() {
        assert_eq!(TerminalMode::Raw.to_string(), "raw");
        assert_eq!(TerminalMode::Cooked.to_string(), "cooked");
        assert_eq!(AnsiMode::Strip.to_string(), "strip");
        assert_eq!(AnsiMode::Parse.to_string(), "parse");
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = ShellConfig::default();
        assert_eq!(config.mode, TerminalMode::Cooked);
        assert_eq!(config.ansi_mode, AnsiMode::Strip);
        assert_eq!(config.buffer_size, 10_000);
    }
}
