//! A live SSH session: transport, file channel, optional interactive shell,
//! and command history.

use crate::constants::session as session_constants;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::ssh::shell::Shell;
use crate::ssh::transport::{AuthConfig, Endpoint, Transport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Idle,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SessionState::Active => "active",
            SessionState::Idle => "idle",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", text)
    }
}

/// Where a history entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistorySource {
    Exec,
    Shell,
}

impl std::fmt::Display for HistorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistorySource::Exec => write!(f, "exec"),
            HistorySource::Shell => write!(f, "shell"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandHistoryEntry {
    pub command: String,
    pub exit_code: i32,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub source: HistorySource,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(value.as_millis())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .finish()
    }
}

pub struct Session {
    pub id: String,
    pub alias: String,
    endpoint: Endpoint,
    auth: AuthConfig,
    transport: Arc<Transport>,
    sftp: Mutex<Option<ssh2::Sftp>>,
    shell: Mutex<Option<Arc<Shell>>>,
    state: Mutex<SessionState>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    last_used_at: Mutex<DateTime<Utc>>,
    history: Mutex<VecDeque<CommandHistoryEntry>>,
    max_history: usize,
    logger: Logger,
}

impl Session {
    pub fn new(
        id: String,
        alias: String,
        endpoint: Endpoint,
        auth: AuthConfig,
        transport: Arc<Transport>,
        sftp: ssh2::Sftp,
        session_ttl: Duration,
        logger: Logger,
    ) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(session_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        Self {
            id,
            alias,
            endpoint,
            auth,
            transport,
            sftp: Mutex::new(Some(sftp)),
            shell: Mutex::new(None),
            state: Mutex::new(SessionState::Active),
            created_at: now,
            expires_at: now + ttl,
            last_used_at: Mutex::new(now),
            history: Mutex::new(VecDeque::new()),
            max_history: session_constants::MAX_HISTORY,
            logger,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        *lock(&self.last_used_at)
    }

    /// Stamp the session as just-used. Every tool call that resolves this
    /// session goes through here, so `last_used_at` advances monotonically.
    pub fn touch(&self) {
        *lock(&self.last_used_at) = Utc::now();
    }

    /// Run a closure against the persistent SFTP channel.
    pub fn with_sftp<T>(
        &self,
        f: impl FnOnce(&ssh2::Sftp) -> Result<T, ToolError>,
    ) -> Result<T, ToolError> {
        let guard = lock(&self.sftp);
        let sftp = guard
            .as_ref()
            .ok_or_else(|| ToolError::transport("SFTP channel is closed"))?;
        // Serialize against every other libssh2 call on this transport.
        let _session = self.transport.lock();
        f(sftp)
    }

    pub fn shell(&self) -> Option<Arc<Shell>> {
        lock(&self.shell).clone()
    }

    pub fn set_shell(&self, shell: Arc<Shell>) {
        *lock(&self.shell) = Some(shell);
    }

    pub fn record_history(&self, entry: CommandHistoryEntry) {
        let mut history = lock(&self.history);
        history.push_back(entry);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    pub fn history_snapshot(&self) -> Vec<CommandHistoryEntry> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Tear down owned resources leaf-first: file channel, shell, transport.
    /// Individual failures are logged and do not stop later steps. A closed
    /// session is never reopened.
    pub fn close(&self) {
        let taken = lock(&self.sftp).take();
        if let Some(sftp) = taken {
            // The SFTP shutdown handshake runs on drop; serialize it.
            let session = self.transport.lock();
            drop(sftp);
            drop(session);
            self.logger.debug("closed sftp channel", None);
        }
        if let Some(shell) = lock(&self.shell).take() {
            shell.close();
        }
        self.transport.disconnect();
        self.set_state(SessionState::Closed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Leaf-first teardown also guards the libssh2 drop paths; close is
        // idempotent so a reaped session costs nothing extra here.
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_source_renders_lowercase() {
        assert_eq!(HistorySource::Exec.to_string(), "exec");
        assert_eq!(HistorySource::Shell.to_string(), "shell");
    }

    #[test]
    fn session_state_renders_lowercase() {
        assert_eq!(SessionState::Active.to_string(), "active");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
