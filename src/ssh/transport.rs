//! Authenticated SSH transport with TCP and protocol keepalive.
//!
//! One libssh2 session backs every channel of a fabric session. libssh2
//! serializes nothing itself, so all access (channels and SFTP included)
//! goes through [`Transport::lock`]. Holders must not sleep while holding
//! the guard; polling loops toggle non-blocking mode and sleep outside it.

use crate::constants::network;
use crate::errors::ToolError;
use crate::utils::user_paths::expand_home_path;
use socket2::{SockRef, TcpKeepalive};
use ssh2::{KeyboardInteractivePrompt, MethodType, Prompt, Session};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Remote endpoint identity.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// How to authenticate, plus the optional sudo password retained for
/// command rewriting.
#[derive(Clone)]
pub struct AuthConfig {
    pub method: AuthMethod,
    pub sudo_password: Option<String>,
}

#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    PrivateKey {
        /// Path to a key file, or the PEM text itself.
        key: String,
        passphrase: Option<String>,
    },
    /// Every prompt is answered with the supplied password.
    KeyboardInteractive(String),
    Agent,
}

impl AuthMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PrivateKey { .. } => "private_key",
            AuthMethod::KeyboardInteractive(_) => "keyboard",
            AuthMethod::Agent => "agent",
        }
    }
}

pub struct Transport {
    endpoint: Endpoint,
    session: Mutex<Session>,
}

struct PasswordPrompter {
    password: String,
}

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[Prompt<'_>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

impl Transport {
    /// Open an authenticated transport. The server's host key is accepted
    /// without verification; a production deployment must pin or validate it.
    pub fn connect(
        endpoint: Endpoint,
        auth: &AuthConfig,
        timeout: Duration,
        keepalive_interval_secs: u64,
    ) -> Result<Self, ToolError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let resolved = addr
            .to_socket_addrs()
            .map_err(|err| ToolError::transport(format!("Failed to resolve {}: {}", addr, err)))?
            .next()
            .ok_or_else(|| ToolError::transport(format!("No address for {}", addr)))?;
        let tcp = TcpStream::connect_timeout(&resolved, timeout)
            .map_err(|err| ToolError::transport(format!("Failed to connect {}: {}", addr, err)))?;
        tcp.set_nodelay(true).ok();

        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(
            keepalive_interval_secs.max(1),
        ));
        SockRef::from(&tcp)
            .set_tcp_keepalive(&keepalive)
            .map_err(|err| ToolError::transport(format!("Failed to set TCP keepalive: {}", err)))?;

        let mut session = Session::new()
            .map_err(|_| ToolError::transport("Failed to create SSH session"))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session
            .method_pref(MethodType::Kex, network::KEX_ALGORITHMS)
            .map_err(ToolError::from)?;
        session
            .method_pref(MethodType::CryptCs, network::CIPHERS)
            .map_err(ToolError::from)?;
        session
            .method_pref(MethodType::CryptSc, network::CIPHERS)
            .map_err(ToolError::from)?;
        session.handshake().map_err(|err| {
            ToolError::transport(format!("SSH handshake with {} failed: {}", addr, err))
        })?;

        authenticate(&session, &endpoint.username, auth)?;
        if !session.authenticated() {
            return Err(ToolError::auth("SSH authentication failed"));
        }

        let interval = keepalive_interval_secs.max(1) as u32;
        session.set_keepalive(true, interval);

        Ok(Self {
            endpoint,
            session: Mutex::new(session),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Serialize access to the libssh2 session. Keep holds short.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Health-check probe: try to allocate (and immediately release) a
    /// subordinate channel. The channel never leaves the lock.
    pub fn health_check(&self) -> bool {
        let session = self.lock();
        match session.channel_session() {
            Ok(mut channel) => {
                let _ = channel.close();
                drop(channel);
                true
            }
            Err(_) => false,
        }
    }

    /// Open an SFTP channel on this transport.
    pub fn open_sftp(&self) -> Result<ssh2::Sftp, ToolError> {
        let session = self.lock();
        session.sftp().map_err(ToolError::from)
    }

    /// Protocol-level global keepalive request.
    pub fn send_keepalive(&self) -> Result<(), ToolError> {
        let session = self.lock();
        session.keepalive_send().map_err(ToolError::from)?;
        Ok(())
    }

    /// One-off liveness probe bounded to one second.
    pub fn is_alive_probe(&self) -> bool {
        let session = self.lock();
        let previous = session.timeout();
        session.set_timeout(network::ALIVE_PROBE_TIMEOUT_MS);
        let alive = session.keepalive_send().is_ok();
        session.set_timeout(previous);
        alive
    }

    /// Run a trivial remote command to prove the transport works end to end.
    pub fn test_connection(&self) -> Result<(), ToolError> {
        let session = self.lock();
        let mut channel = session.channel_session().map_err(ToolError::from)?;
        channel.exec("true").map_err(ToolError::from)?;
        let mut sink = String::new();
        let _ = channel.read_to_string(&mut sink);
        channel.wait_close().ok();
        let status = channel.exit_status().unwrap_or(-1);
        if status != 0 {
            return Err(ToolError::transport(format!(
                "Connection test exited with status {}",
                status
            )));
        }
        Ok(())
    }

    /// Politely disconnect the underlying session.
    pub fn disconnect(&self) {
        let session = self.lock();
        let _ = session.disconnect(None, "closing session", None);
    }
}

fn authenticate(session: &Session, username: &str, auth: &AuthConfig) -> Result<(), ToolError> {
    match &auth.method {
        AuthMethod::Password(password) => session
            .userauth_password(username, password)
            .map_err(|err| ToolError::auth(format!("Password authentication failed: {}", err))),
        AuthMethod::PrivateKey { key, passphrase } => {
            let path = expand_home_path(key);
            if path.is_file() {
                session
                    .userauth_pubkey_file(username, None, &path, passphrase.as_deref())
                    .map_err(|err| {
                        ToolError::auth(format!("Private key authentication failed: {}", err))
                    })
            } else {
                session
                    .userauth_pubkey_memory(username, None, key, passphrase.as_deref())
                    .map_err(|err| {
                        ToolError::auth(format!("Private key authentication failed: {}", err))
                    })
            }
        }
        AuthMethod::KeyboardInteractive(password) => {
            let mut prompter = PasswordPrompter {
                password: password.clone(),
            };
            session
                .userauth_keyboard_interactive(username, &mut prompter)
                .map_err(|err| {
                    ToolError::auth(format!("Keyboard-interactive authentication failed: {}", err))
                })
        }
        AuthMethod::Agent => Err(ToolError::auth(
            "SSH agent authentication is not implemented; use password or private_key",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_method_kinds() {
        assert_eq!(AuthMethod::Password("x".into()).kind(), "password");
        assert_eq!(
            AuthMethod::PrivateKey {
                key: "k".into(),
                passphrase: None
            }
            .kind(),
            "private_key"
        );
        assert_eq!(AuthMethod::Agent.kind(), "agent");
    }

    #[test]
    fn connect_to_unreachable_host_is_a_transport_error() {
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "nobody".to_string(),
        };
        let auth = AuthConfig {
            method: AuthMethod::Password("pw".to_string()),
            sudo_password: None,
        };
        let err = Transport::connect(endpoint, &auth, Duration::from_millis(200), 30)
            .err()
            .expect("connect must fail");
        assert_eq!(err.code, "TRANSPORT");
    }
}
