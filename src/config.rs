//! Configuration loading.
//!
//! Priority: explicit `-config PATH`, then `./.mcp.yaml`, `./.sshmcp.yaml`,
//! `~/.sshmcp.yaml`, and finally an auto-generated default at
//! `~/.sshmcp/config.yaml`. `SSHMCP_*` environment variables override
//! individual scalar fields after the file is parsed.

use crate::constants::{network, session as session_defaults};
use crate::errors::ToolError;
use crate::utils::fs_atomic::atomic_write_text_file;
use crate::utils::user_paths::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub ssh: SshSection,
    pub session: SessionSection,
    pub sftp: SftpSection,
    pub logging: LoggingSection,
    pub hosts: BTreeMap<String, HostRecord>,

    /// Path the config was loaded from; host mutations persist here.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub name: String,
    pub version: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "sshmcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub default_port: u16,
    pub timeout_secs: u64,
    pub keepalive_interval_secs: u64,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            default_port: network::SSH_DEFAULT_PORT,
            timeout_secs: network::CONNECT_TIMEOUT_SECS,
            keepalive_interval_secs: network::KEEPALIVE_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub max_sessions: usize,
    pub max_sessions_per_host: usize,
    pub idle_timeout_secs: u64,
    pub session_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_sessions: session_defaults::MAX_SESSIONS,
            max_sessions_per_host: session_defaults::MAX_SESSIONS_PER_HOST,
            idle_timeout_secs: session_defaults::IDLE_TIMEOUT_SECS,
            session_timeout_secs: session_defaults::SESSION_TIMEOUT_SECS,
            cleanup_interval_secs: session_defaults::CLEANUP_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SftpSection {
    pub max_file_size: u64,
    pub chunk_size: u64,
    pub transfer_timeout_secs: u64,
}

impl Default for SftpSection {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024,
            chunk_size: 4 * 1024 * 1024,
            transfer_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
    pub output: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "console".to_string(),
            output: "stderr".to_string(),
        }
    }
}

/// A named credential template for `ssh_connect hostname=...`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRecord {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Config {
    /// Load from the explicit path or the search order, auto-generating a
    /// default file on first run. A present-but-malformed file is fatal.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ToolError> {
        let path = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ToolError::config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => match Self::search_default_paths() {
                Some(found) => found,
                None => Self::generate_default_config()?,
            },
        };

        let raw = std::fs::read_to_string(&path)
            .map_err(|err| ToolError::config(format!("Failed to read config: {}", err)))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|err| ToolError::config(format!("Failed to parse config: {}", err)))?;
        config.source_path = Some(path);
        config.apply_env_overrides();
        Ok(config)
    }

    fn search_default_paths() -> Option<PathBuf> {
        let mut candidates = vec![PathBuf::from(".mcp.yaml"), PathBuf::from(".sshmcp.yaml")];
        if let Some(home) = home_dir() {
            candidates.push(home.join(".sshmcp.yaml"));
            candidates.push(home.join(".sshmcp").join("config.yaml"));
        }
        candidates.into_iter().find(|p| p.exists())
    }

    fn generate_default_config() -> Result<PathBuf, ToolError> {
        let home = home_dir()
            .ok_or_else(|| ToolError::config("HOME is not set; cannot create default config"))?;
        let path = home.join(".sshmcp").join("config.yaml");
        let rendered = serde_yaml::to_string(&Config::default())
            .map_err(|err| ToolError::config(format!("Failed to render default config: {}", err)))?;
        atomic_write_text_file(&path, &rendered, 0o600)
            .map_err(|err| ToolError::config(format!("Failed to write default config: {}", err)))?;
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        override_u16("SSHMCP_SSH_DEFAULT_PORT", &mut self.ssh.default_port);
        override_u64("SSHMCP_SSH_TIMEOUT_SECS", &mut self.ssh.timeout_secs);
        override_u64(
            "SSHMCP_SSH_KEEPALIVE_INTERVAL_SECS",
            &mut self.ssh.keepalive_interval_secs,
        );
        override_usize("SSHMCP_SESSION_MAX_SESSIONS", &mut self.session.max_sessions);
        override_usize(
            "SSHMCP_SESSION_MAX_SESSIONS_PER_HOST",
            &mut self.session.max_sessions_per_host,
        );
        override_u64(
            "SSHMCP_SESSION_IDLE_TIMEOUT_SECS",
            &mut self.session.idle_timeout_secs,
        );
        override_u64(
            "SSHMCP_SESSION_SESSION_TIMEOUT_SECS",
            &mut self.session.session_timeout_secs,
        );
        override_u64(
            "SSHMCP_SESSION_CLEANUP_INTERVAL_SECS",
            &mut self.session.cleanup_interval_secs,
        );
        override_u64("SSHMCP_SFTP_MAX_FILE_SIZE", &mut self.sftp.max_file_size);
        override_u64("SSHMCP_SFTP_CHUNK_SIZE", &mut self.sftp.chunk_size);
        if let Ok(level) = std::env::var("SSHMCP_LOGGING_LEVEL") {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
    }
}

fn override_u16(var: &str, slot: &mut u16) {
    if let Some(parsed) = std::env::var(var).ok().and_then(|v| v.parse().ok()) {
        *slot = parsed;
    }
}

fn override_u64(var: &str, slot: &mut u64) {
    if let Some(parsed) = std::env::var(var).ok().and_then(|v| v.parse().ok()) {
        *slot = parsed;
    }
}

fn override_usize(var: &str, slot: &mut usize) {
    if let Some(parsed) = std::env::var(var).ok().and_then(|v| v.parse().ok()) {
        *slot = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.ssh.default_port, 22);
        assert_eq!(config.session.max_sessions, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let raw = "session:\n  max_sessions: 5\nhosts:\n  web:\n    host: 10.0.0.1\n    port: 22\n    username: deploy\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.session.max_sessions, 5);
        assert_eq!(config.session.max_sessions_per_host, 10);
        assert_eq!(config.hosts["web"].username, "deploy");
    }

    #[test]
    fn host_record_omits_empty_credentials() {
        let record = HostRecord {
            host: "h".to_string(),
            port: 22,
            username: "u".to_string(),
            ..Default::default()
        };
        let rendered = serde_yaml::to_string(&record).unwrap();
        assert!(!rendered.contains("password"));
        assert!(!rendered.contains("private_key_path"));
    }
}
