//! Application wiring: config, logger, registries, managers, router.

use crate::config::Config;
use crate::errors::ToolError;
use crate::managers::files::FileManager;
use crate::managers::hosts::HostManager;
use crate::managers::sessions::SessionManager;
use crate::managers::shell::ShellManager;
use crate::managers::ToolRouter;
use crate::mcp::catalog::tool_catalog;
use crate::services::logger::{LogLevel, Logger};
use crate::services::validation::Validation;
use crate::ssh::hosts::HostRegistry;
use crate::ssh::registry::{RegistryConfig, SessionRegistry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    pub config: Config,
    pub logger: Logger,
    pub registry: Arc<SessionRegistry>,
    pub hosts: Arc<HostRegistry>,
    pub router: ToolRouter,
}

impl App {
    pub fn initialize(config_path: Option<&Path>) -> Result<Self, ToolError> {
        let config = Config::load(config_path)?;
        let logger = Logger::with_level("sshmcp", LogLevel::parse(&config.logging.level));
        let validation = Validation::new();

        let registry_config = RegistryConfig {
            max_sessions: config.session.max_sessions,
            max_sessions_per_host: config.session.max_sessions_per_host,
            session_timeout: Duration::from_secs(config.session.session_timeout_secs),
            idle_timeout: Duration::from_secs(config.session.idle_timeout_secs),
            cleanup_interval: Duration::from_secs(config.session.cleanup_interval_secs),
            connect_timeout: Duration::from_secs(config.ssh.timeout_secs),
            keepalive_interval_secs: config.ssh.keepalive_interval_secs,
        };
        let registry = SessionRegistry::new(registry_config, logger.clone());
        let hosts = Arc::new(HostRegistry::new(
            config.hosts.clone(),
            config.source_path.clone(),
            logger.clone(),
        ));

        let session_manager = Arc::new(SessionManager::new(
            logger.clone(),
            validation.clone(),
            registry.clone(),
            hosts.clone(),
            &config,
        ));
        let shell_manager = Arc::new(ShellManager::new(
            logger.clone(),
            validation.clone(),
            registry.clone(),
        ));
        let file_manager = Arc::new(FileManager::new(
            logger.clone(),
            validation.clone(),
            registry.clone(),
        ));
        let host_manager = Arc::new(HostManager::new(
            logger.clone(),
            validation,
            hosts.clone(),
        ));

        let mut router = ToolRouter::new();
        router.register(
            &[
                "ssh_connect",
                "ssh_disconnect",
                "ssh_list_sessions",
                "ssh_exec",
                "ssh_exec_batch",
                "ssh_exec_script",
                "ssh_history",
            ],
            session_manager,
        );
        router.register(
            &[
                "ssh_shell",
                "ssh_write_input",
                "ssh_read_output",
                "ssh_resize_pty",
                "ssh_terminal_snapshot",
                "ssh_shell_status",
            ],
            shell_manager,
        );
        router.register(
            &[
                "sftp_upload",
                "sftp_download",
                "sftp_list_dir",
                "sftp_mkdir",
                "sftp_delete",
            ],
            file_manager,
        );
        router.register(
            &["ssh_list_hosts", "ssh_save_host", "ssh_remove_host"],
            host_manager,
        );

        Self::validate_tool_wiring(&router)?;

        Ok(Self {
            config,
            logger,
            registry,
            hosts,
            router,
        })
    }

    /// Every catalog entry must be routable; a mismatch is a wiring bug.
    fn validate_tool_wiring(router: &ToolRouter) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !router.has_tool(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_details(serde_json::json!({ "missing_tools": missing })))
    }

    /// Close the registry (reaper and all sessions).
    pub async fn shutdown(&self) {
        self.logger.info("shutting down", None);
        self.registry.close().await;
    }
}
