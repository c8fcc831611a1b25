//! Saved-host CRUD tools.

use crate::config::HostRecord;
use crate::errors::ToolError;
use crate::managers::sessions::string_arg;
use crate::managers::ToolHandler;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::ssh::hosts::HostRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct HostManager {
    logger: Logger,
    validation: Validation,
    hosts: Arc<HostRegistry>,
}

impl HostManager {
    pub fn new(logger: Logger, validation: Validation, hosts: Arc<HostRegistry>) -> Self {
        Self {
            logger: logger.child("hosts"),
            validation,
            hosts,
        }
    }

    async fn list_hosts(&self) -> Result<String, ToolError> {
        let hosts = self.hosts.list_hosts();
        if hosts.is_empty() {
            return Ok(
                "No saved hosts configured.\nYou can save hosts using ssh_save_host.".to_string(),
            );
        }

        let mut out = format!("Saved hosts ({}):\n\n", hosts.len());
        for (name, record) in hosts {
            out.push_str(&format!("- {}:\n", name));
            out.push_str(&format!("  Host: {}:{}\n", record.host, record.port));
            out.push_str(&format!("  Username: {}\n", record.username));
            if let Some(description) = &record.description {
                out.push_str(&format!("  Description: {}\n", description));
            }
            if record.password.is_some() {
                out.push_str("  Auth: password\n");
            } else if let Some(path) = &record.private_key_path {
                out.push_str(&format!("  Auth: private_key ({})\n", path));
            }
            out.push('\n');
        }
        Ok(out)
    }

    async fn save_host(&self, args: &Value) -> Result<String, ToolError> {
        let name = self
            .validation
            .ensure_identifier(&self.required(args, "name")?, "name")?;
        let record = HostRecord {
            host: self.required(args, "host")?,
            port: args.get("port").and_then(|v| v.as_u64()).unwrap_or(0) as u16,
            username: self.required(args, "username")?,
            password: string_arg(args, "password"),
            private_key_path: string_arg(args, "private_key_path"),
            description: string_arg(args, "description"),
        };

        self.hosts.save_host(&name, record)?;
        self.logger
            .debug("saved host", Some(&serde_json::json!({"name": name})));
        Ok(format!(
            "Host '{}' saved successfully.\nYou can now connect using: hostname={}",
            name, name
        ))
    }

    async fn remove_host(&self, args: &Value) -> Result<String, ToolError> {
        let name = self.required(args, "name")?;
        self.hosts.remove_host(&name)?;
        Ok(format!("Host '{}' removed successfully", name))
    }

    fn required(&self, args: &Value, key: &str) -> Result<String, ToolError> {
        self.validation
            .ensure_string(args.get(key).unwrap_or(&Value::Null), key, true)
    }
}

#[async_trait]
impl ToolHandler for HostManager {
    async fn handle(&self, tool: &str, args: &Value) -> Result<String, ToolError> {
        match tool {
            "ssh_list_hosts" => self.list_hosts().await,
            "ssh_save_host" => self.save_host(args).await,
            "ssh_remove_host" => self.remove_host(args).await,
            other => Err(ToolError::not_found(format!("Unknown tool: {}", other))),
        }
    }
}
