//! Named host records persisted in the configuration file.

use crate::config::HostRecord;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::fs_atomic::atomic_write_text_file;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

pub struct HostRegistry {
    hosts: RwLock<BTreeMap<String, HostRecord>>,
    config_path: Option<PathBuf>,
    logger: Logger,
}

impl HostRegistry {
    pub fn new(
        hosts: BTreeMap<String, HostRecord>,
        config_path: Option<PathBuf>,
        logger: Logger,
    ) -> Self {
        Self {
            hosts: RwLock::new(hosts),
            config_path,
            logger: logger.child("hosts"),
        }
    }

    pub fn list_hosts(&self) -> BTreeMap<String, HostRecord> {
        self.read().clone()
    }

    pub fn get_host(&self, name: &str) -> Result<HostRecord, ToolError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                ToolError::not_found(format!("Host '{}' not found", name))
                    .with_hint("Use ssh_list_hosts to see saved hosts.")
            })
    }

    pub fn host_exists(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Validate and store a record, then rewrite the config file. On a
    /// persist failure the in-memory insert is rolled back.
    pub fn save_host(&self, name: &str, mut record: HostRecord) -> Result<(), ToolError> {
        if record.host.trim().is_empty() {
            return Err(ToolError::invalid_params("Host address cannot be empty"));
        }
        if record.username.trim().is_empty() {
            return Err(ToolError::invalid_params("Username cannot be empty"));
        }
        if record.port == 0 {
            record.port = 22;
        }

        {
            let mut hosts = self.write();
            if hosts.contains_key(name) {
                return Err(ToolError::conflict(format!(
                    "Host '{}' already exists",
                    name
                ))
                .with_hint("Use a different name or remove the existing host first."));
            }
            hosts.insert(name.to_string(), record.clone());

            if let Err(err) = self.persist(&hosts) {
                hosts.remove(name);
                return Err(err);
            }
        }

        self.logger.info(
            "saved host",
            Some(&serde_json::json!({
                "name": name,
                "host": record.host,
                "port": record.port,
                "username": record.username,
            })),
        );
        Ok(())
    }

    /// Remove a record and rewrite the config file, rolling back on failure.
    pub fn remove_host(&self, name: &str) -> Result<(), ToolError> {
        {
            let mut hosts = self.write();
            let Some(removed) = hosts.remove(name) else {
                return Err(ToolError::not_found(format!("Host '{}' not found", name)));
            };

            if let Err(err) = self.persist(&hosts) {
                hosts.insert(name.to_string(), removed);
                return Err(err);
            }
        }

        self.logger
            .info("removed host", Some(&serde_json::json!({"name": name})));
        Ok(())
    }

    /// Rewrite the `hosts:` section of the config file, leaving every other
    /// section as it is on disk.
    fn persist(&self, hosts: &BTreeMap<String, HostRecord>) -> Result<(), ToolError> {
        let Some(path) = &self.config_path else {
            return Err(ToolError::config(
                "Config path not set, cannot persist hosts",
            ));
        };

        let raw = std::fs::read_to_string(path)
            .map_err(|err| ToolError::config(format!("Read config file: {}", err)))?;
        let mut document: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|err| ToolError::config(format!("Parse config file: {}", err)))?;

        let hosts_value = serde_yaml::to_value(hosts)
            .map_err(|err| ToolError::internal(format!("Render hosts: {}", err)))?;
        match &mut document {
            serde_yaml::Value::Mapping(map) => {
                map.insert(serde_yaml::Value::from("hosts"), hosts_value);
            }
            _ => {
                return Err(ToolError::config("Config file root must be a mapping"));
            }
        }

        let rendered = serde_yaml::to_string(&document)
            .map_err(|err| ToolError::internal(format!("Render config: {}", err)))?;
        atomic_write_text_file(path, &rendered, 0o600)
            .map_err(|err| ToolError::internal(format!("Write config file: {}", err)))?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, HostRecord>> {
        self.hosts.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, HostRecord>> {
        self.hosts.write().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::logger::{LogLevel, Logger};

    fn registry_without_file() -> HostRegistry {
        HostRegistry::new(
            BTreeMap::new(),
            None,
            Logger::with_level("test", LogLevel::Error),
        )
    }

    fn record() -> HostRecord {
        HostRecord {
            host: "10.0.0.5".to_string(),
            port: 0,
            username: "deploy".to_string(),
            password: Some("secret".to_string()),
            private_key_path: None,
            description: Some("staging box".to_string()),
        }
    }

    #[test]
    fn save_requires_host_and_username() {
        let registry = registry_without_file();
        let mut bad = record();
        bad.host = " ".to_string();
        assert!(registry.save_host("x", bad).is_err());

        let mut bad = record();
        bad.username = String::new();
        assert!(registry.save_host("x", bad).is_err());
    }

    #[test]
    fn save_without_config_path_rolls_back() {
        let registry = registry_without_file();
        let err = registry.save_host("staging", record()).unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");
        assert!(!registry.host_exists("staging"));
    }

    #[test]
    fn get_missing_host_is_not_found() {
        let registry = registry_without_file();
        assert_eq!(registry.get_host("nope").unwrap_err().code, "NOT_FOUND");
    }
}
