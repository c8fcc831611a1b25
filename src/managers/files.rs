//! SFTP file-transfer tools.

use crate::errors::ToolError;
use crate::managers::ToolHandler;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::ssh::registry::SessionRegistry;
use crate::ssh::session::Session;
use crate::utils::format::{format_bytes, format_duration};
use crate::utils::user_paths::expand_home_path;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct FileManager {
    logger: Logger,
    validation: Validation,
    registry: Arc<SessionRegistry>,
}

impl FileManager {
    pub fn new(logger: Logger, validation: Validation, registry: Arc<SessionRegistry>) -> Self {
        Self {
            logger: logger.child("sftp"),
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

    fn required(&self, args: &Value, key: &str) -> Result<String, ToolError> {
        self.validation
            .ensure_string(args.get(key).unwrap_or(&Value::Null), key, true)
    }

    async fn upload(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let local_path = expand_home_path(self.required(args, "local_path")?)
            .to_string_lossy()
            .to_string();
        let remote_path = self.required(args, "remote_path")?;
        let create_dirs = bool_arg(args, "create_dirs");
        let overwrite = bool_arg(args, "overwrite");

        self.logger.debug(
            "upload",
            Some(&serde_json::json!({"local": local_path, "remote": remote_path})),
        );

        let local_clone = local_path.clone();
        let remote_clone = remote_path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            session.upload_file(&local_clone, &remote_clone, create_dirs, overwrite)
        })
        .await
        .map_err(|_| ToolError::internal("Upload task failed"))??;

        let mut out = String::from("Upload successful:\n");
        out.push_str(&format!("  Status: {}\n", outcome.status));
        out.push_str(&format!("  Local: {}\n", local_path));
        out.push_str(&format!("  Remote: {}\n", remote_path));
        out.push_str(&format!("  Size: {}\n", outcome.human_size()));
        out.push_str(&format!(
            "  Transferred: {}\n",
            format_bytes(outcome.bytes_transferred as f64)
        ));
        out.push_str(&format!("  Progress: {:.1}%\n", outcome.progress));
        if let Some(speed) = &outcome.speed {
            out.push_str(&format!("  Speed: {}\n", speed));
        }
        out.push_str(&format!(
            "  Duration: {}\n",
            format_duration(outcome.duration)
        ));
        Ok(out)
    }

    async fn download(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let remote_path = self.required(args, "remote_path")?;
        let local_path = expand_home_path(self.required(args, "local_path")?)
            .to_string_lossy()
            .to_string();
        let create_dirs = bool_arg(args, "create_dirs");
        let overwrite = bool_arg(args, "overwrite");

        let remote_clone = remote_path.clone();
        let local_clone = local_path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            session.download_file(&remote_clone, &local_clone, create_dirs, overwrite)
        })
        .await
        .map_err(|_| ToolError::internal("Download task failed"))??;

        let mut out = String::from("Download successful:\n");
        out.push_str(&format!("  Status: {}\n", outcome.status));
        out.push_str(&format!("  Remote: {}\n", remote_path));
        out.push_str(&format!("  Local: {}\n", local_path));
        out.push_str(&format!("  Size: {}\n", outcome.human_size()));
        out.push_str(&format!(
            "  Transferred: {}\n",
            format_bytes(outcome.bytes_transferred as f64)
        ));
        out.push_str(&format!("  Progress: {:.1}%\n", outcome.progress));
        if let Some(speed) = &outcome.speed {
            out.push_str(&format!("  Speed: {}\n", speed));
        }
        out.push_str(&format!(
            "  Duration: {}\n",
            format_duration(outcome.duration)
        ));
        Ok(out)
    }

    async fn list_dir(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let remote_path = self.required(args, "remote_path")?;
        let recursive = bool_arg(args, "recursive");

        let remote_clone = remote_path.clone();
        let entries = tokio::task::spawn_blocking(move || {
            session.list_directory(&remote_clone, recursive)
        })
        .await
        .map_err(|_| ToolError::internal("List task failed"))??;

        let mut out = format!("Directory listing for: {}\n", remote_path);
        out.push_str(&format!("Total entries: {}\n\n", entries.len()));
        for entry in entries {
            out.push_str(&format!(
                "- {} ({}, {} bytes, {})\n",
                entry.name, entry.kind, entry.size, entry.mode
            ));
        }
        Ok(out)
    }

    async fn mkdir(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let remote_path = self.required(args, "remote_path")?;
        let recursive = bool_arg(args, "recursive");
        let mode = args
            .get("mode")
            .and_then(|v| v.as_i64())
            .filter(|v| *v > 0)
            .unwrap_or(0o755) as i32;

        let remote_clone = remote_path.clone();
        tokio::task::spawn_blocking(move || {
            session.make_directory(&remote_clone, recursive, mode)
        })
        .await
        .map_err(|_| ToolError::internal("Mkdir task failed"))??;

        Ok(format!("Directory created: {}", remote_path))
    }

    async fn delete(&self, args: &Value) -> Result<String, ToolError> {
        let session = self.resolve_session(args)?;
        let remote_path = self.required(args, "remote_path")?;
        let recursive = bool_arg(args, "recursive");

        let remote_clone = remote_path.clone();
        tokio::task::spawn_blocking(move || session.remove_path(&remote_clone, recursive))
            .await
            .map_err(|_| ToolError::internal("Delete task failed"))??;

        Ok(format!("Deleted: {}", remote_path))
    }
}

fn bool_arg(args: &Value, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[async_trait]
impl ToolHandler for FileManager {
    async fn handle(&self, tool: &str, args: &Value) -> Result<String, ToolError> {
        match tool {
            "sftp_upload" => self.upload(args).await,
            "sftp_download" => self.download(args).await,
            "sftp_list_dir" => self.list_dir(args).await,
            "sftp_mkdir" => self.mkdir(args).await,
            "sftp_delete" => self.delete(args).await,
            other => Err(ToolError::not_found(format!("Unknown tool: {}", other))),
        }
    }
}
