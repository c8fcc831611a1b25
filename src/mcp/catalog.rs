//! The tool catalog: names, descriptions, and input schemas, with compiled
//! validators applied before dispatch.

use crate::errors::{ErrorCode, McpError};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDef {
    ToolDef {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn session_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "session_id": {"type": "string", "description": "Session ID or alias"}
        },
        "required": ["session_id"]
    })
}

static TOOL_CATALOG: Lazy<Vec<ToolDef>> = Lazy::new(|| {
    vec![
        tool(
            "ssh_connect",
            "Open an SSH session to a remote host. Accepts either explicit \
             connection details or the name of a saved host.",
            json!({
                "type": "object",
                "properties": {
                    "host": {"type": "string", "description": "Host address"},
                    "hostname": {"type": "string", "description": "Saved host name"},
                    "port": {"type": "integer"},
                    "username": {"type": "string"},
                    "auth_type": {
                        "type": "string",
                        "enum": ["password", "private_key", "keyboard", "agent"]
                    },
                    "password": {"type": "string"},
                    "private_key": {"type": "string", "description": "Key path or PEM text"},
                    "passphrase": {"type": "string"},
                    "sudo_password": {"type": "string"},
                    "alias": {"type": "string", "description": "Short session alias"}
                }
            }),
        ),
        tool(
            "ssh_disconnect",
            "Close a session by ID or alias.",
            session_only_schema(),
        ),
        tool(
            "ssh_list_sessions",
            "List all live sessions.",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "ssh_exec",
            "Run a one-shot command on a session.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "command": {"type": "string"},
                    "timeout": {"type": "number", "description": "Seconds; default 30"},
                    "working_dir": {"type": "string"}
                },
                "required": ["session_id", "command"]
            }),
        ),
        tool(
            "ssh_exec_batch",
            "Run a list of commands in sequence.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "commands": {"type": "array", "items": {"type": "string"}},
                    "stop_on_error": {"type": "boolean"},
                    "timeout": {"type": "number"},
                    "compact": {"type": "boolean"}
                },
                "required": ["session_id", "commands"]
            }),
        ),
        tool(
            "ssh_exec_script",
            "Run a multi-line script; blank lines and # comments are skipped.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "script": {"type": "string"},
                    "timeout": {"type": "number"}
                },
                "required": ["session_id", "script"]
            }),
        ),
        tool(
            "ssh_shell",
            "Start the interactive shell for a session (raw mode, background \
             buffered). Use ssh_write_input and ssh_read_output afterwards.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "rows": {"type": "integer"},
                    "cols": {"type": "integer"},
                    "working_dir": {"type": "string"}
                },
                "required": ["session_id"]
            }),
        ),
        tool(
            "ssh_write_input",
            "Write input or a special key to the interactive shell.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "input": {"type": "string"},
                    "special_char": {
                        "type": "string",
                        "enum": [
                            "ctrl+c", "sigint", "ctrl+d", "eof", "ctrl+z", "sigtstp",
                            "ctrl+l", "clear", "enter", "return", "tab", "esc",
                            "up", "down", "left", "right"
                        ]
                    }
                },
                "required": ["session_id"]
            }),
        ),
        tool(
            "ssh_read_output",
            "Read buffered shell output without blocking the shell.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "strategy": {
                        "type": "string",
                        "enum": ["latest_lines", "all_unread", "latest_bytes"]
                    },
                    "limit": {"type": "integer"}
                },
                "required": ["session_id"]
            }),
        ),
        tool(
            "ssh_resize_pty",
            "Resize the interactive shell's terminal.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "rows": {"type": "integer"},
                    "cols": {"type": "integer"}
                },
                "required": ["session_id", "rows", "cols"]
            }),
        ),
        tool(
            "ssh_terminal_snapshot",
            "Render the interactive shell's virtual screen (for curses apps).",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "with_color": {"type": "boolean"},
                    "include_cursor_info": {"type": "boolean"}
                },
                "required": ["session_id"]
            }),
        ),
        tool(
            "ssh_shell_status",
            "Status of the interactive shell: liveness, buffer, keepalives.",
            session_only_schema(),
        ),
        tool(
            "ssh_history",
            "Command history for a session.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "limit": {"type": "integer"},
                    "source": {"type": "string", "enum": ["exec", "shell"]}
                },
                "required": ["session_id"]
            }),
        ),
        tool(
            "sftp_upload",
            "Upload a local file or directory to the remote host.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "local_path": {"type": "string"},
                    "remote_path": {"type": "string"},
                    "create_dirs": {"type": "boolean"},
                    "overwrite": {"type": "boolean"}
                },
                "required": ["session_id", "local_path", "remote_path"]
            }),
        ),
        tool(
            "sftp_download",
            "Download a remote file or directory.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "remote_path": {"type": "string"},
                    "local_path": {"type": "string"},
                    "create_dirs": {"type": "boolean"},
                    "overwrite": {"type": "boolean"}
                },
                "required": ["session_id", "remote_path", "local_path"]
            }),
        ),
        tool(
            "sftp_list_dir",
            "List a remote directory.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "remote_path": {"type": "string"},
                    "recursive": {"type": "boolean"}
                },
                "required": ["session_id", "remote_path"]
            }),
        ),
        tool(
            "sftp_mkdir",
            "Create a remote directory.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "remote_path": {"type": "string"},
                    "recursive": {"type": "boolean"},
                    "mode": {"type": "integer"}
                },
                "required": ["session_id", "remote_path"]
            }),
        ),
        tool(
            "sftp_delete",
            "Delete a remote file or directory.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "remote_path": {"type": "string"},
                    "recursive": {"type": "boolean"}
                },
                "required": ["session_id", "remote_path"]
            }),
        ),
        tool(
            "ssh_list_hosts",
            "List saved host records.",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "ssh_save_host",
            "Save a named host record for later ssh_connect hostname=... use.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "host": {"type": "string"},
                    "port": {"type": "integer"},
                    "username": {"type": "string"},
                    "password": {"type": "string"},
                    "private_key_path": {"type": "string"},
                    "description": {"type": "string"}
                },
                "required": ["name", "host", "username"]
            }),
        ),
        tool(
            "ssh_remove_host",
            "Remove a saved host record.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"}
                },
                "required": ["name"]
            }),
        ),
    ]
});

static TOOL_VALIDATORS: Lazy<HashMap<String, JSONSchema>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for tool in TOOL_CATALOG.iter() {
        if let Ok(schema) = JSONSchema::compile(&tool.input_schema) {
            map.insert(tool.name.clone(), schema);
        }
    }
    map
});

pub fn tool_catalog() -> &'static Vec<ToolDef> {
    &TOOL_CATALOG
}

pub fn tool_by_name(name: &str) -> Option<&'static ToolDef> {
    TOOL_CATALOG.iter().find(|tool| tool.name == name)
}

pub fn validate_tool_args(tool_name: &str, args: &Value) -> Result<(), McpError> {
    let Some(schema) = TOOL_VALIDATORS.get(tool_name) else {
        return Ok(());
    };
    if let Err(errors) = schema.validate(args) {
        let rendered: Vec<String> = errors.take(5).map(|err| err.to_string()).collect();
        return Err(McpError::new(
            ErrorCode::InvalidParams,
            format!(
                "Invalid arguments for {}: {}",
                tool_name,
                rendered.join("; ")
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_has_unique_names() {
        let mut names: Vec<&str> = tool_catalog().iter().map(|t| t.name.as_str()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn every_tool_schema_compiles() {
        for tool in tool_catalog() {
            assert!(
                TOOL_VALIDATORS.contains_key(&tool.name),
                "schema for {} must compile",
                tool.name
            );
        }
    }

    #[test]
    fn validation_rejects_missing_required_fields() {
        let err = validate_tool_args("ssh_exec", &json!({"session_id": "s1"}));
        assert!(err.is_err());
        assert!(validate_tool_args(
            "ssh_exec",
            &json!({"session_id": "s1", "command": "uptime"})
        )
        .is_ok());
    }

    #[test]
    fn validation_rejects_bad_enum_values() {
        let err = validate_tool_args(
            "ssh_read_output",
            &json!({"session_id": "s1", "strategy": "bogus"}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn unknown_tool_passes_validation_for_dispatch_to_reject() {
        assert!(validate_tool_args("no_such_tool", &json!({})).is_ok());
    }
}
