use serde_json::json;
use sshmcp::mcp::catalog::{tool_by_name, tool_catalog, validate_tool_args};

const EXPECTED_TOOLS: &[&str] = &[
    "ssh_connect",
    "ssh_disconnect",
    "ssh_list_sessions",
    "ssh_exec",
    "ssh_exec_batch",
    "ssh_exec_script",
    "ssh_shell",
    "ssh_write_input",
    "ssh_read_output",
    "ssh_resize_pty",
    "ssh_terminal_snapshot",
    "ssh_shell_status",
    "ssh_history",
    "sftp_upload",
    "sftp_download",
    "sftp_list_dir",
    "sftp_mkdir",
    "sftp_delete",
    "ssh_list_hosts",
    "ssh_save_host",
    "ssh_remove_host",
];

#[test]
fn catalog_exposes_the_full_tool_surface() {
    for name in EXPECTED_TOOLS {
        assert!(
            tool_by_name(name).is_some(),
            "tool {} must be in the catalog",
            name
        );
    }
    assert_eq!(tool_catalog().len(), EXPECTED_TOOLS.len());
}

#[test]
fn every_tool_has_description_and_object_schema() {
    for tool in tool_catalog() {
        assert!(
            !tool.description.trim().is_empty(),
            "{} needs a description",
            tool.name
        );
        assert_eq!(
            tool.input_schema.get("type").and_then(|v| v.as_str()),
            Some("object"),
            "{} schema must be an object",
            tool.name
        );
    }
}

#[test]
fn connect_args_validate_loosely_but_exec_args_strictly() {
    assert!(validate_tool_args("ssh_connect", &json!({"host": "h", "username": "u"})).is_ok());
    assert!(validate_tool_args("ssh_exec", &json!({"session_id": "s1"})).is_err());
    assert!(validate_tool_args(
        "ssh_exec_batch",
        &json!({"session_id": "s1", "commands": ["true"]})
    )
    .is_ok());
}

#[test]
fn special_char_enum_rejects_unknown_keys() {
    let err = validate_tool_args(
        "ssh_write_input",
        &json!({"session_id": "s1", "special_char": "ctrl+q"}),
    );
    assert!(err.is_err());
    assert!(validate_tool_args(
        "ssh_write_input",
        &json!({"session_id": "s1", "special_char": "ctrl+c"}),
    )
    .is_ok());
}
