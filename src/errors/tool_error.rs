use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidParams,
    Denied,
    NotFound,
    Conflict,
    Timeout,
    Retryable,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ToolErrorKind::Timeout | ToolErrorKind::Retryable),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Denied, "DENIED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Conflict, "CONFLICT", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Retryable, "RETRYABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Denied, "QUOTA_EXCEEDED", message)
    }

    pub fn alias_in_use(alias: &str) -> Self {
        Self::new(
            ToolErrorKind::Conflict,
            "ALIAS_IN_USE",
            format!("Alias '{}' is attached to a healthy session", alias),
        )
        .with_hint("Disconnect the existing session or choose another alias.")
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Denied, "AUTH_FAILED", message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "TRANSPORT", message)
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            ToolErrorKind::NotFound,
            "SESSION_NOT_FOUND",
            format!("Session not found: {}", id),
        )
        .with_hint("Use ssh_list_sessions to see all active sessions.")
    }

    pub fn shell_not_started(id: &str) -> Self {
        Self::new(
            ToolErrorKind::InvalidParams,
            "SHELL_NOT_STARTED",
            format!("No active shell for session: {}", id),
        )
        .with_hint("Start an interactive shell first with ssh_shell.")
    }

    pub fn file_exists(path: &str) -> Self {
        Self::new(
            ToolErrorKind::Conflict,
            "FILE_EXISTS",
            format!("Destination already exists: {}", path),
        )
        .with_hint("Set overwrite=true to replace it.")
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, "CONFIG_INVALID", message)
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

impl From<ssh2::Error> for ToolError {
    fn from(err: ssh2::Error) -> Self {
        let io_err: std::io::Error = err.into();
        match io_err.kind() {
            std::io::ErrorKind::TimedOut => ToolError::timeout("SSH operation timed out"),
            std::io::ErrorKind::WouldBlock => ToolError::retryable("SSH operation would block"),
            _ => ToolError::transport(format!("SSH error: {}", io_err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_errors_are_retryable() {
        assert!(ToolError::timeout("t").retryable);
        assert!(!ToolError::invalid_params("p").retryable);
    }

    #[test]
    fn fabric_constructors_carry_codes() {
        assert_eq!(ToolError::quota("full").code, "QUOTA_EXCEEDED");
        assert_eq!(ToolError::alias_in_use("web").code, "ALIAS_IN_USE");
        assert_eq!(ToolError::session_not_found("x").code, "SESSION_NOT_FOUND");
        assert!(ToolError::shell_not_started("x").hint.is_some());
    }
}
