//! JSON-RPC tool server over stdio.

use crate::app::App;
use crate::errors::{ErrorCode, McpError, ToolError};
use crate::mcp::catalog::{tool_catalog, validate_tool_args};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// One incoming request line. Notifications arrive without an id and never
/// get a reply; everything else is answered through [`Reply`].
#[derive(Debug, Deserialize)]
struct Inbound {
    #[allow(dead_code)]
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

impl Inbound {
    fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.starts_with("notifications/")
    }

    /// The reply slot for this request, or `None` for id-less requests
    /// that must stay unanswered.
    fn reply(&self) -> Option<Reply> {
        self.id.clone().map(Reply)
    }

    fn tool_call(&self) -> (&str, Value) {
        let params = self.params.as_object();
        let name = params
            .and_then(|map| map.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let args = params
            .and_then(|map| map.get("arguments"))
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        (name, args)
    }
}

/// The id of a request that expects an answer.
struct Reply(Value);

impl Reply {
    fn ok(self, result: Value) -> Outbound {
        Outbound {
            jsonrpc: "2.0",
            id: self.0,
            result: Some(result),
            error: None,
        }
    }

    fn err(self, code: ErrorCode, message: impl Into<String>) -> Outbound {
        Outbound {
            jsonrpc: "2.0",
            id: self.0,
            result: None,
            error: Some(WireError {
                code: code.as_i32(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct Outbound {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

#[derive(Debug, Serialize)]
struct WireError {
    code: i32,
    message: String,
}

pub struct McpServer {
    app: Arc<App>,
}

impl McpServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    async fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"list": true, "call": true}},
            "serverInfo": {
                "name": self.app.config.server.name,
                "version": self.app.config.server.version,
            },
        })
    }

    async fn handle_tools_list(&self) -> Value {
        serde_json::json!({ "tools": tool_catalog() })
    }

    async fn handle_tools_call(&self, name: &str, args: Value) -> Result<Value, McpError> {
        validate_tool_args(name, &args)?;

        if !self.app.router.has_tool(name) {
            return Err(McpError::new(
                ErrorCode::InvalidRequest,
                format!("Unknown tool: {}", name),
            ));
        }

        self.app
            .logger
            .debug("tools/call", Some(&serde_json::json!({"tool": name})));

        // Tool failures travel as is_error results, not JSON-RPC errors, so
        // the model can read them.
        let (text, is_error) = match self.app.router.dispatch(name, &args).await {
            Ok(text) => (text, false),
            Err(err) => (render_tool_error(&err), true),
        };

        Ok(serde_json::json!({
            "content": [{"type": "text", "text": text}],
            "isError": is_error,
        }))
    }

    /// Route one decoded request to its handler. `None` means no reply is
    /// owed (a notification, or an id-less request).
    async fn handle_request(&self, request: Inbound) -> Option<Outbound> {
        if request.is_notification() {
            return None;
        }
        let reply = request.reply()?;

        match request.method.as_str() {
            // Some clients send the initialized notification with an id;
            // answer it with an empty object rather than dropping it.
            "notifications/initialized" => Some(reply.ok(serde_json::json!({}))),
            "initialize" => Some(reply.ok(self.handle_initialize().await)),
            "tools/list" => Some(reply.ok(self.handle_tools_list().await)),
            "tools/call" => {
                let (name, args) = request.tool_call();
                if name.is_empty() {
                    return Some(reply.err(ErrorCode::InvalidParams, "Missing tool name"));
                }
                Some(match self.handle_tools_call(name, args).await {
                    Ok(result) => reply.ok(result),
                    Err(err) => reply.err(err.code, err.message),
                })
            }
            _ => Some(reply.err(ErrorCode::MethodNotFound, "Method not found")),
        }
    }

    /// Serve newline-delimited JSON-RPC until stdin closes.
    pub async fn run_stdio(&self) -> Result<(), ToolError> {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin).lines();
        let mut writer = BufWriter::new(stdout);

        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|err| ToolError::internal(err.to_string()))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Inbound>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(_) => {
                    // Valid JSON of the wrong shape is an invalid request;
                    // anything else never parsed at all.
                    let (code, message) = if serde_json::from_str::<Value>(trimmed).is_ok() {
                        (ErrorCode::InvalidRequest, "Invalid request")
                    } else {
                        (ErrorCode::ParseError, "Parse error")
                    };
                    Some(Reply(Value::Null).err(code, message))
                }
            };

            if let Some(response) = response {
                write_response(&mut writer, &response).await?;
            }
        }

        Ok(())
    }
}

async fn write_response(
    writer: &mut BufWriter<tokio::io::Stdout>,
    response: &Outbound,
) -> Result<(), ToolError> {
    let payload = serde_json::to_string(response).unwrap_or_default();
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

fn render_tool_error(err: &ToolError) -> String {
    let mut out = format!("Error ({}): {}", err.code, err.message);
    if let Some(hint) = &err.hint {
        out.push_str(&format!("\nHint: {}", hint));
    }
    if let Some(details) = &err.details {
        out.push_str(&format!("\nDetails: {}", details));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_rendering_includes_code_and_hint() {
        let err = ToolError::session_not_found("abc");
        let rendered = render_tool_error(&err);
        assert!(rendered.contains("SESSION_NOT_FOUND"));
        assert!(rendered.contains("Hint:"));
    }

    #[test]
    fn id_less_notification_owes_no_reply() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized","params":{}}"#;
        let parsed: Inbound = serde_json::from_str(raw).expect("must parse");
        assert!(parsed.is_notification());
        assert!(parsed.reply().is_none());
    }

    #[test]
    fn request_with_id_gets_a_reply_slot() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#;
        let parsed: Inbound = serde_json::from_str(raw).expect("must parse");
        assert!(!parsed.is_notification());
        let reply = parsed.reply().expect("id means a reply is owed");
        let out = reply.ok(serde_json::json!({"tools": []}));
        let rendered = serde_json::to_string(&out).expect("serialize");
        assert!(rendered.contains(r#""id":1"#));
        assert!(!rendered.contains("error"));
    }

    #[test]
    fn tool_call_params_decode_with_defaults() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"ssh_exec"}}"#;
        let parsed: Inbound = serde_json::from_str(raw).expect("must parse");
        let (name, args) = parsed.tool_call();
        assert_eq!(name, "ssh_exec");
        assert!(args.as_object().map(|m| m.is_empty()).unwrap_or(false));
    }

    #[test]
    fn error_replies_skip_the_result_field() {
        let out = Reply(serde_json::json!(3)).err(ErrorCode::MethodNotFound, "Method not found");
        let rendered = serde_json::to_string(&out).expect("serialize");
        assert!(rendered.contains("-32601"));
        assert!(!rendered.contains("result"));
    }
}
