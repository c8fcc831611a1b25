//! Tool handlers: argument decoding, fabric calls, human-readable results.

pub mod files;
pub mod hosts;
pub mod sessions;
pub mod shell;

use crate::errors::ToolError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A manager that serves a subset of the tool catalog.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, tool: &str, args: &Value) -> Result<String, ToolError>;
}

/// Tool-name to manager dispatch table.
pub struct ToolRouter {
    handlers: HashMap<&'static str, Arc<dyn ToolHandler>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, tools: &[&'static str], handler: Arc<dyn ToolHandler>) {
        for tool in tools {
            self.handlers.insert(tool, handler.clone());
        }
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.handlers.contains_key(tool)
    }

    pub async fn dispatch(&self, tool: &str, args: &Value) -> Result<String, ToolError> {
        let handler = self
            .handlers
            .get(tool)
            .ok_or_else(|| ToolError::not_found(format!("Unknown tool: {}", tool)))?;
        handler.handle(tool, args).await
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}
