use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{PilotError, PilotResult};
use crate::mcp::protocol::{methods, CallToolParams, InitializeResult, JsonRpcRequest, ListToolsResult, McpTool};
use crate::mcp::transport::McpTransport;
use crate::tools::gateway::ToolExecutor;
use crate::tools::types::{ToolInvocation, ToolResult};

/// Agent-side handle to one out-of-process tool service.
pub struct McpClient {
    pub server_name: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, transport: Box<dyn McpTransport>) -> Self {
        Self {
            server_name: server_name.into(),
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    async fn request(&self, method: &str, params: Value) -> PilotResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.transport.send(JsonRpcRequest::new(id, method, params)).await?;
        if let Some(err) = response.error {
            return Err(PilotError::Mcp(format!(
                "{} rejected {method} ({}): {}",
                self.server_name, err.code, err.message
            )));
        }
        response
            .result
            .ok_or_else(|| PilotError::Mcp(format!("{} sent an empty {method} response", self.server_name)))
    }

    pub async fn initialize(&self) -> PilotResult<InitializeResult> {
        let result = self.request(methods::INITIALIZE, json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_tools(&self) -> PilotResult<Vec<McpTool>> {
        let result: ListToolsResult = serde_json::from_value(self.request(methods::LIST_TOOLS, json!({})).await?)?;
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> PilotResult<ToolResult> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.request(methods::CALL_TOOL, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ToolExecutor for McpClient {
    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let name = invocation.name();
        match self.call_tool(name.as_str(), invocation.arguments()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(server = %self.server_name, tool = %name, error = %e, "remote tool call failed");
                e.into()
            }
        }
    }

    async fn reset_session(&self) -> PilotResult<()> {
        self.request(methods::RESET_SESSION, json!({})).await.map(|_| ())
    }
}
