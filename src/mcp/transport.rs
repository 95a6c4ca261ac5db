use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Carries one request to a tool service and returns its matching response.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn send(&self, request: JsonRpcRequest) -> PilotResult<JsonRpcResponse>;
}
