use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::errors::PilotResult;
use crate::mcp::protocol::{
    codes, methods, CallToolParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool,
    JSONRPC_VERSION, PROTOCOL_VERSION,
};
use crate::tools::gateway::{ProtocolGateway, ToolExecutor};
use crate::tools::registry::ToolRegistry;
use crate::tools::types::{ServiceKind, ToolCallRequest};

/// Hosts one tool service behind line-delimited JSON-RPC. Arguments are
/// validated again here, whatever the caller already checked.
pub struct ToolServer {
    name: String,
    service: ServiceKind,
    gateway: ProtocolGateway,
}

impl ToolServer {
    pub fn new(service: ServiceKind, executor: Arc<dyn ToolExecutor>) -> Self {
        let registry = Arc::new(ToolRegistry::for_services(&[service]));
        Self {
            name: format!("deskpilot-{}", service_label(service)),
            service,
            gateway: ProtocolGateway::new(registry).route(service, executor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::fail(id, codes::INVALID_REQUEST, "jsonrpc must be \"2.0\"");
        }
        match request.method.as_str() {
            methods::INITIALIZE => self.reply(
                id,
                InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    server_name: self.name.clone(),
                    service: self.service,
                },
            ),
            methods::LIST_TOOLS => {
                let tools = self.gateway.tool_defs().into_iter().map(McpTool::from).collect();
                self.reply(id, ListToolsResult { tools })
            }
            methods::CALL_TOOL => {
                let params: CallToolParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => return JsonRpcResponse::fail(id, codes::INVALID_PARAMS, e.to_string()),
                };
                let call = ToolCallRequest {
                    id: id.to_string(),
                    name: params.name,
                    arguments: params.arguments,
                };
                let result = self.gateway.dispatch(&call).await;
                self.reply(id, result)
            }
            methods::RESET_SESSION => match self.gateway.begin_session().await {
                Ok(()) => JsonRpcResponse::ok(id, json!({})),
                Err(e) => JsonRpcResponse::fail(id, codes::INTERNAL_ERROR, e.to_string()),
            },
            other => JsonRpcResponse::fail(id, codes::METHOD_NOT_FOUND, format!("unknown method `{other}`")),
        }
    }

    fn reply(&self, id: Value, body: impl serde::Serialize) -> JsonRpcResponse {
        match serde_json::to_value(body) {
            Ok(v) => JsonRpcResponse::ok(id, v),
            Err(e) => JsonRpcResponse::fail(id, codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    /// Answer requests until `reader` reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> PilotResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(server = %self.name, "tool server ready");
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => {
                    tracing::debug!(method = %request.method, id = %request.id, "request received");
                    self.handle(request).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable request line");
                    JsonRpcResponse::fail(Value::Null, codes::PARSE_ERROR, e.to_string())
                }
            };
            let mut frame = serde_json::to_string(&response)?;
            frame.push('\n');
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await?;
        }
        tracing::info!(server = %self.name, "client disconnected; tool server stopping");
        Ok(())
    }
}

fn service_label(service: ServiceKind) -> &'static str {
    match service {
        ServiceKind::Vision => "vision",
        ServiceKind::Control => "control",
        ServiceKind::Local => "local",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::McpClient;
    use crate::mcp::stdio_transport::LineTransport;
    use crate::testing::RecordingExecutor;
    use crate::tools::types::{ToolInvocation, ToolName, ToolStatus};

    fn connect(service: ServiceKind, executor: Arc<RecordingExecutor>) -> (McpClient, tokio::task::JoinHandle<()>) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (cr, cw) = tokio::io::split(client_end);
        let (sr, sw) = tokio::io::split(server_end);
        let server = ToolServer::new(service, executor);
        let task = tokio::spawn(async move {
            server.serve(sr, sw).await.unwrap();
        });
        (McpClient::new("test", Box::new(LineTransport::new(cr, cw))), task)
    }

    #[tokio::test]
    async fn handshake_and_listing_cover_only_the_hosted_service() {
        let (client, _task) = connect(ServiceKind::Control, Arc::new(RecordingExecutor::default()));
        let info = client.initialize().await.unwrap();
        assert_eq!(info.service, ServiceKind::Control);
        assert_eq!(info.server_name, "deskpilot-control");

        let names: Vec<String> = client.list_tools().await.unwrap().into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"type_text".to_string()));
        assert!(names.contains(&"focus_window".to_string()));
        assert!(!names.contains(&"capture_screen".to_string()));
        assert!(!names.contains(&"wait".to_string()));
    }

    #[tokio::test]
    async fn calls_reach_the_service_and_results_round_trip() {
        let exec = Arc::new(RecordingExecutor::default());
        let (client, _task) = connect(ServiceKind::Control, exec.clone());

        let result = client
            .execute(ToolInvocation::TypeText { text: "hi".into() })
            .await;
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.message, "type_text ok");
        assert_eq!(exec.calls(), vec![ToolInvocation::TypeText { text: "hi".into() }]);
    }

    #[tokio::test]
    async fn server_revalidates_arguments() {
        let exec = Arc::new(RecordingExecutor::default());
        let (client, _task) = connect(ServiceKind::Control, exec.clone());

        let result = client.call_tool("click", json!({"x": "left"})).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.message.contains("`x`"), "{}", result.message);

        let result = client.call_tool("capture_screen", json!({})).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn session_reset_is_forwarded() {
        let exec = Arc::new(RecordingExecutor::default());
        let (client, _task) = connect(ServiceKind::Vision, exec.clone());
        client.reset_session().await.unwrap();
        assert_eq!(exec.resets(), 1);
    }

    #[tokio::test]
    async fn protocol_errors_are_reported_not_fatal() {
        let server = ToolServer::new(ServiceKind::Vision, Arc::new(RecordingExecutor::default()));
        let resp = server
            .handle(JsonRpcRequest::new(3, "resources/list", json!({})))
            .await;
        assert_eq!(resp.error.map(|e| e.code), Some(codes::METHOD_NOT_FOUND));

        let resp = server
            .handle(JsonRpcRequest::new(4, methods::CALL_TOOL, json!({"arguments": {}})))
            .await;
        assert_eq!(resp.error.map(|e| e.code), Some(codes::INVALID_PARAMS));

        let input = b"not json\n{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"initialize\"}\n".to_vec();
        let mut output = Vec::new();
        server.serve(&input[..], &mut output).await.unwrap();
        let replies: Vec<JsonRpcResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].error.as_ref().map(|e| e.code), Some(codes::PARSE_ERROR));
        assert_eq!(replies[1].id, json!(9));
        assert!(replies[1].result.is_some());
    }

    #[tokio::test]
    async fn dead_service_turns_into_error_results() {
        let (client_end, server_end) = tokio::io::duplex(1024);
        drop(server_end);
        let (cr, cw) = tokio::io::split(client_end);
        let client = McpClient::new("gone", Box::new(LineTransport::new(cr, cw)));
        let result = client.execute(ToolInvocation::CaptureScreen {}).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(client.reset_session().await.is_err());
        assert_eq!(ToolName::CaptureScreen.service(), ServiceKind::Vision);
    }
}
