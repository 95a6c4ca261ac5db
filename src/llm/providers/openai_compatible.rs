use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunkKind, ToolCall, ToolDef,
};

/// Any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

/// Tool-call accumulator: delta index → (id, type, name, accumulated arguments).
type ToolCallBuilders = BTreeMap<usize, (String, String, String, String)>;

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
    ) -> PilotResult<LlmResponse> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(&tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %sanitized(&body), "request body (base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::ReasoningBackend(format!("{}: request failed: {e}", self.id)))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::ReasoningBackend(format!("{}: {status}: {err_body}", self.id)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            let json: serde_json::Value = response.json().await.map_err(|e| {
                PilotError::ReasoningBackend(format!("{}: unreadable response: {e}", self.id))
            })?;
            let reply = parse_completion(&json);
            tracing::info!(
                content_len = reply.content.len(),
                tool_calls = reply.tool_calls.len(),
                "LLM JSON response received"
            );
            Ok(reply)
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate an SSE stream into a full response.
    async fn handle_stream(&self, response: reqwest::Response) -> PilotResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        // Raw bytes: a multi-byte character may straddle two network chunks.
        let mut line_buf: Vec<u8> = Vec::new();
        let mut acc = StreamAccumulator::default();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result
                .map_err(|e| PilotError::ReasoningBackend(format!("{}: stream broke: {e}", self.id)))?;
            line_buf.extend_from_slice(&bytes);

            for line in take_lines(&mut line_buf) {
                if acc.feed(&line).map_err(|e| self.tagged(e))? {
                    break 'stream;
                }
            }
        }
        if !line_buf.is_empty() {
            let tail = String::from_utf8_lossy(&line_buf).into_owned();
            acc.feed(&tail).map_err(|e| self.tagged(e))?;
        }

        let reply = acc.finish();
        tracing::info!(
            content_len = reply.content.len(),
            reasoning_len = reply.reasoning.len(),
            tool_calls = reply.tool_calls.len(),
            tools = ?reply.tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );
        Ok(reply)
    }

    fn tagged(&self, message: String) -> PilotError {
        PilotError::ReasoningBackend(format!("{}: {message}", self.id))
    }
}

/// Split complete lines off the front of `buf`, leaving any partial line.
fn take_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

/// Streamed deltas gathered into one response.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    reasoning: String,
    tool_calls: ToolCallBuilders,
}

impl StreamAccumulator {
    /// Returns `Ok(true)` once the stream signals completion, and the
    /// provider's message if it reports an error.
    fn feed(&mut self, line: &str) -> Result<bool, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }
        match sse_parser::parse_sse_line(line) {
            Ok(Some(chunk)) => match chunk.kind {
                StreamChunkKind::Reasoning => self.reasoning.push_str(&chunk.content),
                StreamChunkKind::Content => self.content.push_str(&chunk.content),
                StreamChunkKind::ToolCall => merge_tool_call_deltas(&chunk.content, &mut self.tool_calls),
                StreamChunkKind::Error => return Err(chunk.content),
                StreamChunkKind::Done => return Ok(true),
            },
            Ok(None) => {}
            Err(e) => tracing::debug!("SSE parse skipped: {e}"),
        }
        Ok(false)
    }

    fn finish(self) -> LlmResponse {
        LlmResponse {
            content: self.content,
            reasoning: self.reasoning,
            tool_calls: build_tool_calls(self.tool_calls),
        }
    }
}

/// Replace inline image payloads so request bodies can be logged.
fn sanitized(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    part["image_url"]["url"] = serde_json::json!("<omitted_base64_image>");
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

/// Read a non-streaming chat-completions body.
fn parse_completion(json: &serde_json::Value) -> LlmResponse {
    let message = &json["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    LlmResponse {
        content,
        reasoning,
        tool_calls,
    }
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(chunk_content: &str, builders: &mut ToolCallBuilders) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str().filter(|s| !s.is_empty()) {
            entry.0 = id.to_string();
        }
        if let Some(t) = delta["type"].as_str().filter(|s| !s.is_empty()) {
            entry.1 = t.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            entry.2.push_str(name);
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

/// Convert accumulated tool-call builders into typed `ToolCall` structs.
fn build_tool_calls(builders: ToolCallBuilders) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamed_tool_call_fragments_are_merged() {
        let mut builders = ToolCallBuilders::new();
        merge_tool_call_deltas(
            r#"[{"index":0,"id":"call_1","type":"function","function":{"name":"cli","arguments":"{\"x\":"}}]"#,
            &mut builders,
        );
        merge_tool_call_deltas(
            r#"[{"index":0,"function":{"name":"ck","arguments":"5,\"y\":6}"}}]"#,
            &mut builders,
        );
        let calls = build_tool_calls(builders);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "click");
        assert_eq!(calls[0].function.arguments, r#"{"x":5,"y":6}"#);
    }

    #[test]
    fn characters_split_across_chunks_survive() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"değer ğ\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC4).unwrap() + 1;
        let mut buf = Vec::new();
        let mut acc = StreamAccumulator::default();

        buf.extend_from_slice(&line[..split]);
        assert!(take_lines(&mut buf).is_empty());
        buf.extend_from_slice(&line[split..]);
        buf.extend_from_slice(b"data: [DONE]\n");
        let lines = take_lines(&mut buf);
        assert_eq!(lines.len(), 2);
        assert!(buf.is_empty());

        assert!(!acc.feed(&lines[0]).unwrap());
        assert!(acc.feed(&lines[1]).unwrap());
        assert_eq!(acc.finish().content, "değer ğ");
    }

    #[test]
    fn provider_errors_in_the_stream_are_returned() {
        let mut acc = StreamAccumulator::default();
        let err = acc.feed(r#"data: {"error":{"message":"quota exceeded"}}"#).unwrap_err();
        assert_eq!(err, "quota exceeded");
    }

    #[test]
    fn parses_json_completion() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "type": "function",
                    "function": {"name": "wait", "arguments": "{\"milliseconds\":10}"}}]
            }}]
        });
        let reply = parse_completion(&body);
        assert_eq!(reply.content, "");
        assert_eq!(reply.tool_calls[0].function.name, "wait");
    }

    #[test]
    fn sanitized_bodies_drop_images() {
        let msg = ChatMessage::user_with_image("look", "QUFBQQ==");
        let body = serde_json::json!({ "messages": [msg] });
        let text = sanitized(&body);
        assert!(!text.contains("QUFBQQ=="));
        assert!(text.contains("<omitted_base64_image>"));
    }
}
