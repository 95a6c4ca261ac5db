use crate::errors::{PilotError, PilotResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> PilotResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| PilotError::ReasoningBackend(format!("bad SSE payload: {e}")))?;

    if let Some(message) = json["error"]["message"].as_str() {
        return Ok(Some(chunk(StreamChunkKind::Error, message.to_string())));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    // DeepSeek-style reasoning stream
    if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(chunk(StreamChunkKind::Reasoning, reasoning.to_string())));
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array().filter(|t| !t.is_empty()) {
        let encoded = serde_json::to_string(tool_calls)?;
        return Ok(Some(chunk(StreamChunkKind::ToolCall, encoded)));
    }

    if let Some(content) = delta["content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(chunk(StreamChunkKind::Content, content.to_string())));
    }

    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }

    Ok(None)
}

fn chunk(kind: StreamChunkKind, content: String) -> StreamChunk {
    StreamChunk { kind, content }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(line: &str) -> Option<StreamChunkKind> {
        parse_sse_line(line).unwrap().map(|c| c.kind)
    }

    #[test]
    fn recognises_chunk_kinds() {
        assert!(kind(": keep-alive").is_none());
        assert!(kind("event: ping").is_none());
        assert!(matches!(kind("data: [DONE]"), Some(StreamChunkKind::Done)));
        assert!(matches!(
            kind(r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#),
            Some(StreamChunkKind::Content)
        ));
        assert!(matches!(
            kind(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"click"}}]}}]}"#),
            Some(StreamChunkKind::ToolCall)
        ));
        assert!(matches!(
            kind(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            Some(StreamChunkKind::Done)
        ));
        assert!(matches!(
            kind(r#"data: {"error":{"message":"rate limited"}}"#),
            Some(StreamChunkKind::Error)
        ));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(parse_sse_line("data: {not json").is_err());
    }
}
