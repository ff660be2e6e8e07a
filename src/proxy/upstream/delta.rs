use bytes::BytesMut;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::error::UpstreamError;

/// One parsed upstream event. The four variants are the entire vocabulary the
/// response translators pattern-match on.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamDelta {
    Content(String),
    Reasoning {
        text: String,
        signature: Option<String>,
    },
    ToolCalls(Vec<UpstreamToolCall>),
    Usage(UpstreamUsage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, exactly as the wire formats expect it.
    pub arguments: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpstreamUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<UpstreamDelta, UpstreamError>> + Send>>;

/// Aggregate of one unary generateContent call.
#[derive(Debug, Clone, Default)]
pub struct UpstreamUnaryResponse {
    pub content: String,
    pub reasoning_content: String,
    pub reasoning_signature: Option<String>,
    pub tool_calls: Vec<UpstreamToolCall>,
    pub usage: UpstreamUsage,
}

/// Line-buffered parser for the upstream SSE dialect. Feed raw network chunks
/// in; complete `data:` lines come out as typed deltas, partial lines stay
/// buffered until their newline arrives.
#[derive(Default)]
pub struct SseDeltaParser {
    buffer: BytesMut,
}

impl SseDeltaParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<UpstreamDelta> {
        self.buffer.extend_from_slice(chunk);
        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_raw = self.buffer.split_to(pos + 1);
            let Ok(line) = std::str::from_utf8(&line_raw) else {
                continue;
            };
            let line = line.trim();
            if line.is_empty() || !line.starts_with("data: ") {
                continue;
            }
            let payload = line.trim_start_matches("data: ").trim();
            if payload == "[DONE]" {
                continue;
            }
            if let Ok(json) = serde_json::from_str::<Value>(payload) {
                deltas.extend(parse_payload(json));
            }
        }
        deltas
    }
}

/// Converts one upstream JSON payload into deltas: text parts in arrival
/// order, then tool calls, then usage.
pub fn parse_payload(mut json: Value) -> Vec<UpstreamDelta> {
    let data = match json.get_mut("response").map(|v| v.take()) {
        Some(inner) => inner,
        None => json,
    };

    let mut deltas = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(parts) = data
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            let signature = part
                .get("thoughtSignature")
                .or_else(|| part.get("thought_signature"))
                .and_then(|s| s.as_str())
                .map(|s| s.to_string());
            let is_thought = part
                .get("thought")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                if is_thought {
                    deltas.push(UpstreamDelta::Reasoning {
                        text: text.to_string(),
                        signature: signature.clone(),
                    });
                } else {
                    deltas.push(UpstreamDelta::Content(text.to_string()));
                }
            }

            if let Some(func_call) = part.get("functionCall") {
                let name = func_call
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let args = func_call
                    .get("args")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                let id = func_call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| stable_tool_call_id(func_call));
                tool_calls.push(UpstreamToolCall {
                    id,
                    name,
                    arguments: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
                    signature,
                });
            }
        }
    }

    if !tool_calls.is_empty() {
        deltas.push(UpstreamDelta::ToolCalls(tool_calls));
    }

    if let Some(u) = data.get("usageMetadata") {
        deltas.push(UpstreamDelta::Usage(parse_usage(u)));
    }

    deltas
}

pub fn parse_usage(u: &Value) -> UpstreamUsage {
    UpstreamUsage {
        prompt_tokens: u
            .get("promptTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        completion_tokens: u
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u
            .get("totalTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    }
}

/// Aggregates a full unary response body into one result.
pub fn parse_unary(json: Value) -> UpstreamUnaryResponse {
    let mut out = UpstreamUnaryResponse::default();
    for delta in parse_payload(json) {
        match delta {
            UpstreamDelta::Content(text) => out.content.push_str(&text),
            UpstreamDelta::Reasoning { text, signature } => {
                out.reasoning_content.push_str(&text);
                if out.reasoning_signature.is_none() {
                    out.reasoning_signature = signature;
                }
            }
            UpstreamDelta::ToolCalls(calls) => out.tool_calls.extend(calls),
            UpstreamDelta::Usage(usage) => out.usage = usage,
        }
    }
    out
}

/// Some SDKs omit tool-call ids; derive a stable one from the call body so
/// repeated frames for the same call agree.
fn stable_tool_call_id(func_call: &Value) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    serde_json::to_string(func_call)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("call_{:x}", hasher.finish())
}
