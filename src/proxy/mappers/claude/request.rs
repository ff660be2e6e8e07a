use serde_json::{json, Value};

use crate::proxy::mappers::params::GenerationParams;
use crate::proxy::mappers::{build_upstream_request, RequestContext, UpstreamRequestParts};

fn system_texts(system: Option<&Value>) -> Vec<String> {
    match system {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                    block.get("text").and_then(|t| t.as_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn convert_blocks(blocks: &[Value]) -> Vec<Value> {
    let mut parts = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    parts.push(json!({ "text": text }));
                }
            }
            Some("thinking") => {
                let mut part = json!({
                    "text": block.get("thinking").and_then(|t| t.as_str()).unwrap_or(""),
                    "thought": true,
                });
                if let Some(signature) = block.get("signature").and_then(|s| s.as_str()) {
                    part["thoughtSignature"] = json!(signature);
                }
                parts.push(part);
            }
            Some("tool_use") => {
                parts.push(json!({ "functionCall": {
                    "id": block.get("id").cloned().unwrap_or(Value::Null),
                    "name": block.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                    "args": block.get("input").cloned().unwrap_or_else(|| json!({})),
                }}));
            }
            Some("tool_result") => {
                let mut response = json!({
                    "response": { "result": tool_result_text(block.get("content")) }
                });
                if let Some(id) = block.get("tool_use_id") {
                    response["id"] = id.clone();
                }
                parts.push(json!({ "functionResponse": response }));
            }
            // redacted_thinking has nothing replayable.
            _ => {}
        }
    }
    parts
}

/// Builds the upstream envelope from an Anthropic Messages body.
pub fn transform_request(body: &Value, ctx: &RequestContext<'_>) -> Result<Value, String> {
    let messages = body
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| "missing 'messages' field".to_string())?;

    let mut contents: Vec<Value> = Vec::new();
    for message in messages {
        let role = match message.get("role").and_then(|r| r.as_str()) {
            Some("assistant") => "model",
            Some("user") => "user",
            _ => continue,
        };
        let parts = match message.get("content") {
            Some(Value::String(text)) => vec![json!({ "text": text })],
            Some(Value::Array(blocks)) => convert_blocks(blocks),
            _ => Vec::new(),
        };
        if parts.is_empty() {
            continue;
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    let tools = body.get("tools").and_then(|t| t.as_array()).and_then(|tools| {
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let mut decl = json!({
                    "name": tool.get("name")?.as_str()?,
                });
                if let Some(description) = tool.get("description") {
                    decl["description"] = description.clone();
                }
                if let Some(schema) = tool.get("input_schema") {
                    decl["parameters"] = schema.clone();
                }
                Some(decl)
            })
            .collect();
        (!declarations.is_empty()).then(|| json!([{ "functionDeclarations": declarations }]))
    });

    Ok(build_upstream_request(
        UpstreamRequestParts {
            contents,
            system_texts: system_texts(body.get("system")),
            tools,
            params: GenerationParams::from_claude(body),
        },
        ctx,
    ))
}
