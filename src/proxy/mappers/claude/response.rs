use serde_json::{json, Value};
use uuid::Uuid;

use crate::proxy::upstream::UpstreamUnaryResponse;

/// Assembles the non-streaming Messages response: typed blocks in the same
/// order the stream would produce them (thinking, text, tool_use…).
pub fn build_response(
    upstream: &UpstreamUnaryResponse,
    model: &str,
    pass_signatures: bool,
) -> Value {
    let mut content: Vec<Value> = Vec::new();

    if !upstream.reasoning_content.is_empty() {
        let mut block = json!({ "type": "thinking", "thinking": upstream.reasoning_content });
        if pass_signatures {
            if let Some(signature) = &upstream.reasoning_signature {
                block["signature"] = json!(signature);
            }
        }
        content.push(block);
    }
    if !upstream.content.is_empty() {
        content.push(json!({ "type": "text", "text": upstream.content }));
    }
    for call in &upstream.tool_calls {
        let input: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": input,
        }));
    }

    let stop_reason = if upstream.tool_calls.is_empty() {
        "end_turn"
    } else {
        "tool_use"
    };

    json!({
        "id": format!("msg_{}", Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": upstream.usage.prompt_tokens,
            "output_tokens": upstream.usage.completion_tokens,
        }
    })
}
