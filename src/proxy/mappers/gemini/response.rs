use serde_json::{json, Value};

use crate::proxy::upstream::UpstreamUnaryResponse;

/// Non-streaming generateContent projection. Parts come back in thought,
/// text, functionCall order; finishReason is always STOP.
pub fn build_response(
    upstream: &UpstreamUnaryResponse,
    model: &str,
    pass_signatures: bool,
) -> Value {
    let mut parts: Vec<Value> = Vec::new();

    if !upstream.reasoning_content.is_empty() {
        let mut part = json!({ "text": upstream.reasoning_content, "thought": true });
        if pass_signatures {
            if let Some(signature) = &upstream.reasoning_signature {
                part["thoughtSignature"] = json!(signature);
            }
        }
        parts.push(part);
    }
    if !upstream.content.is_empty() {
        parts.push(json!({ "text": upstream.content }));
    }
    for call in &upstream.tool_calls {
        let args: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        parts.push(json!({ "functionCall": { "name": call.name, "args": args } }));
    }

    json!({
        "candidates": [{
            "content": { "parts": parts, "role": "model" },
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": {
            "promptTokenCount": upstream.usage.prompt_tokens,
            "candidatesTokenCount": upstream.usage.completion_tokens,
            "totalTokenCount": upstream.usage.total_tokens,
        },
        "modelVersion": model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::upstream::{UpstreamToolCall, UpstreamUsage};

    #[test]
    fn unary_projection_keeps_part_order_and_stop_reason() {
        let upstream = UpstreamUnaryResponse {
            content: "answer".to_string(),
            reasoning_content: "think".to_string(),
            reasoning_signature: None,
            tool_calls: vec![UpstreamToolCall {
                id: "t1".to_string(),
                name: "lookup".to_string(),
                arguments: r#"{"q":"x"}"#.to_string(),
                signature: None,
            }],
            usage: UpstreamUsage {
                prompt_tokens: 2,
                completion_tokens: 3,
                total_tokens: 5,
            },
        };
        let response = build_response(&upstream, "gemini-3-pro-high", true);
        let parts = response["candidates"][0]["content"]["parts"].as_array().unwrap();

        assert_eq!(parts[0]["thought"], true);
        assert_eq!(parts[1]["text"], "answer");
        assert_eq!(parts[2]["functionCall"]["name"], "lookup");
        assert_eq!(response["candidates"][0]["finishReason"], "STOP");
        assert_eq!(response["usageMetadata"]["totalTokenCount"], 5);
        assert_eq!(response["modelVersion"], "gemini-3-pro-high");
    }
}
