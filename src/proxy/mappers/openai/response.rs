use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::proxy::upstream::UpstreamUnaryResponse;

/// Non-streaming Chat Completions projection of one unary upstream result.
pub fn build_response(
    upstream: &UpstreamUnaryResponse,
    model: &str,
    pass_signatures: bool,
) -> Value {
    let mut message = json!({ "role": "assistant", "content": upstream.content });
    if !upstream.reasoning_content.is_empty() {
        message["reasoning_content"] = json!(upstream.reasoning_content);
        if pass_signatures {
            if let Some(signature) = &upstream.reasoning_signature {
                message["reasoning_signature"] = json!(signature);
            }
        }
    }
    if !upstream.tool_calls.is_empty() {
        let calls: Vec<Value> = upstream
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments }
                })
            })
            .collect();
        message["tool_calls"] = json!(calls);
    }

    let finish_reason = if upstream.tool_calls.is_empty() {
        "stop"
    } else {
        "tool_calls"
    };

    json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }],
        "usage": {
            "prompt_tokens": upstream.usage.prompt_tokens,
            "completion_tokens": upstream.usage.completion_tokens,
            "total_tokens": upstream.usage.total_tokens,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::upstream::{UpstreamToolCall, UpstreamUsage};

    #[test]
    fn text_response_has_stop_finish_reason_and_usage() {
        let upstream = UpstreamUnaryResponse {
            content: "hello".to_string(),
            usage: UpstreamUsage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            },
            ..Default::default()
        };
        let response = build_response(&upstream, "gpt-4o", true);

        assert_eq!(response["choices"][0]["message"]["content"], "hello");
        assert_eq!(response["choices"][0]["finish_reason"], "stop");
        assert_eq!(response["usage"]["total_tokens"], 3);
        assert!(response["choices"][0]["message"]
            .get("reasoning_content")
            .is_none());
    }

    #[test]
    fn tool_calls_switch_finish_reason() {
        let upstream = UpstreamUnaryResponse {
            tool_calls: vec![UpstreamToolCall {
                id: "call_1".to_string(),
                name: "lookup".to_string(),
                arguments: r#"{"q":"x"}"#.to_string(),
                signature: None,
            }],
            ..Default::default()
        };
        let response = build_response(&upstream, "gpt-4o", true);

        assert_eq!(response["choices"][0]["finish_reason"], "tool_calls");
        let call = &response["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["function"]["name"], "lookup");
        assert_eq!(call["function"]["arguments"], r#"{"q":"x"}"#);
    }

    #[test]
    fn reasoning_signature_honors_pass_flag() {
        let upstream = UpstreamUnaryResponse {
            reasoning_content: "thinking".to_string(),
            reasoning_signature: Some("sig-1".to_string()),
            ..Default::default()
        };
        let with = build_response(&upstream, "gpt-4o", true);
        assert_eq!(with["choices"][0]["message"]["reasoning_signature"], "sig-1");

        let without = build_response(&upstream, "gpt-4o", false);
        assert!(without["choices"][0]["message"]
            .get("reasoning_signature")
            .is_none());
    }
}
