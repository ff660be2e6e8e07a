use serde_json::{json, Value};

use crate::proxy::mappers::params::GenerationParams;
use crate::proxy::mappers::{build_upstream_request, RequestContext, UpstreamRequestParts};

/// Flattens an OpenAI message content field (string or part array) to text.
fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| {
                if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                    part.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn convert_tools(tools: Option<&Value>) -> Option<Value> {
    let tools = tools?.as_array()?;
    let declarations: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            let mut decl = json!({
                "name": function.get("name")?.as_str()?,
            });
            if let Some(description) = function.get("description") {
                decl["description"] = description.clone();
            }
            if let Some(parameters) = function.get("parameters") {
                decl["parameters"] = parameters.clone();
            }
            Some(decl)
        })
        .collect();
    if declarations.is_empty() {
        return None;
    }
    Some(json!([{ "functionDeclarations": declarations }]))
}

/// Builds the upstream envelope from an OpenAI Chat Completions body.
pub fn transform_request(body: &Value, ctx: &RequestContext<'_>) -> Result<Value, String> {
    let messages = body
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| "missing 'messages' field".to_string())?;

    let mut system_texts = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("");
        match role {
            "system" | "developer" => {
                let text = message
                    .get("content")
                    .map(content_to_text)
                    .unwrap_or_default();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            "user" => {
                let text = message
                    .get("content")
                    .map(content_to_text)
                    .unwrap_or_default();
                contents.push(json!({ "role": "user", "parts": [{ "text": text }] }));
            }
            "assistant" => {
                let mut parts: Vec<Value> = Vec::new();
                if let Some(text) = message.get("content").map(content_to_text) {
                    if !text.is_empty() {
                        parts.push(json!({ "text": text }));
                    }
                }
                if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
                    for call in calls {
                        let function = call.get("function").cloned().unwrap_or_else(|| json!({}));
                        let name = function.get("name").and_then(|n| n.as_str()).unwrap_or("");
                        let args: Value = function
                            .get("arguments")
                            .and_then(|a| a.as_str())
                            .and_then(|raw| serde_json::from_str(raw).ok())
                            .unwrap_or_else(|| json!({}));
                        let mut func_call = json!({ "name": name, "args": args });
                        if let Some(id) = call.get("id") {
                            func_call["id"] = id.clone();
                        }
                        parts.push(json!({ "functionCall": func_call }));
                    }
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            "tool" => {
                let mut response = json!({
                    "response": { "result": message.get("content").map(content_to_text).unwrap_or_default() }
                });
                if let Some(id) = message.get("tool_call_id") {
                    response["id"] = id.clone();
                }
                if let Some(name) = message.get("name") {
                    response["name"] = name.clone();
                }
                contents.push(json!({ "role": "user", "parts": [{ "functionResponse": response }] }));
            }
            _ => {}
        }
    }

    Ok(build_upstream_request(
        UpstreamRequestParts {
            contents,
            system_texts,
            tools: convert_tools(body.get("tools")),
            params: GenerationParams::from_openai(body),
        },
        ctx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::signature_cache::SignatureCache;

    fn ctx(cache: &SignatureCache) -> RequestContext<'_> {
        RequestContext {
            model: "gemini-3-flash",
            project_id: "proj",
            session_id: "sess",
            system_instruction: "",
            signatures: cache,
        }
    }

    #[test]
    fn simple_chat_maps_roles_and_system_text() {
        let cache = SignatureCache::new();
        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [
                { "role": "system", "content": "You are helpful." },
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello" },
                { "role": "user", "content": [{ "type": "text", "text": "part one " }, { "type": "text", "text": "part two" }] }
            ]
        });
        let envelope = transform_request(&body, &ctx(&cache)).unwrap();
        let contents = envelope["request"]["contents"].as_array().unwrap();

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "part one part two");
        assert_eq!(
            envelope["request"]["systemInstruction"]["parts"][0]["text"],
            "You are helpful."
        );
    }

    #[test]
    fn tool_round_trip_threads_ids() {
        let cache = SignatureCache::new();
        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [
                { "role": "user", "content": "look it up" },
                { "role": "assistant", "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": { "name": "lookup", "arguments": "{\"q\":\"x\"}" }
                }]},
                { "role": "tool", "tool_call_id": "call_abc", "content": "42" }
            ]
        });
        let envelope = transform_request(&body, &ctx(&cache)).unwrap();
        let contents = envelope["request"]["contents"].as_array().unwrap();

        let call = &contents[1]["parts"][0]["functionCall"];
        assert_eq!(call["id"], "call_abc");
        assert_eq!(call["name"], "lookup");
        assert_eq!(call["args"]["q"], "x");

        let response = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(response["id"], "call_abc");
        assert_eq!(response["response"]["result"], "42");
    }

    #[test]
    fn openai_tools_become_function_declarations() {
        let cache = SignatureCache::new();
        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{ "role": "user", "content": "hi" }],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "lookup",
                    "description": "Find things",
                    "parameters": { "type": "object", "properties": { "q": { "type": "string" } } }
                }
            }]
        });
        let envelope = transform_request(&body, &ctx(&cache)).unwrap();
        let decl = &envelope["request"]["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "lookup");
        assert_eq!(decl["parameters"]["properties"]["q"]["type"], "string");
        assert_eq!(
            envelope["request"]["toolConfig"]["functionCallingConfig"]["mode"],
            "VALIDATED"
        );
    }

    #[test]
    fn missing_messages_is_an_error() {
        let cache = SignatureCache::new();
        let body = serde_json::json!({ "model": "gpt-4o" });
        assert!(transform_request(&body, &ctx(&cache)).is_err());
    }
}
