use serde_json::{json, Value};

use crate::proxy::signature_cache::SignatureCache;

/// Shared post-processing over the upstream-shaped `contents` list, applied in
/// order once a surface-specific request mapper has produced it: id
/// threading, thought-part stitching, then (elsewhere) system merge, tool
/// conversion, and the envelope.

fn is_standalone_signature_part(part: &Value) -> bool {
    part.get("thoughtSignature").is_some()
        && part.get("text").is_none()
        && part.get("functionCall").is_none()
        && part.get("functionResponse").is_none()
        && part.get("inlineData").is_none()
}

fn is_thought_part(part: &Value) -> bool {
    part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Pairs functionCall/functionResponse ids across the history. Upstream
/// requires the pairing, some SDKs drop the ids: every assistant functionCall
/// gets a unique id if it lacks one, and response parts without ids consume
/// the collected call ids in order.
pub fn thread_function_call_ids(contents: &mut [Value]) {
    let mut collected: Vec<String> = Vec::new();
    let mut next_generated = 0usize;
    let mut cursor = 0usize;

    for content in contents.iter_mut() {
        let role = content
            .get("role")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();
        let Some(parts) = content.get_mut("parts").and_then(|p| p.as_array_mut()) else {
            continue;
        };

        match role.as_str() {
            "model" => {
                for part in parts.iter_mut() {
                    let Some(call) = part.get_mut("functionCall") else {
                        continue;
                    };
                    let id = match call.get("id").and_then(|v| v.as_str()) {
                        Some(existing) => existing.to_string(),
                        None => {
                            let generated = format!("call_{}", next_generated);
                            next_generated += 1;
                            if let Some(obj) = call.as_object_mut() {
                                obj.insert("id".to_string(), json!(generated));
                            }
                            generated
                        }
                    };
                    collected.push(id);
                }
            }
            "user" => {
                for part in parts.iter_mut() {
                    let Some(response) = part.get_mut("functionResponse") else {
                        continue;
                    };
                    if response.get("id").is_none() {
                        if let Some(id) = collected.get(cursor) {
                            if let Some(obj) = response.as_object_mut() {
                                obj.insert("id".to_string(), json!(id.clone()));
                            }
                            cursor += 1;
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Re-threads thought signatures through historical assistant messages so
/// multi-turn thinking replays keep their chain. Only called for models that
/// support thinking.
pub fn stitch_thought_parts(contents: &mut [Value], model: &str, cache: &SignatureCache) {
    for content in contents.iter_mut() {
        if content.get("role").and_then(|r| r.as_str()) != Some("model") {
            continue;
        }
        let Some(parts) = content.get_mut("parts").and_then(|p| p.as_array_mut()) else {
            continue;
        };

        // First unsigned thought part takes the first standalone signature.
        let thought_idx = parts
            .iter()
            .position(|p| is_thought_part(p) && p.get("thoughtSignature").is_none());
        if let Some(thought_idx) = thought_idx {
            if let Some(sig_idx) = parts.iter().position(is_standalone_signature_part) {
                let signature = parts[sig_idx]["thoughtSignature"].clone();
                if let Some(obj) = parts[thought_idx].as_object_mut() {
                    obj.insert("thoughtSignature".to_string(), signature);
                }
                parts.remove(sig_idx);
            }
        } else if !parts.iter().any(is_thought_part) {
            if let Some(signature) = cache.get_reasoning(model) {
                parts.insert(0, json!({ "text": "", "thought": true, "thoughtSignature": signature }));
            }
        }

        // Remaining standalone signatures flow onto unsigned functionCall
        // parts in order; the cached tool signature covers any left over.
        let mut spare: Vec<Value> = Vec::new();
        let mut kept: Vec<Value> = Vec::new();
        for part in parts.drain(..) {
            if is_standalone_signature_part(&part) {
                spare.push(part["thoughtSignature"].clone());
            } else {
                kept.push(part);
            }
        }
        let mut spare_iter = spare.into_iter();
        for part in kept.iter_mut() {
            if part.get("functionCall").is_some() && part.get("thoughtSignature").is_none() {
                let signature = spare_iter
                    .next()
                    .or_else(|| cache.get_tool(model).map(Value::from));
                if let Some(signature) = signature {
                    if let Some(obj) = part.as_object_mut() {
                        obj.insert("thoughtSignature".to_string(), signature);
                    }
                }
            }
        }
        *parts = kept;
    }
}

/// Composite system instruction: the configured process-wide text first, then
/// whatever the caller supplied, as one role=user part.
pub fn build_system_instruction(configured: &str, caller: &[String]) -> Option<Value> {
    let mut sections: Vec<&str> = Vec::new();
    if !configured.is_empty() {
        sections.push(configured);
    }
    for text in caller {
        if !text.is_empty() {
            sections.push(text);
        }
    }
    if sections.is_empty() {
        return None;
    }
    Some(json!({
        "role": "user",
        "parts": [{ "text": sections.join("\n\n") }]
    }))
}

/// Strips JSON-schema vocabulary the upstream dialect rejects.
pub fn clean_json_schema(schema: &mut Value) {
    match schema {
        Value::Object(obj) => {
            obj.remove("$schema");
            obj.remove("additionalProperties");
            obj.remove("strict");
            obj.remove("exclusiveMinimum");
            obj.remove("exclusiveMaximum");
            if let Some(format) = obj.get("format").and_then(|v| v.as_str()) {
                if format != "enum" && format != "date-time" {
                    obj.remove("format");
                }
            }
            for (_, value) in obj.iter_mut() {
                clean_json_schema(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                clean_json_schema(item);
            }
        }
        _ => {}
    }
}

/// Cleans every declaration's parameter schema in place.
pub fn clean_tool_declarations(tools: &mut Value) {
    let Some(tools_arr) = tools.as_array_mut() else {
        return;
    };
    for tool in tools_arr {
        let Some(decls) = tool
            .get_mut("functionDeclarations")
            .and_then(|d| d.as_array_mut())
        else {
            continue;
        };
        for decl in decls {
            if let Some(params) = decl.get_mut("parameters") {
                clean_json_schema(params);
            }
        }
    }
}

pub fn tool_config_for(tools: Option<&Value>) -> Option<Value> {
    let has_tools = tools
        .and_then(|t| t.as_array())
        .map(|arr| !arr.is_empty())
        .unwrap_or(false);
    has_tools.then(|| json!({ "functionCallingConfig": { "mode": "VALIDATED" } }))
}

/// Final envelope around the inner request. The session id rides inside the
/// request; the project/model/userAgent triple frames it.
pub fn wrap_envelope(
    project_id: &str,
    mut request: Value,
    model: &str,
    session_id: &str,
) -> Value {
    if let Some(obj) = request.as_object_mut() {
        obj.insert("sessionId".to_string(), json!(session_id));
    }
    json!({
        "project": project_id,
        "requestId": uuid::Uuid::new_v4().to_string(),
        "request": request,
        "model": model,
        "userAgent": "antigravity",
    })
}
