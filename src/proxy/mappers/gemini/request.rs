use serde_json::{json, Value};

use crate::proxy::mappers::params::GenerationParams;
use crate::proxy::mappers::{build_upstream_request, RequestContext, UpstreamRequestParts};

fn extract_system_texts(body: &Value) -> Vec<String> {
    let instruction = body
        .get("systemInstruction")
        .or_else(|| body.get("system_instruction"));
    let Some(instruction) = instruction else {
        return Vec::new();
    };
    match instruction {
        Value::String(text) => vec![text.clone()],
        Value::Object(_) => instruction
            .get("parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// The Gemini surface already speaks the upstream dialect; normalization is
/// role fixing plus the shared post-processing chain.
pub fn transform_request(body: &Value, ctx: &RequestContext<'_>) -> Result<Value, String> {
    let contents = body
        .get("contents")
        .and_then(|c| c.as_array())
        .ok_or_else(|| "missing 'contents' field".to_string())?;

    let contents: Vec<Value> = contents
        .iter()
        .map(|content| {
            let mut content = content.clone();
            // Some SDKs send OpenAI-style "assistant" through this surface.
            if content.get("role").and_then(|r| r.as_str()) == Some("assistant") {
                content["role"] = json!("model");
            }
            content
        })
        .collect();

    let tools = body.get("tools").filter(|t| {
        t.as_array()
            .map(|arr| {
                arr.iter()
                    .any(|tool| tool.get("functionDeclarations").is_some())
            })
            .unwrap_or(false)
    });

    let params = body
        .get("generationConfig")
        .or_else(|| body.get("generation_config"))
        .map(GenerationParams::from_gemini)
        .unwrap_or_default();

    Ok(build_upstream_request(
        UpstreamRequestParts {
            contents,
            system_texts: extract_system_texts(body),
            tools: tools.cloned(),
            params,
        },
        ctx,
    ))
}
