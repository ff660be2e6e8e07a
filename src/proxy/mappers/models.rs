use serde_json::{json, Value};

/// Upstream model ids the gateway advertises. Callers may also name an
/// upstream id directly; unknown ids pass through untouched.
pub const MODEL_CATALOG: &[&str] = &[
    "gemini-3-pro-high",
    "gemini-3-pro-low",
    "gemini-3-flash",
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-thinking",
];

/// Inbound alias → concrete upstream model id.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gpt-4o", "gemini-3-flash"),
    ("gpt-4o-mini", "gemini-3-flash"),
    ("gpt-4.1", "gemini-3-pro-high"),
    ("gpt-5", "gemini-3-pro-high"),
    ("o3", "gemini-3-pro-high"),
    ("o4-mini", "gemini-3-pro-low"),
    ("gemini-pro", "gemini-3-pro-high"),
    ("gemini-flash", "gemini-3-flash"),
    ("claude-3-5-sonnet-20241022", "claude-sonnet-4-5"),
    ("claude-3-7-sonnet-20250219", "claude-sonnet-4-5-thinking"),
    ("claude-sonnet-4-20250514", "claude-sonnet-4-5"),
];

/// Models whose upstream dialect accepts a thinkingConfig.
const THINKING_MODELS: &[&str] = &[
    "gemini-3-pro-high",
    "gemini-3-pro-low",
    "claude-sonnet-4-5-thinking",
];

pub fn resolve_model(inbound: &str) -> String {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == inbound)
        .map(|(_, target)| target.to_string())
        .unwrap_or_else(|| inbound.to_string())
}

pub fn supports_thinking(model: &str) -> bool {
    THINKING_MODELS.contains(&model) || model.ends_with("-thinking")
}

pub fn is_claude_model(model: &str) -> bool {
    model.contains("claude")
}

pub fn openai_models_payload() -> Value {
    let data: Vec<Value> = MODEL_CATALOG
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 1706745600,
                "owned_by": "antigravity"
            })
        })
        .collect();
    json!({ "object": "list", "data": data })
}

pub fn gemini_model_payload(model: &str) -> Value {
    json!({
        "name": format!("models/{}", model),
        "displayName": model,
        "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
        "inputTokenLimit": 1_048_576,
        "outputTokenLimit": 65_536,
    })
}

pub fn gemini_models_payload() -> Value {
    let models: Vec<Value> = MODEL_CATALOG
        .iter()
        .map(|id| gemini_model_payload(id))
        .collect();
    json!({ "models": models })
}
