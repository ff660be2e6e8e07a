pub mod claude;
pub mod gemini;
pub mod models;
pub mod openai;
pub mod params;
pub mod threading;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::proxy::signature_cache::SignatureCache;
use crate::proxy::upstream::UpstreamDelta;
use params::GenerationParams;

/// Everything a surface-specific request mapper needs besides the body.
pub struct RequestContext<'a> {
    /// Concrete upstream model id (after alias resolution).
    pub model: &'a str,
    pub project_id: &'a str,
    pub session_id: &'a str,
    /// Process-wide system prompt prepended to caller system text.
    pub system_instruction: &'a str,
    pub signatures: &'a SignatureCache,
}

/// Surface-independent intermediate: upstream-shaped contents plus the bits
/// that still need merging.
pub struct UpstreamRequestParts {
    pub contents: Vec<Value>,
    pub system_texts: Vec<String>,
    /// Upstream-shaped tools: `[{functionDeclarations: [...]}]`.
    pub tools: Option<Value>,
    pub params: GenerationParams,
}

/// Shared tail of every request translation, in fixed order: id threading,
/// thought stitching, system merge, tool conversion, envelope.
pub fn build_upstream_request(parts: UpstreamRequestParts, ctx: &RequestContext<'_>) -> Value {
    let UpstreamRequestParts {
        mut contents,
        system_texts,
        tools,
        params,
    } = parts;

    threading::thread_function_call_ids(&mut contents);
    let thinking = models::supports_thinking(ctx.model);
    if thinking {
        threading::stitch_thought_parts(&mut contents, ctx.model, ctx.signatures);
    }

    let mut request = json!({ "contents": contents });
    if let Some(system) = threading::build_system_instruction(ctx.system_instruction, &system_texts)
    {
        request["systemInstruction"] = system;
    }
    if let Some(mut tools) = tools {
        if let Some(tool_config) = threading::tool_config_for(Some(&tools)) {
            threading::clean_tool_declarations(&mut tools);
            request["toolConfig"] = tool_config;
            request["tools"] = tools;
        }
    }
    request["generationConfig"] = params.to_generation_config(ctx.model, thinking);

    threading::wrap_envelope(ctx.project_id, request, ctx.model, ctx.session_id)
}

/// Options shared by the three streaming translators.
#[derive(Clone)]
pub struct StreamOptions {
    /// Model id echoed back to the caller (the inbound name, not the alias
    /// target).
    pub model: String,
    /// Upstream model id: the signature-cache key.
    pub upstream_model: String,
    pub heartbeat: Duration,
    pub pass_signatures: bool,
    pub signatures: Arc<SignatureCache>,
}

/// Signature bookkeeping every translator performs on upstream deltas.
pub fn record_signatures(delta: &UpstreamDelta, upstream_model: &str, cache: &SignatureCache) {
    match delta {
        UpstreamDelta::Reasoning {
            signature: Some(signature),
            ..
        } => cache.set_reasoning(upstream_model, signature.clone()),
        UpstreamDelta::ToolCalls(calls) => {
            if let Some(signature) = calls.iter().find_map(|c| c.signature.clone()) {
                cache.set_tool(upstream_model, signature);
            }
        }
        _ => {}
    }
}
