use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::proxy::mappers::openai::streaming::SseByteStream;
use crate::proxy::mappers::{record_signatures, StreamOptions};
use crate::proxy::upstream::{DeltaStream, UpstreamDelta, UpstreamUsage};

fn usage_metadata(usage: &UpstreamUsage) -> Value {
    json!({
        "promptTokenCount": usage.prompt_tokens,
        "candidatesTokenCount": usage.completion_tokens,
        "totalTokenCount": usage.total_tokens,
    })
}

fn candidate_chunk(parts: Vec<Value>) -> Value {
    json!({
        "candidates": [{
            "content": { "parts": parts, "role": "model" },
            "index": 0
        }]
    })
}

fn sse_data(payload: &Value) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        serde_json::to_string(payload).unwrap_or_default()
    ))
}

/// Each upstream delta becomes one candidates-parts fragment; the terminal
/// payload carries finishReason STOP (always, tool calls included) and the
/// usage metadata.
pub fn create_sse_stream(mut deltas: DeltaStream, options: StreamOptions) -> SseByteStream {
    let stream = async_stream::stream! {
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + options.heartbeat,
            options.heartbeat,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut final_usage = UpstreamUsage::default();

        loop {
            tokio::select! {
                item = deltas.next() => {
                    match item {
                        Some(Ok(delta)) => {
                            record_signatures(&delta, &options.upstream_model, &options.signatures);
                            match delta {
                                UpstreamDelta::Content(text) => {
                                    yield Ok(sse_data(&candidate_chunk(vec![json!({ "text": text })])));
                                }
                                UpstreamDelta::Reasoning { text, signature } => {
                                    let mut part = json!({ "text": text, "thought": true });
                                    if options.pass_signatures {
                                        if let Some(signature) = signature {
                                            part["thoughtSignature"] = json!(signature);
                                        }
                                    }
                                    yield Ok(sse_data(&candidate_chunk(vec![part])));
                                }
                                UpstreamDelta::ToolCalls(calls) => {
                                    let parts: Vec<Value> = calls.iter().map(|call| {
                                        let args: Value = serde_json::from_str(&call.arguments)
                                            .unwrap_or_else(|_| json!({}));
                                        json!({ "functionCall": { "name": call.name, "args": args } })
                                    }).collect();
                                    yield Ok(sse_data(&candidate_chunk(parts)));
                                }
                                UpstreamDelta::Usage(usage) => final_usage = usage,
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!("[Gemini-Stream] upstream error mid-stream: {}", e);
                            let status = if e.status == 0 { 500 } else { e.status };
                            yield Ok(sse_data(&json!({
                                "error": { "code": status, "message": e.message, "status": "INTERNAL" }
                            })));
                            return;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok::<Bytes, String>(Bytes::from(": heartbeat\n\n"));
                }
            }
        }

        let final_chunk = json!({
            "candidates": [{
                "content": { "parts": [], "role": "model" },
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": usage_metadata(&final_usage),
        });
        yield Ok(sse_data(&final_chunk));
    };
    Box::pin(stream)
}
