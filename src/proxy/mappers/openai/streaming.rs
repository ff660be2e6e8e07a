use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use uuid::Uuid;

use crate::proxy::mappers::{record_signatures, StreamOptions};
use crate::proxy::upstream::{DeltaStream, UpstreamDelta, UpstreamUsage};

pub type SseByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

fn usage_json(usage: &UpstreamUsage) -> Value {
    json!({
        "prompt_tokens": usage.prompt_tokens,
        "completion_tokens": usage.completion_tokens,
        "total_tokens": usage.total_tokens,
    })
}

fn sse_data(payload: &Value) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        serde_json::to_string(payload).unwrap_or_default()
    ))
}

/// Stateless projection: each upstream delta becomes one
/// `chat.completion.chunk`, terminated by a finish chunk and `data: [DONE]`.
pub fn create_sse_stream(mut deltas: DeltaStream, options: StreamOptions) -> SseByteStream {
    let stream_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created_ts = Utc::now().timestamp();

    let stream = async_stream::stream! {
        let chunk_shell = |delta: Value, finish_reason: Value| {
            json!({
                "id": &stream_id,
                "object": "chat.completion.chunk",
                "created": created_ts,
                "model": &options.model,
                "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
            })
        };

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + options.heartbeat,
            options.heartbeat,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut final_usage: Option<UpstreamUsage> = None;
        let mut tool_index: u32 = 0;
        let mut saw_tool_calls = false;
        let mut error_occurred = false;

        loop {
            tokio::select! {
                item = deltas.next() => {
                    match item {
                        Some(Ok(delta)) => {
                            record_signatures(&delta, &options.upstream_model, &options.signatures);
                            match delta {
                                UpstreamDelta::Content(text) => {
                                    yield Ok(sse_data(&chunk_shell(json!({ "content": text }), Value::Null)));
                                }
                                UpstreamDelta::Reasoning { text, signature } => {
                                    let mut delta = json!({ "content": Value::Null, "reasoning_content": text });
                                    if options.pass_signatures {
                                        if let Some(signature) = signature {
                                            delta["reasoning_signature"] = json!(signature);
                                        }
                                    }
                                    yield Ok(sse_data(&chunk_shell(delta, Value::Null)));
                                }
                                UpstreamDelta::ToolCalls(calls) => {
                                    saw_tool_calls = true;
                                    let entries: Vec<Value> = calls.iter().map(|call| {
                                        let entry = json!({
                                            "index": tool_index,
                                            "id": call.id,
                                            "type": "function",
                                            "function": { "name": call.name, "arguments": call.arguments }
                                        });
                                        tool_index += 1;
                                        entry
                                    }).collect();
                                    yield Ok(sse_data(&chunk_shell(
                                        json!({ "role": "assistant", "tool_calls": entries }),
                                        Value::Null,
                                    )));
                                }
                                UpstreamDelta::Usage(usage) => final_usage = Some(usage),
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!("[OpenAI-Stream] upstream error mid-stream: {}", e);
                            let error_chunk = json!({
                                "id": &stream_id,
                                "object": "chat.completion.chunk",
                                "created": created_ts,
                                "model": &options.model,
                                "choices": [],
                                "error": { "type": "upstream_error", "message": e.message, "code": "stream_error" }
                            });
                            yield Ok(sse_data(&error_chunk));
                            yield Ok(Bytes::from("data: [DONE]\n\n"));
                            error_occurred = true;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok::<Bytes, String>(Bytes::from(": heartbeat\n\n"));
                }
            }
        }

        if !error_occurred {
            let finish_reason = if saw_tool_calls { "tool_calls" } else { "stop" };
            let mut final_chunk = chunk_shell(json!({}), json!(finish_reason));
            if let Some(usage) = final_usage {
                final_chunk["usage"] = usage_json(&usage);
            }
            yield Ok(sse_data(&final_chunk));
            yield Ok(Bytes::from("data: [DONE]\n\n"));
        }
    };
    Box::pin(stream)
}


#[cfg(test)]
mod tests {
    use super::test_support::collect_payloads;
    use super::*;
    use crate::proxy::signature_cache::SignatureCache;
    use crate::proxy::upstream::UpstreamToolCall;
    use std::sync::Arc;
    use std::time::Duration;

    fn options() -> StreamOptions {
        StreamOptions {
            model: "gpt-4o".to_string(),
            upstream_model: "gemini-3-flash".to_string(),
            heartbeat: Duration::from_secs(15),
            pass_signatures: true,
            signatures: Arc::new(SignatureCache::new()),
        }
    }

    fn delta_stream(deltas: Vec<UpstreamDelta>) -> DeltaStream {
        Box::pin(futures::stream::iter(deltas.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn content_only_stream_ends_with_finish_chunk_and_done() {
        let stream = create_sse_stream(
            delta_stream(vec![
                UpstreamDelta::Content("he".to_string()),
                UpstreamDelta::Content("llo".to_string()),
                UpstreamDelta::Usage(UpstreamUsage {
                    prompt_tokens: 1,
                    completion_tokens: 2,
                    total_tokens: 3,
                }),
            ]),
            options(),
        );
        let (payloads, done) = collect_payloads(stream).await;

        assert!(done);
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0]["choices"][0]["delta"]["content"], "he");
        assert_eq!(payloads[1]["choices"][0]["delta"]["content"], "llo");

        let last = &payloads[2];
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["choices"][0]["delta"], json!({}));
        assert_eq!(last["usage"]["prompt_tokens"], 1);
        assert_eq!(last["usage"]["completion_tokens"], 2);
        assert_eq!(last["usage"]["total_tokens"], 3);
    }

    #[tokio::test]
    async fn tool_calls_get_increasing_indices_and_tool_finish_reason() {
        let call = |name: &str| UpstreamToolCall {
            id: format!("id-{}", name),
            name: name.to_string(),
            arguments: "{}".to_string(),
            signature: None,
        };
        let stream = create_sse_stream(
            delta_stream(vec![
                UpstreamDelta::ToolCalls(vec![call("first")]),
                UpstreamDelta::ToolCalls(vec![call("second")]),
            ]),
            options(),
        );
        let (payloads, _) = collect_payloads(stream).await;

        assert_eq!(payloads[0]["choices"][0]["delta"]["tool_calls"][0]["index"], 0);
        assert_eq!(payloads[1]["choices"][0]["delta"]["tool_calls"][0]["index"], 1);
        assert_eq!(
            payloads.last().unwrap()["choices"][0]["finish_reason"],
            "tool_calls"
        );
    }

    #[tokio::test]
    async fn reasoning_chunks_carry_reasoning_content_and_record_signature() {
        let opts = options();
        let signatures = opts.signatures.clone();
        let stream = create_sse_stream(
            delta_stream(vec![UpstreamDelta::Reasoning {
                text: "hmm".to_string(),
                signature: Some("sig-1".to_string()),
            }]),
            opts,
        );
        let (payloads, _) = collect_payloads(stream).await;

        assert_eq!(payloads[0]["choices"][0]["delta"]["reasoning_content"], "hmm");
        assert_eq!(payloads[0]["choices"][0]["delta"]["reasoning_signature"], "sig-1");
        assert_eq!(signatures.get_reasoning("gemini-3-flash").as_deref(), Some("sig-1"));
    }

    #[tokio::test]
    async fn signature_stripping_applies_when_disabled() {
        let mut opts = options();
        opts.pass_signatures = false;
        let stream = create_sse_stream(
            delta_stream(vec![UpstreamDelta::Reasoning {
                text: "hmm".to_string(),
                signature: Some("sig-1".to_string()),
            }]),
            opts,
        );
        let (payloads, _) = collect_payloads(stream).await;
        assert!(payloads[0]["choices"][0]["delta"]
            .get("reasoning_signature")
            .is_none());
    }

    #[tokio::test]
    async fn upstream_error_becomes_in_stream_error_then_done() {
        let stream = create_sse_stream(
            Box::pin(futures::stream::iter(vec![
                Ok(UpstreamDelta::Content("partial".to_string())),
                Err(crate::error::UpstreamError::transport("connection reset")),
            ])),
            options(),
        );
        let (payloads, done) = collect_payloads(stream).await;

        assert!(done);
        let error = payloads.last().unwrap();
        assert_eq!(error["error"]["code"], "stream_error");
        assert!(error["error"]["message"]
            .as_str()
            .unwrap()
            .contains("connection reset"));
    }

    #[tokio::test]
    async fn heartbeat_fires_on_idle_stream() {
        tokio::time::pause();
        let mut opts = options();
        opts.heartbeat = Duration::from_secs(15);
        let mut stream = create_sse_stream(Box::pin(futures::stream::pending()), opts);

        let first = tokio::time::timeout(Duration::from_secs(16), stream.next())
            .await
            .expect("heartbeat should fire within one interval")
            .expect("stream should stay open")
            .expect("heartbeat frame");
        assert_eq!(&first[..], b": heartbeat\n\n");
    }
}
