use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::proxy::mappers::openai::streaming::SseByteStream;
use crate::proxy::mappers::{record_signatures, StreamOptions};
use crate::proxy::upstream::{DeltaStream, UpstreamDelta, UpstreamToolCall};

/// Where the block cursor currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockCursor {
    None,
    Thinking,
    Text,
}

/// Explicit block-cursor protocol for the Anthropic SSE surface. Blocks are
/// opened lazily, indices are contiguous from 0, and tool_use blocks are
/// emitted as transient start/delta/stop triples.
struct StreamingState {
    cursor: BlockCursor,
    block_index: usize,
    message_start_sent: bool,
    used_tool: bool,
    output_tokens: u32,
    model: String,
    pass_signatures: bool,
}

impl StreamingState {
    fn new(model: String, pass_signatures: bool) -> Self {
        Self {
            cursor: BlockCursor::None,
            block_index: 0,
            message_start_sent: false,
            used_tool: false,
            output_tokens: 0,
            model,
            pass_signatures,
        }
    }

    fn emit(&self, event_type: &str, data: Value) -> Bytes {
        Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            event_type,
            serde_json::to_string(&data).unwrap_or_default()
        ))
    }

    fn ensure_message_start(&mut self, chunks: &mut Vec<Bytes>) {
        if self.message_start_sent {
            return;
        }
        chunks.push(self.emit(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": format!("msg_{}", Uuid::new_v4().simple()),
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": { "input_tokens": 0, "output_tokens": 0 }
                }
            }),
        ));
        self.message_start_sent = true;
    }

    fn start_block(&mut self, cursor: BlockCursor, content_block: Value, chunks: &mut Vec<Bytes>) {
        chunks.push(self.emit(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block
            }),
        ));
        self.cursor = cursor;
    }

    fn end_block(&mut self, chunks: &mut Vec<Bytes>) {
        if self.cursor == BlockCursor::None {
            return;
        }
        chunks.push(self.emit(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": self.block_index }),
        ));
        self.block_index += 1;
        self.cursor = BlockCursor::None;
    }

    fn on_reasoning(&mut self, text: &str, signature: Option<&str>) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        self.ensure_message_start(&mut chunks);
        if self.cursor == BlockCursor::Text {
            self.end_block(&mut chunks);
        }
        if self.cursor == BlockCursor::None {
            self.start_block(
                BlockCursor::Thinking,
                json!({ "type": "thinking", "thinking": "" }),
                &mut chunks,
            );
        }
        let mut delta = json!({ "type": "thinking_delta", "thinking": text });
        if self.pass_signatures {
            if let Some(signature) = signature {
                delta["signature"] = json!(signature);
            }
        }
        chunks.push(self.emit(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": delta
            }),
        ));
        chunks
    }

    fn on_content(&mut self, text: &str) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        self.ensure_message_start(&mut chunks);
        if self.cursor == BlockCursor::Thinking {
            self.end_block(&mut chunks);
        }
        if self.cursor == BlockCursor::None {
            self.start_block(
                BlockCursor::Text,
                json!({ "type": "text", "text": "" }),
                &mut chunks,
            );
        }
        chunks.push(self.emit(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": { "type": "text_delta", "text": text }
            }),
        ));
        chunks
    }

    fn on_tool_calls(&mut self, calls: &[UpstreamToolCall]) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        self.ensure_message_start(&mut chunks);
        self.end_block(&mut chunks);
        self.used_tool = true;
        for call in calls {
            chunks.push(self.emit(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": { "type": "tool_use", "id": call.id, "name": call.name, "input": {} }
                }),
            ));
            chunks.push(self.emit(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": { "type": "input_json_delta", "partial_json": call.arguments }
                }),
            ));
            chunks.push(self.emit(
                "content_block_stop",
                json!({ "type": "content_block_stop", "index": self.block_index }),
            ));
            self.block_index += 1;
        }
        self.cursor = BlockCursor::None;
        chunks
    }

    fn on_complete(&mut self) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        self.ensure_message_start(&mut chunks);
        self.end_block(&mut chunks);
        let stop_reason = if self.used_tool { "tool_use" } else { "end_turn" };
        chunks.push(self.emit(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": { "output_tokens": self.output_tokens }
            }),
        ));
        chunks.push(Bytes::from(
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ));
        chunks
    }

    fn on_error(&mut self, message: &str) -> Bytes {
        self.emit(
            "error",
            json!({
                "type": "error",
                "error": { "type": "api_error", "message": message }
            }),
        )
    }
}

/// Drives the Claude block-cursor state machine over an upstream delta
/// stream, multiplexed with the SSE heartbeat.
pub fn create_sse_stream(mut deltas: DeltaStream, options: StreamOptions) -> SseByteStream {
    let stream = async_stream::stream! {
        let mut state = StreamingState::new(options.model.clone(), options.pass_signatures);
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + options.heartbeat,
            options.heartbeat,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                item = deltas.next() => {
                    match item {
                        Some(Ok(delta)) => {
                            record_signatures(&delta, &options.upstream_model, &options.signatures);
                            let chunks = match &delta {
                                UpstreamDelta::Content(text) => state.on_content(text),
                                UpstreamDelta::Reasoning { text, signature } => {
                                    state.on_reasoning(text, signature.as_deref())
                                }
                                UpstreamDelta::ToolCalls(calls) => state.on_tool_calls(calls),
                                UpstreamDelta::Usage(usage) => {
                                    state.output_tokens = usage.completion_tokens;
                                    Vec::new()
                                }
                            };
                            for chunk in chunks {
                                yield Ok(chunk);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!("[Claude-Stream] upstream error mid-stream: {}", e);
                            yield Ok(state.on_error(&e.message));
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

        for chunk in state.on_complete() {
            yield Ok(chunk);
        }
    };
    Box::pin(stream)
}
