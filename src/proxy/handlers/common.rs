use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::UpstreamError;
use crate::proxy::state::CoreServices;
use crate::proxy::token::Credential;
use crate::proxy::upstream::{DeltaStream, UpstreamUnaryResponse};

/// Outcome of one fully-retried upstream call.
pub enum ChatCall {
    Stream(DeltaStream),
    Unary(UpstreamUnaryResponse),
}

pub enum ChatCallError {
    /// The rotator found no live credential.
    NoCredential,
    /// The request body could not be translated.
    BadRequest(String),
    /// Upstream failed after the retry budget was spent.
    Upstream(UpstreamError),
}

/// Acquire-translate-call loop shared by all three chat surfaces. Only 429
/// retries, re-acquiring a credential each attempt; everything else fails
/// fast. Runs entirely before the first byte reaches the client.
pub async fn call_upstream_with_retry(
    core: &CoreServices,
    build_body: impl Fn(&Credential) -> Result<Value, String>,
    stream: bool,
    trace_id: &str,
) -> Result<(Credential, ChatCall), ChatCallError> {
    let retry_times = core.config.retry_times;
    let mut attempt = 0u32;
    loop {
        let Some(credential) = core.token_manager.get_token().await else {
            warn!("[{}] no available token", trace_id);
            return Err(ChatCallError::NoCredential);
        };
        info!("[{}] using account: {}", trace_id, credential.email);

        let body = build_body(&credential).map_err(ChatCallError::BadRequest)?;

        let result = if stream {
            core.upstream
                .stream_generate(&credential.access_token, &body)
                .await
                .map(ChatCall::Stream)
        } else {
            core.upstream
                .generate(&credential.access_token, &body)
                .await
                .map(ChatCall::Unary)
        };

        match result {
            Ok(call) => return Ok((credential, call)),
            Err(e) if e.is_rate_limited() && attempt < retry_times => {
                attempt += 1;
                debug!(
                    "[{}] upstream 429, retrying ({}/{})",
                    trace_id, attempt, retry_times
                );
                continue;
            }
            Err(e) => return Err(ChatCallError::Upstream(e)),
        }
    }
}

/// Effective HTTP status for an upstream failure: pass the original through
/// when there is one, 500 for pure transport errors.
pub fn upstream_status(error: &UpstreamError) -> StatusCode {
    if error.status == 0 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::from_u16(error.status).unwrap_or(StatusCode::BAD_GATEWAY)
    }
}

pub fn build_sse_response(body: Body, account_email: &str, mapped_model: &str) -> Response {
    Response::builder()
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .header("X-Account-Email", account_email)
        .header("X-Mapped-Model", mapped_model)
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub fn build_json_response(
    status: StatusCode,
    payload: &Value,
    account_email: Option<&str>,
    mapped_model: Option<&str>,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header("Content-Type", "application/json");
    if let Some(email) = account_email {
        builder = builder.header("X-Account-Email", email);
    }
    if let Some(model) = mapped_model {
        builder = builder.header("X-Mapped-Model", model);
    }
    builder
        .body(Body::from(payload.to_string()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub fn new_trace_id() -> String {
    format!("req_{}", chrono::Utc::now().timestamp_millis())
}
