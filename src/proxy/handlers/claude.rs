use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::common::{
    build_json_response, build_sse_response, call_upstream_with_retry, new_trace_id,
    upstream_status, ChatCall, ChatCallError,
};
use crate::proxy::mappers::{self, models, RequestContext, StreamOptions};
use crate::proxy::state::CoreServices;

fn error_type_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        _ => "api_error",
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "type": "error",
            "error": { "type": error_type_for(status), "message": message }
        })),
    )
        .into_response()
}

fn map_call_error(error: ChatCallError) -> Response {
    match error {
        ChatCallError::NoCredential => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "no available token")
        }
        ChatCallError::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, &message),
        ChatCallError::Upstream(e) => error_response(upstream_status(&e), &e.message),
    }
}

pub async fn handle_messages(
    State(core): State<Arc<CoreServices>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(model) = body.get("model").and_then(|m| m.as_str()).map(String::from) else {
        return error_response(StatusCode::BAD_REQUEST, "missing 'model' field");
    };
    if body.get("messages").and_then(|m| m.as_array()).is_none() {
        return error_response(StatusCode::BAD_REQUEST, "missing 'messages' field");
    }
    let stream = body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false);
    let mapped_model = models::resolve_model(&model);
    let trace_id = new_trace_id();
    info!(
        "[{}] Claude messages request: {} -> {} | stream: {}",
        trace_id, model, mapped_model, stream
    );

    let result = call_upstream_with_retry(
        &core,
        |credential| {
            let ctx = RequestContext {
                model: &mapped_model,
                project_id: credential.project_id.as_deref().unwrap_or(""),
                session_id: &credential.session_id,
                system_instruction: &core.config.system_instruction,
                signatures: &core.signatures,
            };
            mappers::claude::request::transform_request(&body, &ctx)
        },
        stream,
        &trace_id,
    )
    .await;

    match result {
        Ok((credential, ChatCall::Stream(deltas))) => {
            let sse = mappers::claude::streaming::create_sse_stream(
                deltas,
                StreamOptions {
                    model: model.clone(),
                    upstream_model: mapped_model.clone(),
                    heartbeat: core.config.heartbeat_interval(),
                    pass_signatures: core.config.pass_signature_to_client,
                    signatures: core.signatures.clone(),
                },
            );
            build_sse_response(Body::from_stream(sse), &credential.email, &mapped_model)
        }
        Ok((credential, ChatCall::Unary(upstream))) => {
            if let Some(signature) = &upstream.reasoning_signature {
                core.signatures.set_reasoning(&mapped_model, signature.clone());
            }
            let payload = mappers::claude::response::build_response(
                &upstream,
                &model,
                core.config.pass_signature_to_client,
            );
            build_json_response(
                StatusCode::OK,
                &payload,
                Some(&credential.email),
                Some(&mapped_model),
            )
        }
        Err(error) => map_call_error(error),
    }
}
