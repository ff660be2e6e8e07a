use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::common::{
    build_json_response, build_sse_response, call_upstream_with_retry, new_trace_id,
    upstream_status, ChatCall, ChatCallError,
};
use crate::proxy::mappers::{self, models, RequestContext, StreamOptions};
use crate::proxy::state::CoreServices;

fn error_response(status: StatusCode, message: &str) -> Response {
    let status_label = match status.as_u16() {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        _ => "INTERNAL",
    };
    (
        status,
        Json(json!({
            "error": { "code": status.as_u16(), "message": message, "status": status_label }
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

/// The upstream listing reports remaining quota per model; snapshot it while
/// it is in hand.
fn record_quota_snapshot(quota: &crate::proxy::token::QuotaCache, refresh_token: &str, listing: &Value) {
    let Some(model_rows) = listing.get("models").and_then(|m| m.as_array()) else {
        return;
    };
    let mut snapshot = HashMap::new();
    for row in model_rows {
        let Some(name) = row.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        let Some(remaining) = row
            .get("remaining")
            .or_else(|| row.get("quotaRemaining"))
            .and_then(|r| r.as_i64())
        else {
            continue;
        };
        let reset_time = row
            .get("resetTime")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        snapshot.insert(
            name.trim_start_matches("models/").to_string(),
            crate::proxy::token::quota_cache::ModelQuota {
                remaining,
                reset_time,
            },
        );
    }
    if !snapshot.is_empty() {
        quota.update(refresh_token, snapshot);
    }
}

/// Model discovery. Prefers the upstream list when a credential is live,
/// falling back to the static catalog.
pub async fn handle_list_models(State(core): State<Arc<CoreServices>>) -> Json<Value> {
    if let Some(credential) = core.token_manager.get_token().await {
        match core
            .upstream
            .fetch_available_models(&credential.access_token)
            .await
        {
            Ok(listing) if listing.get("models").is_some() => {
                record_quota_snapshot(&core.quota, &credential.refresh_token, &listing);
                return Json(listing);
            }
            Ok(_) => debug!("upstream model list had no models field, using catalog"),
            Err(e) => debug!("upstream model list failed ({}), using catalog", e),
        }
    }
    Json(models::gemini_models_payload())
}

pub async fn handle_get_model(Path(model): Path<String>) -> Response {
    if model.contains(':') {
        return error_response(StatusCode::NOT_FOUND, "unknown action");
    }
    Json(models::gemini_model_payload(&model)).into_response()
}

/// POST /v1beta/models/{model}:{action}. Axum captures the whole last segment,
/// so the action rides in the same path parameter as the model name.
pub async fn handle_model_action(
    State(core): State<Arc<CoreServices>>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let (model, action) = match model_action.split_once(':') {
        Some((model, action)) => (model.to_string(), action.to_string()),
        None => (model_action, "generateContent".to_string()),
    };

    let stream = match action.as_str() {
        "streamGenerateContent" => true,
        "generateContent" => query.get("alt").map(|alt| alt == "sse").unwrap_or(false),
        _ => {
            return error_response(
                StatusCode::NOT_FOUND,
                &format!("unsupported action '{}'", action),
            )
        }
    };

    if body.get("contents").and_then(|c| c.as_array()).is_none() {
        return error_response(StatusCode::BAD_REQUEST, "missing 'contents' field");
    }
    let mapped_model = models::resolve_model(&model);
    let trace_id = new_trace_id();
    info!(
        "[{}] Gemini {} request: {} -> {} | stream: {}",
        trace_id, action, model, mapped_model, stream
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
            mappers::gemini::request::transform_request(&body, &ctx)
        },
        stream,
        &trace_id,
    )
    .await;

    match result {
        Ok((credential, ChatCall::Stream(deltas))) => {
            let sse = mappers::gemini::streaming::create_sse_stream(
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
            let payload = mappers::gemini::response::build_response(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::token::QuotaCache;

    fn temp_quota() -> QuotaCache {
        let path = std::env::temp_dir()
            .join(format!("apogee-gemini-{}", uuid::Uuid::new_v4()))
            .join("quotas.json");
        QuotaCache::new(path)
    }

    #[test]
    fn quota_snapshot_is_recorded_from_model_listing() {
        let quota = temp_quota();
        let listing = json!({
            "models": [
                { "name": "models/gemini-3-pro-high", "remaining": 73, "resetTime": "2026-08-02T12:00:00Z" },
                { "name": "models/gemini-3-flash" }
            ]
        });
        record_quota_snapshot(&quota, "rt-1", &listing);

        let record = quota.get("rt-1").expect("snapshot recorded");
        assert_eq!(
            record.models.get("gemini-3-pro-high").map(|m| m.remaining),
            Some(73)
        );
        // Rows without quota data are skipped, not zeroed.
        assert!(record.models.get("gemini-3-flash").is_none());
    }

    #[test]
    fn listing_without_quota_rows_records_nothing() {
        let quota = temp_quota();
        record_quota_snapshot(&quota, "rt-1", &json!({ "models": [] }));
        assert!(quota.get("rt-1").is_none());
    }
}
