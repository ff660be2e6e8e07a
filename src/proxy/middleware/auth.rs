use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::config::AppConfig;

/// Shared-secret gate for the /v1 and /v1beta routers. Accepts the key as
/// either `Authorization: Bearer <key>` or `x-api-key: <key>`. An empty
/// configured key disables the check.
pub async fn require_api_key(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if config.api_key.is_empty() {
        return next.run(request).await;
    }

    let headers = request.headers();
    let bearer_ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == config.api_key)
        .unwrap_or(false);
    let api_key_ok = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|key| key == config.api_key)
        .unwrap_or(false);

    if bearer_ok || api_key_ok {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid API Key" })),
        )
            .into_response()
    }
}
