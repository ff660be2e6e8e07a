use futures::StreamExt;
use serde_json::Value;

use crate::constants::{USER_AGENT, V1_INTERNAL_BASE_URL};
use crate::error::UpstreamError;
use crate::proxy::upstream::delta::{
    parse_unary, DeltaStream, SseDeltaParser, UpstreamUnaryResponse,
};

/// HTTPS surface of the antigravity backend: streaming and unary generation
/// plus the model-list and project-discovery calls the rotator needs.
pub struct UpstreamClient {
    base_url: String,
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self::with_base_url(V1_INTERNAL_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn build_url(&self, method: &str, query_string: Option<&str>) -> String {
        match query_string {
            Some(qs) => format!("{}:{}?{}", self.base_url, method, qs),
            None => format!("{}:{}", self.base_url, method),
        }
    }

    async fn post(
        &self,
        method: &str,
        query_string: Option<&str>,
        access_token: &str,
        body: &Value,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = self.build_url(method, query_string);
        let response = crate::utils::http::get_generate_client()
            .post(&url)
            .bearer_auth(access_token)
            .header("User-Agent", USER_AGENT.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(UpstreamError::api(status.as_u16(), raw));
        }
        Ok(response)
    }

    /// Streaming generation. Returns a stream of typed deltas in strict
    /// upstream arrival order; the first error item terminates the stream.
    pub async fn stream_generate(
        &self,
        access_token: &str,
        body: &Value,
    ) -> Result<DeltaStream, UpstreamError> {
        let response = self
            .post("streamGenerateContent", Some("alt=sse"), access_token, body)
            .await?;

        let mut byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut parser = SseDeltaParser::new();
            while let Some(item) = byte_stream.next().await {
                match item {
                    Ok(bytes) => {
                        for delta in parser.push(&bytes) {
                            yield Ok::<_, UpstreamError>(delta);
                        }
                    }
                    Err(e) => {
                        yield Err(UpstreamError::transport(format!("stream read failed: {}", e)));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// Unary generation: the entire body is parsed before returning.
    pub async fn generate(
        &self,
        access_token: &str,
        body: &Value,
    ) -> Result<UpstreamUnaryResponse, UpstreamError> {
        let response = self.post("generateContent", None, access_token, body).await?;
        let json = response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::transport(format!("response parsing failed: {}", e)))?;
        Ok(parse_unary(json))
    }

    pub async fn fetch_available_models(
        &self,
        access_token: &str,
    ) -> Result<Value, UpstreamError> {
        let response = self
            .post(
                "fetchAvailableModels",
                None,
                access_token,
                &serde_json::json!({}),
            )
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::transport(format!("model list parsing failed: {}", e)))
    }

    /// Project discovery via loadCodeAssist. `Ok(None)` means the account is
    /// not eligible for a cloudaicompanionProject.
    pub async fn discover_project_id(
        &self,
        access_token: &str,
    ) -> Result<Option<String>, UpstreamError> {
        let body = serde_json::json!({ "metadata": { "ideType": "ANTIGRAVITY" } });
        let response = self.post("loadCodeAssist", None, access_token, &body).await?;
        let data = response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::transport(format!("loadCodeAssist parsing failed: {}", e)))?;
        Ok(data
            .get("cloudaicompanionProject")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
