use serde_json::{json, Value};

/// Upstream default when thinking is enabled but the caller named no budget.
const DEFAULT_THINKING_BUDGET: u64 = 24576;

/// One internal shape for the three inbound generation-parameter dialects.
/// `thinking_budget == Some(0)` means thinking explicitly off.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub thinking_budget: Option<u64>,
}

impl GenerationParams {
    pub fn from_openai(body: &Value) -> Self {
        let thinking_budget = body
            .get("thinking_budget")
            .and_then(|v| v.as_u64())
            .or_else(|| {
                body.get("reasoning_effort")
                    .and_then(|v| v.as_str())
                    .and_then(|effort| match effort {
                        "low" => Some(1024),
                        "medium" => Some(16000),
                        "high" => Some(32000),
                        _ => None,
                    })
            });
        Self {
            max_tokens: body.get("max_tokens").and_then(|v| v.as_u64()),
            temperature: body.get("temperature").and_then(|v| v.as_f64()),
            top_p: body.get("top_p").and_then(|v| v.as_f64()),
            top_k: body.get("top_k").and_then(|v| v.as_u64()),
            thinking_budget,
        }
    }

    pub fn from_claude(body: &Value) -> Self {
        let thinking_budget = body.get("thinking").and_then(|thinking| {
            match thinking.get("type").and_then(|t| t.as_str()) {
                Some("enabled") => thinking.get("budget_tokens").and_then(|v| v.as_u64()),
                Some("disabled") => Some(0),
                _ => None,
            }
        });
        Self {
            max_tokens: body.get("max_tokens").and_then(|v| v.as_u64()),
            temperature: body.get("temperature").and_then(|v| v.as_f64()),
            top_p: body.get("top_p").and_then(|v| v.as_f64()),
            top_k: body.get("top_k").and_then(|v| v.as_u64()),
            thinking_budget,
        }
    }

    pub fn from_gemini(generation_config: &Value) -> Self {
        let thinking = generation_config.get("thinkingConfig");
        let thinking_budget = thinking.and_then(|config| {
            let include = config
                .get("includeThoughts")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if !include {
                return Some(0);
            }
            config.get("thinkingBudget").and_then(|v| v.as_u64())
        });
        Self {
            max_tokens: generation_config
                .get("maxOutputTokens")
                .and_then(|v| v.as_u64()),
            temperature: generation_config.get("temperature").and_then(|v| v.as_f64()),
            top_p: generation_config.get("topP").and_then(|v| v.as_f64()),
            top_k: generation_config.get("topK").and_then(|v| v.as_u64()),
            thinking_budget,
        }
    }

    /// Projects back to the upstream `generationConfig` shape. The effective
    /// budget is zero whenever the model cannot think, which in turn forces
    /// `includeThoughts: false`.
    pub fn to_generation_config(&self, model: &str, thinking_supported: bool) -> Value {
        let budget = if thinking_supported {
            self.thinking_budget.unwrap_or(DEFAULT_THINKING_BUDGET)
        } else {
            0
        };
        let include_thoughts = budget != 0;

        let mut config = json!({
            "candidateCount": 1,
            "thinkingConfig": {
                "includeThoughts": include_thoughts,
                "thinkingBudget": budget,
            }
        });
        let obj = config.as_object_mut().unwrap();
        if let Some(max_tokens) = self.max_tokens {
            obj.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if let Some(temperature) = self.temperature {
            obj.insert("temperature".to_string(), json!(temperature));
        }
        // Upstream rejects topP on thinking-enabled claude models.
        let drop_top_p = include_thoughts && super::models::is_claude_model(model);
        if let (Some(top_p), false) = (self.top_p, drop_top_p) {
            obj.insert("topP".to_string(), json!(top_p));
        }
        if let Some(top_k) = self.top_k {
            obj.insert("topK".to_string(), json!(top_k));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same_intent_params() -> GenerationParams {
        GenerationParams {
            max_tokens: Some(2048),
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(40),
            thinking_budget: Some(16000),
        }
    }

    #[test]
    fn three_surfaces_normalize_to_identical_params() {
        let openai = GenerationParams::from_openai(&serde_json::json!({
            "max_tokens": 2048, "temperature": 0.7, "top_p": 0.9, "top_k": 40,
            "reasoning_effort": "medium"
        }));
        let claude = GenerationParams::from_claude(&serde_json::json!({
            "max_tokens": 2048, "temperature": 0.7, "top_p": 0.9, "top_k": 40,
            "thinking": { "type": "enabled", "budget_tokens": 16000 }
        }));
        let gemini = GenerationParams::from_gemini(&serde_json::json!({
            "maxOutputTokens": 2048, "temperature": 0.7, "topP": 0.9, "topK": 40,
            "thinkingConfig": { "includeThoughts": true, "thinkingBudget": 16000 }
        }));

        let expected = same_intent_params();
        assert_eq!(openai, expected);
        assert_eq!(claude, expected);
        assert_eq!(gemini, expected);
    }

    #[test]
    fn same_intent_projects_to_same_generation_config() {
        let params = same_intent_params();
        let a = params.to_generation_config("gemini-3-pro-high", true);
        let b = params.to_generation_config("gemini-3-pro-high", true);
        assert_eq!(a, b);
        assert_eq!(a["maxOutputTokens"], 2048);
        assert_eq!(a["temperature"], 0.7);
        assert_eq!(a["topP"], 0.9);
        assert_eq!(a["topK"], 40);
        assert_eq!(a["candidateCount"], 1);
        assert_eq!(a["thinkingConfig"]["includeThoughts"], true);
        assert_eq!(a["thinkingConfig"]["thinkingBudget"], 16000);
    }

    #[test]
    fn claude_with_thinking_drops_top_p() {
        let params = same_intent_params();
        let config = params.to_generation_config("claude-sonnet-4-5-thinking", true);
        assert!(config.get("topP").is_none());
        assert_eq!(config["topK"], 40);

        let without_thinking = GenerationParams {
            thinking_budget: Some(0),
            ..same_intent_params()
        };
        let config = without_thinking.to_generation_config("claude-sonnet-4-5", true);
        assert_eq!(config["topP"], 0.9);
    }

    #[test]
    fn zero_budget_disables_thoughts_even_when_supported() {
        let params = GenerationParams {
            thinking_budget: Some(0),
            ..Default::default()
        };
        let config = params.to_generation_config("gemini-3-pro-high", true);
        assert_eq!(config["thinkingConfig"]["includeThoughts"], false);
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], 0);
    }

    #[test]
    fn unsupported_model_forces_thoughts_off() {
        let params = same_intent_params();
        let config = params.to_generation_config("gemini-3-flash-lite", false);
        assert_eq!(config["thinkingConfig"]["includeThoughts"], false);
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], 0);
    }

    #[test]
    fn gemini_include_thoughts_false_normalizes_to_zero_budget() {
        let params = GenerationParams::from_gemini(&serde_json::json!({
            "thinkingConfig": { "includeThoughts": false, "thinkingBudget": 8192 }
        }));
        assert_eq!(params.thinking_budget, Some(0));
    }

    #[test]
    fn reasoning_effort_tiers_map_to_budgets() {
        for (effort, budget) in [("low", 1024), ("medium", 16000), ("high", 32000)] {
            let params = GenerationParams::from_openai(&serde_json::json!({
                "reasoning_effort": effort
            }));
            assert_eq!(params.thinking_budget, Some(budget));
        }
    }

    #[test]
    fn claude_disabled_thinking_is_zero_budget() {
        let params = GenerationParams::from_claude(&serde_json::json!({
            "thinking": { "type": "disabled" }
        }));
        assert_eq!(params.thinking_budget, Some(0));
    }
}
