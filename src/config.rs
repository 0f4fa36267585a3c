use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-wide tuning knobs. One instance per `AnalysisEngine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reformulation ceiling: attempt 0 is the original question, attempts
    /// 1..=max_reformulations are controller-driven retries.
    pub max_reformulations: u8,

    /// Wall-clock budget for one generation call.
    pub generation_timeout: Duration,

    /// Wall-clock budget for one sandbox execution.
    pub execution_timeout: Duration,

    /// Number of conversation entries rendered into a prompt.
    pub memory_window: usize,

    /// Jaro-Winkler threshold for entity and column matching.
    pub fuzzy_threshold: f64,

    /// A categorical column with at most this many distinct values is
    /// considered low-cardinality for chart inference.
    pub low_cardinality_limit: usize,

    /// Category count below which a single-series breakdown renders as pie.
    pub pie_category_limit: usize,

    /// Backend model identifier.
    pub model: String,

    /// Backend base URL (OpenAI-compatible chat completions).
    pub base_url: String,

    /// Backend API key. The placeholder key selects the mock backend.
    pub api_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_reformulations: 3,
            generation_timeout: Duration::from_secs(30),
            execution_timeout: Duration::from_secs(30),
            memory_window: 10,
            fuzzy_threshold: 0.82,
            low_cardinality_limit: 20,
            pie_category_limit: 8,
            model: "gpt-4".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "dummy-api-key".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = key;
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("DATAPILOT_MODEL") {
            config.model = model;
        }
        config
    }

    /// Total generation calls allowed per resolution.
    pub fn max_generation_calls(&self) -> usize {
        self.max_reformulations as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_ceiling_counts_the_original_call() {
        let config = EngineConfig::default();
        assert_eq!(config.max_generation_calls(), 4);
    }
}
