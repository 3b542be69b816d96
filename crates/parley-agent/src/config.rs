use parley_core::{ParleyError, ParleyResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL_ID: &str = "gemini-1.5-flash-latest";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl ModelConfig {
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or(DEFAULT_BASE_URL)
    }

    /// A relay without a credential must not start.
    pub fn validate(&self) -> ParleyResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ParleyError::Config(
                "GOOGLE_API_KEY is not set (model.api_key)".into(),
            ));
        }
        if self.model_id.trim().is_empty() {
            return Err(ParleyError::Config("model id must not be empty".into()));
        }
        Ok(())
    }
}
