use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DigestConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Hosted LLM used for narrative prose only.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// "gemini" or "disabled"
    pub backend: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            base_url: None,
            timeout_seconds: 45,
            max_retries: 2,
            retry_delay_ms: 500,
            max_output_tokens: 1024,
            temperature: 0.4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_syntheses: usize,
    pub top_keywords: usize,
    pub processing_method: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_syntheses: 3,
            top_keywords: 10,
            processing_method: crate::taxonomy::PROCESSING_METHOD.to_string(),
        }
    }
}

impl DigestConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
