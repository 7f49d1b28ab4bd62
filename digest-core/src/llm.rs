//! Narrative generation backends
//!
//! Provides a `NarrativeBackend` trait with implementations for:
//! - **Gemini**: hosted `generateContent` API
//! - **Disabled**: always fails, so every theme uses its templated fallback
//!
//! The backend only writes prose. It never decides which theme an email
//! belongs to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LlmConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Cap on the backoff delay between two attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// System instruction sent with every narrative request.
pub const NARRATIVE_SYSTEM_INSTRUCTION: &str = "You are an editor writing a daily briefing. \
You receive a theme name and a JSON list of emails (sender, subject, summary) that were grouped \
under that theme. Write a 2-4 paragraph journalistic narrative that synthesizes the patterns, \
tensions and developments across these emails. Do not restate each email in turn, do not use \
bullet points or markdown headings, and do not invent facts that are not supported by the \
summaries. Separate paragraphs with a blank line.";

// ============================================================================
// Request / trait
// ============================================================================

/// Compact view of one email sent to the LLM. Full content is never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailProjection {
    pub sender: String,
    pub subject: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeRequest {
    pub theme: String,
    pub emails: Vec<EmailProjection>,
}

impl NarrativeRequest {
    /// User turn: theme name followed by the JSON projection of the emails.
    pub fn user_prompt(&self) -> String {
        let emails = serde_json::to_string_pretty(&self.emails).unwrap_or_else(|_| "[]".to_string());
        format!(
            "Theme: {}\nEmail count: {}\n\nEmails:\n{}",
            self.theme,
            self.emails.len(),
            emails
        )
    }
}

/// Abstraction over hosted text-completion providers.
#[async_trait]
pub trait NarrativeBackend: Send + Sync {
    /// Produce narrative prose for one theme.
    async fn generate(&self, request: &NarrativeRequest) -> Result<String, LlmError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no narrative text")]
    EmptyContent,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Narrative generation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("All {attempts} attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },

    #[error("Narrative backend disabled")]
    Disabled,

    #[error("Unknown narrative backend \"{0}\" (expected \"gemini\" or \"disabled\")")]
    UnknownBackend(String),
}

impl LlmError {
    /// Transport failures, rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Longest one `generate` call can take with retries: every attempt hitting
/// the per-request timeout plus the largest backoff between attempts.
pub fn narrative_deadline(config: &LlmConfig) -> Duration {
    let attempts = config.max_retries as u32 + 1;
    let per_attempt = Duration::from_secs(config.timeout_seconds);
    per_attempt * attempts + MAX_RETRY_DELAY * config.max_retries as u32
}

/// Build the configured backend.
///
/// `api_key` falls back to the `GOOGLE_API_KEY` environment variable.
pub fn create_backend(
    config: &LlmConfig,
    api_key: Option<String>,
) -> Result<Arc<dyn NarrativeBackend>, LlmError> {
    match config.backend.as_str() {
        "disabled" => Ok(Arc::new(DisabledNarrativeBackend)),
        "gemini" => {
            let api_key = api_key
                .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
                .unwrap_or_default();
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string());
            Ok(Arc::new(GeminiNarrativeClient::with_base_url(
                config.clone(),
                api_key,
                base_url,
            )?))
        }
        other => Err(LlmError::UnknownBackend(other.to_string())),
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiNarrativeClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiNarrativeClient {
    client: Client,
    config: LlmConfig,
    api_key: String,
    base_url: String,
}

impl GeminiNarrativeClient {
    pub fn new(config: LlmConfig, api_key: String) -> Result<Self, LlmError> {
        Self::with_base_url(config, api_key, GEMINI_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / proxies)
    pub fn with_base_url(
        config: LlmConfig,
        api_key: String,
        base_url: String,
    ) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key,
            base_url,
        })
    }

    async fn generate_once(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.config.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::warn!(code = code, message = %message, "Gemini API error");

            return Err(LlmError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;

        let text = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }

        Ok(text.to_string())
    }
}

#[async_trait]
impl NarrativeBackend for GeminiNarrativeClient {
    async fn generate(&self, request: &NarrativeRequest) -> Result<String, LlmError> {
        let body = GenerateRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: NARRATIVE_SYSTEM_INSTRUCTION.to_string(),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: request.user_prompt(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.generate_once(&body),
            |e: &LlmError| e.is_retryable(),
        )
        .await;

        match result {
            Ok(text) => Ok(text),
            Err(e) if e.is_retryable() => {
                let attempts = self.config.max_retries + 1;
                tracing::error!(
                    attempts = attempts,
                    theme = %request.theme,
                    error = %e,
                    "All narrative attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// DisabledNarrativeBackend
// ============================================================================

/// Backend used when no LLM is configured. Every theme degrades to the
/// templated fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNarrativeBackend;

#[async_trait]
impl NarrativeBackend for DisabledNarrativeBackend {
    async fn generate(&self, _request: &NarrativeRequest) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> LlmConfig {
        LlmConfig {
            backend: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            base_url: None,
            timeout_seconds: 5,
            max_retries: 2,
            retry_delay_ms: 10,
            max_output_tokens: 512,
            temperature: 0.4,
        }
    }

    fn test_request() -> NarrativeRequest {
        NarrativeRequest {
            theme: "Politics".to_string(),
            emails: vec![EmailProjection {
                sender: "playbook@politico.com".to_string(),
                subject: "Election night".to_string(),
                summary: "Senate control hangs on three races.".to_string(),
            }],
        }
    }

    fn mock_generate_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] }
            }]
        })
    }

    #[test]
    fn test_user_prompt_contains_projection_only() {
        let prompt = test_request().user_prompt();
        assert!(prompt.starts_with("Theme: Politics"));
        assert!(prompt.contains("\"subject\": \"Election night\""));
        assert!(prompt.contains("Email count: 1"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Api { code: 503, message: String::new() }.is_retryable());
        assert!(LlmError::Api { code: 429, message: String::new() }.is_retryable());
        assert!(!LlmError::Api { code: 400, message: String::new() }.is_retryable());
        assert!(!LlmError::EmptyContent.is_retryable());
        assert!(!LlmError::Disabled.is_retryable());
    }

    #[tokio::test]
    async fn test_generate_returns_narrative_text() {
        let mock_server = MockServer::start().await;
        let client = GeminiNarrativeClient::with_base_url(
            test_config(),
            "test-api-key".to_string(),
            mock_server.uri(),
        )
        .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-api-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(mock_generate_response("  First paragraph.\n\nSecond.  ")),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.generate(&test_request()).await;

        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result.err());
        assert_eq!(result.unwrap(), "First paragraph.\n\nSecond.");
    }

    #[tokio::test]
    async fn test_generate_exhausts_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client = GeminiNarrativeClient::with_base_url(
            test_config(),
            "test-api-key".to_string(),
            mock_server.uri(),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal error" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        match client.generate(&test_request()).await {
            Err(LlmError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("Internal error"));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_does_not_retry_client_errors() {
        let mock_server = MockServer::start().await;
        let client = GeminiNarrativeClient::with_base_url(
            test_config(),
            "test-api-key".to_string(),
            mock_server.uri(),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "code": 400, "message": "Invalid argument" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.generate(&test_request()).await {
            Err(LlmError::Api { code, .. }) => assert_eq!(code, 400),
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = GeminiNarrativeClient::with_base_url(
            test_config(),
            "test-api-key".to_string(),
            mock_server.uri(),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(mock_generate_response("Recovered.")),
            )
            .mount(&mock_server)
            .await;

        let result = client.generate(&test_request()).await.unwrap();
        assert_eq!(result, "Recovered.");
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_candidates() {
        let mock_server = MockServer::start().await;
        let client = GeminiNarrativeClient::with_base_url(
            test_config(),
            "test-api-key".to_string(),
            mock_server.uri(),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.generate(&test_request()).await;
        assert!(matches!(result, Err(LlmError::EmptyContent)));
    }

    #[test]
    fn test_missing_api_key() {
        let result = GeminiNarrativeClient::new(test_config(), String::new());
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let mut config = test_config();
        config.backend = "gemni".to_string();
        let result = create_backend(&config, Some("test-key".to_string()));
        assert!(matches!(result, Err(LlmError::UnknownBackend(name)) if name == "gemni"));
    }

    #[test]
    fn test_gemini_backend_selected_by_name() {
        let backend = create_backend(&test_config(), Some("test-key".to_string())).unwrap();
        assert_eq!(backend.name(), "gemini");
    }

    #[test]
    fn test_narrative_deadline_covers_every_attempt() {
        // 3 attempts × 5s + 2 backoffs × 10s
        assert_eq!(narrative_deadline(&test_config()), Duration::from_secs(35));

        let mut config = test_config();
        config.max_retries = 0;
        assert_eq!(narrative_deadline(&config), Duration::from_secs(5));

        // Defaults: 3 × 45s + 2 × 10s
        assert_eq!(narrative_deadline(&LlmConfig::default()), Duration::from_secs(155));
    }

    #[tokio::test]
    async fn test_disabled_backend_always_fails() {
        let mut config = test_config();
        config.backend = "disabled".to_string();
        let backend = create_backend(&config, None).unwrap();

        assert_eq!(backend.name(), "disabled");
        assert!(matches!(
            backend.generate(&test_request()).await,
            Err(LlmError::Disabled)
        ));
    }
}
