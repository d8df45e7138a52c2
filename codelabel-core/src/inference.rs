//! Inference module for codelabel — chat-completions classification backend
//!
//! Provides a `ClassifierBackend` trait with one HTTP implementation:
//! - **OpenAI chat completions** — `POST {base_url}/chat/completions`
//!
//! Transient failures (connection errors, timeouts, 408/429/5xx) are retried
//! with jittered exponential backoff. Everything else fails on first attempt.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::ModelConfig;
use crate::prompt::Prompt;

// ============================================================================
// ClassifierBackend trait
// ============================================================================

/// Abstraction over hosted model endpoints.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    /// Send one system/user prompt pair and return the raw response text.
    async fn classify(&self, prompt: &Prompt) -> Result<String, InferenceError>;

    /// Model identifier recorded alongside each prediction.
    fn model(&self) -> &str;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no choices")]
    MissingChoice,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} attempts failed, last error: {last_error}")]
    RetryExhausted { attempts: usize, last_error: String },
}

impl InferenceError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Http(e) => {
                e.is_timeout() || e.is_connect() || (e.is_request() && !e.is_builder())
            }
            InferenceError::Api { code, .. } => {
                matches!(*code, 408 | 429) || (500..600).contains(code)
            }
            InferenceError::MissingChoice
            | InferenceError::MissingApiKey
            | InferenceError::RetryExhausted { .. } => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl InferenceConfig {
    pub fn from_model_config(model: &ModelConfig) -> Self {
        let api_key = model
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: model.name.clone(),
            base_url: model.base_url.trim_end_matches('/').to_string(),
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            request_timeout_secs: model.request_timeout_secs,
            max_retries: model.max_retries,
            retry_delay_ms: model.retry_delay_ms,
        }
    }
}

/// Create the HTTP classification backend from configuration.
pub fn create_backend(config: InferenceConfig) -> Result<Box<dyn ClassifierBackend>, InferenceError> {
    Ok(Box::new(OpenAiChatClient::new(config)?))
}

// ============================================================================
// Chat completions API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

/// Chat completions client for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: InferenceConfig,
}

impl OpenAiChatClient {
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        if config.api_key.is_empty() {
            return Err(InferenceError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a client against a custom base URL (for testing / proxies)
    pub fn with_base_url(
        mut config: InferenceConfig,
        base_url: String,
    ) -> Result<Self, InferenceError> {
        config.base_url = base_url.trim_end_matches('/').to_string();
        Self::new(config)
    }

    /// Total attempts made before giving up on a transient failure.
    pub fn max_attempts(&self) -> usize {
        self.config.max_retries + 1
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, InferenceError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.complete_once(prompt),
            |e: &InferenceError| {
                let transient = e.is_transient();
                if transient {
                    tracing::warn!(error = %e, model = %self.config.model, "Transient inference failure, retrying");
                }
                transient
            },
        )
        .await;

        match result {
            Ok(text) => Ok(text),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    attempts = self.max_attempts(),
                    error = %e,
                    "All inference retry attempts failed"
                );
                Err(InferenceError::RetryExhausted {
                    attempts: self.max_attempts(),
                    last_error: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn complete_once(&self, prompt: &Prompt) -> Result<String, InferenceError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::debug!(code = status.as_u16(), message = %message, "Chat completions API error");

            return Err(InferenceError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or(InferenceError::MissingChoice)?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl ClassifierBackend for OpenAiChatClient {
    async fn classify(&self, prompt: &Prompt) -> Result<String, InferenceError> {
        self.complete(prompt).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> InferenceConfig {
        InferenceConfig {
            api_key: api_key.to_string(),
            model: "gpt-4o".to_string(),
            base_url: String::new(),
            temperature: 0.0,
            max_tokens: 4,
            request_timeout_secs: 5,
            max_retries: 3,
            retry_delay_ms: 10,
        }
    }

    fn test_prompt() -> Prompt {
        Prompt {
            system: "code it for Operator".to_string(),
            user: "- a > b\n+ a >= b".to_string(),
        }
    }

    fn mock_chat_response(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn test_classify_sends_system_and_user_messages() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("test-api-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(body_json(serde_json::json!({
                "model": "gpt-4o",
                "messages": [
                    { "role": "system", "content": "code it for Operator" },
                    { "role": "user", "content": "- a > b\n+ a >= b" }
                ],
                "temperature": 0.0,
                "max_tokens": 4
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_chat_response("1")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.classify(&test_prompt()).await;

        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result.err());
        assert_eq!(result.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_classify_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("test-api-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded", "type": "rate_limit_error" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_chat_response("0")))
            .mount(&mock_server)
            .await;

        let result = client.classify(&test_prompt()).await;

        assert!(result.is_ok(), "Expected success after retry");
        assert_eq!(result.unwrap(), "0");
    }

    #[tokio::test]
    async fn test_classify_exhausts_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("test-api-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Internal server error" }
            })))
            .expect(4)
            .mount(&mock_server)
            .await;

        let result = client.classify(&test_prompt()).await;

        match result {
            Err(InferenceError::RetryExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 4, "1 initial attempt + 3 retries");
                assert!(last_error.contains("Internal server error"));
            }
            other => panic!("Expected RetryExhausted error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_classify_does_not_retry_on_401() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("bad-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Incorrect API key provided" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.classify(&test_prompt()).await;

        match result {
            Err(InferenceError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_classify_null_content_is_empty_text() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("test-api-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": null } }]
            })))
            .mount(&mock_server)
            .await;

        let result = client.classify(&test_prompt()).await.unwrap();
        assert_eq!(result, "");
    }

    #[tokio::test]
    async fn test_classify_empty_choices_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("test-api-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.classify(&test_prompt()).await;
        assert!(matches!(result, Err(InferenceError::MissingChoice)));
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let result = OpenAiChatClient::new(test_config(""));
        assert!(matches!(result, Err(InferenceError::MissingApiKey)));
    }

    #[test]
    fn test_transient_classification() {
        let api = |code| InferenceError::Api {
            code,
            message: String::new(),
        };
        assert!(api(429).is_transient());
        assert!(api(503).is_transient());
        assert!(api(408).is_transient());
        assert!(!api(400).is_transient());
        assert!(!api(401).is_transient());
        assert!(!InferenceError::MissingChoice.is_transient());
    }

    #[test]
    fn test_config_prefers_explicit_key_and_trims_base_url() {
        let model = ModelConfig {
            api_key: Some("explicit".to_string()),
            base_url: "http://localhost:8080/v1/".to_string(),
            ..ModelConfig::default()
        };
        let config = InferenceConfig::from_model_config(&model);
        assert_eq!(config.api_key, "explicit");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_backend_trait_object() {
        let mock_server = MockServer::start().await;
        let backend: Box<dyn ClassifierBackend> = Box::new(
            OpenAiChatClient::with_base_url(test_config("test-api-key"), mock_server.uri())
                .unwrap(),
        );

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_chat_response("Yes.")))
            .mount(&mock_server)
            .await;

        let text = backend.classify(&test_prompt()).await.unwrap();
        assert_eq!(text, "Yes.");
        assert_eq!(backend.model(), "gpt-4o");
        assert_eq!(backend.name(), "openai-chat");
    }
}
