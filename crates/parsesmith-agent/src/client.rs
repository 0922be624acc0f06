//! Chat completions client for the generation backend
//!
//! The client is built once at startup and handed to the generator; each
//! request is a single stateless user message.

use crate::auth;
use crate::types::{ChatMessage, ChatRequest, ChatResponse, Completion};
use async_trait::async_trait;
use parsesmith_core::{GenerationConfig, ParseSmithError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 30;

/// A text-generation backend (allows mocking in tests)
#[async_trait]
pub trait CodeModel: Send + Sync {
    /// Request a completion for a single user prompt
    async fn complete(&self, prompt: &str, attempt: usize) -> Result<Completion>;

    /// Model name, for logging
    fn model_name(&self) -> &str;
}

/// Client for OpenAI-compatible chat completion APIs (Groq by default)
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl ChatClient {
    /// Create a client with an explicit API key
    pub fn new(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ParseSmithError::Api(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Create a client, reading the API key from the configured environment variable
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = auth::get_api_key(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_for(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl CodeModel for ChatClient {
    async fn complete(&self, prompt: &str, attempt: usize) -> Result<Completion> {
        tracing::info!(
            "Requesting parser from {} (attempt {})",
            self.model,
            attempt
        );

        let request = self.request_for(prompt);

        // Retry loop with exponential backoff for rate limits and 5xx
        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tracing::debug!("Sending chat completion request (try {})", retries + 1);

            let response = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| ParseSmithError::Api(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;

                if retries > MAX_RETRIES {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown".to_string());
                    return Err(ParseSmithError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries. Last error: {}",
                        MAX_RETRIES, error_text
                    )));
                }

                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                tracing::warn!(
                    "Rate limited (429). Waiting {} seconds before retry {}/{}",
                    wait_secs,
                    retries,
                    MAX_RETRIES
                );

                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    tracing::warn!(
                        "Server error ({}). Waiting {} seconds before retry {}/{}",
                        status,
                        backoff_secs,
                        retries,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                return Err(ParseSmithError::Api(format!(
                    "Backend error {}: {}",
                    status, error_text
                )));
            }

            let chat_response: ChatResponse = response
                .json()
                .await
                .map_err(|e| ParseSmithError::Api(format!("Failed to parse response: {}", e)))?;

            return completion_from_response(chat_response, attempt);
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn completion_from_response(response: ChatResponse, attempt: usize) -> Result<Completion> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ParseSmithError::Api("No content in response".to_string()))?;

    match &response.usage {
        Some(usage) => tracing::info!(
            "Attempt {} completion received ({} chars, {} prompt tokens, {} completion tokens)",
            attempt,
            text.len(),
            usage.prompt_tokens,
            usage.completion_tokens
        ),
        None => tracing::info!(
            "Attempt {} completion received ({} chars)",
            attempt,
            text.len()
        ),
    }

    Ok(Completion {
        text,
        usage: response.usage,
    })
}

/// Scripted reply for [`MockCodeModel`]
#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(String),
}

/// Mock backend for testing
///
/// Replies are consumed in order; once exhausted every call fails.
/// Prompts are recorded for inspection.
#[derive(Debug, Default)]
pub struct MockCodeModel {
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<String>>,
}

impl MockCodeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(MockReply::Text(text.into()));
        self
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(MockReply::Fail(message.into()));
        self
    }

    fn push(&self, reply: MockReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl CodeModel for MockCodeModel {
    async fn complete(&self, prompt: &str, _attempt: usize) -> Result<Completion> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());

        match reply {
            Some(MockReply::Text(text)) => Ok(Completion::text(text)),
            Some(MockReply::Fail(message)) => Err(ParseSmithError::Api(message)),
            None => Err(ParseSmithError::Api("No mock reply left".to_string())),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatChoice, ChatResponseMessage, Usage};

    fn response_with(content: Option<&str>) -> ChatResponse {
        ChatResponse {
            choices: vec![ChatChoice {
                message: ChatResponseMessage {
                    content: content.map(str::to_string),
                },
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
            }),
        }
    }

    #[test]
    fn test_client_builder() {
        let config = GenerationConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..GenerationConfig::default()
        };
        let client = ChatClient::new(&config, "key").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.model_name(), "llama-3.1-8b-instant");

        let request = client.request_for("write a parser");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
        assert_eq!(request.messages[0].content, "write a parser");
    }

    #[test]
    fn test_from_config_without_key() {
        let config = GenerationConfig {
            api_key_env: "PARSESMITH_CLIENT_TEST_UNSET_KEY".to_string(),
            ..GenerationConfig::default()
        };
        let err = ChatClient::from_config(&config).unwrap_err();
        assert!(matches!(err, ParseSmithError::Auth(_)));
    }

    #[test]
    fn test_completion_from_response() {
        let completion = completion_from_response(response_with(Some("  code  ")), 1).unwrap();
        assert_eq!(completion.text, "code");
        assert_eq!(completion.usage.unwrap().completion_tokens, 20);
    }

    #[test]
    fn test_completion_empty_content_is_error() {
        assert!(completion_from_response(response_with(None), 1).is_err());
        assert!(completion_from_response(response_with(Some("   ")), 1).is_err());

        let no_choices = ChatResponse {
            choices: Vec::new(),
            usage: None,
        };
        assert!(completion_from_response(no_choices, 1).is_err());
    }

    #[tokio::test]
    async fn test_mock_model_replays_in_order() {
        let model = MockCodeModel::new()
            .with_reply("first")
            .with_failure("network down");

        assert_eq!(model.complete("p1", 1).await.unwrap().text, "first");
        assert!(model.complete("p2", 2).await.is_err());
        assert!(model.complete("p3", 3).await.is_err());
        assert_eq!(model.prompts(), vec!["p1", "p2", "p3"]);
        assert_eq!(model.call_count(), 3);
    }
}
