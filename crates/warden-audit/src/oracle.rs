use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use warden_core::{OracleConfig, WardenError};

/// A message in a chat conversation with the oracle.
///
/// # Examples
///
/// ```
/// use warden_audit::oracle::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Audit this contract".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use warden_audit::oracle::Role;
///
/// let role = Role::System;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// One oracle request: a system instruction plus a user prompt.
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    /// System instruction framing the oracle's role.
    pub system: &'a str,
    /// Rendered user prompt.
    pub prompt: &'a str,
    /// Sampling temperature for this call.
    pub temperature: f32,
}

/// Ways a single oracle call can fail.
///
/// All variants are treated as transient by the stage executor and feed
/// the same retry/backoff path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// The call did not finish within its time bound.
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    /// The provider throttled the request.
    #[error("oracle rate limited: {0}")]
    RateLimited(String),
    /// Connection, HTTP status, or body transfer failure.
    #[error("oracle transport error: {0}")]
    Transport(String),
    /// The provider answered but the payload had no usable text.
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),
}

/// The external analysis engine.
///
/// Implementations make exactly one request per call and carry no retry
/// logic; retries, backoff and response-shape checks belong to the stages.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send one request and return the raw response text.
    async fn call(&self, request: OracleRequest<'_>) -> Result<String, OracleError>;

    /// Identifier of the model answering the calls, for reporting.
    fn model(&self) -> &str;
}

/// OpenAI-compatible chat completions oracle.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint:
/// OpenAI, Ollama, vLLM, LiteLLM, etc.
///
/// # Examples
///
/// ```
/// use warden_core::OracleConfig;
/// use warden_audit::oracle::LlmOracle;
///
/// let config = OracleConfig {
///     api_key: Some("test-key".into()),
///     ..OracleConfig::default()
/// };
/// let oracle = LlmOracle::new(&config).unwrap();
/// ```
pub struct LlmOracle {
    client: reqwest::Client,
    config: OracleConfig,
}

impl LlmOracle {
    /// Create a new oracle client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Oracle`] if the HTTP client cannot be built.
    pub fn new(config: &OracleConfig) -> Result<Self, WardenError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| WardenError::Oracle(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn endpoint(&self) -> String {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/');
        format!("{base_url}/v1/chat/completions")
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn call(&self, request: OracleRequest<'_>) -> Result<String, OracleError> {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: request.system.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: request.prompt.to_string(),
            },
        ];

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let mut http = self.client.post(self.endpoint());
        if let Some(api_key) = &self.config.api_key {
            http = http.header("Authorization", format!("Bearer {api_key}"));
        }
        http = http.header("Content-Type", "application/json");

        let response = http
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body_text));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OracleError::MalformedResponse(format!("invalid JSON body: {e}")))?;

        extract_content(&response_body)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

impl LlmOracle {
    fn classify(&self, err: reqwest::Error) -> OracleError {
        if err.is_timeout() {
            OracleError::Timeout(self.config.timeout())
        } else {
            OracleError::Transport(format!("request failed: {err}"))
        }
    }
}

fn classify_status(status: StatusCode, body: String) -> OracleError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        OracleError::RateLimited(format!("{status}: {body}"))
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        OracleError::Transport(format!("upstream timeout {status}: {body}"))
    } else {
        OracleError::Transport(format!("API error {status}: {body}"))
    }
}

fn extract_content(body: &serde_json::Value) -> Result<String, OracleError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            OracleError::MalformedResponse(format!("unexpected response structure: {body}"))
        })
}
