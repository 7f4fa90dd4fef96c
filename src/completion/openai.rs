use crate::completion::CompletionClient;
use crate::config::Config;
use crate::document::ModelId;
use crate::error::{DistillError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request structure for the chat completions API
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response structure from the chat completions API
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Chat completions client for OpenAI-compatible APIs
///
/// The credential is bound once at construction. A client built without one
/// still constructs, but every call fails with `RemoteUnavailable`.
pub struct OpenAIChatClient {
    client: Client,
    api_key: Option<String>,
    api_base: String,
}

impl OpenAIChatClient {
    /// Create a new chat client
    ///
    /// # Arguments
    ///
    /// * `api_key` - Bearer credential, `None` if none was supplied
    /// * `api_base` - Base URL, e.g. `https://api.openai.com/v1`
    /// * `timeout` - Per-request timeout
    pub fn new(api_key: Option<String>, api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DistillError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the `[completion]` section and the credential in the environment
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key();
        if api_key.is_none() {
            log::warn!(
                "Environment variable {} not set; completion calls will fail",
                config.completion.api_key_env
            );
        }
        Self::new(
            api_key,
            config.completion.api_base.clone(),
            Duration::from_secs(config.completion.timeout_secs),
        )
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl CompletionClient for OpenAIChatClient {
    async fn complete(&self, model: &ModelId, body: &str, instruction: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            DistillError::RemoteUnavailable(
                "client not initialized. Please provide an API key.".to_string(),
            )
        })?;

        let request = ChatRequest {
            model: model.as_str(),
            messages: [
                ChatMessage { role: "system", content: instruction },
                ChatMessage { role: "user", content: body },
            ],
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DistillError::Remote(format!("Network error: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(DistillError::Remote(format!("API error {}: {}", status, body)));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| DistillError::Remote(format!("Failed to parse response: {}", e)))?;

        log::debug!("Completion call to {} took {:?}", model, start.elapsed());

        Ok(result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default())
    }
}
