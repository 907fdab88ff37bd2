//! OpenAI-compatible provider client
//!
//! Plain completions go through async-openai. Structured completions use raw HTTP
//! with `response_format: json_schema`, which not every compatible server exposes
//! through the typed client.

use super::{CompletionService, ProviderConfig};
use crate::auth::AuthConfig;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

/// Errors raised while talking to the completion provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} not found in environment or auth.json")]
    MissingApiKey(String),

    #[error("API call failed: {0}")]
    OpenAi(#[from] OpenAIError),

    #[error("API request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("No content in response")]
    EmptyResponse,

    #[error("Failed to parse structured response: {0}")]
    InvalidResponse(String),
}

/// OpenAI-compatible client wrapper
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    client: Client<OpenAIConfig>,
    http_client: reqwest::Client,
    api_key: String,
}

impl ProviderClient {
    /// Create a new provider client from config
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = Self::get_api_key(&config)?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(&api_key)
            .with_api_base(&config.base_url);

        let client = Client::with_config(openai_config);
        let http_client = reqwest::Client::builder().build()?;

        Ok(Self {
            config,
            client,
            http_client,
            api_key,
        })
    }

    /// Resolve the API key: explicit config, then environment, then auth.json
    fn get_api_key(config: &ProviderConfig) -> Result<String, ProviderError> {
        if let Some(ref key) = config.api_key {
            return Ok(key.clone());
        }

        let _ = dotenvy::dotenv();

        if let Ok(key) = std::env::var(&config.api_key_env) {
            return Ok(key);
        }

        let auth = AuthConfig::load().unwrap_or_default();
        if let Some(key) = auth.api_key(&config.name.to_lowercase()) {
            return Ok(key.to_string());
        }

        Err(ProviderError::MissingApiKey(config.api_key_env.clone()))
    }

    /// Get the provider config
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn model(&self) -> &str {
        &self.config.default_model
    }
}

#[async_trait]
impl CompletionService for ProviderClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model())
            .messages(messages)
            .build()?;

        let start = std::time::Instant::now();
        tracing::info!(target: "llm", model = self.model(), "Starting LLM call");

        let response = self.client.chat().create(request).await.map_err(|e| {
            tracing::error!(target: "llm", error = %e, "LLM call failed");
            ProviderError::from(e)
        })?;

        tracing::info!(
            target: "llm",
            model = self.model(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            input_tokens = response.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens = response.usage.as_ref().map(|u| u.completion_tokens),
            "LLM call completed"
        );

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let body = serde_json::json!({
            "model": self.model(),
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema
                }
            }
        });

        let start = std::time::Instant::now();
        tracing::info!(
            target: "llm",
            schema_name = schema_name,
            model = self.model(),
            "Starting structured LLM call"
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "llm", error = %e, "Structured LLM call failed");
                ProviderError::from(e)
            })?;

        let elapsed = start.elapsed();

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::error!(
                target: "llm",
                status = %status,
                error = %text,
                elapsed_ms = elapsed.as_millis() as u64,
                "Structured LLM call returned error"
            );
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let response_body: serde_json::Value = response.json().await?;

        let usage = response_body.get("usage");
        let input_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64());
        let output_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64());

        let content = extract_message_content(&response_body).ok_or(ProviderError::EmptyResponse)?;

        tracing::info!(
            target: "llm",
            schema_name = schema_name,
            model = self.model(),
            elapsed_ms = elapsed.as_millis() as u64,
            input_tokens = input_tokens,
            output_tokens = output_tokens,
            "Structured LLM call completed"
        );

        serde_json::from_str(content)
            .map_err(|e| ProviderError::InvalidResponse(format!("{} (raw: {})", e, content)))
    }
}

/// Pull `choices[0].message.content` out of a chat completion body
fn extract_message_content(body: &serde_json::Value) -> Option<&str> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message_content() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4}
        });
        assert_eq!(extract_message_content(&body), Some("{\"a\":1}"));

        let empty = serde_json::json!({"choices": []});
        assert_eq!(extract_message_content(&empty), None);
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = ProviderConfig::custom("Local", "http://localhost:1234/v1", "UNSET_KEY_VAR", "m")
            .with_api_key("sk-local");
        let client = ProviderClient::new(config).unwrap();
        assert_eq!(client.api_key, "sk-local");
        assert_eq!(client.config().default_model, "m");
    }
}
