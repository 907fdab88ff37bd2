//! LLM Provider layer
//!
//! OpenAI-compatible provider used for the routing completion and the
//! schema-constrained clarification completion.

mod client;
mod config;

pub use client::*;
pub use config::*;

use async_trait::async_trait;

/// Single-turn completion calls the bot relies on
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Plain chat completion: one system instruction, one user message.
    /// Returns the raw assistant content.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError>;

    /// Chat completion constrained to a JSON schema. Returns the parsed JSON document.
    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;
}
