//! Clarification normalizer
//!
//! Verification requests arrive as free-form guidance with no options. A structured
//! completion turns the guidance into a short summary and a small set of answers that
//! can be offered as buttons.

use crate::provider::{CompletionService, ProviderError};
use crate::reply::{OutboundReply, SelectableOptions};
use crate::templates::{ClarificationPrompt, Templates};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SCHEMA_NAME: &str = "clarification_response";
const DEFAULT_MAX_CHOICES: usize = 8;

/// Normalized form of a verification request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClarificationResponse {
    /// A very short and precise summary of the clarification, without args, parameters or technical details.
    pub summary: String,
    /// Distinct choices the user can pick from. Duplicates removed, long forms preferred.
    pub choices: Vec<String>,
}

impl ClarificationResponse {
    /// Selectable-option reply: summary as text, one option per choice
    pub fn to_reply(&self) -> OutboundReply {
        OutboundReply::with_options(
            self.summary.clone(),
            SelectableOptions::from_choices(self.choices.iter().cloned()),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Clarification normalization failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Clarification response did not match schema: {0}")]
    Invalid(#[from] serde_json::Error),
}

pub struct ClarificationNormalizer {
    completion: Arc<dyn CompletionService>,
    system_prompt: String,
    schema: serde_json::Value,
    max_choices: usize,
}

impl ClarificationNormalizer {
    pub fn new(completion: Arc<dyn CompletionService>, templates: &Templates) -> anyhow::Result<Self> {
        Self::with_max_choices(completion, templates, DEFAULT_MAX_CHOICES)
    }

    pub fn with_max_choices(
        completion: Arc<dyn CompletionService>,
        templates: &Templates,
        max_choices: usize,
    ) -> anyhow::Result<Self> {
        let system_prompt = ClarificationPrompt {
            max_choices: Some(max_choices),
        }
        .render(templates)?;
        Ok(Self {
            completion,
            system_prompt,
            schema: response_schema()?,
            max_choices,
        })
    }

    pub async fn normalize(&self, guidance: &str) -> Result<ClarificationResponse, NormalizeError> {
        let raw = self
            .completion
            .complete_structured(&self.system_prompt, guidance, SCHEMA_NAME, self.schema.clone())
            .await?;
        let response: ClarificationResponse = serde_json::from_value(raw)?;

        let normalized = canonicalize(response, guidance, self.max_choices);
        tracing::debug!(
            summary = %normalized.summary,
            choices = ?normalized.choices,
            "Clarification normalized"
        );
        Ok(normalized)
    }
}

/// JSON schema for `ClarificationResponse`, trimmed to what strict mode accepts
fn response_schema() -> Result<serde_json::Value, serde_json::Error> {
    let mut schema = serde_json::to_value(schemars::schema_for!(ClarificationResponse))?;
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    Ok(schema)
}

/// Long form for the abbreviations models tend to echo back
fn expand_abbreviation(choice: &str) -> &str {
    match choice.to_lowercase().as_str() {
        "y" => "yes",
        "n" => "no",
        _ => choice,
    }
}

/// Enforce the choice rules locally regardless of what the model returned
fn canonicalize(response: ClarificationResponse, guidance: &str, max_choices: usize) -> ClarificationResponse {
    let mut seen = std::collections::HashSet::new();
    let mut choices: Vec<String> = response
        .choices
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(expand_abbreviation)
        .filter(|c| seen.insert(c.to_lowercase()))
        .map(String::from)
        .collect();

    if choices.len() < 2 {
        choices = vec!["yes".to_string(), "no".to_string()];
    }
    choices.truncate(max_choices.max(2));

    let summary = match response.summary.trim() {
        "" => guidance.trim().to_string(),
        s => s.to_string(),
    };

    ClarificationResponse { summary, choices }
}
