//! Direct-answer classifier
//!
//! Asks the completion model to either answer the message itself or reply with the
//! agent sentinel, meaning the message needs the planner.

use crate::provider::{CompletionService, ProviderError};
use crate::templates::{RouterPrompt, Templates};
use std::sync::Arc;

/// Token the model replies with when a message needs the agent
pub const AGENT_SENTINEL: &str = "AGENT";

/// Routing decision for a fresh message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The model answered; the text is sent back verbatim
    Direct(String),
    /// The message needs the planning agent
    NeedsAgent,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Classification call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Classification returned an empty answer")]
    Empty,
}

pub struct Classifier {
    completion: Arc<dyn CompletionService>,
    system_prompt: String,
}

impl Classifier {
    pub fn new(completion: Arc<dyn CompletionService>, templates: &Templates) -> anyhow::Result<Self> {
        let system_prompt = RouterPrompt {
            sentinel: AGENT_SENTINEL,
        }
        .render(templates)?;
        Ok(Self {
            completion,
            system_prompt,
        })
    }

    pub async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        let raw = self.completion.complete(&self.system_prompt, text.trim()).await?;

        if raw.trim().is_empty() {
            return Err(ClassifyError::Empty);
        }

        if is_sentinel(&raw) {
            tracing::debug!("Message routed to agent");
            Ok(Classification::NeedsAgent)
        } else {
            tracing::debug!(answer_len = raw.len(), "Message answered directly");
            Ok(Classification::Direct(raw))
        }
    }
}

/// Case-sensitive sentinel match that tolerates whitespace, wrapping quotes or
/// backticks, and a trailing period.
fn is_sentinel(raw: &str) -> bool {
    let mut stripped = raw;
    loop {
        let next = stripped
            .trim()
            .trim_matches(|c| c == '`' || c == '"' || c == '\'')
            .trim_end_matches('.');
        if next == stripped {
            return stripped == AGENT_SENTINEL;
        }
        stripped = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;

    fn classifier(completion: Arc<ScriptedCompletion>) -> Classifier {
        let templates = Templates::new().unwrap();
        Classifier::new(completion, &templates).unwrap()
    }

    #[test]
    fn test_sentinel_matching() {
        assert!(is_sentinel("AGENT"));
        assert!(is_sentinel("  AGENT\n"));
        assert!(is_sentinel("`AGENT`"));
        assert!(is_sentinel("\"AGENT\"."));
        assert!(is_sentinel("`AGENT.`"));
        assert!(is_sentinel(" 'AGENT'. \n"));
        assert!(is_sentinel("\"`AGENT`\"."));
        assert!(!is_sentinel("AGENTS"));
        assert!(!is_sentinel(""));
        assert!(!is_sentinel("agent"));
        assert!(!is_sentinel("AGENT mode is needed"));
        assert!(!is_sentinel("Paris."));
    }

    #[tokio::test]
    async fn test_direct_answer_is_verbatim() {
        let completion = Arc::new(ScriptedCompletion::new().answer("Paris."));
        let classifier = classifier(completion.clone());

        let result = classifier.classify("What is the capital of France?").await.unwrap();
        assert_eq!(result, Classification::Direct("Paris.".to_string()));

        let calls = completion.complete_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("ONLY reply with: AGENT"));
        assert_eq!(calls[0].1, "What is the capital of France?");
    }

    #[tokio::test]
    async fn test_sentinel_routes_to_agent() {
        let completion = Arc::new(ScriptedCompletion::new().answer("AGENT\n"));
        let classifier = classifier(completion);

        let result = classifier
            .classify("  Find today's top tech news and summarize it ")
            .await
            .unwrap();
        assert_eq!(result, Classification::NeedsAgent);
    }

    #[tokio::test]
    async fn test_failures_are_typed() {
        let completion = Arc::new(ScriptedCompletion::new().answer("   ").fail_complete());
        let classifier = classifier(completion);

        let err = classifier.classify("hi").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Empty));

        let err = classifier.classify("hi").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Provider(_)));
    }
}
