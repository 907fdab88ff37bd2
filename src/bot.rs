//! PocketAgent assembly
//!
//! Wires the completion client, prompts, planner and transport into a ready
//! session adapter.

use crate::classifier::Classifier;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::normalizer::ClarificationNormalizer;
use crate::planner::{HttpPlanner, PlanScript, Planner, ScriptedPlanner};
use crate::provider::{CompletionService, ProviderClient};
use crate::session::{AccessPolicy, SessionAdapter};
use crate::telemetry::Telemetry;
use crate::templates::Templates;
use crate::transport::Transport;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct PocketAgent {
    adapter: Arc<SessionAdapter>,
    coordinator: Arc<Coordinator>,
    telemetry: Arc<Telemetry>,
}

impl PocketAgent {
    /// Build the bot with the configured completion provider
    pub fn new(
        config: &Config,
        planner: Arc<dyn Planner>,
        transport: Arc<dyn Transport>,
        telemetry: Arc<Telemetry>,
    ) -> anyhow::Result<Self> {
        let completion: Arc<dyn CompletionService> =
            Arc::new(ProviderClient::new(config.provider_config())?);
        Self::with_completion(config, completion, planner, transport, telemetry)
    }

    pub fn with_completion(
        config: &Config,
        completion: Arc<dyn CompletionService>,
        planner: Arc<dyn Planner>,
        transport: Arc<dyn Transport>,
        telemetry: Arc<Telemetry>,
    ) -> anyhow::Result<Self> {
        let templates = Templates::new()?;

        let classifier = Classifier::new(completion.clone(), &templates)?;
        let normalizer =
            ClarificationNormalizer::with_max_choices(completion, &templates, config.session.max_choices)?;
        let coordinator = Arc::new(Coordinator::new(
            planner,
            normalizer,
            config.coordinator_config(),
        ));

        let adapter = Arc::new(SessionAdapter::new(
            classifier,
            coordinator.clone(),
            transport,
            AccessPolicy::new(&config.telegram.allowed_usernames),
            telemetry.clone(),
        ));

        Ok(Self {
            adapter,
            coordinator,
            telemetry,
        })
    }

    pub fn adapter(&self) -> &Arc<SessionAdapter> {
        &self.adapter
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Drop expired clarifications every `interval` until `cancel` fires
    pub async fn sweep_until_cancelled(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.coordinator.sweep_expired();
                }
            }
        }
    }
}

/// Planner for this run: a scripted plan when `script` is given, otherwise the
/// configured planner service
pub fn planner_from_config(config: &Config, script: Option<&Path>) -> anyhow::Result<Arc<dyn Planner>> {
    if let Some(path) = script {
        let script = PlanScript::load(path)?;
        tracing::info!(path = %path.display(), rounds = script.rounds.len(), "Using scripted planner");
        return Ok(Arc::new(ScriptedPlanner::new(script)));
    }

    let base_url = config.planner.base_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("No planner configured: set PLANNER_URL or planner.base_url, or pass --script")
    })?;
    tracing::info!(base_url = base_url, "Using planner service");
    Ok(Arc::new(HttpPlanner::new(
        base_url,
        config.planner.api_key.clone(),
        Duration::from_secs(config.planner.timeout_secs),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BotEvent;
    use crate::testing::{RecordingTransport, ScriptedCompletion};
    use crate::transport::{ChatId, InboundEvent, InboundKind, Sender};

    #[tokio::test]
    async fn test_assembled_bot_answers() {
        let mut config = Config::default();
        config.telegram.allowed_usernames = vec!["alice".to_string()];

        let transport = Arc::new(RecordingTransport::new());
        let bot = PocketAgent::with_completion(
            &config,
            Arc::new(ScriptedCompletion::new().answer("Paris.")),
            Arc::new(ScriptedPlanner::new(PlanScript::new("unused"))),
            transport.clone(),
            Arc::new(Telemetry::in_memory().unwrap()),
        )
        .unwrap();

        let event = bot
            .adapter()
            .handle_event(InboundEvent {
                chat_id: ChatId::new("1"),
                sender: Sender {
                    id: "9".to_string(),
                    username: Some("alice".to_string()),
                },
                kind: InboundKind::Text("What is the capital of France?".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(event, BotEvent::DirectAnswer);
        assert_eq!(transport.replies()[0].1.text, "Paris.");
        assert_eq!(bot.telemetry().stats().turn_count, 1);
    }

    #[test]
    fn test_planner_selection() {
        let config = Config::default();
        assert!(planner_from_config(&config, None).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, r#"{"rounds": [], "output": "done"}"#).unwrap();
        assert!(planner_from_config(&config, Some(&path)).is_ok());

        let mut config = Config::default();
        config.planner.base_url = Some("http://localhost:8000".to_string());
        assert!(planner_from_config(&config, None).is_ok());
    }
}
