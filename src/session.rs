//! Chat session adapter
//!
//! Binds a messaging transport to the classifier and the coordinator. A fresh
//! message goes through the classifier first; a message arriving while a
//! clarification is pending is its answer and goes straight to the coordinator.

use crate::classifier::{Classification, Classifier};
use crate::coordinator::{Advance, AdvanceOutcome, Coordinator, CoordinatorError, SessionId};
use crate::events::{BotEvent, FailureStage, IgnoreReason, Route};
use crate::reply::OutboundReply;
use crate::telemetry::{Telemetry, TurnRecord};
use crate::transport::{ChatId, InboundEvent, InboundKind, Sender, Transport, TransportError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

pub const RETRY_MESSAGE: &str = "Oops, I couldn't generate a reply right now. Please try again later.";
pub const RUN_FAILED_MESSAGE: &str = "Sorry, the agent run failed and has been reset. Please try again.";
pub const UNSUPPORTED_MESSAGE: &str = "I currently understand text messages. Try typing a question.";
pub const CANCELLED_MESSAGE: &str = "Cancelled the pending request.";
pub const NOTHING_TO_CANCEL_MESSAGE: &str = "Nothing to cancel.";

const CANCEL_COMMAND: &str = "/cancel";

impl From<&ChatId> for SessionId {
    fn from(chat: &ChatId) -> Self {
        SessionId::new(chat.as_str())
    }
}

/// Which senders the bot talks to. Empty means everyone.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    allowed_usernames: Vec<String>,
}

impl AccessPolicy {
    pub fn new<I, S>(usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_usernames: usernames
                .into_iter()
                .map(|u| normalize_username(u.as_ref()))
                .filter(|u| !u.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, sender: &Sender) -> bool {
        if self.allowed_usernames.is_empty() {
            return true;
        }
        sender
            .username
            .as_deref()
            .map(normalize_username)
            .is_some_and(|name| self.allowed_usernames.contains(&name))
    }
}

fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

/// `/cancel` and `/cancel@botname`
fn is_cancel(input: &str) -> bool {
    input
        .split('@')
        .next()
        .is_some_and(|command| command.eq_ignore_ascii_case(CANCEL_COMMAND))
}

pub struct SessionAdapter {
    classifier: Classifier,
    coordinator: Arc<Coordinator>,
    transport: Arc<dyn Transport>,
    access: AccessPolicy,
    telemetry: Arc<Telemetry>,
}

impl SessionAdapter {
    pub fn new(
        classifier: Classifier,
        coordinator: Arc<Coordinator>,
        transport: Arc<dyn Transport>,
        access: AccessPolicy,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            classifier,
            coordinator,
            transport,
            access,
            telemetry,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Handle one inbound event end to end: acknowledge, route, reply, record.
    /// Only a failure to deliver the reply is returned as an error.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<BotEvent, TransportError> {
        let InboundEvent {
            chat_id,
            sender,
            kind,
        } = event;

        if !self.access.allows(&sender) {
            debug!(chat_id = %chat_id, sender = %sender.id, "Ignoring message from unlisted sender");
            return Ok(BotEvent::Ignored {
                reason: IgnoreReason::NotAllowed,
            });
        }

        let started = Instant::now();
        let input = match kind {
            InboundKind::Text(text) => text,
            InboundKind::Button { callback_id, data } => {
                if let Err(e) = self.transport.acknowledge(&callback_id).await {
                    warn!(chat_id = %chat_id, error = %e, "Failed to acknowledge button press");
                }
                data
            }
            InboundKind::Unsupported => {
                let reply = OutboundReply::text(UNSUPPORTED_MESSAGE);
                self.transport.send_reply(&chat_id, &reply).await?;
                let event = BotEvent::Unsupported;
                self.record(&chat_id, Route::Unsupported, &event, None, &reply, started);
                return Ok(event);
            }
        };

        let input = input.trim();
        if input.is_empty() {
            return Ok(BotEvent::Ignored {
                reason: IgnoreReason::Empty,
            });
        }

        if let Err(e) = self.transport.send_typing(&chat_id).await {
            debug!(chat_id = %chat_id, error = %e, "Failed to send typing indicator");
        }

        let session = SessionId::from(&chat_id);
        let (route, reply, event) = self.respond(&session, input).await;

        self.transport.send_reply(&chat_id, &reply).await?;
        self.record(&chat_id, route, &event, Some(input), &reply, started);
        Ok(event)
    }

    /// Decide the reply for a non-empty input
    async fn respond(&self, session: &SessionId, input: &str) -> (Route, OutboundReply, BotEvent) {
        if is_cancel(input) {
            let had_pending = self.coordinator.cancel(session).await;
            let text = if had_pending {
                CANCELLED_MESSAGE
            } else {
                NOTHING_TO_CANCEL_MESSAGE
            };
            return (
                Route::Command,
                OutboundReply::text(text),
                BotEvent::Cancelled { had_pending },
            );
        }

        match self.coordinator.answer(session, input).await {
            Ok(Some(advance)) => {
                let (reply, event) = advanced(advance);
                return (Route::Answer, reply, event);
            }
            Err(e) => {
                let (reply, event) = failed(session, e, true);
                return (Route::Answer, reply, event);
            }
            Ok(None) => {}
        }

        match self.classifier.classify(input).await {
            Ok(Classification::Direct(answer)) => (
                Route::Classifier,
                OutboundReply::text(answer),
                BotEvent::DirectAnswer,
            ),
            Ok(Classification::NeedsAgent) => {
                let (reply, event) = match self.coordinator.advance(session, input).await {
                    Ok(advance) => advanced(advance),
                    Err(e) => failed(session, e, false),
                };
                (Route::Agent, reply, event)
            }
            Err(e) => {
                error!(session = %session, error = %e, "Classification failed");
                (
                    Route::Classifier,
                    OutboundReply::text(RETRY_MESSAGE),
                    BotEvent::Failed {
                        stage: FailureStage::Classify,
                        error: e.to_string(),
                    },
                )
            }
        }
    }

    fn record(
        &self,
        chat_id: &ChatId,
        route: Route,
        event: &BotEvent,
        input: Option<&str>,
        reply: &OutboundReply,
        started: Instant,
    ) {
        self.telemetry.record_turn(&TurnRecord {
            chat_id: chat_id.to_string(),
            route,
            event: event.clone(),
            input: input.map(String::from),
            reply: Some(reply.to_plain_text()),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

fn advanced(advance: Advance) -> (OutboundReply, BotEvent) {
    let event = match advance.outcome {
        AdvanceOutcome::Suspended { run_id, kind } => BotEvent::Suspended { run_id, kind },
        AdvanceOutcome::Completed { run_id } => BotEvent::Completed { run_id },
    };
    (advance.reply, event)
}

/// Apology for a failed `advance`. `answering` marks a run that had already
/// consumed the user's answer and is now dropped.
fn failed(session: &SessionId, e: CoordinatorError, answering: bool) -> (OutboundReply, BotEvent) {
    error!(session = %session, error = %e, answering = answering, "Plan execution failed");
    let (stage, message) = match &e {
        CoordinatorError::Normalize(_) if !answering => (FailureStage::Normalize, RETRY_MESSAGE),
        CoordinatorError::Normalize(_) => (FailureStage::Normalize, RUN_FAILED_MESSAGE),
        _ => (FailureStage::Planner, RUN_FAILED_MESSAGE),
    };
    (
        OutboundReply::text(message),
        BotEvent::Failed {
            stage,
            error: e.to_string(),
        },
    )
}
