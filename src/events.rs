//! Bot event types
//!
//! One `BotEvent` is produced for every inbound event the session adapter handles.
//! Events are logged, recorded in telemetry, and returned to the caller.

use crate::clarification::ClarificationKind;
use serde::Serialize;
use uuid::Uuid;

/// What handling one inbound event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    /// The classifier answered without the planner
    DirectAnswer,
    /// A plan run paused on a clarification
    Suspended { run_id: Uuid, kind: ClarificationKind },
    /// A plan run finished and its output was sent
    Completed { run_id: Uuid },
    /// `/cancel` was handled
    Cancelled { had_pending: bool },
    /// A non-text message was answered with the text-only notice
    Unsupported,
    /// Nothing was sent back
    Ignored { reason: IgnoreReason },
    /// The turn failed and the user got an apology
    Failed { stage: FailureStage, error: String },
}

impl BotEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotEvent::DirectAnswer => "direct_answer",
            BotEvent::Suspended { .. } => "suspended",
            BotEvent::Completed { .. } => "completed",
            BotEvent::Cancelled { .. } => "cancelled",
            BotEvent::Unsupported => "unsupported",
            BotEvent::Ignored { .. } => "ignored",
            BotEvent::Failed { .. } => "failed",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BotEvent::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Sender is not on the allow list
    NotAllowed,
    /// Message text was blank
    Empty,
}

/// Which call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Classify,
    Normalize,
    Planner,
}

/// Path an inbound event took through the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Fresh message answered (or failed) at the classifier
    Classifier,
    /// Fresh message handed to the coordinator as a query
    Agent,
    /// Message answering a pending clarification
    Answer,
    /// Slash command
    Command,
    /// Non-text message
    Unsupported,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Classifier => "classifier",
            Route::Agent => "agent",
            Route::Answer => "answer",
            Route::Command => "command",
            Route::Unsupported => "unsupported",
        }
    }
}
