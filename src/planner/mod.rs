//! Planner collaborator
//!
//! The planning service turns a query into a plan and executes it. From this side it
//! is a run handle that is started, resumed, and fed clarification answers.
//!
//! - `HttpPlanner`: JSON over HTTP against a planner service
//! - `ScriptedPlanner`: in-memory runs with scripted clarification rounds

mod http;
mod scripted;

pub use http::HttpPlanner;
pub use scripted::{PlanScript, PlannerCall, ScriptedPlanner};

use crate::clarification::Clarification;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a plan run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanRunState {
    NotStarted,
    InProgress,
    NeedClarification,
    ReadyToResume,
    Complete,
    Failed,
}

impl PlanRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanRunState::Complete | PlanRunState::Failed)
    }
}

/// Handle to one execution of a plan
///
/// Moved into the planner on every resolve/resume; the planner hands back the
/// updated handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRun {
    pub id: Uuid,
    pub state: PlanRunState,
    #[serde(default)]
    pub clarifications: Vec<Clarification>,
    #[serde(default)]
    pub final_output: Option<serde_json::Value>,
}

impl PlanRun {
    /// Clarifications not yet answered, in the order the planner raised them
    pub fn outstanding_clarifications(&self) -> impl Iterator<Item = &Clarification> {
        self.clarifications.iter().filter(|c| !c.resolved)
    }

    pub fn first_outstanding(&self) -> Option<&Clarification> {
        self.outstanding_clarifications().next()
    }
}

/// Errors raised by a planner implementation
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Planner request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Planner error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unknown plan run: {0}")]
    UnknownRun(Uuid),

    #[error("Unknown clarification {clarification} on run {run}")]
    UnknownClarification { run: Uuid, clarification: Uuid },

    #[error("Invalid planner response: {0}")]
    InvalidResponse(String),
}

/// The external planning service
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan and start executing a run for `query`
    async fn run(&self, query: &str) -> Result<PlanRun, PlannerError>;

    /// Answer `clarification` with `value`. The returned handle never lists the
    /// clarification as outstanding again.
    async fn resolve_clarification(
        &self,
        clarification: &Clarification,
        value: &str,
        run: PlanRun,
    ) -> Result<PlanRun, PlannerError>;

    /// Continue a run that is ready to make progress
    async fn resume(&self, run: PlanRun) -> Result<PlanRun, PlannerError>;

    /// Forget a run that will not be advanced again (cancelled, expired or failed)
    fn discard(&self, _run_id: Uuid) {}
}
