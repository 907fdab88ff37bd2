//! Plan execution coordinator
//!
//! Owns the suspend/resume state machine around planner runs. Each chat session has a
//! single pending-run slot:
//!
//! ```text
//! IDLE --advance(query)--> RUNNING --clarification--> SUSPENDED_{CHOICE,VERIFICATION,ACTION}
//!   ^                         |                              |
//!   |                         +--complete--> DONE --reply----+--advance(answer)--> RUNNING
//!   +-------------------------------------------------------+
//! ```
//!
//! `advance` never waits for user input. It either runs the plan up to the next
//! clarification, stores the run handle and returns the question, or runs it to
//! completion and returns the output. The next inbound message for the session is the
//! answer to the stored clarification.
//!
//! The run handle is taken out of the slot at the start of `advance` and put back
//! only on a successful suspension, so every error path leaves the session idle.
//! Runs dropped on error, cancel or expiry are handed to `Planner::discard`.

use crate::clarification::{ClarificationKind, ClarificationRequest};
use crate::normalizer::{ClarificationNormalizer, NormalizeError};
use crate::planner::{PlanRun, PlanRunState, Planner, PlannerError};
use crate::reply::OutboundReply;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shown when a run completes without an output value
pub const NO_OUTPUT_MESSAGE: &str = "The plan completed without producing any output.";

/// Identity of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observable state of a session between `advance` calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Suspended(ClarificationKind),
}

/// How an `advance` call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A clarification was surfaced and the run is pending
    Suspended { run_id: Uuid, kind: ClarificationKind },
    /// The run finished and its output is the reply
    Completed { run_id: Uuid },
}

/// Result of one `advance` call
#[derive(Debug, Clone)]
pub struct Advance {
    pub reply: OutboundReply,
    pub outcome: AdvanceOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Plan run {run_id} failed: {message}")]
    RunFailed { run_id: Uuid, message: String },

    #[error("Plan run {run_id} exceeded {limit} planner steps")]
    StepLimit { run_id: Uuid, limit: usize },
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Resolve/resume calls allowed within a single `advance`
    pub max_steps: usize,
    /// Age after which a pending clarification is dropped; `None` keeps it forever
    pub pending_ttl: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 64,
            pending_ttl: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// A suspended run waiting for the user's answer
#[derive(Debug)]
struct PendingRun {
    run: PlanRun,
    kind: ClarificationKind,
    suspended_at: Instant,
}

impl PendingRun {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.suspended_at.elapsed() >= ttl)
    }
}

type Slot = Arc<Mutex<Option<PendingRun>>>;

pub struct Coordinator {
    planner: Arc<dyn Planner>,
    normalizer: ClarificationNormalizer,
    config: CoordinatorConfig,
    sessions: parking_lot::Mutex<HashMap<SessionId, Slot>>,
}

impl Coordinator {
    pub fn new(
        planner: Arc<dyn Planner>,
        normalizer: ClarificationNormalizer,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            planner,
            normalizer,
            config,
            sessions: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, session: &SessionId) -> Slot {
        self.sessions
            .lock()
            .entry(session.clone())
            .or_default()
            .clone()
    }

    /// Take the pending run out of `slot`, dropping it if it has expired
    fn take_live(&self, session: &SessionId, slot: &mut Option<PendingRun>) -> Option<PendingRun> {
        let pending = slot.take()?;
        if pending.is_expired(self.config.pending_ttl) {
            warn!(
                session = %session,
                run_id = %pending.run.id,
                kind = %pending.kind,
                "Pending clarification expired"
            );
            self.planner.discard(pending.run.id);
            return None;
        }
        Some(pending)
    }

    /// Current phase of a session. Waits for an in-flight `advance` to finish.
    pub async fn phase(&self, session: &SessionId) -> SessionPhase {
        let slot = self.slot(session);
        let mut guard = slot.lock().await;
        *guard = self.take_live(session, &mut guard);
        match guard.as_ref() {
            Some(pending) => SessionPhase::Suspended(pending.kind),
            None => SessionPhase::Idle,
        }
    }

    pub async fn has_pending(&self, session: &SessionId) -> bool {
        matches!(self.phase(session).await, SessionPhase::Suspended(_))
    }

    /// Drop the pending run of a session. Returns whether there was one.
    pub async fn cancel(&self, session: &SessionId) -> bool {
        let slot = self.slot(session);
        let mut guard = slot.lock().await;
        match self.take_live(session, &mut guard) {
            Some(pending) => {
                info!(session = %session, run_id = %pending.run.id, "Pending clarification cancelled");
                self.planner.discard(pending.run.id);
                true
            }
            None => false,
        }
    }

    /// Drop expired pending runs and forget idle sessions. Sessions with an
    /// `advance` in flight are skipped. Returns the number of runs dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let mut expired = 0;

        sessions.retain(|session, slot| {
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            if guard.as_ref().is_some_and(|p| p.is_expired(self.config.pending_ttl)) {
                *guard = self.take_live(session, &mut guard);
                expired += 1;
            }
            let idle = guard.is_none();
            drop(guard);
            // Keep entries another task still holds a handle to
            !idle || Arc::strong_count(slot) > 1
        });

        if expired > 0 {
            debug!(expired = expired, remaining = sessions.len(), "Swept expired clarifications");
        }
        expired
    }

    /// Feed one inbound message into the session's state machine
    ///
    /// With no pending run, `input` starts a new run. With a pending run, `input`
    /// answers its first outstanding clarification.
    pub async fn advance(&self, session: &SessionId, input: &str) -> Result<Advance, CoordinatorError> {
        let slot = self.slot(session);
        let mut guard = slot.lock().await;
        let pending = self.take_live(session, &mut guard);
        self.step(session, &mut guard, pending, input).await
    }

    /// Answer the pending clarification of a session
    ///
    /// The check and the answer happen under one slot lock. Returns `None` and
    /// leaves the session untouched when nothing is pending, including when the
    /// pending run has just expired.
    pub async fn answer(&self, session: &SessionId, input: &str) -> Result<Option<Advance>, CoordinatorError> {
        let slot = self.slot(session);
        let mut guard = slot.lock().await;
        match self.take_live(session, &mut guard) {
            Some(pending) => self.step(session, &mut guard, Some(pending), input).await.map(Some),
            None => Ok(None),
        }
    }

    async fn step(
        &self,
        session: &SessionId,
        slot: &mut Option<PendingRun>,
        pending: Option<PendingRun>,
        input: &str,
    ) -> Result<Advance, CoordinatorError> {
        let (run, answer) = match pending {
            Some(pending) => {
                info!(session = %session, run_id = %pending.run.id, kind = %pending.kind, "Resuming plan run with answer");
                (pending.run, Some(input.to_string()))
            }
            None => {
                let run = self.planner.run(input).await?;
                info!(session = %session, run_id = %run.id, state = ?run.state, "Started plan run");
                (run, None)
            }
        };

        let run_id = run.id;
        match self.drive(session, run, answer).await {
            Ok((advance, pending)) => {
                *slot = pending;
                Ok(advance)
            }
            Err(e) => {
                self.planner.discard(run_id);
                Err(e)
            }
        }
    }

    /// Run until the next clarification to surface or a terminal state.
    /// `answer` resolves the first outstanding clarification.
    async fn drive(
        &self,
        session: &SessionId,
        mut run: PlanRun,
        mut answer: Option<String>,
    ) -> Result<(Advance, Option<PendingRun>), CoordinatorError> {
        let mut steps = 0;
        loop {
            match run.state {
                PlanRunState::NeedClarification => {
                    let Some(clarification) = run.first_outstanding().cloned() else {
                        self.count_step(&mut steps, &run)?;
                        run = self.planner.resume(run).await?;
                        continue;
                    };

                    match answer.take() {
                        None => {
                            let reply = self.render(&clarification.request).await?;
                            let kind = clarification.kind();
                            let run_id = run.id;
                            info!(
                                session = %session,
                                run_id = %run_id,
                                clarification_id = %clarification.id,
                                kind = %kind,
                                "Plan run suspended for clarification"
                            );
                            let pending = PendingRun {
                                run,
                                kind,
                                suspended_at: Instant::now(),
                            };
                            let advance = Advance {
                                reply,
                                outcome: AdvanceOutcome::Suspended { run_id, kind },
                            };
                            return Ok((advance, Some(pending)));
                        }
                        Some(value) => {
                            self.count_step(&mut steps, &run)?;
                            debug!(
                                session = %session,
                                run_id = %run.id,
                                clarification_id = %clarification.id,
                                "Resolving clarification"
                            );
                            run = self
                                .planner
                                .resolve_clarification(&clarification, &value, run)
                                .await?;
                        }
                    }
                }
                PlanRunState::Complete => {
                    info!(session = %session, run_id = %run.id, "Plan run complete");
                    let advance = Advance {
                        reply: OutboundReply::text(display_output(run.final_output.as_ref())),
                        outcome: AdvanceOutcome::Completed { run_id: run.id },
                    };
                    return Ok((advance, None));
                }
                PlanRunState::Failed => {
                    warn!(session = %session, run_id = %run.id, "Plan run failed");
                    return Err(CoordinatorError::RunFailed {
                        run_id: run.id,
                        message: display_output(run.final_output.as_ref()),
                    });
                }
                PlanRunState::NotStarted | PlanRunState::InProgress | PlanRunState::ReadyToResume => {
                    self.count_step(&mut steps, &run)?;
                    run = self.planner.resume(run).await?;
                }
            }
        }
    }

    fn count_step(&self, steps: &mut usize, run: &PlanRun) -> Result<(), CoordinatorError> {
        *steps += 1;
        if *steps > self.config.max_steps {
            return Err(CoordinatorError::StepLimit {
                run_id: run.id,
                limit: self.config.max_steps,
            });
        }
        Ok(())
    }

    async fn render(&self, request: &ClarificationRequest) -> Result<OutboundReply, NormalizeError> {
        let reply = match request {
            ClarificationRequest::Choice { guidance, options } => {
                OutboundReply::text(render_choice(guidance, options))
            }
            ClarificationRequest::Verification { guidance } => {
                self.normalizer.normalize(guidance).await?.to_reply()
            }
            ClarificationRequest::Action {
                guidance,
                action_url,
            } => OutboundReply::text(render_action(guidance, action_url)),
        };
        Ok(reply)
    }
}

/// Guidance line, then one option per line
fn render_choice(guidance: &str, options: &[String]) -> String {
    let mut text = format!("{}\n", guidance);
    if !options.is_empty() {
        text.push_str(&options.join("\n"));
        text.push('\n');
    }
    text
}

fn render_action(guidance: &str, action_url: &str) -> String {
    format!(
        "{}\nPlease open the link below to proceed.\n{}\nType y or yes once the action has been completed.",
        guidance, action_url
    )
}

fn display_output(output: Option<&serde_json::Value>) -> String {
    match output {
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => NO_OUTPUT_MESSAGE.to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => NO_OUTPUT_MESSAGE.to_string(),
        Some(value) => value.to_string(),
    }
}
