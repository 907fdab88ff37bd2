//! In-memory planner that replays a script
//!
//! A script is a list of clarification rounds followed by a final output. Each run
//! raises round 0, waits for every clarification in it to be resolved, then moves to
//! the next round on resume. Used by the offline REPL and the tests.

use super::{PlanRun, PlanRunState, Planner, PlannerError};
use crate::clarification::{Clarification, ClarificationRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Scripted plan: clarification rounds, then an output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanScript {
    #[serde(default)]
    pub rounds: Vec<Vec<ClarificationRequest>>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}

impl PlanScript {
    pub fn new(output: impl Into<serde_json::Value>) -> Self {
        Self {
            rounds: Vec::new(),
            output: Some(output.into()),
        }
    }

    /// Add a round with a single clarification
    pub fn ask(mut self, request: ClarificationRequest) -> Self {
        self.rounds.push(vec![request]);
        self
    }

    /// Add a round whose clarifications are all outstanding at once
    pub fn ask_all(mut self, requests: Vec<ClarificationRequest>) -> Self {
        self.rounds.push(requests);
        self
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Planner call that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerCall {
    Run,
    Resolve,
    Resume,
}

#[derive(Debug)]
struct RunProgress {
    round: usize,
}

/// Planner replaying a `PlanScript` for every query
pub struct ScriptedPlanner {
    script: PlanScript,
    runs: Mutex<HashMap<Uuid, RunProgress>>,
    queries: Mutex<Vec<String>>,
    resolutions: Mutex<Vec<(Uuid, String)>>,
    fail_once: Mutex<Option<PlannerCall>>,
}

impl ScriptedPlanner {
    pub fn new(script: PlanScript) -> Self {
        Self {
            script,
            runs: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            resolutions: Mutex::new(Vec::new()),
            fail_once: Mutex::new(None),
        }
    }

    /// Make the next call of the given kind fail with an API error
    pub fn fail_next(&self, call: PlannerCall) {
        *self.fail_once.lock() = Some(call);
    }

    /// Queries that started a run, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    /// (clarification id, value) pairs in the order they were resolved
    pub fn resolutions(&self) -> Vec<(Uuid, String)> {
        self.resolutions.lock().clone()
    }

    /// Runs that have not reached a terminal state
    pub fn live_runs(&self) -> usize {
        self.runs.lock().len()
    }

    fn check_failure(&self, call: PlannerCall) -> Result<(), PlannerError> {
        let mut fail_once = self.fail_once.lock();
        if *fail_once == Some(call) {
            *fail_once = None;
            return Err(PlannerError::Api {
                status: 500,
                message: format!("scripted {:?} failure", call),
            });
        }
        Ok(())
    }

    /// Enter `round` on `run`: raise its clarifications or complete
    fn enter_round(&self, mut run: PlanRun, round: usize) -> PlanRun {
        match self.script.rounds.get(round) {
            Some(requests) if !requests.is_empty() => {
                run.clarifications
                    .extend(requests.iter().cloned().map(Clarification::new));
                run.state = PlanRunState::NeedClarification;
                self.runs.lock().insert(run.id, RunProgress { round });
            }
            Some(_) => {
                // An empty round needs no input
                return self.enter_round(run, round + 1);
            }
            None => {
                run.state = PlanRunState::Complete;
                run.final_output = self.script.output.clone();
                self.runs.lock().remove(&run.id);
            }
        }
        run
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn run(&self, query: &str) -> Result<PlanRun, PlannerError> {
        self.check_failure(PlannerCall::Run)?;
        self.queries.lock().push(query.to_string());

        let run = PlanRun {
            id: Uuid::new_v4(),
            state: PlanRunState::InProgress,
            clarifications: Vec::new(),
            final_output: None,
        };
        Ok(self.enter_round(run, 0))
    }

    async fn resolve_clarification(
        &self,
        clarification: &Clarification,
        value: &str,
        mut run: PlanRun,
    ) -> Result<PlanRun, PlannerError> {
        self.check_failure(PlannerCall::Resolve)?;
        if !self.runs.lock().contains_key(&run.id) {
            return Err(PlannerError::UnknownRun(run.id));
        }

        let target = run
            .clarifications
            .iter_mut()
            .find(|c| c.id == clarification.id && !c.resolved)
            .ok_or(PlannerError::UnknownClarification {
                run: run.id,
                clarification: clarification.id,
            })?;
        target.resolved = true;
        target.response = Some(value.to_string());
        self.resolutions
            .lock()
            .push((clarification.id, value.to_string()));

        if run.first_outstanding().is_none() {
            run.state = PlanRunState::ReadyToResume;
        }
        Ok(run)
    }

    async fn resume(&self, run: PlanRun) -> Result<PlanRun, PlannerError> {
        self.check_failure(PlannerCall::Resume)?;
        if run.first_outstanding().is_some() {
            return Ok(run);
        }

        let round = self
            .runs
            .lock()
            .get(&run.id)
            .map(|p| p.round)
            .ok_or(PlannerError::UnknownRun(run.id))?;
        Ok(self.enter_round(run, round + 1))
    }

    fn discard(&self, run_id: Uuid) {
        self.runs.lock().remove(&run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> ClarificationRequest {
        ClarificationRequest::Choice {
            guidance: "Which region?".to_string(),
            options: vec!["US".to_string(), "EU".to_string()],
        }
    }

    #[tokio::test]
    async fn test_empty_script_completes_immediately() {
        let planner = ScriptedPlanner::new(PlanScript::new("done"));
        let run = planner.run("q").await.unwrap();
        assert_eq!(run.state, PlanRunState::Complete);
        assert_eq!(run.final_output, Some(serde_json::json!("done")));
        assert_eq!(planner.live_runs(), 0);
    }

    #[tokio::test]
    async fn test_resolved_clarification_is_not_returned_again() {
        let planner = ScriptedPlanner::new(PlanScript::new("done").ask(region()));
        let run = planner.run("q").await.unwrap();
        assert_eq!(run.state, PlanRunState::NeedClarification);

        let clarification = run.first_outstanding().cloned().unwrap();
        let run = planner
            .resolve_clarification(&clarification, "US", run)
            .await
            .unwrap();

        assert_eq!(run.state, PlanRunState::ReadyToResume);
        assert!(run.outstanding_clarifications().all(|c| c.id != clarification.id));

        let err = planner
            .resolve_clarification(&clarification, "EU", run.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::UnknownClarification { .. }));

        let run = planner.resume(run).await.unwrap();
        assert_eq!(run.state, PlanRunState::Complete);
        assert_eq!(planner.resolutions(), vec![(clarification.id, "US".to_string())]);
    }

    #[tokio::test]
    async fn test_discarded_run_is_forgotten() {
        let planner = ScriptedPlanner::new(PlanScript::new("done").ask(region()));
        let run = planner.run("q").await.unwrap();
        assert_eq!(planner.live_runs(), 1);

        planner.discard(run.id);
        assert_eq!(planner.live_runs(), 0);
        let clarification = run.first_outstanding().cloned().unwrap();
        let err = planner
            .resolve_clarification(&clarification, "US", run)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::UnknownRun(_)));
    }

    #[tokio::test]
    async fn test_fail_next_triggers_once() {
        let planner = ScriptedPlanner::new(PlanScript::new("done"));
        planner.fail_next(PlannerCall::Run);
        assert!(planner.run("q").await.is_err());
        assert!(planner.run("q").await.is_ok());
        assert_eq!(planner.queries(), vec!["q".to_string()]);
    }

    #[test]
    fn test_script_from_json() {
        let json = r#"{
            "rounds": [[{"kind": "verification", "guidance": "Send the email now?"}]],
            "output": "sent"
        }"#;
        let script: PlanScript = serde_json::from_str(json).unwrap();
        assert_eq!(script.rounds.len(), 1);
        assert_eq!(script.output, Some(serde_json::json!("sent")));
    }
}
