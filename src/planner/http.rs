//! HTTP planner client
//!
//! Wire format:
//! - `POST {base}/plan-runs` with `{"query": ...}`
//! - `POST {base}/plan-runs/{run_id}/clarifications/{clarification_id}` with `{"value": ...}`
//! - `POST {base}/plan-runs/{run_id}/resume`
//!
//! Every call returns the updated `PlanRun` document.

use super::{PlanRun, Planner, PlannerError};
use crate::clarification::Clarification;
use async_trait::async_trait;
use std::time::Duration;

/// Planner service reached over HTTP
#[derive(Clone)]
pub struct HttpPlanner {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PlannerError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<PlanRun, PlannerError> {
        let start = std::time::Instant::now();
        let mut request = self.http_client.post(self.url(path)).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(target: "planner", path = path, error = %e, "Planner request failed");
            PlannerError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(
                target: "planner",
                path = path,
                status = %status,
                error = %text,
                "Planner returned error"
            );
            return Err(PlannerError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let text = response.text().await?;
        let run: PlanRun = serde_json::from_str(&text)
            .map_err(|e| PlannerError::InvalidResponse(format!("{} (raw: {})", e, text)))?;

        tracing::debug!(
            target: "planner",
            path = path,
            run_id = %run.id,
            state = ?run.state,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Planner call completed"
        );
        Ok(run)
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn run(&self, query: &str) -> Result<PlanRun, PlannerError> {
        self.post("/plan-runs", serde_json::json!({ "query": query })).await
    }

    async fn resolve_clarification(
        &self,
        clarification: &Clarification,
        value: &str,
        run: PlanRun,
    ) -> Result<PlanRun, PlannerError> {
        let path = format!("/plan-runs/{}/clarifications/{}", run.id, clarification.id);
        self.post(&path, serde_json::json!({ "value": value })).await
    }

    async fn resume(&self, run: PlanRun) -> Result<PlanRun, PlannerError> {
        let path = format!("/plan-runs/{}/resume", run.id);
        self.post(&path, serde_json::json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clarification::ClarificationRequest;
    use crate::planner::PlanRunState;
    use crate::testing::FakeHttpServer;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let planner =
            HttpPlanner::new("http://localhost:8700/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(planner.url("/plan-runs"), "http://localhost:8700/plan-runs");
    }

    fn suspended_run() -> PlanRun {
        PlanRun {
            id: Uuid::new_v4(),
            state: PlanRunState::NeedClarification,
            clarifications: vec![Clarification::new(ClarificationRequest::Choice {
                guidance: "Which region?".to_string(),
                options: vec!["US".to_string(), "EU".to_string()],
            })],
            final_output: None,
        }
    }

    #[tokio::test]
    async fn test_wire_format() {
        let run = suspended_run();
        let document = serde_json::to_string(&run).unwrap();
        let server = FakeHttpServer::start(move |_| (200, document.clone())).await;
        let planner = HttpPlanner::new(
            format!("{}/", server.url()),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let started = planner.run("Find today's top tech news").await.unwrap();
        assert_eq!(started, run);

        let clarification = run.first_outstanding().cloned().unwrap();
        planner
            .resolve_clarification(&clarification, "US", run.clone())
            .await
            .unwrap();
        planner.resume(run.clone()).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.method == "POST"));
        assert!(requests
            .iter()
            .all(|r| r.headers.get("x-api-key").map(String::as_str) == Some("secret")));

        assert_eq!(requests[0].path, "/plan-runs");
        assert_eq!(requests[0].body, json!({"query": "Find today's top tech news"}));

        assert_eq!(
            requests[1].path,
            format!("/plan-runs/{}/clarifications/{}", run.id, clarification.id)
        );
        assert_eq!(requests[1].body, json!({"value": "US"}));

        assert_eq!(requests[2].path, format!("/plan-runs/{}/resume", run.id));
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let server = FakeHttpServer::start(|_| (500, "planner exploded".to_string())).await;
        let planner = HttpPlanner::new(server.url(), None, Duration::from_secs(5)).unwrap();

        let err = planner.run("q").await.unwrap_err();
        match err {
            PlannerError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "planner exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!server.requests()[0].headers.contains_key("x-api-key"));
    }

    #[tokio::test]
    async fn test_malformed_document_is_invalid_response() {
        let server = FakeHttpServer::start(|_| (200, r#"{"state": "COMPLETE"}"#.to_string())).await;
        let planner = HttpPlanner::new(server.url(), None, Duration::from_secs(5)).unwrap();

        let err = planner.resume(suspended_run()).await.unwrap_err();
        assert!(matches!(err, PlannerError::InvalidResponse(_)));
    }
}
