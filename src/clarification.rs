//! Clarification requests raised by the planner

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the planner needs from the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClarificationRequest {
    /// One value, typed freely or matching one of the options
    Choice {
        guidance: String,
        #[serde(default)]
        options: Vec<String>,
    },
    /// Human-in-the-loop confirmation gate
    Verification { guidance: String },
    /// Out-of-band action (e.g. an OAuth flow) that the user confirms afterwards
    Action { guidance: String, action_url: String },
}

impl ClarificationRequest {
    pub fn kind(&self) -> ClarificationKind {
        match self {
            ClarificationRequest::Choice { .. } => ClarificationKind::Choice,
            ClarificationRequest::Verification { .. } => ClarificationKind::Verification,
            ClarificationRequest::Action { .. } => ClarificationKind::Action,
        }
    }

    pub fn guidance(&self) -> &str {
        match self {
            ClarificationRequest::Choice { guidance, .. }
            | ClarificationRequest::Verification { guidance }
            | ClarificationRequest::Action { guidance, .. } => guidance,
        }
    }
}

/// Tag of a clarification request, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationKind {
    Choice,
    Verification,
    Action,
}

impl ClarificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClarificationKind::Choice => "choice",
            ClarificationKind::Verification => "verification",
            ClarificationKind::Action => "action",
        }
    }
}

impl std::fmt::Display for ClarificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A clarification attached to a plan run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub id: Uuid,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(flatten)]
    pub request: ClarificationRequest,
}

impl Clarification {
    pub fn new(request: ClarificationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            resolved: false,
            response: None,
            request,
        }
    }

    pub fn kind(&self) -> ClarificationKind {
        self.request.kind()
    }
}
