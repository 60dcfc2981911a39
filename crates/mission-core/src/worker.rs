//! The contract every phase specialist implements.
//!
//! A specialist is a black box: it gets a read-only [`PhaseContext`], says
//! whether its inputs are present, and returns a [`PhaseOutcome`]. It never
//! writes shared state; produced artifacts are persisted by the orchestrator.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::records::NewToolCall;
use crate::types::Phase;

/// Everything a worker may read about its mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseContext {
    pub mission_id: i64,
    pub mission_uuid: Uuid,
    pub project_id: String,
    pub phase: Phase,
    pub project_root: PathBuf,
    /// Saved artifacts by name.
    pub artifacts: BTreeMap<String, serde_json::Value>,
    /// 1-based attempt number within the current repair loop.
    pub attempt: u32,
    /// Failure text from the previous attempt, if this is a repair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

impl PhaseContext {
    pub fn artifact(&self, name: &str) -> Option<&serde_json::Value> {
        self.artifacts.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Preconditions {
    Satisfied,
    Unsatisfied { artifact: String, reason: String },
}

impl Preconditions {
    pub fn missing(artifact: &str) -> Self {
        Preconditions::Unsatisfied {
            artifact: artifact.to_string(),
            reason: format!("required artifact '{artifact}' has not been produced"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedArtifact {
    pub name: String,
    pub content: serde_json::Value,
}

/// Structured result of one `execute` call. Also the stdout document of a
/// live worker subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub success: bool,
    #[serde(default)]
    pub next_phase: Option<Phase>,
    #[serde(default)]
    pub artifacts: Vec<ProducedArtifact>,
    /// Human-readable decision summaries, recorded as `WORKER_DECISION`.
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub tool_calls: Vec<NewToolCall>,
}

impl PhaseOutcome {
    pub fn succeeded(next_phase: Option<Phase>) -> Self {
        Self {
            success: true,
            next_phase,
            artifacts: Vec::new(),
            decisions: Vec::new(),
            error: None,
            cost: 0.0,
            tool_calls: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(None)
        }
    }

    pub fn with_artifact(mut self, name: impl Into<String>, content: serde_json::Value) -> Self {
        self.artifacts.push(ProducedArtifact {
            name: name.into(),
            content,
        });
        self
    }

    pub fn with_decision(mut self, summary: impl Into<String>) -> Self {
        self.decisions.push(summary.into());
        self
    }
}

pub trait Specialist: Send + Sync {
    fn name(&self) -> &str;

    fn validate_preconditions(&self, ctx: &PhaseContext) -> Preconditions;

    /// Run the phase. `Err` means the worker could not run at all (spawn
    /// failure, timeout, unreadable output); a run that ran and failed is an
    /// `Ok` outcome with `success == false`.
    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_parses_minimal_worker_json() {
        let out: PhaseOutcome =
            serde_json::from_str(r#"{"success": true, "next_phase": "TESTING"}"#).unwrap();
        assert_eq!(out.next_phase, Some(Phase::Testing));
        assert!(out.artifacts.is_empty());
        assert_eq!(out.cost, 0.0);
    }

    #[test]
    fn failed_outcome_carries_error() {
        let out = PhaseOutcome::failed("3 tests failed");
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("3 tests failed"));
        assert_eq!(out.next_phase, None);
    }
}
