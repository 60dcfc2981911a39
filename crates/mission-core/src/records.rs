//! Durable record types: missions, decisions, tool calls and agent memory.
//!
//! Decisions and tool calls are append-only. Once inserted they are never
//! updated; they disappear only when their mission is deleted.

use crate::types::{MissionStatus, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    /// Store-assigned numeric id.
    pub id: i64,
    /// External identifier, stable across restarts.
    pub uuid: Uuid,
    pub project_id: String,
    pub phase: Phase,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub budget: f64,
    pub cost: f64,
}

/// Insert payload for a mission; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewMission {
    pub uuid: Uuid,
    pub project_id: String,
    pub phase: Phase,
    pub status: MissionStatus,
    pub metadata: serde_json::Value,
    pub budget: f64,
}

impl NewMission {
    pub fn new(project_id: impl Into<String>, budget: f64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            project_id: project_id.into(),
            phase: Phase::Planning,
            status: MissionStatus::Pending,
            metadata: serde_json::json!({}),
            budget,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Decision type tags written by the orchestrator. Phase-scoped tags are
/// built with [`phase_tag`], e.g. `CODING_STARTED`.
pub mod tags {
    pub const STARTED: &str = "STARTED";
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";
    pub const PRECONDITION_FAILED: &str = "PRECONDITION_FAILED";

    pub const MISSION_CREATED: &str = "MISSION_CREATED";
    pub const PHASE_TRANSITION: &str = "PHASE_TRANSITION";
    pub const REPAIR_ATTEMPT: &str = "REPAIR_ATTEMPT";
    pub const REPAIR_LOOP_REVERT: &str = "REPAIR_LOOP_REVERT";
    pub const REPAIR_EXHAUSTED: &str = "REPAIR_EXHAUSTED";
    pub const BUG_REPORT_FILED: &str = "BUG_REPORT_FILED";
    pub const ROLLBACK: &str = "ROLLBACK";
    pub const ARTIFACT_SAVED: &str = "ARTIFACT_SAVED";
    pub const SCHEMA_VALIDATION_WARNING: &str = "SCHEMA_VALIDATION_WARNING";
    pub const SAFETY_VIOLATION: &str = "SAFETY_VIOLATION";
    pub const SAFETY_ESCALATION: &str = "SAFETY_ESCALATION";
    pub const ESCALATION_CLEARED: &str = "ESCALATION_CLEARED";
    pub const VERIFICATION_RECORDED: &str = "VERIFICATION_RECORDED";
    pub const BUDGET_EXCEEDED: &str = "BUDGET_EXCEEDED";
    pub const WORKER_DECISION: &str = "WORKER_DECISION";
    pub const LEGACY_IMPORTED: &str = "LEGACY_IMPORTED";
}

/// `<PHASE>_<SUFFIX>`, e.g. `phase_tag(Phase::Coding, tags::STARTED)` → `CODING_STARTED`.
pub fn phase_tag(phase: Phase, suffix: &str) -> String {
    format!("{}_{}", phase.as_str(), suffix)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub mission_id: i64,
    pub decision_type: String,
    pub rationale: String,
    pub agent: String,
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDecision {
    pub decision_type: String,
    pub rationale: String,
    pub agent: String,
    pub context: serde_json::Value,
}

impl NewDecision {
    pub fn new(
        decision_type: impl Into<String>,
        agent: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            decision_type: decision_type.into(),
            rationale: rationale.into(),
            agent: agent.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

// ---------------------------------------------------------------------------
// ToolCall
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: i64,
    pub mission_id: i64,
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A side-effecting action reported by a worker (or by the orchestrator
/// itself when it invokes a worker subprocess).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl NewToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            result: serde_json::Value::Null,
            duration_ms: 0,
            success: true,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub mission_id: i64,
    pub key: String,
    pub value: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
