use crate::safety::Violation;
use crate::task::ValidationCheck;
use crate::types::Phase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("not initialized: run 'mission init'")]
    NotInitialized,

    #[error("mission not found: {0}")]
    MissionNotFound(String),

    #[error("mission already exists: {0}")]
    MissionExists(String),

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("invalid artifact name '{0}': must be lowercase alphanumeric with underscores")]
    InvalidArtifactName(String),

    #[error("no specialist registered for phase '{phase}' (known phases: {known})")]
    UnregisteredPhase { phase: Phase, known: String },

    #[error("precondition failed for phase '{phase}': {reason} (artifact: {artifact})")]
    PreconditionFailure {
        phase: Phase,
        artifact: String,
        reason: String,
    },

    #[error("worker for phase '{phase}' failed after {attempts} attempt(s): {message}")]
    WorkerExecution {
        phase: Phase,
        attempts: u32,
        message: String,
    },

    #[error("worker '{worker}' timed out after {seconds}s")]
    WorkerTimeout { worker: String, seconds: u64 },

    #[error("worker spawn failed: {0}")]
    WorkerSpawn(String),

    #[error("{0}")]
    SafetyViolation(Box<Violation>),

    #[error("mission {mission} is halted by a safety escalation on {kinds}; an operator must clear it with 'mission safety clear {mission}'")]
    EscalationOpen { mission: String, kinds: String },

    #[error("illegal phase transition from {from} to {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("budget exceeded for mission {mission}: spent {spent:.2} of {ceiling:.2}")]
    BudgetExceeded {
        mission: String,
        spent: f64,
        ceiling: f64,
    },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task already exists: {0}")]
    TaskExists(String),

    #[error("task '{task}' is blocked by: {blockers}")]
    TaskBlocked { task: String, blockers: String },

    #[error("no current task: start one with 'mission task start <id>'")]
    NoCurrentTask,

    #[error("task '{task}' failed validation: {}", failed_checks(.checks))]
    ValidationFailed {
        task: String,
        checks: Vec<ValidationCheck>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MissionError {
    /// Short machine-readable tag, used for decision records and exit codes.
    pub fn kind(&self) -> &'static str {
        match self {
            MissionError::PreconditionFailure { .. } => "precondition_failure",
            MissionError::WorkerExecution { .. }
            | MissionError::WorkerTimeout { .. }
            | MissionError::WorkerSpawn(_)
            | MissionError::IllegalTransition { .. } => "worker_execution_failure",
            MissionError::SafetyViolation(_) | MissionError::EscalationOpen { .. } => "safety_violation",
            MissionError::Persistence(_)
            | MissionError::Io(_)
            | MissionError::Sqlite(_) => "persistence_failure",
            MissionError::BudgetExceeded { .. } => "budget_exceeded",
            MissionError::ValidationFailed { .. } => "validation_failed",
            _ => "error",
        }
    }

    /// Failures the repair loop may retry in-process.
    pub fn is_worker_failure(&self) -> bool {
        self.kind() == "worker_execution_failure"
    }
}

fn failed_checks(checks: &[ValidationCheck]) -> String {
    let failed: Vec<String> = checks
        .iter()
        .filter(|c| !c.status)
        .map(|c| match &c.error {
            Some(e) => format!("{} ({e})", c.id),
            None => c.id.clone(),
        })
        .collect();
    format!("{} of {} check(s) false: {}", failed.len(), checks.len(), failed.join(", "))
}

pub type Result<T> = std::result::Result<T, MissionError>;
