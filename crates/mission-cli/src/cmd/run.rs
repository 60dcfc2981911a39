use super::parse_uuid;
use crate::output::print_json;
use anyhow::Context;
use mission_core::{orchestrator::Orchestrator, MissionError};
use std::path::Path;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes (no std::process::exit in command code)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    Precondition(String),
    WorkerFailed(String),
    SafetyEscalation(String),
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::Precondition(_) => 2,
            RunExit::WorkerFailed(_) => 3,
            RunExit::SafetyEscalation(_) => 4,
        }
    }

    /// Typed exit for the error kinds that have one; everything else stays a
    /// plain error (exit 1).
    pub fn from_error(err: MissionError) -> anyhow::Error {
        let exit = match &err {
            MissionError::PreconditionFailure { .. } => Some(RunExit::Precondition(err.to_string())),
            MissionError::SafetyViolation(v) if v.is_escalated() => {
                Some(RunExit::SafetyEscalation(err.to_string()))
            }
            MissionError::EscalationOpen { .. } => Some(RunExit::SafetyEscalation(err.to_string())),
            e if e.is_worker_failure() => Some(RunExit::WorkerFailed(err.to_string())),
            _ => None,
        };
        match exit {
            Some(exit) => exit.into(),
            None => err.into(),
        }
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::Precondition(msg) | RunExit::WorkerFailed(msg) | RunExit::SafetyEscalation(msg) => {
                f.write_str(msg)
            }
        }
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// run-phase
// ---------------------------------------------------------------------------

pub fn run(root: &Path, uuid: &str, json: bool) -> anyhow::Result<()> {
    let uuid = parse_uuid(uuid)?;
    let orch = Orchestrator::open(root).context("failed to open orchestrator")?;
    let mut manifest = orch
        .load_manifest(&uuid)
        .with_context(|| format!("no manifest for mission {uuid}"))?;

    let report = orch
        .execute_phase(&mut manifest)
        .map_err(RunExit::from_error)?;

    if json {
        print_json(&report)?;
    } else if report.from_phase == report.to_phase {
        println!(
            "Phase {} ran ({} invocation(s)); mission is {}",
            report.from_phase, report.invocations, report.mission_status
        );
    } else {
        println!(
            "Phase {} -> {} ({} invocation(s)); mission is {}",
            report.from_phase, report.to_phase, report.invocations, report.mission_status
        );
    }
    if !json && !report.artifacts.is_empty() {
        println!("  artifacts: {}", report.artifacts.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::types::Phase;

    #[test]
    fn exit_codes_by_error_kind() {
        let pre = MissionError::PreconditionFailure {
            phase: Phase::Deployment,
            artifact: "qa_report".into(),
            reason: "not approved".into(),
        };
        let worker = MissionError::WorkerExecution {
            phase: Phase::Coding,
            attempts: 3,
            message: "exhausted".into(),
        };
        let code = |e: MissionError| {
            RunExit::from_error(e)
                .downcast_ref::<RunExit>()
                .map(|r| r.exit_code())
                .unwrap_or(1)
        };
        assert_eq!(code(pre), 2);
        assert_eq!(code(worker), 3);
        let open = MissionError::EscalationOpen {
            mission: "m".into(),
            kinds: "unverified-push".into(),
        };
        assert_eq!(code(open), 4);
        assert_eq!(code(MissionError::NotInitialized), 1);
    }
}
