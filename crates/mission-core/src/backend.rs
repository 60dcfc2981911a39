//! Where a specialist's work actually happens.
//!
//! [`MockBackend`] returns canned, schema-complete artifacts and is the
//! default. [`ProcessBackend`] runs the configured worker subprocess for the
//! phase (`MISSION_LIVE_WORKERS=1` or `orchestrator.live_workers: true`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::artifact;
use crate::config::Config;
use crate::error::{MissionError, Result};
use crate::records::NewToolCall;
use crate::types::Phase;
use crate::worker::{PhaseContext, PhaseOutcome};
use crate::worker_process;

pub trait WorkerBackend: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutcome>;
}

/// Pick the backend the config (and environment) asks for.
pub fn from_config(config: &Config, root: PathBuf) -> Arc<dyn WorkerBackend> {
    if config.live_workers() {
        tracing::info!(workers = config.workers.len(), "using live worker subprocesses");
        Arc::new(ProcessBackend::new(config.clone(), root))
    } else {
        Arc::new(MockBackend)
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// Deterministic no-op worker: every phase succeeds with a canned artifact.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockBackend;

impl WorkerBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutcome> {
        let goal = ctx
            .artifact(artifact::FEATURE_SPEC)
            .and_then(|f| f.get("title"))
            .and_then(|t| t.as_str())
            .unwrap_or(&ctx.project_id)
            .to_string();

        let outcome = match ctx.phase {
            Phase::Planning => PhaseOutcome::succeeded(Some(Phase::Coding)).with_artifact(
                artifact::FEATURE_SPEC,
                json!({
                    "title": ctx.project_id,
                    "requirements": ["placeholder requirement produced by the mock planner"],
                }),
            ),
            Phase::Coding => PhaseOutcome::succeeded(Some(Phase::Testing)).with_artifact(
                artifact::CODE_GEN_SPEC,
                json!({
                    "files": [],
                    "summary": format!("no-op implementation of '{goal}'"),
                    "attempt": ctx.attempt,
                }),
            ),
            Phase::Testing => PhaseOutcome::succeeded(Some(Phase::Deployment)).with_artifact(
                artifact::QA_REPORT,
                json!({
                    "status": artifact::QA_APPROVED,
                    "tests_run": 0,
                    "failures": [],
                }),
            ),
            Phase::Deployment => PhaseOutcome::succeeded(Some(Phase::Production)).with_artifact(
                artifact::DEPLOYMENT_REPORT,
                json!({
                    "environment": "mock",
                    "status": "deployed",
                }),
            ),
            Phase::Maintenance | Phase::Production => PhaseOutcome::succeeded(None).with_artifact(
                artifact::MAINTENANCE_REPORT,
                json!({
                    "phase": ctx.phase,
                    "actions": [],
                    "open_bug": ctx.artifact(artifact::BUG_REPORT).is_some(),
                }),
            ),
        };
        Ok(outcome.with_decision(format!("mock {} worker produced canned output", ctx.phase.key())))
    }
}

// ---------------------------------------------------------------------------
// ProcessBackend
// ---------------------------------------------------------------------------

pub struct ProcessBackend {
    config: Config,
    root: PathBuf,
}

impl ProcessBackend {
    pub fn new(config: Config, root: PathBuf) -> Self {
        Self { config, root }
    }
}

impl WorkerBackend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutcome> {
        let cmd = self.config.worker_for(ctx.phase).ok_or_else(|| {
            MissionError::WorkerSpawn(format!(
                "no live worker configured for phase '{}' (add workers.{} to config.yaml)",
                ctx.phase,
                ctx.phase.key()
            ))
        })?;
        let timeout = Duration::from_secs(
            cmd.timeout_seconds
                .unwrap_or(self.config.orchestrator.worker_timeout_seconds),
        );
        let input = serde_json::to_string(ctx)?;

        tracing::info!(phase = %ctx.phase, program = %cmd.program, attempt = ctx.attempt, "invoking live worker");
        let output = worker_process::run_worker(cmd, &input, &self.root, timeout)?;

        let mut outcome = match serde_json::from_str::<PhaseOutcome>(output.stdout.trim()) {
            Ok(o) => o,
            Err(e) if !output.exit_ok => PhaseOutcome::failed(format!(
                "worker exited with status {} and no readable outcome ({e}): {}",
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into()),
                output.stderr_tail(500)
            )),
            Err(e) => {
                return Err(MissionError::WorkerExecution {
                    phase: ctx.phase,
                    attempts: ctx.attempt,
                    message: format!("worker stdout is not a PhaseOutcome document: {e}"),
                })
            }
        };
        if !output.exit_ok && outcome.success {
            outcome.success = false;
            outcome.error.get_or_insert_with(|| {
                format!("worker exited non-zero: {}", output.stderr_tail(500))
            });
        }

        let mut call = NewToolCall::new(
            format!("worker:{}", cmd.program),
            json!(cmd.args),
        );
        call.duration_ms = output.duration_ms;
        call.success = output.exit_ok;
        call.result = json!({ "exit_code": output.exit_code });
        if !output.exit_ok {
            call.error = Some(output.stderr_tail(500));
        }
        outcome.tool_calls.insert(0, call);
        Ok(outcome)
    }
}
