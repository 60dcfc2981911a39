//! `execute_phase` and the CODING/TESTING repair loop.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{Orchestrator, ORCHESTRATOR_AGENT};
use crate::artifact;
use crate::error::{MissionError, Result};
use crate::manifest::{Manifest, SUB_STATE_EXECUTING, SUB_STATE_REPAIRING};
use crate::records::{phase_tag, tags, Mission, NewDecision, NewToolCall};
use crate::types::{MissionStatus, Phase, Severity};
use crate::worker::{PhaseOutcome, Preconditions};

/// What one `execute_phase` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
    pub mission_uuid: Uuid,
    pub from_phase: Phase,
    pub to_phase: Phase,
    /// Worker invocations in this call, repairs included.
    pub invocations: u32,
    pub artifacts: Vec<String>,
    pub cost: f64,
    pub mission_status: MissionStatus,
}

/// Result of a single worker invocation.
enum Attempt {
    Succeeded { next: Phase, artifacts: Vec<String> },
    Failed(String),
}

impl Orchestrator {
    /// Run the phase under `manifest.current_phase` to completion.
    ///
    /// A success advances the cursor (or leaves it when the worker names no
    /// next phase). Inside the CODING/TESTING loop a failure is retried
    /// in-process, a TESTING failure reverting the cursor to CODING, until
    /// `max_repair_attempts` failures have accumulated; then a `bug_report`
    /// is filed and the cursor is forced to MAINTENANCE. A DEPLOYMENT failure
    /// writes a `rollback_record` and keeps the phase. Any other failure halts.
    pub fn execute_phase(&self, manifest: &mut Manifest) -> Result<PhaseReport> {
        let mut mission = self.store.get_mission(manifest.mission_id)?;
        self.ensure_no_open_escalation(&mission)?;
        if mission.status != MissionStatus::InProgress {
            self.sync_mission(&mut mission, manifest, MissionStatus::InProgress)?;
        }

        let from_phase = manifest.current_phase;
        let spent_before = manifest.budget.spent;
        let max_attempts = self.config.orchestrator.max_repair_attempts.max(1);
        let mut invocations = 0u32;
        let mut produced = Vec::new();
        let mut last_failure: Option<String> = None;

        tracing::info!(mission = %manifest.mission_uuid, phase = %from_phase, "phase started");

        let final_phase = loop {
            let phase = manifest.current_phase;
            let attempt = manifest.repair_attempts + 1;
            invocations += 1;

            match self.run_once(&mut mission, manifest, attempt, last_failure.take())? {
                Attempt::Succeeded { next, artifacts } => {
                    produced.extend(artifacts);
                    let repairing = manifest.repair_attempts > 0;
                    if phase == Phase::Coding && next == Phase::Testing && repairing {
                        // Mid-repair: CODING is fixed, re-run TESTING in the same call.
                        self.transition(&mission, manifest, next, tags::PHASE_TRANSITION)?;
                        continue;
                    }
                    if phase == Phase::Testing || !next.in_repair_loop() {
                        manifest.repair_attempts = 0;
                    }
                    self.transition(&mission, manifest, next, tags::PHASE_TRANSITION)?;
                    break next;
                }
                Attempt::Failed(message) => {
                    if !phase.in_repair_loop() {
                        if phase == Phase::Deployment {
                            self.file_rollback(manifest, &message, attempt)?;
                        }
                        let err = MissionError::WorkerExecution {
                            phase,
                            attempts: 1,
                            message,
                        };
                        return Err(self.halt(&mut mission, manifest, phase_tag(phase, tags::FAILED), err));
                    }

                    manifest.repair_attempts += 1;
                    let used = manifest.repair_attempts;
                    self.store.record_decision(
                        mission.id,
                        &NewDecision::new(
                            tags::REPAIR_ATTEMPT,
                            ORCHESTRATOR_AGENT,
                            format!("{phase} failed ({used}/{max_attempts}): {message}"),
                        )
                        .with_context(json!({ "phase": phase, "attempt": used, "max": max_attempts })),
                    )?;
                    tracing::warn!(
                        mission = %manifest.mission_uuid,
                        phase = %phase,
                        attempt = used,
                        max = max_attempts,
                        "repair attempt failed"
                    );

                    if used >= max_attempts {
                        self.file_bug_report(&mission, manifest, phase, &message)?;
                        let err = MissionError::WorkerExecution {
                            phase,
                            attempts: used,
                            message: format!(
                                "repair loop exhausted, bug report filed and mission moved to MAINTENANCE: {message}"
                            ),
                        };
                        return Err(self.halt(
                            &mut mission,
                            manifest,
                            tags::REPAIR_EXHAUSTED.to_string(),
                            err,
                        ));
                    }

                    manifest.sub_state = Some(SUB_STATE_REPAIRING.to_string());
                    if phase == Phase::Testing {
                        self.transition(&mission, manifest, Phase::Coding, tags::REPAIR_LOOP_REVERT)?;
                    } else {
                        manifest.save(&self.root)?;
                    }
                    last_failure = Some(message);
                }
            }
        };

        manifest.sub_state = None;
        manifest.save(&self.root)?;

        let status = if final_phase == Phase::Production {
            MissionStatus::Completed
        } else {
            MissionStatus::InProgress
        };
        self.sync_mission(&mut mission, manifest, status)?;

        if manifest.budget.exceeded() {
            let err = MissionError::BudgetExceeded {
                mission: manifest.mission_uuid.to_string(),
                spent: manifest.budget.spent,
                ceiling: manifest.budget.ceiling,
            };
            return Err(self.halt(&mut mission, manifest, tags::BUDGET_EXCEEDED.to_string(), err));
        }

        tracing::info!(
            mission = %manifest.mission_uuid,
            from = %from_phase,
            to = %final_phase,
            invocations,
            "phase completed"
        );
        Ok(PhaseReport {
            mission_uuid: manifest.mission_uuid,
            from_phase,
            to_phase: final_phase,
            invocations,
            artifacts: produced,
            cost: manifest.budget.spent - spent_before,
            mission_status: status,
        })
    }

    /// One worker invocation for `manifest.current_phase`. Worker failures
    /// come back as [`Attempt::Failed`]; anything else that goes wrong halts
    /// the mission and is returned as `Err`.
    fn run_once(
        &self,
        mission: &mut Mission,
        manifest: &mut Manifest,
        attempt: u32,
        last_failure: Option<String>,
    ) -> Result<Attempt> {
        let phase = manifest.current_phase;

        let specialist = match self.registry.get(phase) {
            Ok(s) => s,
            Err(e) => return Err(self.halt(mission, manifest, phase_tag(phase, tags::FAILED), e)),
        };
        let ctx = match self.context(manifest, attempt, last_failure) {
            Ok(c) => c,
            Err(e) => return Err(self.halt(mission, manifest, phase_tag(phase, tags::FAILED), e)),
        };

        if let Preconditions::Unsatisfied { artifact, reason } = specialist.validate_preconditions(&ctx) {
            let err = MissionError::PreconditionFailure {
                phase,
                artifact,
                reason,
            };
            return Err(self.halt(
                mission,
                manifest,
                phase_tag(phase, tags::PRECONDITION_FAILED),
                err,
            ));
        }

        self.store.record_decision(
            mission.id,
            &NewDecision::new(
                phase_tag(phase, tags::STARTED),
                ORCHESTRATOR_AGENT,
                format!("dispatching {phase} to '{}' (attempt {attempt})", specialist.name()),
            )
            .with_context(json!({ "worker": specialist.name(), "attempt": attempt })),
        )?;
        if manifest.sub_state.is_none() {
            manifest.sub_state = Some(SUB_STATE_EXECUTING.to_string());
        }
        manifest.save(&self.root)?;

        let outcome = match specialist.execute(&ctx) {
            Ok(o) => o,
            Err(e) if e.is_worker_failure() => {
                let mut call = NewToolCall::new(
                    format!("{}:execute", specialist.name()),
                    json!({ "phase": phase, "attempt": attempt }),
                );
                call.success = false;
                call.error = Some(e.to_string());
                self.store.record_tool_call(mission.id, &call)?;
                PhaseOutcome::failed(e.to_string())
            }
            Err(e) => return Err(self.halt(mission, manifest, phase_tag(phase, tags::FAILED), e)),
        };

        for call in &outcome.tool_calls {
            self.store.record_tool_call(mission.id, call)?;
        }
        for summary in &outcome.decisions {
            self.store.record_decision(
                mission.id,
                &NewDecision::new(tags::WORKER_DECISION, specialist.name(), summary.as_str())
                    .with_context(json!({ "phase": phase })),
            )?;
        }
        if outcome.cost > 0.0 {
            manifest.budget.spent += outcome.cost;
        }

        let failure = if !outcome.success {
            Some(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{phase} worker reported failure without a message")),
            )
        } else {
            let next = outcome.next_phase.unwrap_or(phase);
            (!phase.can_move_to(next)).then(|| {
                MissionError::IllegalTransition { from: phase, to: next }.to_string()
            })
        };
        if let Some(message) = failure {
            self.store.record_decision(
                mission.id,
                &NewDecision::new(phase_tag(phase, tags::FAILED), ORCHESTRATOR_AGENT, message.as_str())
                    .with_context(json!({ "attempt": attempt })),
            )?;
            return Ok(Attempt::Failed(message));
        }

        let mut names = Vec::with_capacity(outcome.artifacts.len());
        for produced in &outcome.artifacts {
            if let Err(e) = self.save_artifact(manifest, &produced.name, &produced.content) {
                return Err(self.halt(mission, manifest, phase_tag(phase, tags::FAILED), e));
            }
            names.push(produced.name.clone());
        }

        let next = outcome.next_phase.unwrap_or(phase);
        self.store.record_decision(
            mission.id,
            &NewDecision::new(
                phase_tag(phase, tags::COMPLETED),
                ORCHESTRATOR_AGENT,
                format!("{phase} succeeded; next phase {next}"),
            )
            .with_context(json!({
                "artifacts": names,
                "next_phase": outcome.next_phase,
                "cost": outcome.cost,
            })),
        )?;
        Ok(Attempt::Succeeded {
            next,
            artifacts: names,
        })
    }

    /// Move the cursor, persist the manifest and mirror the phase to the store.
    fn transition(&self, mission: &Mission, manifest: &mut Manifest, to: Phase, tag: &str) -> Result<()> {
        let from = manifest.current_phase;
        manifest.current_phase = to;
        manifest.save(&self.root)?;
        if from != to {
            self.store.record_decision(
                mission.id,
                &NewDecision::new(tag, ORCHESTRATOR_AGENT, format!("{from} -> {to}"))
                    .with_context(json!({ "from": from, "to": to })),
            )?;
            let mut row = self.store.get_mission(mission.id)?;
            row.phase = to;
            row.cost = manifest.budget.spent;
            self.store.update_mission(&row)?;
            tracing::info!(mission = %manifest.mission_uuid, from = %from, to = %to, "phase transition");
        }
        Ok(())
    }

    fn file_bug_report(
        &self,
        mission: &Mission,
        manifest: &mut Manifest,
        phase: Phase,
        message: &str,
    ) -> Result<()> {
        let severity = if phase == Phase::Coding {
            Severity::Critical
        } else {
            Severity::High
        };
        let report = json!({
            "severity": severity,
            "phase": phase,
            "attempts": manifest.repair_attempts,
            "last_failure": message,
            "summary": format!("{phase} still failing after {} repair attempt(s)", manifest.repair_attempts),
            "filed_at": Utc::now(),
        });
        self.save_artifact(manifest, artifact::BUG_REPORT, &report)?;
        self.store.record_decision(
            mission.id,
            &NewDecision::new(
                tags::BUG_REPORT_FILED,
                ORCHESTRATOR_AGENT,
                format!("{severity} bug report filed for {phase}"),
            )
            .with_context(json!({ "severity": severity, "phase": phase })),
        )?;
        manifest.repair_attempts = 0;
        manifest.sub_state = None;
        self.transition(mission, manifest, Phase::Maintenance, tags::PHASE_TRANSITION)
    }

    fn file_rollback(&self, manifest: &mut Manifest, message: &str, attempt: u32) -> Result<()> {
        let previous = manifest
            .artifacts
            .get(artifact::DEPLOYMENT_REPORT)
            .map(|a| a.sha256.clone());
        let record = json!({
            "phase": Phase::Deployment,
            "reason": message,
            "attempt": attempt,
            "previous_deployment": previous,
            "rolled_back_at": Utc::now(),
        });
        self.save_artifact(manifest, artifact::ROLLBACK_RECORD, &record)?;
        self.store.record_decision(
            manifest.mission_id,
            &NewDecision::new(
                tags::ROLLBACK,
                ORCHESTRATOR_AGENT,
                format!("deployment failed, rollback recorded: {message}"),
            ),
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
