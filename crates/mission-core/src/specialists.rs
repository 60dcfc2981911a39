//! Built-in phase specialists. Each one owns its preconditions and default
//! next phase; the work itself is delegated to a [`WorkerBackend`].

use std::sync::Arc;

use crate::artifact;
use crate::backend::WorkerBackend;
use crate::error::Result;
use crate::types::Phase;
use crate::worker::{PhaseContext, PhaseOutcome, Preconditions, Specialist};

/// Fill in the default next phase when a successful worker left it empty.
fn with_default_next(mut outcome: PhaseOutcome, next: Option<Phase>) -> PhaseOutcome {
    if outcome.success && outcome.next_phase.is_none() {
        outcome.next_phase = next;
    }
    outcome
}

fn require(ctx: &PhaseContext, name: &str) -> Preconditions {
    if ctx.artifact(name).is_some() {
        Preconditions::Satisfied
    } else {
        Preconditions::missing(name)
    }
}

// ---------------------------------------------------------------------------
// PLANNING
// ---------------------------------------------------------------------------

pub struct PlanningSpecialist {
    backend: Arc<dyn WorkerBackend>,
}

impl PlanningSpecialist {
    pub fn new(backend: Arc<dyn WorkerBackend>) -> Self {
        Self { backend }
    }
}

impl Specialist for PlanningSpecialist {
    fn name(&self) -> &str {
        "planning"
    }

    fn validate_preconditions(&self, _ctx: &PhaseContext) -> Preconditions {
        Preconditions::Satisfied
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutcome> {
        Ok(with_default_next(self.backend.run(ctx)?, Some(Phase::Coding)))
    }
}

// ---------------------------------------------------------------------------
// CODING
// ---------------------------------------------------------------------------

pub struct CodingSpecialist {
    backend: Arc<dyn WorkerBackend>,
}

impl CodingSpecialist {
    pub fn new(backend: Arc<dyn WorkerBackend>) -> Self {
        Self { backend }
    }
}

impl Specialist for CodingSpecialist {
    fn name(&self) -> &str {
        "coding"
    }

    fn validate_preconditions(&self, ctx: &PhaseContext) -> Preconditions {
        require(ctx, artifact::FEATURE_SPEC)
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutcome> {
        Ok(with_default_next(self.backend.run(ctx)?, Some(Phase::Testing)))
    }
}

// ---------------------------------------------------------------------------
// TESTING
// ---------------------------------------------------------------------------

pub struct TestingSpecialist {
    backend: Arc<dyn WorkerBackend>,
}

impl TestingSpecialist {
    pub fn new(backend: Arc<dyn WorkerBackend>) -> Self {
        Self { backend }
    }
}

impl Specialist for TestingSpecialist {
    fn name(&self) -> &str {
        "testing"
    }

    fn validate_preconditions(&self, ctx: &PhaseContext) -> Preconditions {
        require(ctx, artifact::CODE_GEN_SPEC)
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutcome> {
        Ok(with_default_next(self.backend.run(ctx)?, Some(Phase::Deployment)))
    }
}

// ---------------------------------------------------------------------------
// DEPLOYMENT
// ---------------------------------------------------------------------------

pub struct DeploymentSpecialist {
    backend: Arc<dyn WorkerBackend>,
}

impl DeploymentSpecialist {
    pub fn new(backend: Arc<dyn WorkerBackend>) -> Self {
        Self { backend }
    }
}

impl Specialist for DeploymentSpecialist {
    fn name(&self) -> &str {
        "deployment"
    }

    /// QA must have signed off: `qa_report.status == "APPROVED"`.
    fn validate_preconditions(&self, ctx: &PhaseContext) -> Preconditions {
        let Some(report) = ctx.artifact(artifact::QA_REPORT) else {
            return Preconditions::missing(artifact::QA_REPORT);
        };
        match report.get("status").and_then(|s| s.as_str()) {
            Some(artifact::QA_APPROVED) => Preconditions::Satisfied,
            Some(other) => Preconditions::Unsatisfied {
                artifact: artifact::QA_REPORT.to_string(),
                reason: format!(
                    "qa_report.status is '{other}', deployment requires '{}'",
                    artifact::QA_APPROVED
                ),
            },
            None => Preconditions::Unsatisfied {
                artifact: artifact::QA_REPORT.to_string(),
                reason: "qa_report has no string 'status' field".to_string(),
            },
        }
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutcome> {
        Ok(with_default_next(self.backend.run(ctx)?, Some(Phase::Production)))
    }
}

// ---------------------------------------------------------------------------
// MAINTENANCE / PRODUCTION
// ---------------------------------------------------------------------------

/// Serves both MAINTENANCE and PRODUCTION; steady state, no next phase.
pub struct MaintenanceSpecialist {
    backend: Arc<dyn WorkerBackend>,
}

impl MaintenanceSpecialist {
    pub fn new(backend: Arc<dyn WorkerBackend>) -> Self {
        Self { backend }
    }
}

impl Specialist for MaintenanceSpecialist {
    fn name(&self) -> &str {
        "maintenance"
    }

    fn validate_preconditions(&self, _ctx: &PhaseContext) -> Preconditions {
        Preconditions::Satisfied
    }

    fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutcome> {
        self.backend.run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn ctx(phase: Phase, artifacts: &[(&str, serde_json::Value)]) -> PhaseContext {
        PhaseContext {
            mission_id: 1,
            mission_uuid: Uuid::new_v4(),
            project_id: "demo".into(),
            phase,
            project_root: PathBuf::from("/tmp"),
            artifacts: artifacts
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            attempt: 1,
            last_failure: None,
        }
    }

    #[test]
    fn coding_requires_feature_spec() {
        let s = CodingSpecialist::new(Arc::new(MockBackend));
        assert_eq!(
            s.validate_preconditions(&ctx(Phase::Coding, &[])),
            Preconditions::missing("feature_spec")
        );
        assert_eq!(
            s.validate_preconditions(&ctx(Phase::Coding, &[("feature_spec", json!({}))])),
            Preconditions::Satisfied
        );
    }

    #[test]
    fn deployment_requires_approved_qa() {
        let s = DeploymentSpecialist::new(Arc::new(MockBackend));
        let rejected = ctx(Phase::Deployment, &[("qa_report", json!({"status": "REJECTED"}))]);
        match s.validate_preconditions(&rejected) {
            Preconditions::Unsatisfied { artifact, reason } => {
                assert_eq!(artifact, "qa_report");
                assert!(reason.contains("REJECTED"));
            }
            Preconditions::Satisfied => panic!("rejected QA must not deploy"),
        }
        let approved = ctx(Phase::Deployment, &[("qa_report", json!({"status": "APPROVED"}))]);
        assert_eq!(s.validate_preconditions(&approved), Preconditions::Satisfied);
    }

    #[test]
    fn maintenance_has_no_next_phase() {
        let s = MaintenanceSpecialist::new(Arc::new(MockBackend));
        let out = s.execute(&ctx(Phase::Production, &[])).unwrap();
        assert!(out.success);
        assert_eq!(out.next_phase, None);
    }
}
