//! Mission state machine.
//!
//! The [`Orchestrator`] is the only writer of manifests and the only caller of
//! the store's mission mutations. It owns:
//!
//! - the phase cursor (`Manifest::current_phase`) and its legality rules
//! - dispatch to the [`SpecialistRegistry`]
//! - the artifact-save API workers persist through
//! - the CODING/TESTING repair loop ([`phase`])
//!
//! Every failure path records a Decision before it propagates.

mod phase;

pub use phase::PhaseReport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::artifact;
use crate::backend;
use crate::config::Config;
use crate::error::{MissionError, Result};
use crate::manifest::{ArtifactRef, Manifest};
use crate::paths;
use crate::records::{tags, Mission, NewDecision, NewMission};
use crate::registry::SpecialistRegistry;
use crate::safety::{Operation, OperationKind, SafetyKernel};
use crate::store::Store;
use crate::types::{MissionStatus, Phase};
use crate::worker::PhaseContext;

/// Agent name on decisions the orchestrator itself writes.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";

pub struct Orchestrator {
    root: PathBuf,
    config: Config,
    store: Arc<Store>,
    registry: SpecialistRegistry,
    kernel: SafetyKernel,
}

impl Orchestrator {
    pub fn new(root: &Path, config: Config, store: Arc<Store>, registry: SpecialistRegistry) -> Self {
        let kernel = SafetyKernel::new(root).with_ledger(store.clone());
        Self {
            root: root.to_path_buf(),
            config,
            store,
            registry,
            kernel,
        }
    }

    /// Load config, open the store and wire the built-in specialists to the
    /// configured backend.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let store = Arc::new(Store::open(&paths::store_path(root))?);
        let registry =
            SpecialistRegistry::with_defaults(backend::from_config(&config, root.to_path_buf()));
        Ok(Self::new(root, config, store, registry))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn kernel(&self) -> &SafetyKernel {
        &self.kernel
    }

    pub fn registry_mut(&mut self) -> &mut SpecialistRegistry {
        &mut self.registry
    }

    // -----------------------------------------------------------------------
    // Missions
    // -----------------------------------------------------------------------

    /// Create a mission at PLANNING: store row, manifest and creation decision.
    pub fn create_mission(
        &self,
        project_id: Option<&str>,
        metadata: serde_json::Value,
        budget: Option<f64>,
    ) -> Result<(Mission, Manifest)> {
        let project_id = project_id.unwrap_or(&self.config.project.name);
        let budget = budget.unwrap_or(self.config.orchestrator.default_budget);
        let new = NewMission::new(project_id, budget).with_metadata(metadata);
        let mission = self.store.create_mission(&new)?;

        let mut manifest = Manifest::new(project_id, mission.uuid, mission.id, budget);
        crate::io::ensure_dir(&paths::mission_dir(&self.root, &mission.uuid.to_string()))?;
        manifest.save(&self.root)?;

        self.store.record_decision(
            mission.id,
            &NewDecision::new(
                tags::MISSION_CREATED,
                ORCHESTRATOR_AGENT,
                format!("mission created for project '{project_id}' with budget {budget:.2}"),
            )
            .with_context(json!({ "phase": Phase::Planning, "budget": budget })),
        )?;
        tracing::info!(mission = %mission.uuid, project = %project_id, "mission created");
        Ok((mission, manifest))
    }

    pub fn load_manifest(&self, uuid: &Uuid) -> Result<Manifest> {
        Manifest::load(&self.root, uuid)
    }

    pub fn mission(&self, uuid: &Uuid) -> Result<Mission> {
        self.store.get_mission_by_uuid(uuid)
    }

    /// Remove the mission's store rows (cascade) and its directory.
    pub fn delete_mission(&self, uuid: &Uuid) -> Result<bool> {
        let mission = match self.store.get_mission_by_uuid(uuid) {
            Ok(m) => m,
            Err(MissionError::MissionNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let deleted = self.store.delete_mission(mission.id)?;
        let dir = paths::mission_dir(&self.root, &uuid.to_string());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        tracing::info!(mission = %uuid, "mission deleted");
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// The artifact-save API. Writes `content` under the mission's artifact
    /// directory, indexes it in the manifest with its content hash and
    /// persists the manifest. A schema mismatch is logged and recorded as a
    /// `SCHEMA_VALIDATION_WARNING` decision; the write still happens.
    pub fn save_artifact(
        &self,
        manifest: &mut Manifest,
        name: &str,
        content: &serde_json::Value,
    ) -> Result<ArtifactRef> {
        self.check_operation(
            manifest.mission_id,
            &Operation::SaveArtifact {
                name: name.to_string(),
            },
        )?;

        let missing = artifact::validate_schema(&self.config, name, content);
        if !missing.is_empty() {
            tracing::warn!(
                mission = %manifest.mission_uuid,
                artifact = name,
                missing = ?missing,
                "artifact does not match its schema"
            );
            self.store.record_decision(
                manifest.mission_id,
                &NewDecision::new(
                    tags::SCHEMA_VALIDATION_WARNING,
                    ORCHESTRATOR_AGENT,
                    format!("artifact '{name}' is missing required keys: {}", missing.join(", ")),
                )
                .with_context(json!({ "artifact": name, "missing": missing })),
            )?;
        }

        let uuid = manifest.mission_uuid.to_string();
        let bytes = serde_json::to_vec_pretty(content)?;
        crate::io::atomic_write(&paths::artifact_path(&self.root, &uuid, name), &bytes)?;

        let entry = ArtifactRef {
            path: paths::artifact_rel_path(&uuid, name),
            sha256: artifact::content_hash(&bytes),
            saved_at: Utc::now(),
        };
        manifest.artifacts.insert(name.to_string(), entry.clone());
        manifest.save(&self.root)?;

        self.store.record_decision(
            manifest.mission_id,
            &NewDecision::new(
                tags::ARTIFACT_SAVED,
                ORCHESTRATOR_AGENT,
                format!("saved artifact '{name}'"),
            )
            .with_context(json!({ "artifact": name, "path": entry.path, "sha256": entry.sha256 })),
        )?;
        tracing::debug!(mission = %manifest.mission_uuid, artifact = name, "artifact saved");
        Ok(entry)
    }

    /// Read every indexed artifact into a worker context.
    pub fn context(
        &self,
        manifest: &Manifest,
        attempt: u32,
        last_failure: Option<String>,
    ) -> Result<PhaseContext> {
        let uuid = manifest.mission_uuid.to_string();
        let mut artifacts = std::collections::BTreeMap::new();
        for name in manifest.artifacts.keys() {
            artifacts.insert(name.clone(), artifact::load_artifact(&self.root, &uuid, name)?);
        }
        Ok(PhaseContext {
            mission_id: manifest.mission_id,
            mission_uuid: manifest.mission_uuid,
            project_id: manifest.project_id.clone(),
            phase: manifest.current_phase,
            project_root: self.root.clone(),
            artifacts,
            attempt,
            last_failure,
        })
    }

    // -----------------------------------------------------------------------
    // Safety
    // -----------------------------------------------------------------------

    /// Run `op` past the safety kernel; a violation is recorded as a
    /// `SAFETY_VIOLATION` decision before it is returned. An operator-tier
    /// violation also halts the mission.
    pub fn check_operation(&self, mission_id: i64, op: &Operation) -> Result<()> {
        match self.kernel.check(mission_id, op) {
            Err(MissionError::SafetyViolation(v)) => {
                self.store.record_decision(
                    mission_id,
                    &NewDecision::new(tags::SAFETY_VIOLATION, "safety-kernel", v.to_string())
                        .with_context(json!({
                            "kind": v.kind,
                            "tier": v.tier,
                            "attempt": v.attempt,
                            "operation": op,
                        })),
                )?;
                let escalated = v.is_escalated();
                let err = MissionError::SafetyViolation(v);
                if !escalated {
                    return Err(err);
                }
                let mut mission = self.store.get_mission(mission_id)?;
                Err(match Manifest::load(&self.root, &mission.uuid) {
                    Ok(mut manifest) => {
                        self.halt(&mut mission, &mut manifest, tags::SAFETY_ESCALATION.into(), err)
                    }
                    // Imported legacy missions have no manifest to park.
                    Err(MissionError::MissionNotFound(_)) => {
                        self.halt_without_manifest(&mut mission, err)
                    }
                    Err(e) => return Err(e),
                })
            }
            other => other,
        }
    }

    /// Operator override after an escalation: zero the mission's violation
    /// counters so phases may run again.
    pub fn clear_escalation(&self, mission_id: i64) -> Result<Vec<OperationKind>> {
        let cleared = self.kernel.escalated_kinds(mission_id)?;
        self.kernel.clear(mission_id)?;
        self.store.record_decision(
            mission_id,
            &NewDecision::new(
                tags::ESCALATION_CLEARED,
                ORCHESTRATOR_AGENT,
                "operator cleared the mission's safety counters",
            )
            .with_context(json!({ "kinds": cleared })),
        )?;
        tracing::info!(mission_id, kinds = ?cleared, "safety escalation cleared");
        Ok(cleared)
    }

    /// Refuse to run phases while any violation counter sits at the operator tier.
    fn ensure_no_open_escalation(&self, mission: &Mission) -> Result<()> {
        let open = self.kernel.escalated_kinds(mission.id)?;
        if open.is_empty() {
            return Ok(());
        }
        let kinds: Vec<&str> = open.iter().map(|k| k.as_str()).collect();
        Err(MissionError::EscalationOpen {
            mission: mission.uuid.to_string(),
            kinds: kinds.join(", "),
        })
    }

    pub fn record_verification(&self, mission_id: i64) -> Result<()> {
        self.kernel.record_verification(mission_id)?;
        self.store.record_decision(
            mission_id,
            &NewDecision::new(
                tags::VERIFICATION_RECORDED,
                ORCHESTRATOR_AGENT,
                "push verification recorded",
            ),
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mission record sync
    // -----------------------------------------------------------------------

    /// Mirror the manifest's phase and budget onto the store row.
    fn sync_mission(&self, mission: &mut Mission, manifest: &Manifest, status: MissionStatus) -> Result<()> {
        mission.phase = manifest.current_phase;
        mission.cost = manifest.budget.spent;
        mission.budget = manifest.budget.ceiling;
        mission.status = status;
        mission.completed_at = match status {
            MissionStatus::Completed => Some(mission.completed_at.unwrap_or_else(Utc::now)),
            _ => None,
        };
        self.store.update_mission(mission)
    }

    /// Record the failure, park the mission as failed and hand the error back.
    /// Bookkeeping errors here are logged; the original error wins.
    fn halt(
        &self,
        mission: &mut Mission,
        manifest: &mut Manifest,
        tag: String,
        err: MissionError,
    ) -> MissionError {
        let decision = NewDecision::new(tag, ORCHESTRATOR_AGENT, err.to_string()).with_context(json!({
            "error_kind": err.kind(),
            "phase": manifest.current_phase,
        }));
        if let Err(e) = self.store.record_decision(mission.id, &decision) {
            tracing::error!(mission = %mission.uuid, error = %e, "could not record failure decision");
        }
        manifest.sub_state = None;
        if let Err(e) = manifest.save(&self.root) {
            tracing::error!(mission = %mission.uuid, error = %e, "could not save manifest after failure");
        }
        if let Err(e) = self.sync_mission(mission, manifest, MissionStatus::Failed) {
            tracing::error!(mission = %mission.uuid, error = %e, "could not mark mission failed");
        }
        tracing::warn!(
            mission = %mission.uuid,
            phase = %manifest.current_phase,
            kind = err.kind(),
            "mission halted: {err}"
        );
        err
    }

    fn halt_without_manifest(&self, mission: &mut Mission, err: MissionError) -> MissionError {
        let decision = NewDecision::new(tags::SAFETY_ESCALATION, ORCHESTRATOR_AGENT, err.to_string())
            .with_context(json!({ "error_kind": err.kind(), "phase": mission.phase }));
        if let Err(e) = self.store.record_decision(mission.id, &decision) {
            tracing::error!(mission = %mission.uuid, error = %e, "could not record failure decision");
        }
        mission.status = MissionStatus::Failed;
        mission.completed_at = None;
        if let Err(e) = self.store.update_mission(mission) {
            tracing::error!(mission = %mission.uuid, error = %e, "could not mark mission failed");
        }
        tracing::warn!(mission = %mission.uuid, kind = err.kind(), "mission halted: {err}");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use tempfile::TempDir;

    pub(crate) fn orchestrator(dir: &TempDir) -> Orchestrator {
        let root = dir.path();
        Config::new("demo").save(root).unwrap();
        let store = Arc::new(Store::open(&paths::store_path(root)).unwrap());
        let registry = SpecialistRegistry::with_defaults(Arc::new(MockBackend));
        Orchestrator::new(root, Config::load(root).unwrap(), store, registry)
    }

    #[test]
    fn create_mission_writes_manifest_and_decision() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let (mission, manifest) = orch.create_mission(None, json!({"goal": "x"}), None).unwrap();

        assert_eq!(mission.project_id, "demo");
        assert_eq!(manifest.current_phase, Phase::Planning);
        assert!((manifest.budget.ceiling - 50.0).abs() < f64::EPSILON);
        assert_eq!(orch.load_manifest(&mission.uuid).unwrap(), manifest);

        let decisions = orch.store().decisions(mission.id).unwrap();
        assert_eq!(decisions[0].decision_type, tags::MISSION_CREATED);
    }

    #[test]
    fn save_artifact_indexes_with_hash() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let (_, mut manifest) = orch.create_mission(None, json!({}), None).unwrap();
        let content = json!({"title": "t", "requirements": ["r"]});

        let entry = orch.save_artifact(&mut manifest, "feature_spec", &content).unwrap();
        let on_disk = std::fs::read(dir.path().join(&entry.path)).unwrap();
        assert_eq!(entry.sha256, artifact::content_hash(&on_disk));

        let reloaded = orch.load_manifest(&manifest.mission_uuid).unwrap();
        assert_eq!(reloaded.artifacts["feature_spec"], entry);
    }

    #[test]
    fn schema_mismatch_warns_but_writes() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let (mission, mut manifest) = orch.create_mission(None, json!({}), None).unwrap();

        orch.save_artifact(&mut manifest, "qa_report", &json!({"status": "APPROVED"}))
            .unwrap();
        assert!(manifest.has_artifact("qa_report"));
        let warning = orch
            .store()
            .decisions(mission.id)
            .unwrap()
            .into_iter()
            .find(|d| d.decision_type == tags::SCHEMA_VALIDATION_WARNING)
            .expect("warning decision");
        assert!(warning.rationale.contains("tests_run"));
    }

    #[test]
    fn escalation_fails_mission_without_manifest() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mission = orch
            .store()
            .create_mission(&NewMission::new("imported", 5.0))
            .unwrap();
        let op = Operation::Shell {
            command: "rm -rf .mission".into(),
        };

        for _ in 0..3 {
            orch.check_operation(mission.id, &op).unwrap_err();
        }
        let row = orch.store().get_mission(mission.id).unwrap();
        assert_eq!(row.status, MissionStatus::Failed);
        let halted = orch
            .store()
            .decisions(mission.id)
            .unwrap()
            .into_iter()
            .filter(|d| d.decision_type == tags::SAFETY_ESCALATION)
            .count();
        assert_eq!(halted, 1);
        assert_eq!(
            orch.kernel().escalated_kinds(mission.id).unwrap(),
            vec![OperationKind::DestructiveDelete]
        );
    }

    #[test]
    fn safety_violation_is_recorded() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let (mission, _) = orch.create_mission(None, json!({}), None).unwrap();
        let op = Operation::WriteFile {
            path: ".mission/config.yaml".into(),
        };

        let err = orch.check_operation(mission.id, &op).unwrap_err();
        assert_eq!(err.kind(), "safety_violation");
        let recorded = orch
            .store()
            .decisions(mission.id)
            .unwrap()
            .into_iter()
            .filter(|d| d.decision_type == tags::SAFETY_VIOLATION)
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(
            orch.kernel()
                .violation_count(mission.id, OperationKind::WriteStateDir)
                .unwrap(),
            1
        );
    }

    #[test]
    fn delete_mission_removes_rows_and_files() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let (mission, mut manifest) = orch.create_mission(None, json!({}), None).unwrap();
        orch.save_artifact(&mut manifest, "feature_spec", &json!({"title": 1, "requirements": 2}))
            .unwrap();

        assert!(orch.delete_mission(&mission.uuid).unwrap());
        assert!(!paths::mission_dir(dir.path(), &mission.uuid.to_string()).exists());
        assert!(orch.store().decisions(mission.id).unwrap().is_empty());
        assert!(!orch.delete_mission(&mission.uuid).unwrap());
    }
}
