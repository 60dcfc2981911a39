//! One-way import of file-based mission records into the [`Store`].
//!
//! Older deployments kept one JSON file per mission under `.mission/legacy/`.
//! Import is idempotent: a uuid that already exists in the store is skipped
//! and the store is left untouched.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::records::{tags, NewDecision, NewMission};
use crate::store::{self, Store};
use crate::types::{MissionStatus, Phase};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyDecision {
    pub decision_type: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyMission {
    pub uuid: Uuid,
    #[serde(default = "default_project")]
    pub project_id: String,
    #[serde(default = "default_phase")]
    pub phase: Phase,
    #[serde(default = "default_status")]
    pub status: MissionStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub budget: f64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub decisions: Vec<LegacyDecision>,
}

fn default_agent() -> String {
    "legacy".to_string()
}

fn default_project() -> String {
    "default".to_string()
}

fn default_phase() -> Phase {
    Phase::Planning
}

fn default_status() -> MissionStatus {
    MissionStatus::Pending
}

/// Outcome of scanning a legacy directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
}

impl Store {
    /// Import one legacy record. Returns `false` when the uuid is already
    /// present; nothing is written in that case.
    pub fn import_legacy_mission(&self, legacy: &LegacyMission) -> Result<bool> {
        let imported = self.write(|conn| {
            if store::mission_id_by_uuid(conn, &legacy.uuid)?.is_some() {
                return Ok(false);
            }

            let metadata = if legacy.metadata.is_null() {
                serde_json::json!({})
            } else {
                legacy.metadata.clone()
            };
            let new = NewMission {
                uuid: legacy.uuid,
                project_id: legacy.project_id.clone(),
                phase: legacy.phase,
                status: legacy.status,
                metadata,
                budget: legacy.budget,
            };
            let created_at = legacy.created_at.unwrap_or_else(Utc::now);
            let id = store::insert_mission_at(
                conn,
                &new,
                created_at,
                legacy.completed_at,
                legacy.cost,
                true,
            )?;

            for d in &legacy.decisions {
                let decision = NewDecision::new(&d.decision_type, &d.agent, &d.rationale)
                    .with_context(d.context.clone());
                store::insert_decision_at(conn, id, &decision, d.timestamp.unwrap_or(created_at))?;
            }

            let marker = NewDecision::new(
                tags::LEGACY_IMPORTED,
                "importer",
                format!("imported legacy record with {} decision(s)", legacy.decisions.len()),
            );
            store::insert_decision_at(conn, id, &marker, Utc::now())?;
            Ok(true)
        })?;

        if imported {
            tracing::info!(mission = %legacy.uuid, "legacy mission imported");
        } else {
            tracing::debug!(mission = %legacy.uuid, "legacy mission already present, skipped");
        }
        Ok(imported)
    }
}

/// Import every `*.json` record in `dir`. Unreadable or malformed files are
/// reported in `failed` and do not stop the scan. A missing directory is an
/// empty import.
pub fn import_legacy_dir(store: &Store, dir: &Path) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    if !dir.is_dir() {
        return Ok(report);
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("json"))
        .collect();
    files.sort();

    for path in files {
        let parsed = std::fs::read_to_string(&path)
            .map_err(crate::error::MissionError::from)
            .and_then(|data| Ok(serde_json::from_str::<LegacyMission>(&data)?));
        let legacy = match parsed {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable legacy record");
                report.failed.push(path.display().to_string());
                continue;
            }
        };
        if store.import_legacy_mission(&legacy)? {
            report.imported += 1;
        } else {
            report.skipped += 1;
        }
    }

    if report.imported + report.skipped + report.failed.len() > 0 {
        tracing::info!(
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed.len(),
            "legacy import finished"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(uuid: Uuid) -> LegacyMission {
        serde_json::from_value(serde_json::json!({
            "uuid": uuid,
            "project_id": "legacy-proj",
            "phase": "TESTING",
            "status": "in_progress",
            "created_at": "2024-03-01T10:00:00Z",
            "budget": 20.0,
            "cost": 3.5,
            "decisions": [
                {"decision_type": "PLANNING_COMPLETED", "rationale": "spec ready"},
                {"decision_type": "CODING_COMPLETED", "rationale": "code ready", "agent": "coder"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn import_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("m.db")).unwrap();
        let legacy = sample(Uuid::new_v4());

        assert!(store.import_legacy_mission(&legacy).unwrap());
        let m = store.get_mission_by_uuid(&legacy.uuid).unwrap();
        assert_eq!(m.phase, Phase::Testing);
        assert_eq!(m.project_id, "legacy-proj");
        let before = store.decisions(m.id).unwrap();
        assert_eq!(before.len(), 3);
        assert_eq!(before[2].decision_type, tags::LEGACY_IMPORTED);

        assert!(!store.import_legacy_mission(&legacy).unwrap());
        assert_eq!(store.count_missions().unwrap(), 1);
        assert_eq!(store.decisions(m.id).unwrap(), before);
    }

    #[test]
    fn import_dir_counts_outcomes() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("m.db")).unwrap();
        let legacy_dir = tmp.path().join("legacy");
        std::fs::create_dir_all(&legacy_dir).unwrap();

        let a = sample(Uuid::new_v4());
        let b = sample(Uuid::new_v4());
        std::fs::write(legacy_dir.join("a.json"), serde_json::to_vec(&a).unwrap()).unwrap();
        std::fs::write(legacy_dir.join("b.json"), serde_json::to_vec(&b).unwrap()).unwrap();
        std::fs::write(legacy_dir.join("broken.json"), b"{not json").unwrap();
        std::fs::write(legacy_dir.join("notes.txt"), b"ignored").unwrap();

        let first = import_legacy_dir(&store, &legacy_dir).unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.failed.len(), 1);

        let second = import_legacy_dir(&store, &legacy_dir).unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(store.count_missions().unwrap(), 2);
    }

    #[test]
    fn missing_dir_is_empty_import() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("m.db")).unwrap();
        let report = import_legacy_dir(&store, &tmp.path().join("nope")).unwrap();
        assert_eq!(report, ImportReport::default());
    }
}
