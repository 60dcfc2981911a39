use crate::error::{MissionError, Result};
use crate::paths;
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Sub-state values the orchestrator sets while a phase is in flight.
pub const SUB_STATE_EXECUTING: &str = "executing";
pub const SUB_STATE_REPAIRING: &str = "repairing";

// ---------------------------------------------------------------------------
// ArtifactRef / Budget
// ---------------------------------------------------------------------------

/// Where an artifact lives and what it hashed to when it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path relative to the project root.
    pub path: String,
    /// `sha256:<hex>` of the stored bytes.
    pub sha256: String,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Budget {
    pub ceiling: f64,
    #[serde(default)]
    pub spent: f64,
}

impl Budget {
    /// A zero ceiling means "unbounded".
    pub fn exceeded(&self) -> bool {
        self.ceiling > 0.0 && self.spent > self.ceiling
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// On-disk projection of a mission. Only the orchestrator writes it; workers
/// see it through their context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub project_id: String,
    pub mission_uuid: Uuid,
    pub mission_id: i64,
    pub current_phase: Phase,
    #[serde(default)]
    pub sub_state: Option<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRef>,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub repair_attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    pub fn new(project_id: impl Into<String>, mission_uuid: Uuid, mission_id: i64, ceiling: f64) -> Self {
        Self {
            project_id: project_id.into(),
            mission_uuid,
            mission_id,
            current_phase: Phase::Planning,
            sub_state: None,
            artifacts: BTreeMap::new(),
            budget: Budget {
                ceiling,
                spent: 0.0,
            },
            repair_attempts: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn load(root: &Path, uuid: &Uuid) -> Result<Self> {
        let path = paths::manifest_path(root, &uuid.to_string());
        if !path.exists() {
            return Err(MissionError::MissionNotFound(uuid.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write via tempfile + rename; `updated_at` is refreshed.
    pub fn save(&mut self, root: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        let path = paths::manifest_path(root, &self.mission_uuid.to_string());
        crate::io::atomic_write_json(&path, self)
    }

    pub fn has_artifact(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }
}
