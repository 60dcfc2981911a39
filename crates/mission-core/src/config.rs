use crate::error::{MissionError, Result};
use crate::paths;
use crate::types::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Default bound on CODING/TESTING repair attempts.
pub const MAX_REPAIR_ATTEMPTS: u32 = 3;

/// Environment flag selecting live subprocess workers over the mock backend.
pub const LIVE_WORKERS_ENV: &str = "MISSION_LIVE_WORKERS";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_repair_attempts")]
    pub max_repair_attempts: u32,
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_seconds: u64,
    #[serde(default)]
    pub live_workers: bool,
    #[serde(default = "default_budget")]
    pub default_budget: f64,
}

fn default_repair_attempts() -> u32 {
    MAX_REPAIR_ATTEMPTS
}

fn default_worker_timeout() -> u64 {
    600
}

fn default_budget() -> f64 {
    50.0
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: default_repair_attempts(),
            worker_timeout_seconds: default_worker_timeout(),
            live_workers: false,
            default_budget: default_budget(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerCommand
// ---------------------------------------------------------------------------

/// Subprocess used as a live worker for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-worker override of `orchestrator.worker_timeout_seconds`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Live worker command per phase key (`coding`, `testing`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workers: BTreeMap<String, WorkerCommand>,
    /// Required top-level keys per artifact name.
    #[serde(default = "default_schemas")]
    pub schemas: BTreeMap<String, Vec<String>>,
    /// Shell command per task check id; exit status 0 marks the check true.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validators: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    1
}

fn default_schemas() -> BTreeMap<String, Vec<String>> {
    let mut m = BTreeMap::new();
    m.insert(
        "feature_spec".to_string(),
        vec!["title".to_string(), "requirements".to_string()],
    );
    m.insert(
        "code_gen_spec".to_string(),
        vec!["files".to_string(), "summary".to_string()],
    );
    m.insert(
        "qa_report".to_string(),
        vec!["status".to_string(), "tests_run".to_string()],
    );
    m.insert(
        "deployment_report".to_string(),
        vec!["environment".to_string(), "status".to_string()],
    );
    m
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            orchestrator: OrchestratorConfig::default(),
            workers: BTreeMap::new(),
            schemas: default_schemas(),
            validators: BTreeMap::new(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(MissionError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn worker_for(&self, phase: Phase) -> Option<&WorkerCommand> {
        self.workers.get(phase.key())
    }

    pub fn schema_for(&self, artifact: &str) -> Option<&[String]> {
        self.schemas.get(artifact).map(|v| v.as_slice())
    }

    /// Live mode: the environment flag wins over the config file.
    pub fn live_workers(&self) -> bool {
        match std::env::var(LIVE_WORKERS_ENV) {
            Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
            Err(_) => self.orchestrator.live_workers,
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (key, worker) in &self.workers {
            if Phase::from_str(key).is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("unknown phase '{key}' in workers"),
                });
            }
            if worker.program.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("worker for '{key}' has an empty program"),
                });
            }
            if worker.timeout_seconds == Some(0) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("worker for '{key}' has timeout_seconds=0"),
                });
            }
        }

        for (check, command) in &self.validators {
            if command.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("validator for check '{check}' has an empty command"),
                });
            }
        }

        let attempts = self.orchestrator.max_repair_attempts;
        if attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "orchestrator.max_repair_attempts is 0: no phase would ever run"
                    .to_string(),
            });
        } else if attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "orchestrator.max_repair_attempts={attempts} (>10 is unusual)"
                ),
            });
        }

        if self.orchestrator.worker_timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "orchestrator.worker_timeout_seconds is 0".to_string(),
            });
        }

        if self.orchestrator.live_workers && self.workers.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "live_workers is enabled but no workers are configured".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
