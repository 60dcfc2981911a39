use crate::error::{MissionError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const STATE_DIR: &str = ".mission";
pub const MISSIONS_DIR: &str = ".mission/missions";
pub const LEGACY_DIR: &str = ".mission/legacy";

pub const CONFIG_FILE: &str = ".mission/config.yaml";
pub const STORE_FILE: &str = ".mission/missions.db";
pub const CURRENT_TASK_FILE: &str = ".mission/current_task.json";
pub const COMPLETED_TASKS_FILE: &str = ".mission/completed_tasks.yaml";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ARTIFACTS_DIR: &str = "artifacts";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn store_path(root: &Path) -> PathBuf {
    root.join(STORE_FILE)
}

pub fn current_task_path(root: &Path) -> PathBuf {
    root.join(CURRENT_TASK_FILE)
}

pub fn completed_tasks_path(root: &Path) -> PathBuf {
    root.join(COMPLETED_TASKS_FILE)
}

pub fn legacy_dir(root: &Path) -> PathBuf {
    root.join(LEGACY_DIR)
}

pub fn mission_dir(root: &Path, uuid: &str) -> PathBuf {
    root.join(MISSIONS_DIR).join(uuid)
}

pub fn manifest_path(root: &Path, uuid: &str) -> PathBuf {
    mission_dir(root, uuid).join(MANIFEST_FILE)
}

/// Artifact location relative to the project root, as recorded in the manifest.
pub fn artifact_rel_path(uuid: &str, name: &str) -> String {
    format!("{MISSIONS_DIR}/{uuid}/{ARTIFACTS_DIR}/{name}.json")
}

pub fn artifact_path(root: &Path, uuid: &str, name: &str) -> PathBuf {
    root.join(artifact_rel_path(uuid, name))
}

// ---------------------------------------------------------------------------
// Artifact name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_]*$").expect("static regex"))
}

pub fn validate_artifact_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(MissionError::InvalidArtifactName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_artifact_names() {
        for name in ["feature_spec", "qa_report", "a", "bug_report_2"] {
            validate_artifact_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_artifact_names() {
        for name in ["", "_leading", "Has-Caps", "../escape", "with space", "dash-name"] {
            assert!(validate_artifact_name(name).is_err(), "expected invalid: {name}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.mission/config.yaml")
        );
        assert_eq!(
            manifest_path(root, "abc"),
            PathBuf::from("/tmp/proj/.mission/missions/abc/manifest.json")
        );
        assert_eq!(
            artifact_path(root, "abc", "qa_report"),
            PathBuf::from("/tmp/proj/.mission/missions/abc/artifacts/qa_report.json")
        );
    }
}
