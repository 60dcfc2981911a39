//! Named JSON artifacts exchanged between phases.

use crate::config::Config;
use crate::error::{MissionError, Result};
use crate::paths;
use sha2::{Digest, Sha256};
use std::path::Path;

pub const FEATURE_SPEC: &str = "feature_spec";
pub const CODE_GEN_SPEC: &str = "code_gen_spec";
pub const QA_REPORT: &str = "qa_report";
pub const DEPLOYMENT_REPORT: &str = "deployment_report";
pub const MAINTENANCE_REPORT: &str = "maintenance_report";
pub const BUG_REPORT: &str = "bug_report";
pub const ROLLBACK_RECORD: &str = "rollback_record";

/// QA status value DEPLOYMENT requires.
pub const QA_APPROVED: &str = "APPROVED";

/// Required keys from the configured schema that `content` lacks. Artifacts
/// with no configured schema always pass.
pub fn validate_schema(config: &Config, name: &str, content: &serde_json::Value) -> Vec<String> {
    let Some(required) = config.schema_for(name) else {
        return Vec::new();
    };
    let Some(obj) = content.as_object() else {
        return vec!["<content is not a JSON object>".to_string()];
    };
    required
        .iter()
        .filter(|k| !obj.contains_key(k.as_str()))
        .cloned()
        .collect()
}

/// `sha256:<hex>` of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

pub fn load_artifact(root: &Path, uuid: &str, name: &str) -> Result<serde_json::Value> {
    paths::validate_artifact_name(name)?;
    let path = paths::artifact_path(root, uuid, name);
    if !path.exists() {
        return Err(MissionError::Persistence(format!(
            "artifact '{name}' is indexed but missing at {}",
            path.display()
        )));
    }
    let data = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&data)?)
}
