use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// SDLC phase. Declaration order is the canonical forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Planning,
    Coding,
    Testing,
    Deployment,
    Maintenance,
    Production,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Planning,
            Phase::Coding,
            Phase::Testing,
            Phase::Deployment,
            Phase::Maintenance,
            Phase::Production,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "PLANNING",
            Phase::Coding => "CODING",
            Phase::Testing => "TESTING",
            Phase::Deployment => "DEPLOYMENT",
            Phase::Maintenance => "MAINTENANCE",
            Phase::Production => "PRODUCTION",
        }
    }

    /// Lowercase key used in config maps and decision agents.
    pub fn key(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Coding => "coding",
            Phase::Testing => "testing",
            Phase::Deployment => "deployment",
            Phase::Maintenance => "maintenance",
            Phase::Production => "production",
        }
    }

    /// CODING and TESTING form the bounded repair loop.
    pub fn in_repair_loop(self) -> bool {
        matches!(self, Phase::Coding | Phase::Testing)
    }

    /// Forward moves (or staying put) are always legal; the only backward
    /// move is the TESTING → CODING repair reversion.
    pub fn can_move_to(self, target: Phase) -> bool {
        target >= self || (self == Phase::Testing && target == Phase::Coding)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLANNING" => Ok(Phase::Planning),
            "CODING" => Ok(Phase::Coding),
            "TESTING" => Ok(Phase::Testing),
            "DEPLOYMENT" => Ok(Phase::Deployment),
            "MAINTENANCE" => Ok(Phase::Maintenance),
            "PRODUCTION" => Ok(Phase::Production),
            _ => Err(crate::error::MissionError::InvalidPhase(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// MissionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl MissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MissionStatus::Pending => "pending",
            MissionStatus::InProgress => "in_progress",
            MissionStatus::Completed => "completed",
            MissionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MissionStatus {
    type Err = crate::error::MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MissionStatus::Pending),
            "in_progress" => Ok(MissionStatus::InProgress),
            "completed" => Ok(MissionStatus::Completed),
            "failed" => Ok(MissionStatus::Failed),
            _ => Err(crate::error::MissionError::Persistence(format!(
                "unknown mission status '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Done => "DONE",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity tag carried by bug reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn phase_ordering() {
        assert!(Phase::Planning < Phase::Coding);
        assert!(Phase::Coding < Phase::Testing);
        assert!(Phase::Testing < Phase::Deployment);
        assert!(Phase::Deployment < Phase::Production);
    }

    #[test]
    fn phase_parse_is_case_insensitive() {
        assert_eq!(Phase::from_str("coding").unwrap(), Phase::Coding);
        assert_eq!(Phase::from_str("DEPLOYMENT").unwrap(), Phase::Deployment);
        assert!(Phase::from_str("shipping").is_err());
    }

    #[test]
    fn only_repair_reversion_goes_backward() {
        assert!(Phase::Testing.can_move_to(Phase::Coding));
        assert!(Phase::Coding.can_move_to(Phase::Testing));
        assert!(Phase::Maintenance.can_move_to(Phase::Maintenance));
        assert!(!Phase::Deployment.can_move_to(Phase::Testing));
        assert!(!Phase::Coding.can_move_to(Phase::Planning));
    }

    #[test]
    fn phase_serializes_screaming() {
        let json = serde_json::to_string(&Phase::Deployment).unwrap();
        assert_eq!(json, "\"DEPLOYMENT\"");
        let status = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(status, "\"IN_PROGRESS\"");
    }
}
