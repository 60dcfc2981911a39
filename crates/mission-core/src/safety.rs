//! Safety kernel: every mutating operation a worker attempts is checked here
//! before it is allowed.
//!
//! Rules:
//!
//! - direct writes to the state tree (`.mission/**`), any `manifest.json` and
//!   any handoff file are denied; persistence goes through the orchestrator's
//!   artifact-save API ([`Operation::SaveArtifact`], always allowed); in a
//!   shell command this covers redirects and the destinations of `cp`, `mv`,
//!   `install`, `ln`, `tee`, `truncate`, `sed -i` and `dd of=`
//! - `git push` is denied until a verification step was recorded
//! - recursive deletes whose target is (or contains) the state tree are denied
//!
//! Repeated violations escalate per `(mission, kind)`: tier 1 is a helpful
//! error, tier 2 adds a stop-retrying directive, tier 3 and above asks the
//! caller to halt for an operator. A counter resets when an allowed operation
//! of the same kind succeeds for the same mission. Counters are mirrored to a
//! [`ViolationLedger`] (the [`Store`]) so a restarted kernel resumes at the
//! same tier.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MissionError, Result};
use crate::paths;
use crate::store::Store;

/// Tier at which a violation becomes an operator escalation.
pub const ESCALATION_TIERS: u32 = 3;

const VERIFIED_MEMORY_KEY: &str = "safety:push_verified";

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A mutating action a worker wants to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    WriteFile { path: PathBuf },
    Shell { command: String },
    SaveArtifact { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    OverwriteManifest,
    OverwriteHandoff,
    WriteStateDir,
    UnverifiedPush,
    DestructiveDelete,
}

impl OperationKind {
    pub fn all() -> &'static [OperationKind] {
        &[
            OperationKind::OverwriteManifest,
            OperationKind::OverwriteHandoff,
            OperationKind::WriteStateDir,
            OperationKind::UnverifiedPush,
            OperationKind::DestructiveDelete,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::OverwriteManifest => "overwrite-manifest",
            OperationKind::OverwriteHandoff => "overwrite-handoff",
            OperationKind::WriteStateDir => "write-state-dir",
            OperationKind::UnverifiedPush => "unverified-push",
            OperationKind::DestructiveDelete => "destructive-delete",
        }
    }

    const WRITES: [OperationKind; 3] = [
        OperationKind::OverwriteManifest,
        OperationKind::OverwriteHandoff,
        OperationKind::WriteStateDir,
    ];
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Blocked = 1,
    Repeated = 2,
    Escalated = 3,
}

impl Tier {
    pub fn for_attempt(attempt: u32) -> Tier {
        match attempt {
            0 | 1 => Tier::Blocked,
            2 => Tier::Repeated,
            _ => Tier::Escalated,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Blocked => "[BLOCKED]",
            Tier::Repeated => "[BLOCKED - REPEATED]",
            Tier::Escalated => "[ESCALATION: OPERATOR REQUIRED]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: OperationKind,
    pub tier: Tier,
    /// How many times this kind has been denied for the mission, this one included.
    pub attempt: u32,
    pub blocked: String,
    pub reason: String,
    pub example: String,
}

impl Violation {
    pub fn is_escalated(&self) -> bool {
        self.tier == Tier::Escalated
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tier {
            Tier::Blocked => write!(
                f,
                "{} {}: {}. Do this instead: {}",
                self.tier.label(),
                self.blocked,
                self.reason,
                self.example
            ),
            Tier::Repeated => write!(
                f,
                "{} {}: {}. This is attempt {} for '{}'; stop retrying the same action. Do this instead: {}",
                self.tier.label(),
                self.blocked,
                self.reason,
                self.attempt,
                self.kind,
                self.example
            ),
            Tier::Escalated => write!(
                f,
                "{} '{}' has been blocked {} times ({}: {}). Halt this mission and request operator intervention; the corrected form is: {}",
                self.tier.label(),
                self.kind,
                self.attempt,
                self.blocked,
                self.reason,
                self.example
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// ViolationLedger
// ---------------------------------------------------------------------------

/// Durable mirror of the kernel's counters and verification marks.
pub trait ViolationLedger: Send + Sync {
    fn load_count(&self, mission_id: i64, kind: OperationKind) -> Result<u32>;
    fn store_count(&self, mission_id: i64, kind: OperationKind, count: u32) -> Result<()>;
    fn load_verified(&self, mission_id: i64) -> Result<bool>;
    fn store_verified(&self, mission_id: i64) -> Result<()>;
}

impl ViolationLedger for Store {
    fn load_count(&self, mission_id: i64, kind: OperationKind) -> Result<u32> {
        self.violation_count(mission_id, kind.as_str())
    }

    fn store_count(&self, mission_id: i64, kind: OperationKind, count: u32) -> Result<()> {
        self.set_violation_count(mission_id, kind.as_str(), count)
    }

    fn load_verified(&self, mission_id: i64) -> Result<bool> {
        Ok(self
            .memory_get(mission_id, VERIFIED_MEMORY_KEY)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    fn store_verified(&self, mission_id: i64) -> Result<()> {
        self.memory_set(mission_id, VERIFIED_MEMORY_KEY, &serde_json::json!(true), None)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

enum Verdict {
    /// Allowed; counters of these kinds reset.
    Allow(Vec<OperationKind>),
    Deny {
        kind: OperationKind,
        blocked: String,
        reason: String,
        example: String,
    },
}

fn segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\|\||&&|[;|&\n]").expect("static regex"))
}

fn is_recursive_flag(tok: &str) -> bool {
    if tok == "--recursive" {
        return true;
    }
    tok.starts_with('-') && !tok.starts_with("--") && tok.chars().any(|c| c == 'r' || c == 'R')
}

fn unquote(tok: &str) -> &str {
    tok.trim_matches(['"', '\''])
}

/// The git subcommand, skipping global options and their arguments
/// (`git -C dir push`, `git -c k=v push`).
fn git_subcommand<'a>(args: &[&'a str]) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(&arg) = iter.next() {
        match arg {
            "-C" | "-c" | "--git-dir" | "--work-tree" | "--namespace" | "--config-env" => {
                iter.next();
            }
            a if a.starts_with('-') => {}
            a => return Some(a),
        }
    }
    None
}

/// Files a command writes through its arguments rather than a redirect.
fn write_destinations<'a>(program: &str, args: &[&'a str]) -> Vec<&'a str> {
    let operands = || args.iter().copied().filter(|a| !a.starts_with('-'));
    match program {
        "cp" | "mv" | "install" | "ln" => {
            let mut iter = args.iter().copied();
            while let Some(arg) = iter.next() {
                if arg == "-t" || arg == "--target-directory" {
                    return iter.next().into_iter().collect();
                }
                if let Some(dir) = arg.strip_prefix("--target-directory=") {
                    return vec![dir];
                }
            }
            operands().last().into_iter().collect()
        }
        "tee" => operands().collect(),
        "truncate" => {
            let mut out = Vec::new();
            let mut iter = args.iter().copied();
            while let Some(arg) = iter.next() {
                match arg {
                    "-s" | "-r" | "--size" | "--reference" => {
                        iter.next();
                    }
                    a if a.starts_with('-') => {}
                    a => out.push(a),
                }
            }
            out
        }
        "sed" if args.iter().any(|a| a.starts_with("-i") || a.starts_with("--in-place")) => {
            // The first operand is the script unless -e/-f supplied one.
            let mut out = Vec::new();
            let mut script_seen = false;
            let mut iter = args.iter().copied();
            while let Some(arg) = iter.next() {
                match arg {
                    "-e" | "-f" | "--expression" | "--file" => {
                        script_seen = true;
                        iter.next();
                    }
                    a if a.starts_with("--expression=") || a.starts_with("--file=") => script_seen = true,
                    a if a.starts_with('-') => {}
                    _ if !script_seen => script_seen = true,
                    a => out.push(a),
                }
            }
            out
        }
        "dd" => args.iter().filter_map(|a| a.strip_prefix("of=")).collect(),
        _ => Vec::new(),
    }
}

/// Normalize a path lexically (no filesystem access).
pub fn normalize_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => out.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::Normal(s) => out.push(s),
        }
    }
    out
}

pub fn is_within(parent: &Path, child: &Path) -> bool {
    let parent = parent.components().collect::<Vec<_>>();
    let child = child.components().collect::<Vec<_>>();
    child.len() >= parent.len() && child[..parent.len()] == parent[..]
}

// ---------------------------------------------------------------------------
// SafetyKernel
// ---------------------------------------------------------------------------

pub struct SafetyKernel {
    root: PathBuf,
    state_dir: PathBuf,
    counters: Mutex<HashMap<(i64, OperationKind), u32>>,
    verified: Mutex<HashSet<i64>>,
    ledger: Option<Arc<dyn ViolationLedger>>,
}

impl SafetyKernel {
    /// A kernel whose counters live only in memory.
    pub fn new(root: &Path) -> Self {
        let root = normalize_path(root);
        let state_dir = paths::state_dir(&root);
        Self {
            root,
            state_dir,
            counters: Mutex::new(HashMap::new()),
            verified: Mutex::new(HashSet::new()),
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn ViolationLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    fn lock_counters(&self) -> Result<MutexGuard<'_, HashMap<(i64, OperationKind), u32>>> {
        self.counters
            .lock()
            .map_err(|_| MissionError::Persistence("safety counter lock poisoned".into()))
    }

    fn lock_verified(&self) -> Result<MutexGuard<'_, HashSet<i64>>> {
        self.verified
            .lock()
            .map_err(|_| MissionError::Persistence("safety verification lock poisoned".into()))
    }

    /// Allow or deny `op` for `mission_id`. A denial is returned as
    /// [`MissionError::SafetyViolation`] carrying the escalation tier.
    pub fn check(&self, mission_id: i64, op: &Operation) -> Result<()> {
        match self.classify(mission_id, op)? {
            Verdict::Allow(resets) => {
                for kind in resets {
                    self.reset(mission_id, kind)?;
                }
                Ok(())
            }
            Verdict::Deny {
                kind,
                blocked,
                reason,
                example,
            } => {
                let attempt = self.bump(mission_id, kind)?;
                let violation = Violation {
                    kind,
                    tier: Tier::for_attempt(attempt),
                    attempt,
                    blocked,
                    reason,
                    example,
                };
                tracing::warn!(
                    mission_id,
                    kind = %kind,
                    attempt,
                    tier = violation.tier as u8,
                    "safety violation"
                );
                Err(MissionError::SafetyViolation(Box::new(violation)))
            }
        }
    }

    /// Record that the mission passed a verification step; `git push` is
    /// allowed from now on.
    pub fn record_verification(&self, mission_id: i64) -> Result<()> {
        self.lock_verified()?.insert(mission_id);
        if let Some(ledger) = &self.ledger {
            ledger.store_verified(mission_id)?;
        }
        tracing::debug!(mission_id, "push verification recorded");
        Ok(())
    }

    pub fn is_verified(&self, mission_id: i64) -> Result<bool> {
        if self.lock_verified()?.contains(&mission_id) {
            return Ok(true);
        }
        match &self.ledger {
            Some(ledger) if ledger.load_verified(mission_id)? => {
                self.lock_verified()?.insert(mission_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn violation_count(&self, mission_id: i64, kind: OperationKind) -> Result<u32> {
        let mut counters = self.lock_counters()?;
        self.seeded(&mut counters, mission_id, kind)
    }

    /// Current tier for a kind, or `None` if it has no recorded violations.
    pub fn tier_for(&self, mission_id: i64, kind: OperationKind) -> Result<Option<Tier>> {
        let n = self.violation_count(mission_id, kind)?;
        Ok((n > 0).then(|| Tier::for_attempt(n)))
    }

    pub fn reset(&self, mission_id: i64, kind: OperationKind) -> Result<()> {
        let mut counters = self.lock_counters()?;
        if self.seeded(&mut counters, mission_id, kind)? == 0 {
            return Ok(());
        }
        counters.insert((mission_id, kind), 0);
        if let Some(ledger) = &self.ledger {
            ledger.store_count(mission_id, kind, 0)?;
        }
        tracing::info!(mission_id, kind = %kind, "violation counter reset");
        Ok(())
    }

    /// Kinds whose counter sits at the operator tier for this mission.
    pub fn escalated_kinds(&self, mission_id: i64) -> Result<Vec<OperationKind>> {
        let mut open = Vec::new();
        for &kind in OperationKind::all() {
            if self.tier_for(mission_id, kind)? == Some(Tier::Escalated) {
                open.push(kind);
            }
        }
        Ok(open)
    }

    /// Operator override: zero every counter of the mission.
    pub fn clear(&self, mission_id: i64) -> Result<()> {
        for &kind in OperationKind::all() {
            self.reset(mission_id, kind)?;
        }
        Ok(())
    }

    fn bump(&self, mission_id: i64, kind: OperationKind) -> Result<u32> {
        let mut counters = self.lock_counters()?;
        let n = self.seeded(&mut counters, mission_id, kind)? + 1;
        counters.insert((mission_id, kind), n);
        if let Some(ledger) = &self.ledger {
            ledger.store_count(mission_id, kind, n)?;
        }
        Ok(n)
    }

    /// Read a counter, pulling it from the ledger on first touch.
    fn seeded(
        &self,
        counters: &mut HashMap<(i64, OperationKind), u32>,
        mission_id: i64,
        kind: OperationKind,
    ) -> Result<u32> {
        if let Some(n) = counters.get(&(mission_id, kind)) {
            return Ok(*n);
        }
        let n = match &self.ledger {
            Some(ledger) => ledger.load_count(mission_id, kind)?,
            None => 0,
        };
        counters.insert((mission_id, kind), n);
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    fn classify(&self, mission_id: i64, op: &Operation) -> Result<Verdict> {
        match op {
            Operation::SaveArtifact { name } => {
                paths::validate_artifact_name(name)?;
                Ok(Verdict::Allow(OperationKind::WRITES.to_vec()))
            }
            Operation::WriteFile { path } => Ok(self.classify_write(path)),
            Operation::Shell { command } => self.classify_shell(mission_id, command),
        }
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            normalize_path(p)
        } else {
            normalize_path(&self.root.join(p))
        }
    }

    fn display_rel(&self, p: &Path) -> String {
        p.strip_prefix(&self.root)
            .unwrap_or(p)
            .display()
            .to_string()
    }

    fn classify_write(&self, path: &Path) -> Verdict {
        let resolved = self.resolve(path);
        let shown = self.display_rel(&resolved);
        let file_name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if file_name == paths::MANIFEST_FILE {
            return Verdict::Deny {
                kind: OperationKind::OverwriteManifest,
                blocked: format!("direct write to manifest '{shown}'"),
                reason: "the manifest has exactly one writer, the orchestrator".into(),
                example: "return the data as a produced artifact in your PhaseOutcome and let the orchestrator update the manifest".into(),
            };
        }
        if file_name.contains("handoff") {
            return Verdict::Deny {
                kind: OperationKind::OverwriteHandoff,
                blocked: format!("direct write to handoff file '{shown}'"),
                reason: "handoff state is owned by the orchestrator".into(),
                example: "report the handoff content as an artifact (Operation::SaveArtifact { name: \"handoff_notes\" })".into(),
            };
        }
        if is_within(&self.state_dir, &resolved) {
            return Verdict::Deny {
                kind: OperationKind::WriteStateDir,
                blocked: format!("direct write to state file '{shown}'"),
                reason: format!("files under {} are written only through the orchestrator", paths::STATE_DIR),
                example: "save the content through the artifact-save API instead of writing the file".into(),
            };
        }
        Verdict::Allow(Vec::new())
    }

    fn classify_shell(&self, mission_id: i64, command: &str) -> Result<Verdict> {
        let mut resets = Vec::new();
        // `2>&1` duplicates a descriptor; it is neither a write nor a separator.
        let command = command.replace(">&", " ");
        for segment in segment_re().split(&command) {
            let tokens: Vec<&str> = segment.split_whitespace().collect();
            let tokens = match tokens.first() {
                Some(&"sudo") | Some(&"env") | Some(&"command") => &tokens[1..],
                _ => &tokens[..],
            };
            let Some(program) = tokens.first() else {
                continue;
            };

            if let Some(deny) = self.check_redirects(tokens) {
                return Ok(deny);
            }
            for target in write_destinations(program, &tokens[1..]) {
                if let v @ Verdict::Deny { .. } = self.classify_write(Path::new(unquote(target))) {
                    return Ok(v);
                }
            }

            match *program {
                "git" => {
                    if git_subcommand(&tokens[1..]) == Some("push") {
                        if !self.is_verified(mission_id)? {
                            return Ok(Verdict::Deny {
                                kind: OperationKind::UnverifiedPush,
                                blocked: format!("'{}'", segment.trim()),
                                reason: "no verification step has been recorded for this mission".into(),
                                example: "run the test suite, record the verification (mission safety verify <uuid>), then push".into(),
                            });
                        }
                        resets.push(OperationKind::UnverifiedPush);
                    }
                }
                "rm" | "rmdir" => {
                    let recursive =
                        *program == "rmdir" || tokens[1..].iter().any(|t| is_recursive_flag(t));
                    let targets = tokens[1..].iter().filter(|t| !t.starts_with('-'));
                    for target in targets {
                        let resolved = self.resolve(Path::new(unquote(target)));
                        let hits_state = is_within(&self.state_dir, &resolved)
                            || is_within(&resolved, &self.state_dir);
                        if !hits_state {
                            continue;
                        }
                        if recursive {
                            return Ok(Verdict::Deny {
                                kind: OperationKind::DestructiveDelete,
                                blocked: format!("'{}'", segment.trim()),
                                reason: format!(
                                    "recursive delete of '{}' would destroy the mission state tree",
                                    self.display_rel(&resolved)
                                ),
                                example: "delete only build outputs (e.g. 'rm -rf target/'), or ask the orchestrator to delete the mission".into(),
                            });
                        }
                        if is_within(&self.state_dir, &resolved) {
                            return Ok(self.classify_write(&resolved));
                        }
                    }
                    resets.push(OperationKind::DestructiveDelete);
                }
                _ => {}
            }
        }
        Ok(Verdict::Allow(resets))
    }

    /// Shell redirections are file writes, wherever the `>` sits in a token.
    fn check_redirects(&self, tokens: &[&str]) -> Option<Verdict> {
        let mut iter = tokens.iter().peekable();
        while let Some(tok) = iter.next() {
            let Some(at) = tok.find('>') else {
                continue;
            };
            let rest = tok[at + 1..].trim_start_matches('>');
            let target = if rest.is_empty() {
                iter.peek().copied().copied()
            } else {
                Some(rest)
            };
            let Some(target) = target.map(unquote).filter(|t| !t.is_empty() && !t.starts_with('&')) else {
                continue;
            };
            if let v @ Verdict::Deny { .. } = self.classify_write(Path::new(target)) {
                return Some(v);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NewMission;
    use tempfile::TempDir;

    fn kernel() -> SafetyKernel {
        SafetyKernel::new(Path::new("/work/proj"))
    }

    fn violation(err: MissionError) -> Violation {
        match err {
            MissionError::SafetyViolation(v) => *v,
            other => panic!("expected safety violation, got {other}"),
        }
    }

    fn write(path: &str) -> Operation {
        Operation::WriteFile { path: path.into() }
    }

    fn shell(cmd: &str) -> Operation {
        Operation::Shell {
            command: cmd.to_string(),
        }
    }

    #[test]
    fn ordinary_writes_are_allowed() {
        let k = kernel();
        k.check(1, &write("src/main.rs")).unwrap();
        k.check(1, &write("/work/proj/README.md")).unwrap();
        k.check(1, &shell("cargo test --all")).unwrap();
        k.check(1, &shell("rm src/old.rs")).unwrap();
    }

    #[test]
    fn protected_writes_are_classified() {
        let k = kernel();
        let v = violation(k.check(1, &write(".mission/missions/abc/manifest.json")).unwrap_err());
        assert_eq!(v.kind, OperationKind::OverwriteManifest);
        let v = violation(k.check(1, &write("docs/handoff.md")).unwrap_err());
        assert_eq!(v.kind, OperationKind::OverwriteHandoff);
        let v = violation(k.check(1, &write("src/../.mission/config.yaml")).unwrap_err());
        assert_eq!(v.kind, OperationKind::WriteStateDir);
        let v = violation(k.check(1, &write("/work/proj/.mission/missions.db")).unwrap_err());
        assert_eq!(v.kind, OperationKind::WriteStateDir);
    }

    #[test]
    fn three_attempts_escalate_with_distinct_messages() {
        let k = kernel();
        let op = write("manifest.json");
        let msgs: Vec<String> = (0..3)
            .map(|_| k.check(7, &op).unwrap_err().to_string())
            .collect();

        assert!(msgs[0].starts_with("[BLOCKED] "));
        assert!(msgs[1].starts_with("[BLOCKED - REPEATED]"));
        assert!(msgs[1].contains("stop retrying"));
        assert!(msgs[2].starts_with("[ESCALATION: OPERATOR REQUIRED]"));
        assert!(msgs.iter().all(|m| m.is_ascii()), "{msgs:?}");
        assert!(msgs[2].contains("operator intervention"));
        assert_ne!(msgs[0], msgs[1]);
        assert_ne!(msgs[1], msgs[2]);

        // stays escalated
        let v = violation(k.check(7, &op).unwrap_err());
        assert_eq!(v.tier, Tier::Escalated);
        assert_eq!(v.attempt, 4);
    }

    #[test]
    fn kinds_and_missions_are_independent() {
        let k = kernel();
        k.check(1, &write("manifest.json")).unwrap_err();
        k.check(1, &write("manifest.json")).unwrap_err();
        let v = violation(k.check(1, &write(".mission/x.json")).unwrap_err());
        assert_eq!(v.tier, Tier::Blocked);
        let v = violation(k.check(2, &write("manifest.json")).unwrap_err());
        assert_eq!(v.tier, Tier::Blocked);
        assert_eq!(k.violation_count(1, OperationKind::OverwriteManifest).unwrap(), 2);
    }

    #[test]
    fn sanctioned_save_resets_write_counters() {
        let k = kernel();
        k.check(3, &write("manifest.json")).unwrap_err();
        k.check(3, &write("manifest.json")).unwrap_err();
        assert_eq!(
            k.tier_for(3, OperationKind::OverwriteManifest).unwrap(),
            Some(Tier::Repeated)
        );
        k.check(
            3,
            &Operation::SaveArtifact {
                name: "code_gen_spec".into(),
            },
        )
        .unwrap();
        assert_eq!(k.tier_for(3, OperationKind::OverwriteManifest).unwrap(), None);
        let v = violation(k.check(3, &write("manifest.json")).unwrap_err());
        assert_eq!(v.tier, Tier::Blocked);
    }

    #[test]
    fn save_artifact_rejects_bad_names() {
        let k = kernel();
        let err = k
            .check(
                1,
                &Operation::SaveArtifact {
                    name: "../escape".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, MissionError::InvalidArtifactName(_)));
    }

    #[test]
    fn push_requires_verification() {
        let k = kernel();
        let v = violation(k.check(4, &shell("cargo test && git push origin main")).unwrap_err());
        assert_eq!(v.kind, OperationKind::UnverifiedPush);
        assert!(v.example.contains("verify"));

        k.record_verification(4).unwrap();
        k.check(4, &shell("git push origin main")).unwrap();
        assert_eq!(k.violation_count(4, OperationKind::UnverifiedPush).unwrap(), 0);
        // force-pushes are not special-cased
        k.check(4, &shell("git push --force origin main")).unwrap();
        // other git commands never need verification
        k.check(5, &shell("git commit -m push")).unwrap();
    }

    #[test]
    fn recursive_delete_of_state_tree_is_denied() {
        let k = kernel();
        for cmd in [
            "rm -rf .mission",
            "rm -r .mission/missions",
            "rm -fr ./.mission/",
            "rm --recursive /work/proj/.mission",
            "rm -Rf .",
            "cd /tmp; rm -rf /work/proj",
        ] {
            let v = violation(k.check(9, &shell(cmd)).unwrap_err());
            assert_eq!(v.kind, OperationKind::DestructiveDelete, "{cmd}");
        }
        k.check(9, &shell("rm -rf target/")).unwrap();
        assert_eq!(k.violation_count(9, OperationKind::DestructiveDelete).unwrap(), 0);
    }

    #[test]
    fn shell_redirect_into_state_dir_is_a_write() {
        let k = kernel();
        let v = violation(k.check(1, &shell("echo '{}' > .mission/current_task.json")).unwrap_err());
        assert_eq!(v.kind, OperationKind::WriteStateDir);
        k.check(1, &shell("cargo build 2>&1 >build.log")).unwrap();
    }

    #[test]
    fn embedded_redirect_is_a_write() {
        let k = kernel();
        for cmd in [
            "echo x>.mission/current_task.json",
            "echo x>>.mission/current_task.json",
            "printf '{}' 1>'.mission/current_task.json'",
            "cat a &>.mission/log.txt",
        ] {
            let v = violation(k.check(1, &shell(cmd)).unwrap_err());
            assert_eq!(v.kind, OperationKind::WriteStateDir, "{cmd}");
            k.reset(1, OperationKind::WriteStateDir).unwrap();
        }
        k.check(1, &shell("echo x>out.txt")).unwrap();
    }

    #[test]
    fn copy_and_move_destinations_are_writes() {
        let k = kernel();
        let cases = [
            ("cp /tmp/evil.json .mission/missions/abc/manifest.json", OperationKind::OverwriteManifest),
            ("cp -f /tmp/evil.json ./.mission/missions/abc/manifest.json", OperationKind::OverwriteManifest),
            ("mv /tmp/evil.json .mission/current_task.json", OperationKind::WriteStateDir),
            ("cp -t .mission/missions/abc /tmp/manifest.json", OperationKind::WriteStateDir),
            ("install -m 644 /tmp/cfg.yaml .mission/config.yaml", OperationKind::WriteStateDir),
            ("ln -sf /tmp/notes docs/handoff.md", OperationKind::OverwriteHandoff),
        ];
        for (cmd, kind) in cases {
            let v = violation(k.check(2, &shell(cmd)).unwrap_err());
            assert_eq!(v.kind, kind, "{cmd}");
        }
        // sources inside the state tree are reads
        k.check(2, &shell("cp .mission/config.yaml /tmp/config.yaml")).unwrap();
        k.check(2, &shell("mv build/out.bin dist/")).unwrap();
    }

    #[test]
    fn in_place_editors_are_writes() {
        let k = kernel();
        let cases = [
            ("echo x | tee .mission/missions/abc/manifest.json", OperationKind::OverwriteManifest),
            ("echo x | tee -a log.txt .mission/current_task.json", OperationKind::WriteStateDir),
            ("truncate -s 0 .mission/missions.db", OperationKind::WriteStateDir),
            ("sed -i 's/a/b/' .mission/config.yaml", OperationKind::WriteStateDir),
            ("sed -i.bak -e s/a/b/ docs/handoff.md", OperationKind::OverwriteHandoff),
            ("dd if=/dev/zero of=.mission/missions.db bs=1 count=1", OperationKind::WriteStateDir),
        ];
        for (cmd, kind) in cases {
            let v = violation(k.check(3, &shell(cmd)).unwrap_err());
            assert_eq!(v.kind, kind, "{cmd}");
        }
        k.check(3, &shell("sed -n 's/a/b/p' .mission/config.yaml")).unwrap();
        k.check(3, &shell("echo x | tee out.log")).unwrap();
        k.check(3, &shell("dd if=.mission/missions.db of=/tmp/backup.db")).unwrap();
        k.check(3, &shell("truncate -s 0 build.log")).unwrap();
    }

    #[test]
    fn git_global_options_do_not_hide_push() {
        let k = kernel();
        for cmd in [
            "git -C /work/proj push origin main",
            "git -c user.name=bot push",
            "git --git-dir .git --work-tree . push",
        ] {
            let v = violation(k.check(6, &shell(cmd)).unwrap_err());
            assert_eq!(v.kind, OperationKind::UnverifiedPush, "{cmd}");
        }
        k.check(6, &shell("git -C push status")).unwrap();
    }

    #[test]
    fn counters_survive_a_new_kernel_via_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("m.db")).unwrap());
        let mission = store.create_mission(&NewMission::new("p", 1.0)).unwrap();
        let root = dir.path().join("proj");

        let first = SafetyKernel::new(&root).with_ledger(store.clone());
        first.check(mission.id, &write("manifest.json")).unwrap_err();
        first.check(mission.id, &write("manifest.json")).unwrap_err();
        first.record_verification(mission.id).unwrap();
        drop(first);

        let second = SafetyKernel::new(&root).with_ledger(store.clone());
        let v = violation(second.check(mission.id, &write("manifest.json")).unwrap_err());
        assert_eq!(v.tier, Tier::Escalated);
        assert_eq!(v.attempt, 3);
        second.check(mission.id, &shell("git push")).unwrap();
        assert_eq!(store.violation_count(mission.id, "overwrite-manifest").unwrap(), 3);
    }
}
