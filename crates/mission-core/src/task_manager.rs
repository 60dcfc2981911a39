//! The task roadmap and the "current task" cursor, persisted in
//! `.mission/current_task.json` through [`LockedJsonFile`].
//!
//! Completion is gated on validation: every check of the current task must
//! be true before it can move to DONE. Completed tasks are appended to
//! `.mission/completed_tasks.yaml` as one YAML document each.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, WorkerCommand};
use crate::error::{MissionError, Result};
use crate::locked_file::LockedJsonFile;
use crate::paths;
use crate::task::{self, Task, ValidationCheck};
use crate::types::TaskStatus;
use crate::worker_process;

pub const TASK_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub version: u32,
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub roadmap: Vec<Task>,
    pub last_updated: DateTime<Utc>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            version: TASK_STATE_VERSION,
            current: None,
            roadmap: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl TaskState {
    pub fn current_task(&self) -> Option<&Task> {
        let id = self.current.as_deref()?;
        self.roadmap.iter().find(|t| t.id == id)
    }
}

/// Decides whether a single check holds. `Err` carries the reason it does not.
pub trait Validator: Send + Sync {
    fn validate(&self, task: &Task, check: &ValidationCheck) -> std::result::Result<(), String>;
}

impl<F> Validator for F
where
    F: Fn(&Task, &ValidationCheck) -> std::result::Result<(), String> + Send + Sync,
{
    fn validate(&self, task: &Task, check: &ValidationCheck) -> std::result::Result<(), String> {
        self(task, check)
    }
}

/// Runs `sh -c <command>` in the project root; exit 0 passes.
pub struct CommandValidator {
    command: String,
    root: PathBuf,
    timeout: Duration,
}

impl CommandValidator {
    pub fn new(command: impl Into<String>, root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            root: root.into(),
            timeout,
        }
    }
}

impl Validator for CommandValidator {
    fn validate(&self, task: &Task, check: &ValidationCheck) -> std::result::Result<(), String> {
        let cmd = WorkerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), self.command.clone()],
            timeout_seconds: None,
        };
        let input = serde_json::json!({ "task": task.id, "check": check.id }).to_string();
        match worker_process::run_worker(&cmd, &input, &self.root, self.timeout) {
            Ok(out) if out.exit_ok => Ok(()),
            Ok(out) => Err(format!(
                "`{}` exited with {}: {}",
                self.command,
                out.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
                out.stderr_tail(300).trim()
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}

pub struct TaskManager {
    file: LockedJsonFile<TaskState>,
    completed_log: PathBuf,
    validators: HashMap<String, Box<dyn Validator>>,
}

impl TaskManager {
    pub fn open(root: &Path) -> Self {
        Self {
            file: LockedJsonFile::new(paths::current_task_path(root)),
            completed_log: paths::completed_tasks_path(root),
            validators: HashMap::new(),
        }
    }

    /// Manager with a [`CommandValidator`] for every `validators` entry in config.
    pub fn from_config(root: &Path, config: &Config) -> Self {
        let mut mgr = Self::open(root);
        let timeout = Duration::from_secs(config.orchestrator.worker_timeout_seconds);
        for (check, command) in &config.validators {
            mgr.register_validator(check.clone(), CommandValidator::new(command, root, timeout));
        }
        mgr
    }

    pub fn register_validator(&mut self, check_id: impl Into<String>, v: impl Validator + 'static) {
        self.validators.insert(check_id.into(), Box::new(v));
    }

    pub fn state(&self) -> Result<TaskState> {
        Ok(self.file.read()?.unwrap_or_default())
    }

    /// Append a TODO task and return its id.
    pub fn add_task(
        &self,
        name: &str,
        priority: u8,
        time_budget_minutes: u32,
        checks: Vec<ValidationCheck>,
    ) -> Result<String> {
        self.mutate(|state| {
            let id = task::next_id(&state.roadmap);
            let mut t = Task::new(id.clone(), name);
            t.priority = priority;
            t.time_budget_minutes = time_budget_minutes;
            t.checks = checks;
            task::add_task(&mut state.roadmap, t)?;
            tracing::info!(task = %id, "task added");
            Ok(id)
        })
    }

    pub fn block_task(&self, blocker: &str, blocked: &str) -> Result<()> {
        self.mutate(|state| task::block_task(&mut state.roadmap, blocker, blocked))
    }

    pub fn unblock_task(&self, blocker: &str, blocked: &str) -> Result<()> {
        self.mutate(|state| task::unblock_task(&mut state.roadmap, blocker, blocked))
    }

    /// Make `id` the current task. A previously current, unfinished task goes
    /// back to TODO.
    pub fn start_task(&self, id: &str) -> Result<()> {
        self.mutate(|state| {
            task::start_task(&mut state.roadmap, id)?;
            if let Some(prev) = state.current.replace(id.to_string()) {
                if prev != id {
                    let p = task::find_mut(&mut state.roadmap, &prev)?;
                    if p.status == TaskStatus::InProgress {
                        p.status = TaskStatus::Todo;
                    }
                }
            }
            task::refresh_blocked(&mut state.roadmap);
            tracing::info!(task = %id, "task started");
            Ok(())
        })
    }

    pub fn update_progress(
        &self,
        progress: u8,
        note: Option<&str>,
        minutes: Option<u32>,
    ) -> Result<Task> {
        self.mutate(|state| {
            let id = state.current.clone().ok_or(MissionError::NoCurrentTask)?;
            let t = task::find_mut(&mut state.roadmap, &id)?;
            t.progress = progress.min(100);
            if let Some(n) = note {
                t.notes.push(n.to_string());
            }
            if let Some(m) = minutes {
                t.time_used_minutes += m;
            }
            Ok(t.clone())
        })
    }

    /// Run every check of the current task and persist the results.
    pub fn validate_current_task(&self) -> Result<Vec<ValidationCheck>> {
        let (id, checks) = self.run_checks()?;
        self.mutate(|state| {
            let t = task::find_mut(&mut state.roadmap, &id)?;
            t.checks = checks.clone();
            Ok(checks.clone())
        })
    }

    /// Complete the current task. Returns the id of the task that became
    /// current next, if any.
    pub fn complete_current_task(&self) -> Result<Option<String>> {
        let (id, checks) = self.run_checks()?;

        let (done, next) = self.mutate(|state| {
            if state.current.as_deref() != Some(id.as_str()) {
                return Err(MissionError::NoCurrentTask);
            }
            let t = task::find_mut(&mut state.roadmap, &id)?;
            t.checks = checks.clone();
            if !t.all_checks_pass() {
                return Ok((None, None));
            }
            t.status = TaskStatus::Done;
            t.progress = 100;
            t.completed_at = Some(Utc::now());
            let done = t.clone();

            task::refresh_blocked(&mut state.roadmap);
            let next = task::next_unblocked(&state.roadmap).map(|t| t.id.clone());
            if let Some(n) = &next {
                task::start_task(&mut state.roadmap, n)?;
            }
            state.current = next.clone();

            // Archived under the state lock and before the commit; a failed
            // append leaves the task current.
            let doc = format!("---\n{}", serde_yaml::to_string(&done)?);
            crate::io::append_text(&self.completed_log, &doc)?;
            Ok((Some(done), next))
        })?;

        let Some(done) = done else {
            tracing::warn!(task = %id, "completion refused: validation failed");
            return Err(MissionError::ValidationFailed { task: id, checks });
        };

        tracing::info!(task = %done.id, next = ?next, "task completed");
        Ok(next)
    }

    fn run_checks(&self) -> Result<(String, Vec<ValidationCheck>)> {
        let state = self.state()?;
        let current = state.current_task().ok_or(MissionError::NoCurrentTask)?;
        let now = Utc::now();
        let checks = current
            .checks
            .iter()
            .map(|c| {
                let result = match self.validators.get(&c.id) {
                    Some(v) => v.validate(current, c),
                    None => Err(format!("no validator registered for check '{}'", c.id)),
                };
                let mut checked = c.clone();
                checked.last_checked = Some(now);
                checked.status = result.is_ok();
                checked.error = result.err();
                checked
            })
            .collect();
        Ok((current.id.clone(), checks))
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut TaskState) -> Result<R>) -> Result<R> {
        self.file.update(|state| {
            let out = f(state)?;
            state.last_updated = Utc::now();
            Ok(out)
        })
    }
}
