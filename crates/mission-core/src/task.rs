use crate::error::{MissionError, Result};
use crate::types::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named check that must be true before its task can be completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ValidationCheck {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: false,
            last_checked: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    /// Lower runs first when the roadmap is sorted for display.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub time_budget_minutes: u32,
    #[serde(default)]
    pub time_used_minutes: u32,
    /// 0–100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub checks: Vec<ValidationCheck>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub blocking_tasks: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: TaskStatus::Todo,
            priority: 0,
            time_budget_minutes: 0,
            time_used_minutes: 0,
            progress: 0,
            notes: Vec::new(),
            checks: Vec::new(),
            blocked_by: Vec::new(),
            blocking_tasks: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn all_checks_pass(&self) -> bool {
        self.checks.iter().all(|c| c.status)
    }
}

// ---------------------------------------------------------------------------
// Roadmap operations (operate on a mutable Vec<Task>)
// ---------------------------------------------------------------------------

/// `T<n>` one past the highest numeric id in use.
pub fn next_id(tasks: &[Task]) -> String {
    let max = tasks
        .iter()
        .filter_map(|t| t.id.strip_prefix('T').and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0);
    format!("T{}", max + 1)
}

pub fn add_task(tasks: &mut Vec<Task>, task: Task) -> Result<()> {
    if tasks.iter().any(|t| t.id == task.id) {
        return Err(MissionError::TaskExists(task.id));
    }
    tasks.push(task);
    Ok(())
}

/// Record that `blocker` must be DONE before `blocked` can start. Both sides
/// of the relation are kept in sync.
pub fn block_task(tasks: &mut [Task], blocker: &str, blocked: &str) -> Result<()> {
    if blocker == blocked {
        return Err(MissionError::TaskBlocked {
            task: blocked.to_string(),
            blockers: "itself".to_string(),
        });
    }
    find(tasks, blocker)?;
    find(tasks, blocked)?;

    let b = find_mut(tasks, blocker)?;
    if !b.blocking_tasks.iter().any(|id| id == blocked) {
        b.blocking_tasks.push(blocked.to_string());
    }
    let t = find_mut(tasks, blocked)?;
    if !t.blocked_by.iter().any(|id| id == blocker) {
        t.blocked_by.push(blocker.to_string());
    }
    refresh_blocked(tasks);
    Ok(())
}

pub fn unblock_task(tasks: &mut [Task], blocker: &str, blocked: &str) -> Result<()> {
    find_mut(tasks, blocker)?.blocking_tasks.retain(|id| id != blocked);
    find_mut(tasks, blocked)?.blocked_by.retain(|id| id != blocker);
    refresh_blocked(tasks);
    Ok(())
}

/// Ids in `blocked_by` that are not DONE. Unknown ids count as open.
pub fn open_blockers(tasks: &[Task], id: &str) -> Result<Vec<String>> {
    let task = find(tasks, id)?;
    Ok(task
        .blocked_by
        .iter()
        .filter(|b| {
            tasks
                .iter()
                .find(|t| &t.id == *b)
                .map_or(true, |t| t.status != TaskStatus::Done)
        })
        .cloned()
        .collect())
}

pub fn is_blocked(tasks: &[Task], id: &str) -> Result<bool> {
    Ok(!open_blockers(tasks, id)?.is_empty())
}

/// Move TODO tasks with open blockers to BLOCKED and BLOCKED tasks whose
/// blockers are all DONE back to TODO.
pub fn refresh_blocked(tasks: &mut [Task]) {
    let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
    for id in ids {
        let blocked = is_blocked(tasks, &id).unwrap_or(false);
        if let Ok(task) = find_mut(tasks, &id) {
            match (task.status, blocked) {
                (TaskStatus::Todo, true) => task.status = TaskStatus::Blocked,
                (TaskStatus::Blocked, false) => task.status = TaskStatus::Todo,
                _ => {}
            }
        }
    }
}

/// Move a task to IN_PROGRESS; refused while any blocker is open.
pub fn start_task(tasks: &mut [Task], id: &str) -> Result<()> {
    let blockers = open_blockers(tasks, id)?;
    if !blockers.is_empty() {
        return Err(MissionError::TaskBlocked {
            task: id.to_string(),
            blockers: blockers.join(", "),
        });
    }
    let task = find_mut(tasks, id)?;
    task.status = TaskStatus::InProgress;
    task.started_at.get_or_insert_with(Utc::now);
    Ok(())
}

/// First TODO task in roadmap order with no open blockers.
pub fn next_unblocked(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().find(|t| {
        t.status == TaskStatus::Todo && open_blockers(tasks, &t.id).map_or(false, |b| b.is_empty())
    })
}

/// Human-readable summary: "2/5 done, 1 in progress, 1 blocked"
pub fn summarize(tasks: &[Task]) -> String {
    let total = tasks.len();
    let done = tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
    let in_progress = tasks.iter().filter(|t| t.status == TaskStatus::InProgress).count();
    let blocked = tasks.iter().filter(|t| t.status == TaskStatus::Blocked).count();
    format!("{done}/{total} done, {in_progress} in progress, {blocked} blocked")
}

pub fn find<'a>(tasks: &'a [Task], id: &str) -> Result<&'a Task> {
    tasks
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| MissionError::TaskNotFound(id.to_string()))
}

pub fn find_mut<'a>(tasks: &'a mut [Task], id: &str) -> Result<&'a mut Task> {
    tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| MissionError::TaskNotFound(id.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
