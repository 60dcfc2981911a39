use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use mission_core::{
    config::Config,
    task::{summarize, ValidationCheck},
    task_manager::TaskManager,
    MissionError,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Add a task to the roadmap
    Add {
        #[arg(required = true)]
        name: Vec<String>,
        /// Lower runs first
        #[arg(long, default_value = "0")]
        priority: u8,
        /// Time budget in minutes
        #[arg(long, default_value = "0")]
        budget: u32,
        /// Validation check as ID=DESCRIPTION; repeatable
        #[arg(long = "check", value_name = "ID=DESCRIPTION")]
        checks: Vec<String>,
    },
    /// Record that BLOCKER must be done before BLOCKED can start
    Block { blocker: String, blocked: String },
    /// Remove a blocking relation
    Unblock { blocker: String, blocked: String },
    /// Make a task current
    Start { id: String },
    /// Update progress on the current task
    Progress {
        /// Percent complete (0-100)
        percent: u8,
        #[arg(long)]
        note: Option<String>,
        /// Minutes spent since the last update
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// Run the current task's validation checks
    Validate,
    /// Complete the current task (all checks must pass)
    Complete,
    /// Show the roadmap and the current task
    Show,
}

pub fn run(root: &Path, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    let mgr = manager(root)?;
    match subcmd {
        TaskSubcommand::Add {
            name,
            priority,
            budget,
            checks,
        } => add(&mgr, &name.join(" "), priority, budget, &checks, json),
        TaskSubcommand::Block { blocker, blocked } => {
            mgr.block_task(&blocker, &blocked)?;
            report(json, serde_json::json!({ "blocker": blocker, "blocked": blocked }), || {
                println!("[{blocked}] is now blocked by [{blocker}]")
            })
        }
        TaskSubcommand::Unblock { blocker, blocked } => {
            mgr.unblock_task(&blocker, &blocked)?;
            report(json, serde_json::json!({ "blocker": blocker, "unblocked": blocked }), || {
                println!("[{blocked}] no longer waits on [{blocker}]")
            })
        }
        TaskSubcommand::Start { id } => {
            mgr.start_task(&id)?;
            report(json, serde_json::json!({ "current": id, "status": "IN_PROGRESS" }), || {
                println!("Started task [{id}]")
            })
        }
        TaskSubcommand::Progress {
            percent,
            note,
            minutes,
        } => {
            let task = mgr.update_progress(percent, note.as_deref(), minutes)?;
            if json {
                return print_json(&task);
            }
            println!(
                "[{}] {}% ({} of {} min)",
                task.id, task.progress, task.time_used_minutes, task.time_budget_minutes
            );
            Ok(())
        }
        TaskSubcommand::Validate => validate(&mgr, json),
        TaskSubcommand::Complete => complete(&mgr, json),
        TaskSubcommand::Show => show(&mgr, json),
    }
}

/// Command validators come from config when the project is initialized.
fn manager(root: &Path) -> anyhow::Result<TaskManager> {
    match Config::load(root) {
        Ok(config) => Ok(TaskManager::from_config(root, &config)),
        Err(MissionError::NotInitialized) => Ok(TaskManager::open(root)),
        Err(e) => Err(e).context("failed to load config"),
    }
}

fn report(json: bool, value: serde_json::Value, text: impl FnOnce()) -> anyhow::Result<()> {
    if json {
        print_json(&value)
    } else {
        text();
        Ok(())
    }
}

fn add(
    mgr: &TaskManager,
    name: &str,
    priority: u8,
    budget: u32,
    checks: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let checks = checks
        .iter()
        .map(|c| {
            let (id, description) = c.split_once('=').unwrap_or((c.as_str(), ""));
            ValidationCheck::new(id.trim(), description.trim())
        })
        .collect();
    let id = mgr.add_task(name, priority, budget, checks)?;
    report(json, serde_json::json!({ "task_id": id, "name": name }), || {
        println!("Added task [{id}]: {name}")
    })
}

fn print_checks(checks: &[ValidationCheck]) {
    for c in checks {
        let mark = if c.status { "pass" } else { "FAIL" };
        match &c.error {
            Some(e) => println!("  [{mark}] {:<16} {e}", c.id),
            None => println!("  [{mark}] {:<16} {}", c.id, c.description),
        }
    }
}

fn validate(mgr: &TaskManager, json: bool) -> anyhow::Result<()> {
    let checks = mgr.validate_current_task()?;
    if json {
        return print_json(&checks);
    }
    if checks.is_empty() {
        println!("Current task has no validation checks.");
    }
    print_checks(&checks);
    Ok(())
}

fn complete(mgr: &TaskManager, json: bool) -> anyhow::Result<()> {
    let next = match mgr.complete_current_task() {
        Ok(next) => next,
        Err(e @ MissionError::ValidationFailed { .. }) => {
            if let MissionError::ValidationFailed { checks, .. } = &e {
                if !json {
                    print_checks(checks);
                }
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    report(json, serde_json::json!({ "completed": true, "next": next }), || match &next {
        Some(id) => println!("Task completed. Now working on [{id}]"),
        None => println!("Task completed. No unblocked tasks remain."),
    })
}

fn show(mgr: &TaskManager, json: bool) -> anyhow::Result<()> {
    let state = mgr.state()?;
    if json {
        return print_json(&state);
    }
    if state.roadmap.is_empty() {
        println!("Roadmap is empty.");
        return Ok(());
    }
    let current = state.current.as_deref();
    let rows = state
        .roadmap
        .iter()
        .map(|t| {
            let marker = if Some(t.id.as_str()) == current { "*" } else { "" };
            vec![
                format!("{marker}{}", t.id),
                t.status.to_string(),
                t.priority.to_string(),
                format!("{}%", t.progress),
                t.blocked_by.join(","),
                t.name.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "PRI", "PROGRESS", "BLOCKED BY", "NAME"], rows);
    println!("\n{}", summarize(&state.roadmap));
    Ok(())
}
