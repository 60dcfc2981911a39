use super::parse_uuid;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use mission_core::{legacy, orchestrator::Orchestrator, paths};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum MissionSubcommand {
    /// Create a mission at PLANNING
    Create {
        /// Project id (default: project name from config)
        #[arg(long)]
        project: Option<String>,
        /// Budget ceiling (default: orchestrator.default_budget)
        #[arg(long)]
        budget: Option<f64>,
        /// Metadata entry as key=value; repeatable
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },
    /// List all missions
    List,
    /// Show a mission with its manifest
    Show { uuid: String },
    /// Delete a mission and everything recorded for it
    Delete { uuid: String },
    /// Import legacy file-based mission records
    Import {
        /// Directory of legacy *.json records (default: .mission/legacy)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

pub fn run(root: &Path, subcmd: MissionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        MissionSubcommand::Create {
            project,
            budget,
            meta,
        } => create(root, project.as_deref(), budget, &meta, json),
        MissionSubcommand::List => list(root, json),
        MissionSubcommand::Show { uuid } => show(root, &uuid, json),
        MissionSubcommand::Delete { uuid } => delete(root, &uuid, json),
        MissionSubcommand::Import { dir } => import(root, dir, json),
    }
}

fn open(root: &Path) -> anyhow::Result<Orchestrator> {
    Orchestrator::open(root).context("failed to open orchestrator")
}

fn parse_meta(pairs: &[String]) -> anyhow::Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .with_context(|| format!("metadata '{pair}' must be KEY=VALUE"))?;
        map.insert(k.trim().to_string(), serde_json::Value::String(v.to_string()));
    }
    Ok(serde_json::Value::Object(map))
}

fn create(
    root: &Path,
    project: Option<&str>,
    budget: Option<f64>,
    meta: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let orch = open(root)?;
    let metadata = parse_meta(meta)?;
    let (mission, manifest) = orch.create_mission(project, metadata, budget)?;

    if json {
        print_json(&serde_json::json!({ "mission": mission, "manifest": manifest }))?;
    } else {
        println!("Created mission {}", mission.uuid);
        println!("  project: {}", mission.project_id);
        println!("  phase:   {}", mission.phase);
        println!("  budget:  {:.2}", mission.budget);
    }
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let orch = open(root)?;
    let missions = orch.store().list_missions()?;

    if json {
        return print_json(&missions);
    }
    if missions.is_empty() {
        println!("No missions.");
        return Ok(());
    }
    let rows = missions
        .iter()
        .map(|m| {
            vec![
                m.uuid.to_string(),
                m.project_id.clone(),
                m.phase.to_string(),
                m.status.to_string(),
                format!("{:.2}/{:.2}", m.cost, m.budget),
                m.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["UUID", "PROJECT", "PHASE", "STATUS", "COST", "CREATED"], rows);
    Ok(())
}

fn show(root: &Path, uuid: &str, json: bool) -> anyhow::Result<()> {
    let orch = open(root)?;
    let uuid = parse_uuid(uuid)?;
    let mission = orch.mission(&uuid)?;
    // Imported legacy missions have no manifest.
    let manifest = orch.load_manifest(&uuid).ok();

    if json {
        return print_json(&serde_json::json!({ "mission": mission, "manifest": manifest }));
    }

    println!("Mission {}", mission.uuid);
    println!("  project:  {}", mission.project_id);
    println!("  phase:    {}", mission.phase);
    println!("  status:   {}", mission.status);
    println!("  cost:     {:.2} of {:.2}", mission.cost, mission.budget);
    if let Some(done) = mission.completed_at {
        println!("  finished: {}", done.to_rfc3339());
    }
    if let Some(m) = manifest {
        if let Some(sub) = &m.sub_state {
            println!("  sub-state: {sub}");
        }
        if m.repair_attempts > 0 {
            println!("  repair attempts: {}", m.repair_attempts);
        }
        if !m.artifacts.is_empty() {
            println!("  artifacts:");
            for (name, a) in &m.artifacts {
                println!("    {name:<20} {}", a.path);
            }
        }
    }
    Ok(())
}

fn delete(root: &Path, uuid: &str, json: bool) -> anyhow::Result<()> {
    let orch = open(root)?;
    let uuid = parse_uuid(uuid)?;
    let deleted = orch.delete_mission(&uuid)?;
    if !deleted {
        anyhow::bail!("mission not found: {uuid}");
    }
    if json {
        print_json(&serde_json::json!({ "uuid": uuid, "deleted": true }))?;
    } else {
        println!("Deleted mission {uuid}");
    }
    Ok(())
}

fn import(root: &Path, dir: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let orch = open(root)?;
    let dir = dir.unwrap_or_else(|| paths::legacy_dir(root));
    let report = legacy::import_legacy_dir(orch.store(), &dir)
        .with_context(|| format!("failed to import from {}", dir.display()))?;

    if json {
        return print_json(&report);
    }
    println!(
        "Imported {} mission(s), skipped {}, failed {}",
        report.imported,
        report.skipped,
        report.failed.len()
    );
    for f in &report.failed {
        println!("  failed: {f}");
    }
    Ok(())
}
