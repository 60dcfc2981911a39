use super::{parse_uuid, run::RunExit};
use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use mission_core::{orchestrator::Orchestrator, safety::Operation};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum SafetySubcommand {
    /// Ask the kernel whether an operation is allowed for a mission
    Check {
        uuid: String,
        /// File the worker wants to write
        #[arg(long, conflicts_with_all = ["shell", "artifact"])]
        write: Option<PathBuf>,
        /// Shell command the worker wants to run
        #[arg(long, conflicts_with = "artifact")]
        shell: Option<String>,
        /// Artifact name the worker wants to save through the orchestrator
        #[arg(long)]
        artifact: Option<String>,
    },
    /// Record that the mission's changes were verified (allows git push)
    Verify { uuid: String },
    /// Operator override: clear an escalation so the mission's phases may run again
    Clear { uuid: String },
}

pub fn run(root: &Path, subcmd: SafetySubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        SafetySubcommand::Check {
            uuid,
            write,
            shell,
            artifact,
        } => {
            let op = match (write, shell, artifact) {
                (Some(path), None, None) => Operation::WriteFile { path },
                (None, Some(command), None) => Operation::Shell { command },
                (None, None, Some(name)) => Operation::SaveArtifact { name },
                _ => anyhow::bail!("exactly one of --write, --shell or --artifact is required"),
            };
            check(root, &uuid, &op, json)
        }
        SafetySubcommand::Verify { uuid } => verify(root, &uuid, json),
        SafetySubcommand::Clear { uuid } => clear(root, &uuid, json),
    }
}

fn check(root: &Path, uuid: &str, op: &Operation, json: bool) -> anyhow::Result<()> {
    let uuid = parse_uuid(uuid)?;
    let orch = Orchestrator::open(root).context("failed to open orchestrator")?;
    let mission = orch.mission(&uuid)?;

    orch.check_operation(mission.id, op)
        .map_err(RunExit::from_error)?;

    if json {
        print_json(&serde_json::json!({ "allowed": true, "operation": op }))?;
    } else {
        println!("allowed");
    }
    Ok(())
}

fn verify(root: &Path, uuid: &str, json: bool) -> anyhow::Result<()> {
    let uuid = parse_uuid(uuid)?;
    let orch = Orchestrator::open(root).context("failed to open orchestrator")?;
    let mission = orch.mission(&uuid)?;
    orch.record_verification(mission.id)?;

    if json {
        print_json(&serde_json::json!({ "mission": uuid, "verified": true }))?;
    } else {
        println!("Verification recorded for {uuid}");
    }
    Ok(())
}

fn clear(root: &Path, uuid: &str, json: bool) -> anyhow::Result<()> {
    let uuid = parse_uuid(uuid)?;
    let orch = Orchestrator::open(root).context("failed to open orchestrator")?;
    let mission = orch.mission(&uuid)?;
    let cleared = orch.clear_escalation(mission.id)?;

    if json {
        print_json(&serde_json::json!({ "mission": uuid, "cleared": cleared }))?;
    } else if cleared.is_empty() {
        println!("No open escalation for {uuid}; counters reset");
    } else {
        let kinds: Vec<&str> = cleared.iter().map(|k| k.as_str()).collect();
        println!("Cleared escalation for {uuid}: {}", kinds.join(", "));
    }
    Ok(())
}
