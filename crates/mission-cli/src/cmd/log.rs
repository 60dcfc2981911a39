use super::parse_uuid;
use crate::output::{print_json, print_table};
use anyhow::Context;
use mission_core::{paths, store::Store};
use std::path::Path;

pub fn run(root: &Path, uuid: &str, tool_calls: bool, json: bool) -> anyhow::Result<()> {
    let uuid = parse_uuid(uuid)?;
    let store = Store::open(&paths::store_path(root)).context("failed to open mission store")?;
    let mission = store.get_mission_by_uuid(&uuid)?;
    let decisions = store.decisions(mission.id)?;
    let calls = if tool_calls {
        store.tool_calls(mission.id)?
    } else {
        Vec::new()
    };

    if json {
        let mut value = serde_json::json!({ "mission": mission.uuid, "decisions": decisions });
        if tool_calls {
            value["tool_calls"] = serde_json::to_value(&calls)?;
        }
        return print_json(&value);
    }

    let rows = decisions
        .iter()
        .map(|d| {
            vec![
                d.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                d.decision_type.clone(),
                d.agent.clone(),
                d.rationale.lines().next().unwrap_or_default().to_string(),
            ]
        })
        .collect();
    print_table(&["TIME", "DECISION", "AGENT", "RATIONALE"], rows);

    if tool_calls {
        println!();
        let rows = calls
            .iter()
            .map(|c| {
                vec![
                    c.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    c.name.clone(),
                    if c.success { "ok" } else { "failed" }.to_string(),
                    format!("{}ms", c.duration_ms),
                    c.error.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["TIME", "TOOL", "RESULT", "DURATION", "ERROR"], rows);
    }
    Ok(())
}
