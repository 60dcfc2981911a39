use crate::output::print_json;
use anyhow::Context;
use mission_core::{config::Config, io, legacy, paths, store::Store};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    for dir in [paths::STATE_DIR, paths::MISSIONS_DIR, paths::LEGACY_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_created = if paths::config_path(root).exists() {
        false
    } else {
        Config::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
        true
    };

    let store = Store::open(&paths::store_path(root)).context("failed to open mission store")?;
    let report = legacy::import_legacy_dir(&store, &paths::legacy_dir(root))
        .context("legacy import failed")?;

    if json {
        return print_json(&serde_json::json!({
            "root": root,
            "config_created": config_created,
            "legacy_import": report,
        }));
    }

    println!("Initialized mission state in: {}", root.display());
    let verb = if config_created { "created" } else { "exists: " };
    println!("  {verb} {}", paths::CONFIG_FILE);
    println!("  store:   {}", paths::STORE_FILE);
    if report.imported + report.skipped + report.failed.len() > 0 {
        println!(
            "  legacy:  {} imported, {} skipped, {} failed",
            report.imported,
            report.skipped,
            report.failed.len()
        );
        for f in &report.failed {
            println!("    failed: {f}");
        }
    }
    Ok(())
}
