// verity/src/commands/run.rs
//
// USE CASE: run the transform pipeline (spec §4.9 `run_transform`).

use std::fs;
use std::path::Path;

use anyhow::Context;
use comfy_table::{Cell, Table};

use verity_core::infrastructure::adapters::DuckDbWarehouse;
use verity_core::infrastructure::config::load_project_config;
use verity_core::ports::warehouse::Warehouse;
use verity_core::{run_transform, RunStatus};

/// Returns `true` when the run should be considered successful (no model
/// ended `error` or `assertion_failed`), matching spec §7's CLI convention.
#[allow(clippy::too_many_arguments)]
pub fn execute(
    project_dir: &Path,
    select: Vec<String>,
    force: bool,
    parallel: bool,
    sequential: bool,
    max_workers: Option<usize>,
) -> anyhow::Result<bool> {
    let config = load_project_config(project_dir)
        .with_context(|| format!("failed to load project configuration from {project_dir:?}"))?;

    let db_path = project_dir.join(&config.target_path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create warehouse directory {parent:?}"))?;
    }
    let db_path_str = db_path.to_string_lossy().into_owned();

    println!("Project: {}", config.project_name);
    println!("Warehouse: {db_path_str}");

    let warehouse = DuckDbWarehouse::open(&db_path_str)
        .with_context(|| format!("failed to open warehouse at {db_path_str}"))?;

    let transform_root = project_dir.join(&config.transform_root);
    let targets: Option<Vec<String>> = if select.is_empty() { None } else { Some(select) };

    let run_parallel = if parallel {
        true
    } else if sequential {
        false
    } else {
        config.parallel
    };
    let workers = max_workers.unwrap_or(config.max_workers).max(1);

    let factory_path = db_path_str.clone();
    let factory = move || -> Result<Box<dyn Warehouse>, verity_core::infrastructure::error::InfrastructureError> {
        Ok(Box::new(DuckDbWarehouse::open(&factory_path)?))
    };

    let results = run_transform(
        &warehouse,
        &transform_root,
        targets.as_deref(),
        force,
        run_parallel,
        workers,
        Some(&factory),
    )?;

    let mut rows: Vec<(String, RunStatus)> = results.into_iter().collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut table = Table::new();
    table.set_header(vec!["model", "status"]);
    for (name, status) in &rows {
        table.add_row(vec![Cell::new(name), Cell::new(status.to_string())]);
    }
    println!("{table}");

    let built = rows.iter().filter(|(_, s)| *s == RunStatus::Built).count();
    let skipped = rows.iter().filter(|(_, s)| *s == RunStatus::Skipped).count();
    let failed = rows
        .iter()
        .filter(|(_, s)| matches!(s, RunStatus::Error | RunStatus::AssertionFailed))
        .count();
    println!("{built} built, {skipped} skipped, {failed} failed");

    Ok(failed == 0)
}
