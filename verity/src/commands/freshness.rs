// verity/src/commands/freshness.rs
//
// USE CASE: report models whose last successful run is older than a
// threshold (query helper, SPEC_FULL.md §12).

use std::path::Path;

use anyhow::Context;
use comfy_table::{Cell, Table};

use verity_core::check_freshness;
use verity_core::infrastructure::adapters::DuckDbWarehouse;
use verity_core::infrastructure::config::load_project_config;
use verity_core::ports::warehouse::Warehouse;

pub fn execute(project_dir: &Path, max_age_hours: f64) -> anyhow::Result<()> {
    let config = load_project_config(project_dir)
        .with_context(|| format!("failed to load project configuration from {project_dir:?}"))?;
    let db_path = project_dir.join(&config.target_path);
    let db_path_str = db_path.to_string_lossy().into_owned();

    let warehouse = DuckDbWarehouse::open(&db_path_str)
        .with_context(|| format!("failed to open warehouse at {db_path_str}"))?;
    warehouse.ensure_meta_table()?;

    let reports = check_freshness(&warehouse, max_age_hours)?;

    if reports.is_empty() {
        println!("No models have been run yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["model", "last_run_at", "hours_since_run", "row_count", "stale"]);
    for report in &reports {
        table.add_row(vec![
            Cell::new(&report.model),
            Cell::new(report.last_run_at.as_deref().unwrap_or("-")),
            Cell::new(
                report
                    .hours_since_run
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(report.row_count),
            Cell::new(if report.is_stale { "yes" } else { "no" }),
        ]);
    }
    println!("{table}");

    let stale_count = reports.iter().filter(|r| r.is_stale).count();
    if stale_count > 0 {
        println!("{stale_count} model(s) older than {max_age_hours}h");
    }

    Ok(())
}
