// verity/src/commands/query.rs
//
// USE CASE: execute a raw ad-hoc SQL query against the warehouse.

use std::path::Path;

use anyhow::Context;
use comfy_table::{Cell, Table};

use verity_core::infrastructure::adapters::DuckDbWarehouse;
use verity_core::infrastructure::config::load_project_config;
use verity_core::ports::warehouse::CellValue;
use verity_core::run_query;

pub fn execute(project_dir: &Path, sql: &str) -> anyhow::Result<()> {
    let config = load_project_config(project_dir)
        .with_context(|| format!("failed to load project configuration from {project_dir:?}"))?;
    let db_path = project_dir.join(&config.target_path);
    let db_path_str = db_path.to_string_lossy().into_owned();

    let warehouse = DuckDbWarehouse::open(&db_path_str)
        .with_context(|| format!("failed to open warehouse at {db_path_str}"))?;

    let result = run_query(&warehouse, sql)?;

    let mut table = Table::new();
    table.set_header(result.columns.iter().map(|c| Cell::new(&c.name)));
    for row in &result.rows {
        table.add_row(row.iter().map(cell_to_string));
    }
    println!("{table}");
    println!("({} row{})", result.rows.len(), if result.rows.len() == 1 { "" } else { "s" });

    Ok(())
}

fn cell_to_string(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => "NULL".to_string(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => f.to_string(),
        CellValue::Text(s) => s.clone(),
    }
}
