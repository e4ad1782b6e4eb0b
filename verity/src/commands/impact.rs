// verity/src/commands/impact.rs
//
// USE CASE: show every model transitively downstream of a target
// (query helper, SPEC_FULL.md §12).

use std::path::Path;

use anyhow::Context;

use verity_core::impact_analysis;
use verity_core::infrastructure::config::load_project_config;
use verity_core::infrastructure::discovery::discover_models;

pub fn execute(project_dir: &Path, target: &str, column: Option<&str>) -> anyhow::Result<()> {
    let config = load_project_config(project_dir)
        .with_context(|| format!("failed to load project configuration from {project_dir:?}"))?;
    let transform_root = project_dir.join(&config.transform_root);

    let models = discover_models(&transform_root)
        .with_context(|| format!("failed to discover models under {transform_root:?}"))?;

    let report = impact_analysis(&models, target, column);

    if report.downstream_models.is_empty() {
        println!("{} has no downstream models.", report.target);
        return Ok(());
    }

    println!("Models downstream of {}:", report.target);
    for model in &report.downstream_models {
        println!("  {model}");
    }

    println!("\nDependency chain:");
    for (upstream, children) in &report.impact_chain {
        println!("  {upstream} -> {}", children.join(", "));
    }

    if let Some(col) = &report.column {
        println!("\nColumns derived from {}.{col}:", report.target);
        if report.affected_columns.is_empty() {
            println!("  none found");
        } else {
            for (model, out_col) in &report.affected_columns {
                println!("  {model}.{out_col}");
            }
        }
    }

    Ok(())
}
