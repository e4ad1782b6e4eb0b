// verity-core/src/application/profiler.rs
//
// Auto-profiling of materialized table/incremental outputs (spec §4.6).

use std::collections::BTreeMap;

use tracing::instrument;

use crate::domain::model::{ModelProfile, SQLModel};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::warehouse::Warehouse;

/// Computes row count, per-column null percentage and distinct count for a
/// model's materialized table. Only called for `table`/`incremental`
/// materializations — views aren't profiled.
#[instrument(skip(warehouse, model), fields(model = %model.full_name()))]
pub fn profile_model(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
) -> Result<ModelProfile, InfrastructureError> {
    let full_name = model.full_name();
    let row_count = warehouse.execute_scalar_i64(&format!("SELECT count(*) FROM {full_name}"))?;
    let columns = warehouse.table_columns(&model.schema, &model.name)?;

    let mut null_percentages = BTreeMap::new();
    let mut distinct_counts = BTreeMap::new();

    if row_count > 0 {
        for column in &columns {
            let col = &column.name;
            let stats = warehouse.execute(&format!(
                "SELECT count(*) - count(\"{col}\"), count(DISTINCT \"{col}\") FROM {full_name}"
            ))?;
            let row = stats.rows.first();
            let null_count = row.and_then(|r| r[0].as_i64()).unwrap_or(0);
            let distinct_count = row.and_then(|r| r[1].as_i64()).unwrap_or(0);

            let pct = (null_count as f64 / row_count as f64) * 100.0;
            null_percentages.insert(col.clone(), (pct * 10.0).round() / 10.0);
            distinct_counts.insert(col.clone(), distinct_count);
        }
    }

    Ok(ModelProfile {
        model_path: full_name,
        row_count,
        column_count: columns.len() as i32,
        null_percentages,
        distinct_counts,
        profiled_at: chrono::Utc::now(),
    })
}

/// Upserts a profile into `_dp_internal.model_profiles`, serializing the
/// per-column maps as JSON the way the metadata table stores them.
#[instrument(skip(warehouse, profile), fields(model = %profile.model_path))]
pub fn save_profile(warehouse: &dyn Warehouse, profile: &ModelProfile) -> Result<(), InfrastructureError> {
    let null_json = serde_json::to_string(&profile.null_percentages)
        .unwrap_or_else(|_| "{}".to_string())
        .replace('\'', "''");
    let distinct_json = serde_json::to_string(&profile.distinct_counts)
        .unwrap_or_else(|_| "{}".to_string())
        .replace('\'', "''");

    warehouse.execute(&format!(
        "INSERT OR REPLACE INTO _dp_internal.model_profiles \
         (model_path, row_count, column_count, null_percentages, distinct_counts, profiled_at) \
         VALUES ('{}', {}, {}, '{null_json}'::JSON, '{distinct_json}'::JSON, current_timestamp)",
        profile.model_path.replace('\'', "''"),
        profile.row_count,
        profile.column_count,
    ))?;
    Ok(())
}

/// Columns whose null percentage exceeds 50%, surfaced as a warning rather
/// than a status change (spec §4.6).
pub fn high_null_columns(profile: &ModelProfile) -> Vec<(&str, f64)> {
    profile
        .null_percentages
        .iter()
        .filter(|(_, pct)| **pct > 50.0)
        .map(|(col, pct)| (col.as_str(), *pct))
        .collect()
}
