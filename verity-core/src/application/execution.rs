// verity-core/src/application/execution.rs
//
// Model execution: materialization dispatch and incremental strategies
// (spec §4.4/§4.5, REDESIGN §13).

use tracing::{debug, instrument, warn};

use crate::domain::error::DomainError;
use crate::domain::identifier::validate_identifier;
use crate::domain::model::{IncrementalStrategy, MaterializationType, SQLModel};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::warehouse::Warehouse;

/// Identifier failures originate in the domain layer; execution is an
/// infrastructure-layer operation, so they're folded into a config error
/// here rather than widening `execute_model`'s error type.
fn domain_to_infra(err: DomainError) -> InfrastructureError {
    InfrastructureError::ConfigError(err.to_string())
}

/// Outcome of materializing one model: wall-clock duration and the row
/// count of the resulting relation (0 for views).
#[derive(Debug, Clone, Copy)]
pub struct ExecutionOutcome {
    pub duration_ms: i64,
    pub row_count: i64,
}

/// Materializes a single model against `warehouse`. Dispatches on
/// `model.materialized`; incremental models are handed to
/// [`execute_incremental`].
#[instrument(skip(warehouse, model), fields(model = %model.full_name()))]
pub fn execute_model(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
) -> Result<ExecutionOutcome, InfrastructureError> {
    validate_identifier(&model.schema).map_err(domain_to_infra)?;
    validate_identifier(&model.name).map_err(domain_to_infra)?;

    if model.materialized == MaterializationType::Incremental {
        return execute_incremental(warehouse, model);
    }

    warehouse.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", model.schema))?;

    let start = std::time::Instant::now();
    let full_name = model.full_name();

    let ddl = match model.materialized {
        MaterializationType::View => {
            format!("CREATE OR REPLACE VIEW {full_name} AS\n{}", model.query)
        }
        MaterializationType::Table => {
            format!("CREATE OR REPLACE TABLE {full_name} AS\n{}", model.query)
        }
        MaterializationType::Incremental => unreachable!("handled above"),
    };

    debug!(statement_class = ?model.materialized, "issuing DDL");
    warehouse.execute(&ddl)?;
    let duration_ms = start.elapsed().as_millis() as i64;

    let row_count = if model.materialized == MaterializationType::Table {
        warehouse.execute_scalar_i64(&format!("SELECT count(*) FROM {full_name}"))?
    } else {
        0
    };

    Ok(ExecutionOutcome {
        duration_ms,
        row_count,
    })
}

/// Executes an incremental model: full load on first run, then
/// `append` / `merge` / `delete+insert` / `partition_by` on subsequent runs.
/// See spec §4.4 step 4 and §13 for the merge/partition_by precedence.
fn execute_incremental(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
) -> Result<ExecutionOutcome, InfrastructureError> {
    warehouse.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", model.schema))?;
    let start = std::time::Instant::now();
    let full_name = model.full_name();

    let exists = warehouse.table_exists(&model.schema, &model.name)?;

    let mut query = model.query.clone();
    if exists {
        if let Some(filter) = &model.incremental_filter {
            let filter_clause = filter.replace("{this}", &full_name);
            query = format!("{query}\n{filter_clause}");
        }
    }

    if !exists {
        warehouse.execute(&format!("CREATE TABLE {full_name} AS\n{query}"))?;
    } else if model.incremental_strategy == Some(IncrementalStrategy::Append) || model.unique_key.is_none() {
        warehouse.execute(&format!("INSERT INTO {full_name}\n{query}"))?;
    } else {
        execute_staged(warehouse, model, &full_name, &query)?;
    }

    let duration_ms = start.elapsed().as_millis() as i64;
    let row_count = warehouse.execute_scalar_i64(&format!("SELECT count(*) FROM {full_name}"))?;

    Ok(ExecutionOutcome {
        duration_ms,
        row_count,
    })
}

/// The staging-table path for strategies that need to reconcile new rows
/// against an existing target: `merge`, `partition_by`, `delete+insert`.
/// Precedence (spec §13): `merge` is checked first — if the strategy is
/// `merge`, it wins even when `partition_by` is also set on the model,
/// matching the original source's `if/elif` order. A `partition_by` set
/// alongside `merge` is almost certainly a mistake, so it's logged.
fn execute_staged(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
    full_name: &str,
    query: &str,
) -> Result<(), InfrastructureError> {
    let unique_key = model
        .unique_key
        .as_deref()
        .expect("execute_staged only called when unique_key is set");
    let keys: Vec<String> = unique_key.split(',').map(|k| k.trim().to_string()).collect();
    for key in &keys {
        validate_identifier(key).map_err(domain_to_infra)?;
    }

    let staging_name = format!("_dp_staging_{}", model.name);
    warehouse.execute(&format!(
        "CREATE OR REPLACE TEMP TABLE {staging_name} AS\n{query}"
    ))?;

    let target_cols = warehouse.table_columns(&model.schema, &model.name)?;
    let target_col_names: std::collections::HashSet<String> =
        target_cols.iter().map(|c| c.name.clone()).collect();
    let staging_cols = staging_table_columns(warehouse, &staging_name)?;

    for (col_name, col_type) in &staging_cols {
        if !target_col_names.contains(col_name) {
            warehouse.execute(&format!(
                "ALTER TABLE {full_name} ADD COLUMN \"{col_name}\" {col_type}"
            ))?;
        }
    }

    let staging_col_names: Vec<String> = staging_cols.iter().map(|(n, _)| n.clone()).collect();
    let staging_select = quoted_list(&staging_col_names);
    let key_cols = quoted_list(&keys);

    let strategy = model.incremental_strategy;
    let partition_col = model.partition_by.as_deref();

    if strategy == Some(IncrementalStrategy::Merge) {
        if partition_col.is_some() {
            warn!(
                model = %model.full_name(),
                "incremental_strategy=merge and partition_by are both set; merge takes precedence and partition_by is ignored"
            );
        }
        merge_staged(warehouse, full_name, &staging_name, &keys, &staging_col_names)?;
    } else if let Some(part_col) = partition_col {
        let part_col = part_col.trim();
        validate_identifier(part_col).map_err(domain_to_infra)?;
        warehouse.execute(&format!(
            "DELETE FROM {full_name} WHERE \"{part_col}\" IN (SELECT DISTINCT \"{part_col}\" FROM {staging_name})"
        ))?;
        warehouse.execute(&format!(
            "INSERT INTO {full_name} ({staging_select}) SELECT {staging_select} FROM {staging_name}"
        ))?;
    } else {
        warehouse.execute(&format!(
            "DELETE FROM {full_name} WHERE ({key_cols}) IN (SELECT {key_cols} FROM {staging_name})"
        ))?;
        warehouse.execute(&format!(
            "INSERT INTO {full_name} ({staging_select}) SELECT {staging_select} FROM {staging_name}"
        ))?;
    }

    warehouse.execute(&format!("DROP TABLE IF EXISTS {staging_name}"))?;
    Ok(())
}

fn merge_staged(
    warehouse: &dyn Warehouse,
    full_name: &str,
    staging_name: &str,
    keys: &[String],
    staging_col_names: &[String],
) -> Result<(), InfrastructureError> {
    let non_key_cols: Vec<&String> = staging_col_names
        .iter()
        .filter(|c| !keys.contains(c))
        .collect();

    if !non_key_cols.is_empty() {
        let set_clause = non_key_cols
            .iter()
            .map(|c| format!("\"{c}\" = staging.\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let join_cond = keys
            .iter()
            .map(|k| format!("target.\"{k}\" = staging.\"{k}\""))
            .collect::<Vec<_>>()
            .join(" AND ");
        warehouse.execute(&format!(
            "UPDATE {full_name} AS target SET {set_clause} FROM {staging_name} AS staging WHERE {join_cond}"
        ))?;
    }

    let not_exists_cond = keys
        .iter()
        .map(|k| format!("staging.\"{k}\" = target.\"{k}\""))
        .collect::<Vec<_>>()
        .join(" AND ");
    let insert_cols = quoted_list(staging_col_names);
    warehouse.execute(&format!(
        "INSERT INTO {full_name} ({insert_cols}) \
         SELECT {insert_cols} FROM {staging_name} AS staging \
         WHERE NOT EXISTS (SELECT 1 FROM {full_name} AS target WHERE {not_exists_cond})"
    ))?;
    Ok(())
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("\"{n}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `information_schema.columns` filtered by table name only, no schema
/// clause — TEMP tables don't reliably show up under a fixed schema name
/// the way permanent tables do.
fn staging_table_columns(
    warehouse: &dyn Warehouse,
    staging_name: &str,
) -> Result<Vec<(String, String)>, InfrastructureError> {
    let sql = format!(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_name = '{staging_name}' ORDER BY ordinal_position"
    );
    let result = warehouse.execute(&sql)?;
    Ok(result
        .rows
        .into_iter()
        .map(|row| {
            let name = row[0].as_str().unwrap_or_default().to_string();
            let data_type = row[1].as_str().unwrap_or_default().to_string();
            (name, data_type)
        })
        .collect())
}
