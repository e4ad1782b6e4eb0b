// verity-core/src/application/orchestrator.rs
//
// Pipeline orchestration: sequential and tiered-parallel transform runs
// (spec §4.7/§5, REDESIGN §13).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{info, instrument, warn};

use crate::application::assertions::{run_assertions, save_assertions};
use crate::application::change_detection::{compute_upstream_hashes, has_changed};
use crate::application::execution::execute_model;
use crate::application::profiler::{high_null_columns, profile_model, save_profile};
use crate::application::validation::check_duplicates;
use crate::domain::error::DomainError;
use crate::domain::graph::dag::build_dag_tiers;
use crate::domain::model::{MaterializationType, RunStatus, RunType, SQLModel};
use crate::infrastructure::discovery::discover_models;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::warehouse::Warehouse;
use crate::VerityError;

/// Produces an independent `Warehouse` handle to the same database file,
/// one per worker thread. Required for parallel tiers: spec §5 rules out
/// sharing a single handle across threads.
pub type WarehouseFactory = dyn Fn() -> Result<Box<dyn Warehouse>, InfrastructureError> + Send + Sync;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_run_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}-{seq:x}")
}

/// Runs the full transform pipeline: discovery, filtering, change
/// detection, execution, assertions, profiling — sequentially or in tiered
/// parallel per `parallel`. Returns `full_name -> RunStatus` for every model
/// in scope, including ones skipped as unchanged or as a result of an
/// upstream failure.
///
/// `factory` is required to actually run in parallel — without one, a
/// `parallel = true` request quietly falls back to sequential, mirroring
/// the original source's "can't determine db path, falling back to
/// sequential" behavior.
#[instrument(skip(warehouse, transform_root, factory), fields(parallel, max_workers))]
pub fn run_transform(
    warehouse: &dyn Warehouse,
    transform_root: &Path,
    targets: Option<&[String]>,
    force: bool,
    parallel: bool,
    max_workers: usize,
    factory: Option<&WarehouseFactory>,
) -> Result<HashMap<String, RunStatus>, VerityError> {
    warehouse.ensure_meta_table()?;
    let mut models = discover_models(transform_root)?;

    if models.is_empty() {
        info!("no SQL models found, nothing to run");
        return Ok(HashMap::new());
    }

    if let Some(targets) = targets {
        let target_set: HashSet<&str> = targets.iter().map(String::as_str).collect();
        models.retain(|m| target_set.contains(m.full_name().as_str()) || target_set.contains(m.name.as_str()));
        if models.is_empty() {
            warn!(?targets, "no models matched targets");
            return Ok(HashMap::new());
        }
    }

    let duplicates = check_duplicates(&models);
    if !duplicates.is_empty() {
        let names: Vec<String> = duplicates.into_iter().filter_map(|d| d.model).collect();
        return Err(VerityError::Domain(DomainError::DuplicateModel(names.join(", "))));
    }

    let tiers = build_dag_tiers(&models)?;
    let by_name: HashMap<String, SQLModel> = models.into_iter().map(|m| (m.full_name(), m)).collect();
    let all_models: Vec<SQLModel> = by_name.values().cloned().collect();
    let upstream_hashes = compute_upstream_hashes(&all_models);

    if parallel {
        if let Some(factory) = factory {
            return run_parallel(&tiers, &by_name, &upstream_hashes, force, max_workers.max(1), factory);
        }
        warn!("parallel requested but no warehouse factory supplied, falling back to sequential");
    }

    run_sequential(warehouse, &tiers, &by_name, &upstream_hashes, force)
}

fn has_transitive_failure(model: &SQLModel, failed: &HashSet<String>) -> bool {
    model.depends_on.iter().any(|dep| failed.contains(&dep.to_lowercase()))
}

fn run_sequential(
    warehouse: &dyn Warehouse,
    tiers: &[Vec<String>],
    by_name: &HashMap<String, SQLModel>,
    upstream_hashes: &HashMap<String, String>,
    force: bool,
) -> Result<HashMap<String, RunStatus>, VerityError> {
    let mut results: HashMap<String, RunStatus> = HashMap::new();
    let mut failed: HashSet<String> = HashSet::new();

    for tier in tiers {
        for full_name in tier {
            let model = by_name.get(full_name).expect("tier name came from by_name's keys");

            if has_transitive_failure(model, &failed) {
                results.insert(full_name.clone(), RunStatus::Skipped);
                failed.insert(full_name.clone());
                continue;
            }

            let status = run_one_model(warehouse, model, upstream_hashes, force);
            if matches!(status, RunStatus::Error | RunStatus::AssertionFailed) {
                failed.insert(full_name.clone());
            }
            results.insert(full_name.clone(), status);
        }
    }

    Ok(results)
}

/// Tiered parallel execution: a strict barrier between tiers (every model
/// in tier N finishes before tier N+1 starts), round-robin chunked across
/// `max_workers` within a tier, each worker opening its own warehouse
/// handle via `factory`. Deviates from the original source's coarse "any
/// earlier failure blocks every remaining tier" behavior: only models
/// transitively downstream of a failed or skipped model are skipped here;
/// unrelated branches in later tiers still run (spec §13).
fn run_parallel(
    tiers: &[Vec<String>],
    by_name: &HashMap<String, SQLModel>,
    upstream_hashes: &HashMap<String, String>,
    force: bool,
    max_workers: usize,
    factory: &WarehouseFactory,
) -> Result<HashMap<String, RunStatus>, VerityError> {
    let mut results: HashMap<String, RunStatus> = HashMap::new();
    let mut failed: HashSet<String> = HashSet::new();

    for (tier_idx, tier) in tiers.iter().enumerate() {
        let mut runnable = Vec::new();
        for full_name in tier {
            let model = by_name.get(full_name).expect("tier name came from by_name's keys");
            if has_transitive_failure(model, &failed) {
                results.insert(full_name.clone(), RunStatus::Skipped);
                failed.insert(full_name.clone());
            } else {
                runnable.push(full_name.clone());
            }
        }

        if runnable.is_empty() {
            continue;
        }

        info!(tier = tier_idx + 1, total_tiers = tiers.len(), n = runnable.len(), "running tier");

        if runnable.len() == 1 {
            let model = by_name.get(&runnable[0]).expect("present");
            let status = run_one_model_with_factory(model, upstream_hashes, force, factory);
            if matches!(status, RunStatus::Error | RunStatus::AssertionFailed) {
                failed.insert(runnable[0].clone());
            }
            results.insert(runnable[0].clone(), status);
            continue;
        }

        let chunks = chunk_round_robin(&runnable, max_workers);
        let tier_results: Mutex<Vec<(String, RunStatus)>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for chunk in &chunks {
                if chunk.is_empty() {
                    continue;
                }
                let tier_results = &tier_results;
                scope.spawn(move || {
                    for name in chunk {
                        let model = by_name.get(name).expect("present");
                        let status = run_one_model_with_factory(model, upstream_hashes, force, factory);
                        let mut guard = tier_results.lock().unwrap_or_else(|e| e.into_inner());
                        guard.push((name.clone(), status));
                    }
                });
            }
        });

        let tier_results = tier_results.into_inner().unwrap_or_else(|e| e.into_inner());
        for (name, status) in tier_results {
            if matches!(status, RunStatus::Error | RunStatus::AssertionFailed) {
                failed.insert(name.clone());
            }
            results.insert(name, status);
        }
    }

    Ok(results)
}

fn chunk_round_robin(items: &[String], worker_count: usize) -> Vec<Vec<String>> {
    let worker_count = worker_count.max(1);
    let mut chunks: Vec<Vec<String>> = (0..worker_count).map(|_| Vec::new()).collect();
    for (i, item) in items.iter().enumerate() {
        chunks[i % worker_count].push(item.clone());
    }
    chunks
}

fn run_one_model_with_factory(
    model: &SQLModel,
    upstream_hashes: &HashMap<String, String>,
    force: bool,
    factory: &WarehouseFactory,
) -> RunStatus {
    match factory() {
        Ok(warehouse) => run_one_model(warehouse.as_ref(), model, upstream_hashes, force),
        Err(e) => {
            warn!(model = %model.full_name(), error = %e, "failed to open worker warehouse handle");
            RunStatus::Error
        }
    }
}

/// Executes a single model end to end: change detection, materialization,
/// state/run-log persistence, assertions, and profiling. Never propagates a
/// warehouse error — failures are captured as `RunStatus::Error` so one
/// model failing never unwinds the whole run (spec §4.7/§7).
fn run_one_model(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
    upstream_hashes: &HashMap<String, String>,
    force: bool,
) -> RunStatus {
    let full_name = model.full_name();
    let upstream_hash = upstream_hashes.get(&full_name).map(String::as_str).unwrap_or("");

    let changed = if force {
        true
    } else {
        match has_changed(warehouse, model, upstream_hash) {
            Ok(c) => c,
            Err(e) => {
                warn!(model = %full_name, error = %e, "failed to check change state, treating as changed");
                true
            }
        }
    };

    if !changed {
        return RunStatus::Skipped;
    }

    match execute_model(warehouse, model) {
        Ok(outcome) => {
            if let Err(e) = update_state(warehouse, model, upstream_hash, outcome.duration_ms, outcome.row_count) {
                warn!(model = %full_name, error = %e, "failed to update model_state");
            }
            if let Err(e) = log_run(
                warehouse,
                RunType::Transform,
                &full_name,
                RunStatus::Built,
                outcome.duration_ms,
                outcome.row_count,
                None,
            ) {
                warn!(model = %full_name, error = %e, "failed to write run_log entry");
            }

            if !model.assertions.is_empty() {
                let assertion_results = run_assertions(warehouse, model);
                if let Err(e) = save_assertions(warehouse, model, &assertion_results) {
                    warn!(model = %full_name, error = %e, "failed to persist assertion results");
                }
                if assertion_results.iter().any(|a| !a.passed) {
                    return RunStatus::AssertionFailed;
                }
            }

            if matches!(model.materialized, MaterializationType::Table | MaterializationType::Incremental) {
                match profile_model(warehouse, model) {
                    Ok(profile) => {
                        let alerts = high_null_columns(&profile);
                        if !alerts.is_empty() {
                            warn!(model = %full_name, ?alerts, "high-null columns detected");
                        }
                        if let Err(e) = save_profile(warehouse, &profile) {
                            warn!(model = %full_name, error = %e, "failed to persist profile");
                        }
                    }
                    Err(e) => warn!(model = %full_name, error = %e, "failed to profile model"),
                }
            }

            RunStatus::Built
        }
        Err(e) => {
            if let Err(log_err) = log_run(
                warehouse,
                RunType::Transform,
                &full_name,
                RunStatus::Error,
                0,
                0,
                Some(e.to_string()),
            ) {
                warn!(model = %full_name, error = %log_err, "failed to write run_log error entry");
            }
            RunStatus::Error
        }
    }
}

fn update_state(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
    upstream_hash: &str,
    duration_ms: i64,
    row_count: i64,
) -> Result<(), InfrastructureError> {
    let materialized = match model.materialized {
        MaterializationType::View => "view",
        MaterializationType::Table => "table",
        MaterializationType::Incremental => "incremental",
    };
    warehouse.execute(&format!(
        "INSERT OR REPLACE INTO _dp_internal.model_state \
         (model_path, content_hash, upstream_hash, materialized_as, last_run_at, run_duration_ms, row_count) \
         VALUES ('{}', '{}', '{}', '{materialized}', current_timestamp, {duration_ms}, {row_count})",
        model.full_name().replace('\'', "''"),
        model.content_hash.replace('\'', "''"),
        upstream_hash.replace('\'', "''"),
    ))?;
    Ok(())
}

fn log_run(
    warehouse: &dyn Warehouse,
    run_type: RunType,
    target: &str,
    status: RunStatus,
    duration_ms: i64,
    rows_affected: i64,
    error: Option<String>,
) -> Result<(), InfrastructureError> {
    let run_id = generate_run_id();
    let run_type_str = match run_type {
        RunType::Seed => "seed",
        RunType::Ingest => "ingest",
        RunType::Transform => "transform",
        RunType::Export => "export",
        RunType::Import => "import",
        RunType::Script => "script",
    };
    let error_sql = match &error {
        Some(e) => format!("'{}'", e.replace('\'', "''")),
        None => "NULL".to_string(),
    };
    warehouse.execute(&format!(
        "INSERT INTO _dp_internal.run_log \
         (run_id, run_type, target, status, started_at, duration_ms, rows_affected, error, log_output) \
         VALUES ('{run_id}', '{run_type_str}', '{}', '{}', current_timestamp, {duration_ms}, {rows_affected}, {error_sql}, NULL)",
        target.replace('\'', "''"),
        status.as_log_status(),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::DuckDbWarehouse;
    use std::fs;

    fn write_model(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write sql file");
    }

    #[test]
    fn sequential_run_builds_dependency_chain_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(dir.path(), "bronze/e.sql", "SELECT 1 AS id");
        write_model(dir.path(), "silver/d.sql", "SELECT * FROM bronze.e");

        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        let results = run_transform(&warehouse, dir.path(), None, false, false, 4, None).expect("run");

        assert_eq!(results.get("bronze.e"), Some(&RunStatus::Built));
        assert_eq!(results.get("silver.d"), Some(&RunStatus::Built));
    }

    #[test]
    fn second_run_without_changes_skips_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(dir.path(), "bronze/e.sql", "SELECT 1 AS id");

        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        run_transform(&warehouse, dir.path(), None, false, false, 4, None).expect("first run");
        let results = run_transform(&warehouse, dir.path(), None, false, false, 4, None).expect("second run");

        assert_eq!(results.get("bronze.e"), Some(&RunStatus::Skipped));
    }

    #[test]
    fn assertion_failure_does_not_block_downstream() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(
            dir.path(),
            "bronze/a.sql",
            "-- config: materialized=table\n-- assert: row_count > 100\nSELECT * FROM (VALUES (1), (2), (3)) AS t(id)",
        );
        write_model(dir.path(), "silver/b.sql", "SELECT * FROM bronze.a");

        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        let results = run_transform(&warehouse, dir.path(), None, false, false, 4, None).expect("run");

        assert_eq!(results.get("bronze.a"), Some(&RunStatus::AssertionFailed));
        assert_eq!(results.get("silver.b"), Some(&RunStatus::Built));
        assert!(warehouse.table_exists("bronze", "a").expect("table_exists"));
    }

    #[test]
    fn execution_error_skips_transitive_downstream() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(dir.path(), "bronze/a.sql", "-- config: materialized=table\nSELECT * FROM does_not_exist_anywhere");
        write_model(dir.path(), "silver/b.sql", "SELECT * FROM bronze.a");
        write_model(dir.path(), "gold/c.sql", "SELECT * FROM silver.b");
        write_model(dir.path(), "bronze/unrelated.sql", "SELECT 1 AS id");

        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        let results = run_transform(&warehouse, dir.path(), None, false, false, 4, None).expect("run");

        assert_eq!(results.get("bronze.a"), Some(&RunStatus::Error));
        assert_eq!(results.get("silver.b"), Some(&RunStatus::Skipped));
        assert_eq!(results.get("gold.c"), Some(&RunStatus::Skipped));
        assert_eq!(results.get("bronze.unrelated"), Some(&RunStatus::Built));
    }

    #[test]
    fn parallel_run_with_factory_materializes_independent_branches() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(dir.path(), "bronze/a.sql", "SELECT 1 AS id");
        write_model(dir.path(), "bronze/b.sql", "SELECT 2 AS id");

        let db_path = dir.path().join("warehouse.duckdb");
        let db_path_str = db_path.to_string_lossy().into_owned();

        let warehouse = DuckDbWarehouse::open(&db_path_str).expect("open primary");
        let factory_path = db_path_str.clone();
        let factory = move || -> Result<Box<dyn Warehouse>, InfrastructureError> {
            Ok(Box::new(DuckDbWarehouse::open(&factory_path)?))
        };

        let results = run_transform(&warehouse, dir.path(), None, false, true, 2, Some(&factory)).expect("run");
        assert_eq!(results.get("bronze.a"), Some(&RunStatus::Built));
        assert_eq!(results.get("bronze.b"), Some(&RunStatus::Built));
    }

    #[test]
    fn parallel_without_factory_falls_back_to_sequential() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(dir.path(), "bronze/e.sql", "SELECT 1 AS id");

        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        let results = run_transform(&warehouse, dir.path(), None, false, true, 4, None).expect("run");
        assert_eq!(results.get("bronze.e"), Some(&RunStatus::Built));
    }

    #[test]
    fn duplicate_full_names_abort_the_run_before_any_execution() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Two files land on the same schema.name: folder-derived schema
        // "bronze" for both, explicit override making the second collide.
        write_model(dir.path(), "bronze/e.sql", "SELECT 1 AS id");
        write_model(dir.path(), "other/e.sql", "-- config: schema=bronze\nSELECT 2 AS id");

        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        let result = run_transform(&warehouse, dir.path(), None, false, false, 4, None);

        assert!(result.is_err());
        assert!(!warehouse.table_exists("bronze", "e").expect("table_exists"));
    }

    #[test]
    fn force_rebuilds_even_when_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(dir.path(), "bronze/e.sql", "SELECT 1 AS id");

        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        run_transform(&warehouse, dir.path(), None, false, false, 4, None).expect("first run");
        let results = run_transform(&warehouse, dir.path(), None, true, false, 4, None).expect("forced run");

        assert_eq!(results.get("bronze.e"), Some(&RunStatus::Built));
    }
}
