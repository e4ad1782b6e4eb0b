// verity-core/src/application/query.rs
//
// Read-only query helpers layered on top of the same data model and
// `_dp_internal` tables `run_transform` writes: ad-hoc SQL, impact analysis,
// and freshness monitoring (SPEC_FULL §12).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::instrument;

use crate::domain::model::SQLModel;
use crate::domain::sql::extract_column_lineage;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::warehouse::{QueryResult, Warehouse};

pub use crate::application::validation::{check_cycle, check_duplicates, check_missing_upstream, validate_models, IssueSeverity, ValidationIssue};

/// Thin pass-through to the warehouse handle, so callers (the CLI's `query`
/// command, future collaborators) don't need to reach into the warehouse
/// port directly.
#[instrument(skip(warehouse, sql), fields(sql_len = sql.len()))]
pub fn run_query(warehouse: &dyn Warehouse, sql: &str) -> Result<QueryResult, InfrastructureError> {
    warehouse.execute(sql)
}

/// Downstream impact of changing `target`: every model transitively
/// reachable by walking `depends_on` in reverse, plus the direct
/// model -> dependents adjacency used to render a chain. When `column` is
/// set, also traces which downstream output columns are derived from that
/// specific upstream column, via column-level lineage.
#[derive(Debug, Clone)]
pub struct ImpactReport {
    pub target: String,
    pub downstream_models: Vec<String>,
    pub impact_chain: BTreeMap<String, Vec<String>>,
    pub column: Option<String>,
    /// `(downstream full_name, output column)` pairs whose value traces back
    /// to `target.column`. Only populated when `column` is `Some`.
    pub affected_columns: Vec<(String, String)>,
}

/// Reverse-DAG BFS from `target` over the in-memory model list — no
/// warehouse access needed, so this is usable from `verity validate`-style
/// commands that haven't opened a connection. `column` narrows the report to
/// column-level lineage, grounded in `analysis.py::impact_analysis`'s
/// optional `column` parameter.
pub fn impact_analysis(models: &[SQLModel], target: &str, column: Option<&str>) -> ImpactReport {
    let target = target.to_lowercase();

    let mut reverse_deps: HashMap<String, Vec<String>> = HashMap::new();
    for model in models {
        for dep in &model.depends_on {
            reverse_deps.entry(dep.to_lowercase()).or_default().push(model.full_name());
        }
    }

    let mut downstream = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(target.clone());

    while let Some(current) = queue.pop_front() {
        if let Some(children) = reverse_deps.get(&current) {
            for child in children {
                if visited.insert(child.clone()) {
                    downstream.push(child.clone());
                    queue.push_back(child.clone());
                }
            }
        }
    }

    let mut impact_chain: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut chain_visited: HashSet<String> = HashSet::new();
    let mut chain_queue: VecDeque<String> = VecDeque::new();
    chain_queue.push_back(target.clone());

    while let Some(current) = chain_queue.pop_front() {
        if !chain_visited.insert(current.clone()) {
            continue;
        }
        if let Some(children) = reverse_deps.get(&current) {
            if !children.is_empty() {
                impact_chain.insert(current.clone(), children.clone());
                chain_queue.extend(children.iter().cloned());
            }
        }
    }

    let affected_columns = match column {
        Some(col) => trace_column_impact(models, &target, col, &downstream),
        None => Vec::new(),
    };

    ImpactReport {
        target,
        downstream_models: downstream,
        impact_chain,
        column: column.map(str::to_lowercase),
        affected_columns,
    }
}

/// For each downstream model, runs column-lineage extraction on its own
/// query and keeps every output column whose lineage traces back to
/// `(target, column)`. No warehouse handle is threaded through — `SELECT *`
/// expansion (which needs an upstream column catalog) simply yields no
/// match for that projection, the same degraded-but-safe behavior the
/// Python source falls back to when `source_columns` wasn't supplied.
fn trace_column_impact(
    models: &[SQLModel],
    target: &str,
    column: &str,
    downstream: &[String],
) -> Vec<(String, String)> {
    let column = column.to_lowercase();
    let by_name: HashMap<String, &SQLModel> = models.iter().map(|m| (m.full_name(), m)).collect();

    let mut affected = Vec::new();
    for ds_name in downstream {
        let Some(ds_model) = by_name.get(ds_name) else {
            continue;
        };
        let lineage = extract_column_lineage(&ds_model.query, &ds_model.depends_on, None);
        for (out_col, sources) in &lineage {
            let traces_back = sources
                .iter()
                .any(|src| src.source_table == target && src.source_column == column);
            if traces_back {
                affected.push((ds_name.clone(), out_col.clone()));
            }
        }
    }
    affected
}

/// One model's staleness relative to `max_age_hours`.
#[derive(Debug, Clone)]
pub struct FreshnessReport {
    pub model: String,
    pub last_run_at: Option<String>,
    pub hours_since_run: Option<f64>,
    pub is_stale: bool,
    pub row_count: i64,
}

/// Reports every model with a recorded `model_state` row, oldest first,
/// flagging anything older than `max_age_hours`. Unlike the original
/// source, a query failure here propagates as an `InfrastructureError`
/// rather than being swallowed into an empty list — every other warehouse
/// operation in this engine surfaces its errors the same way, and silently
/// returning "no stale models" on a broken connection would be misleading.
#[instrument(skip(warehouse))]
pub fn check_freshness(
    warehouse: &dyn Warehouse,
    max_age_hours: f64,
) -> Result<Vec<FreshnessReport>, InfrastructureError> {
    let result = warehouse.execute(
        "SELECT model_path, last_run_at, row_count, \
                EXTRACT(EPOCH FROM (current_timestamp - last_run_at)) / 3600.0 AS hours_since \
         FROM _dp_internal.model_state \
         ORDER BY last_run_at ASC",
    )?;

    Ok(result
        .rows
        .into_iter()
        .map(|row| {
            let model = row[0].as_str().unwrap_or_default().to_string();
            let last_run_at = row[1].as_str().map(str::to_string);
            let row_count = row[2].as_i64().unwrap_or(0);
            let hours_since_run = row[3].as_f64().map(|h| (h * 10.0).round() / 10.0);
            let is_stale = hours_since_run.map(|h| h > max_age_hours).unwrap_or(false);

            FreshnessReport {
                model,
                last_run_at,
                hours_since_run,
                is_stale,
                row_count,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MaterializationType;
    use crate::infrastructure::adapters::DuckDbWarehouse;
    use std::collections::BTreeMap as BMap;

    fn model(schema: &str, name: &str, depends_on: &[&str]) -> SQLModel {
        SQLModel {
            path: format!("transform/{schema}/{name}.sql"),
            schema: schema.into(),
            name: name.into(),
            sql: String::new(),
            query: String::new(),
            materialized: MaterializationType::Table,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            description: None,
            column_docs: BMap::new(),
            assertions: vec![],
            unique_key: None,
            incremental_strategy: None,
            incremental_filter: None,
            partition_by: None,
            content_hash: String::new(),
            upstream_hash: String::new(),
        }
    }

    #[test]
    fn run_query_passes_through_to_the_warehouse() {
        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        let result = run_query(&warehouse, "SELECT 1 + 1").expect("query");
        assert_eq!(result.first_scalar_i64(), Some(2));
    }

    #[test]
    fn impact_analysis_finds_transitive_downstream_models() {
        let models = vec![
            model("bronze", "e", &[]),
            model("silver", "d", &["bronze.e"]),
            model("gold", "c", &["silver.d"]),
        ];

        let report = impact_analysis(&models, "bronze.e", None);
        assert_eq!(report.downstream_models, vec!["silver.d", "gold.c"]);
        assert_eq!(report.impact_chain.get("bronze.e"), Some(&vec!["silver.d".to_string()]));
        assert_eq!(report.impact_chain.get("silver.d"), Some(&vec!["gold.c".to_string()]));
        assert!(report.column.is_none());
        assert!(report.affected_columns.is_empty());
    }

    #[test]
    fn impact_analysis_on_a_leaf_model_has_no_downstream() {
        let models = vec![model("bronze", "e", &[]), model("silver", "d", &["bronze.e"])];
        let report = impact_analysis(&models, "silver.d", None);
        assert!(report.downstream_models.is_empty());
        assert!(report.impact_chain.is_empty());
    }

    #[test]
    fn impact_analysis_with_column_traces_lineage_through_downstream_queries() {
        let mut bronze_e = model("bronze", "e", &[]);
        bronze_e.query = "SELECT 1 AS id, 'x' AS label".to_string();

        let mut silver_d = model("silver", "d", &["bronze.e"]);
        silver_d.query = "SELECT e.id AS customer_id, e.label FROM bronze.e AS e".to_string();

        let mut gold_c = model("gold", "c", &["silver.d"]);
        gold_c.query = "SELECT d.customer_id AS cust_id FROM silver.d AS d".to_string();

        let models = vec![bronze_e, silver_d, gold_c];

        let report = impact_analysis(&models, "bronze.e", Some("id"));
        assert_eq!(report.column.as_deref(), Some("id"));
        assert!(
            report
                .affected_columns
                .contains(&("silver.d".to_string(), "customer_id".to_string())),
            "expected silver.d.customer_id in {:?}",
            report.affected_columns
        );
        assert!(
            !report
                .affected_columns
                .iter()
                .any(|(m, c)| m == "silver.d" && c == "label"),
            "label does not derive from bronze.e.id: {:?}",
            report.affected_columns
        );
    }

    #[test]
    fn check_freshness_flags_models_older_than_max_age() {
        let warehouse = DuckDbWarehouse::open(":memory:").expect("open");
        warehouse.ensure_meta_table().expect("ensure meta");
        warehouse
            .execute(
                "INSERT INTO _dp_internal.model_state \
                 (model_path, content_hash, upstream_hash, materialized_as, last_run_at, run_duration_ms, row_count) \
                 VALUES ('bronze.stale', 'h', '', 'table', TIMESTAMP '2000-01-01 00:00:00', 10, 5), \
                        ('bronze.fresh', 'h', '', 'table', current_timestamp, 10, 9)",
            )
            .expect("seed state");

        let reports = check_freshness(&warehouse, 1.0).expect("check_freshness");
        assert_eq!(reports.len(), 2);

        let stale = reports.iter().find(|r| r.model == "bronze.stale").expect("stale present");
        assert!(stale.is_stale);
        assert_eq!(stale.row_count, 5);
        assert_eq!(stale.last_run_at.as_deref(), Some("2000-01-01 00:00:00.000000"));

        let fresh = reports.iter().find(|r| r.model == "bronze.fresh").expect("fresh present");
        assert!(!fresh.is_stale);
    }
}
