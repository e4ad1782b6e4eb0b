// verity-core/src/application/assertions.rs
//
// Inline data-quality assertions (spec §4.6).

use std::sync::LazyLock;

use regex::Regex;
use tracing::instrument;

use crate::domain::model::{AssertionResult, SQLModel};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::warehouse::Warehouse;

static ROW_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^row_count\s*(>=|<=|==|!=|>|<|=)\s*(\d+)$").expect("static regex is valid")
});
static NO_NULLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^no_nulls\((\w+)\)$").expect("static regex is valid"));
static UNIQUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^unique\((\w+)\)$").expect("static regex is valid"));
static ACCEPTED_VALUES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^accepted_values\((\w+),\s*\[(.+)\]\)$").expect("static regex is valid"));

/// Runs every assertion declared on `model` against its already-materialized
/// table. Never returns `Err` for a failing or malformed assertion — a bad
/// expression surfaces as a failed `AssertionResult`, not a propagated error,
/// so one broken assertion doesn't abort the others.
#[instrument(skip(warehouse, model), fields(model = %model.full_name()))]
pub fn run_assertions(warehouse: &dyn Warehouse, model: &SQLModel) -> Vec<AssertionResult> {
    model
        .assertions
        .iter()
        .map(|expr| evaluate_assertion(warehouse, model, expr))
        .collect()
}

fn evaluate_assertion(warehouse: &dyn Warehouse, model: &SQLModel, expr: &str) -> AssertionResult {
    match try_evaluate(warehouse, model, expr) {
        Ok(result) => result,
        Err(e) => result_of(expr, false, Some(format!("assertion error: {e}"))),
    }
}

fn try_evaluate(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
    expr: &str,
) -> Result<AssertionResult, InfrastructureError> {
    let table = model.full_name();
    let trimmed = expr.trim();

    if let Some(caps) = ROW_COUNT_RE.captures(trimmed) {
        let op = normalize_op(&caps[1]);
        let target: i64 = caps[2].parse().unwrap_or(0);
        let count = warehouse.execute_scalar_i64(&format!("SELECT count(*) FROM {table}"))?;
        let passed = warehouse.execute_scalar_bool(&format!("SELECT {count} {op} {target}"))?;
        return Ok(result_of(expr, passed, Some(format!("row_count={count}"))));
    }

    if let Some(caps) = NO_NULLS_RE.captures(trimmed) {
        let col = &caps[1];
        let null_count = warehouse
            .execute_scalar_i64(&format!("SELECT count(*) FROM {table} WHERE \"{col}\" IS NULL"))?;
        return Ok(result_of(expr, null_count == 0, Some(format!("null_count={null_count}"))));
    }

    if let Some(caps) = UNIQUE_RE.captures(trimmed) {
        let col = &caps[1];
        let dup_count = warehouse.execute_scalar_i64(&format!(
            "SELECT count(*) - count(DISTINCT \"{col}\") FROM {table}"
        ))?;
        return Ok(result_of(expr, dup_count == 0, Some(format!("duplicate_count={dup_count}"))));
    }

    if let Some(caps) = ACCEPTED_VALUES_RE.captures(trimmed) {
        let col = &caps[1];
        let values: Vec<String> = caps[2]
            .split(',')
            .map(|v| v.trim().trim_matches(['\'', '"']).replace('\'', "''"))
            .collect();
        let placeholders = values
            .iter()
            .map(|v| format!("'{v}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let bad_count = warehouse.execute_scalar_i64(&format!(
            "SELECT count(*) FROM {table} WHERE \"{col}\" IS NOT NULL AND \"{col}\"::VARCHAR NOT IN ({placeholders})"
        ))?;
        return Ok(result_of(expr, bad_count == 0, Some(format!("invalid_count={bad_count}"))));
    }

    // Generic boolean SQL fallback.
    let passed = warehouse.execute_scalar_bool(&format!(
        "SELECT CASE WHEN ({trimmed}) THEN true ELSE false END FROM {table} LIMIT 1"
    ))?;
    Ok(result_of(expr, passed, None))
}

fn normalize_op(op: &str) -> &str {
    if op == "==" {
        "="
    } else {
        op
    }
}

fn result_of(expression: &str, passed: bool, detail: Option<String>) -> AssertionResult {
    AssertionResult {
        model_path: String::new(),
        expression: expression.to_string(),
        passed,
        detail,
        checked_at: chrono::Utc::now(),
    }
}

/// Persists assertion results, filling in `model_path` at write time since
/// evaluation doesn't need it.
#[instrument(skip(warehouse, model, results), fields(model = %model.full_name(), n = results.len()))]
pub fn save_assertions(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
    results: &[AssertionResult],
) -> Result<(), InfrastructureError> {
    let full_name = model.full_name();
    for result in results {
        let expr = result.expression.replace('\'', "''");
        let detail = result
            .detail
            .as_deref()
            .map(|d| format!("'{}'", d.replace('\'', "''")))
            .unwrap_or_else(|| "NULL".to_string());
        warehouse.execute(&format!(
            "INSERT INTO _dp_internal.assertion_results \
             (model_path, expression, passed, detail, checked_at) \
             VALUES ('{full_name}', '{expr}', {}, {detail}, current_timestamp)",
            result.passed,
        ))?;
    }
    Ok(())
}
