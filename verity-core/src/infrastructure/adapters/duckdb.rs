// verity-core/src/infrastructure/adapters/duckdb.rs

use duckdb::types::{TimeUnit, Value};
use duckdb::{Config, Connection};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

use crate::infrastructure::error::InfrastructureError;
use crate::ports::warehouse::{CellValue, ColumnSchema, QueryResult, Warehouse};

/// A handle to an embedded DuckDB warehouse file (or an in-memory instance
/// for tests). Each `DuckDbWarehouse` owns exactly one `Connection` — the
/// caller is responsible for opening one handle per worker thread when
/// running tiers in parallel, since DuckDB connections are not meant to be
/// shared across threads for concurrent writes.
pub struct DuckDbWarehouse {
    conn: Arc<Mutex<Connection>>,
    read_only: bool,
}

impl DuckDbWarehouse {
    pub fn open(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default();
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(db_path, config)?
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            read_only: false,
        })
    }

    pub fn open_read_only(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default().access_mode(duckdb::AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            read_only: true,
        })
    }

    fn poisoned() -> InfrastructureError {
        InfrastructureError::Io(std::io::Error::other("DuckDB connection mutex poisoned"))
    }
}

fn value_to_cell(value: Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Boolean(b) => CellValue::Bool(b),
        Value::TinyInt(i) => CellValue::Int(i as i64),
        Value::SmallInt(i) => CellValue::Int(i as i64),
        Value::Int(i) => CellValue::Int(i as i64),
        Value::BigInt(i) => CellValue::Int(i),
        Value::HugeInt(i) => CellValue::Int(i as i64),
        Value::UTinyInt(i) => CellValue::Int(i as i64),
        Value::USmallInt(i) => CellValue::Int(i as i64),
        Value::UInt(i) => CellValue::Int(i as i64),
        Value::UBigInt(i) => CellValue::Int(i as i64),
        Value::Float(f) => CellValue::Float(f as f64),
        Value::Double(f) => CellValue::Float(f),
        Value::Text(s) => CellValue::Text(s),
        Value::Decimal(d) => CellValue::Text(d.to_string()),
        Value::Timestamp(unit, ticks) => CellValue::Text(format_timestamp(unit, ticks)),
        Value::Date32(days) => CellValue::Text(format_date32(days)),
        Value::Time64(unit, ticks) => CellValue::Text(format_time64(unit, ticks)),
        other => CellValue::Text(format!("{other:?}")),
    }
}

fn ticks_to_micros(unit: TimeUnit, ticks: i64) -> i64 {
    match unit {
        TimeUnit::Second => ticks.saturating_mul(1_000_000),
        TimeUnit::Millisecond => ticks.saturating_mul(1_000),
        TimeUnit::Microsecond => ticks,
        TimeUnit::Nanosecond => ticks / 1_000,
    }
}

/// DuckDB's `TIMESTAMP` comes back as ticks in one of four units since the
/// Unix epoch; render it as a readable `YYYY-MM-DD HH:MM:SS.ffffff` instead
/// of the `Debug` tuple (`Timestamp(Microsecond, 1769...)`) that fell out of
/// the catch-all arm — `model_state.last_run_at` round-trips through here on
/// every `check_freshness` call.
fn format_timestamp(unit: TimeUnit, ticks: i64) -> String {
    let micros = ticks_to_micros(unit, ticks);
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn format_date32(days: i32) -> String {
    chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn format_time64(unit: TimeUnit, ticks: i64) -> String {
    let micros = ticks_to_micros(unit, ticks);
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs.rem_euclid(86_400) as u32, nanos)
        .map(|t| t.format("%H:%M:%S%.6f").to_string())
        .unwrap_or_else(|| micros.to_string())
}

impl Warehouse for DuckDbWarehouse {
    #[instrument(skip(self, sql), fields(sql_len = sql.len()))]
    fn execute(&self, sql: &str) -> Result<QueryResult, InfrastructureError> {
        let conn = self.conn.lock().map_err(|_| Self::poisoned())?;
        let mut stmt = conn.prepare(sql)?;

        let column_count = stmt.column_count();
        let columns: Vec<ColumnSchema> = (0..column_count)
            .map(|i| ColumnSchema {
                name: stmt.column_name(i).map(str::to_string).unwrap_or_default(),
                data_type: stmt.column_type(i).to_string(),
                is_nullable: true,
            })
            .collect();

        let mut rows_out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: Value = row.get(i)?;
                cells.push(value_to_cell(value));
            }
            rows_out.push(cells);
        }

        debug!(rows = rows_out.len(), "query executed");
        Ok(QueryResult {
            columns,
            rows: rows_out,
        })
    }

    fn close(&self) -> Result<(), InfrastructureError> {
        // The underlying connection closes on `Drop`; nothing to flush
        // eagerly since every statement is prepared-and-finished per call.
        Ok(())
    }

    fn interrupt(&self) -> Result<(), InfrastructureError> {
        let conn = self.conn.lock().map_err(|_| Self::poisoned())?;
        conn.interrupt();
        Ok(())
    }

    #[instrument(skip(self))]
    fn ensure_meta_table(&self) -> Result<(), InfrastructureError> {
        if self.read_only {
            debug!("read-only handle, skipping _dp_internal bootstrap");
            return Ok(());
        }

        self.execute("CREATE SCHEMA IF NOT EXISTS _dp_internal")?;

        self.execute(
            "CREATE TABLE IF NOT EXISTS _dp_internal.model_state (
                model_path VARCHAR PRIMARY KEY,
                content_hash VARCHAR,
                upstream_hash VARCHAR,
                materialized_as VARCHAR,
                last_run_at TIMESTAMP,
                run_duration_ms BIGINT,
                row_count BIGINT
            )",
        )?;

        self.execute(
            "CREATE TABLE IF NOT EXISTS _dp_internal.run_log (
                run_id VARCHAR PRIMARY KEY,
                run_type VARCHAR,
                target VARCHAR,
                status VARCHAR,
                started_at TIMESTAMP,
                duration_ms BIGINT,
                rows_affected BIGINT,
                error VARCHAR,
                log_output VARCHAR
            )",
        )?;

        self.execute(
            "CREATE TABLE IF NOT EXISTS _dp_internal.assertion_results (
                model_path VARCHAR,
                expression VARCHAR,
                passed BOOLEAN,
                detail VARCHAR,
                checked_at TIMESTAMP
            )",
        )?;

        self.execute(
            "CREATE TABLE IF NOT EXISTS _dp_internal.model_profiles (
                model_path VARCHAR PRIMARY KEY,
                row_count BIGINT,
                column_count INTEGER,
                null_percentages JSON,
                distinct_counts JSON,
                profiled_at TIMESTAMP
            )",
        )?;

        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn executes_ddl_and_dml_against_in_memory_instance() {
        let warehouse = DuckDbWarehouse::open(":memory:").expect("open in-memory warehouse");
        warehouse
            .execute("CREATE TABLE t (id INTEGER, name VARCHAR)")
            .expect("create table");
        warehouse
            .execute("INSERT INTO t VALUES (1, 'alice'), (2, 'bob')")
            .expect("insert rows");

        let result = warehouse.execute("SELECT count(*) FROM t").expect("select count");
        assert_eq!(result.first_scalar_i64(), Some(2));
    }

    #[test]
    fn ensure_meta_table_is_idempotent() {
        let warehouse = DuckDbWarehouse::open(":memory:").expect("open in-memory warehouse");
        warehouse.ensure_meta_table().expect("first ensure");
        warehouse.ensure_meta_table().expect("second ensure is a no-op");

        assert!(warehouse
            .table_exists("_dp_internal", "model_state")
            .expect("table_exists"));
        assert!(warehouse
            .table_exists("_dp_internal", "run_log")
            .expect("table_exists"));
        assert!(warehouse
            .table_exists("_dp_internal", "assertion_results")
            .expect("table_exists"));
        assert!(warehouse
            .table_exists("_dp_internal", "model_profiles")
            .expect("table_exists"));
    }

    #[test]
    fn invalid_sql_surfaces_as_infrastructure_error() {
        let warehouse = DuckDbWarehouse::open(":memory:").expect("open in-memory warehouse");
        let result = warehouse.execute("SELECT * FROM does_not_exist");
        assert!(result.is_err());
    }

    #[test]
    fn table_columns_reports_duckdb_types() {
        let warehouse = DuckDbWarehouse::open(":memory:").expect("open in-memory warehouse");
        warehouse
            .execute("CREATE TABLE typed (id INTEGER, label VARCHAR)")
            .expect("create table");

        let columns = warehouse
            .table_columns("main", "typed")
            .expect("table_columns");
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[1].name, "label");
    }

    #[test]
    fn timestamp_date_time_and_decimal_values_render_as_readable_text_not_debug_tuples() {
        let warehouse = DuckDbWarehouse::open(":memory:").expect("open in-memory warehouse");
        let result = warehouse
            .execute(
                "SELECT TIMESTAMP '2024-03-05 14:30:00', DATE '2024-03-05', \
                        TIME '14:30:00', 12.50::DECIMAL(10,2)",
            )
            .expect("select typed literals");

        let row = &result.rows[0];
        assert_eq!(row[0].as_str(), Some("2024-03-05 14:30:00.000000"));
        assert_eq!(row[1].as_str(), Some("2024-03-05"));
        assert_eq!(row[2].as_str(), Some("14:30:00.000000"));
        assert_eq!(row[3].as_str(), Some("12.50"));

        for cell in row {
            let text = cell.as_str().expect("rendered as text");
            assert!(!text.contains('('), "leaked a Debug tuple: {text}");
        }
    }
}
