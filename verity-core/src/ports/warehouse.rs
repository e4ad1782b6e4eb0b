// verity-core/src/ports/warehouse.rs
//
// The warehouse handle port (spec §4.1): an opaque SQL execution context.
// Synchronous by design — spec §5 requires real OS-thread parallelism, each
// worker owning its own independent handle to the same database file, which
// rules out sharing one handle (or one async runtime) across threads.

use crate::infrastructure::error::InfrastructureError;

/// A single scalar cell value coming back from, or going into, the
/// warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) => Some(*f as i64),
            CellValue::Bool(b) => Some(if *b { 1 } else { 0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(f) => Some(*f),
            CellValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<ColumnSchema>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryResult {
    pub fn first_scalar_i64(&self) -> Option<i64> {
        self.rows.first()?.first()?.as_i64()
    }

    pub fn first_scalar_bool(&self) -> Option<bool> {
        self.rows.first()?.first()?.as_bool()
    }
}

/// Opaque connection to the embedded columnar SQL engine. Implementations
/// own exactly one underlying connection; callers that need parallelism
/// open one `Warehouse` per worker rather than sharing a handle.
pub trait Warehouse: Send {
    /// Executes `sql`, returning whatever rows/columns it produces (empty
    /// for DDL/DML statements that return nothing).
    fn execute(&self, sql: &str) -> Result<QueryResult, InfrastructureError>;

    /// Closes the underlying connection. Idempotent.
    fn close(&self) -> Result<(), InfrastructureError>;

    /// Cooperative cancellation, callable from a different thread than the
    /// one currently blocked inside `execute`.
    fn interrupt(&self) -> Result<(), InfrastructureError>;

    /// Creates the `_dp_internal` schema and its four tables if they don't
    /// already exist. Silently does nothing when the handle is read-only.
    fn ensure_meta_table(&self) -> Result<(), InfrastructureError>;

    fn is_read_only(&self) -> bool;

    /// Convenience: run `sql` and return its first row's first column as
    /// `i64`. Used throughout for `count(*)`-shaped queries.
    fn execute_scalar_i64(&self, sql: &str) -> Result<i64, InfrastructureError> {
        let result = self.execute(sql)?;
        Ok(result.first_scalar_i64().unwrap_or(0))
    }

    /// Convenience: run `sql` and return its first row's first column as a
    /// bool, used by the generic assertion fallback.
    fn execute_scalar_bool(&self, sql: &str) -> Result<bool, InfrastructureError> {
        let result = self.execute(sql)?;
        Ok(result.first_scalar_bool().unwrap_or(false))
    }

    fn table_exists(&self, schema: &str, name: &str) -> Result<bool, InfrastructureError> {
        let sql = format!(
            "SELECT count(*) FROM information_schema.tables WHERE table_schema = '{schema}' AND table_name = '{name}'"
        );
        Ok(self.execute_scalar_i64(&sql)? > 0)
    }

    fn table_columns(&self, schema: &str, name: &str) -> Result<Vec<ColumnSchema>, InfrastructureError> {
        let sql = format!(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_schema = '{schema}' AND table_name = '{name}' ORDER BY ordinal_position"
        );
        let result = self.execute(&sql)?;
        Ok(result
            .rows
            .into_iter()
            .map(|row| ColumnSchema {
                name: row[0].as_str().unwrap_or_default().to_string(),
                data_type: row[1].as_str().unwrap_or_default().to_string(),
                is_nullable: row
                    .get(2)
                    .and_then(|c| c.as_str())
                    .map(|s| s.eq_ignore_ascii_case("YES"))
                    .unwrap_or(true),
            })
            .collect())
    }
}
