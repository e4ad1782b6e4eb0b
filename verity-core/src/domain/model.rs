// verity-core/src/domain/model.rs
//
// Central data model: SQLModel and the persistent records it produces
// (ModelState, RunLog, AssertionResult, ModelProfile).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single discovered `.sql` file, fully parsed. Immutable after discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SQLModel {
    pub path: String,
    pub schema: String,
    pub name: String,
    pub sql: String,
    pub query: String,
    pub materialized: MaterializationType,
    pub depends_on: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub column_docs: BTreeMap<String, String>,
    #[serde(default)]
    pub assertions: Vec<String>,

    // Incremental-only.
    pub unique_key: Option<String>,
    pub incremental_strategy: Option<IncrementalStrategy>,
    pub incremental_filter: Option<String>,
    pub partition_by: Option<String>,

    pub content_hash: String,
    pub upstream_hash: String,
}

impl SQLModel {
    /// `schema.name`, lowercase — the DAG node identity.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name).to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationType {
    View,
    Table,
    Incremental,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalStrategy {
    Append,
    #[serde(rename = "delete+insert")]
    DeleteInsert,
    Merge,
}

impl std::str::FromStr for IncrementalStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "delete+insert" => Ok(Self::DeleteInsert),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown incremental_strategy '{other}'")),
        }
    }
}

/// Persistent, keyed by `full_name`. Updated only on successful execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub content_hash: String,
    pub upstream_hash: String,
    pub materialized_as: MaterializationType,
    pub last_run_at: chrono::DateTime<chrono::Utc>,
    pub run_duration_ms: i64,
    pub row_count: i64,
}

/// Append-only run-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub run_type: RunType,
    pub target: String,
    pub status: RunStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: i64,
    pub rows_affected: i64,
    pub error: Option<String>,
    pub log_output: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Seed,
    Ingest,
    Transform,
    Export,
    Import,
    Script,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Built,
    Skipped,
    Error,
    AssertionFailed,
}

impl RunStatus {
    /// Maps directly onto spec §3's `status` domain for run_log rows
    /// (`success | error | assertion_failed | skipped`); `built` is recorded
    /// in run_log as `success`.
    pub fn as_log_status(&self) -> &'static str {
        match self {
            RunStatus::Built => "success",
            RunStatus::Skipped => "skipped",
            RunStatus::Error => "error",
            RunStatus::AssertionFailed => "assertion_failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Built => "built",
            RunStatus::Skipped => "skipped",
            RunStatus::Error => "error",
            RunStatus::AssertionFailed => "assertion_failed",
        };
        write!(f, "{s}")
    }
}

/// Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResult {
    pub model_path: String,
    pub expression: String,
    pub passed: bool,
    pub detail: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Keyed by `model_path`; upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model_path: String,
    pub row_count: i64,
    pub column_count: i32,
    pub null_percentages: BTreeMap<String, f64>,
    pub distinct_counts: BTreeMap<String, i64>,
    pub profiled_at: chrono::DateTime<chrono::Utc>,
}
