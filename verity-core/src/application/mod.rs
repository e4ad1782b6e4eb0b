// verity-core/src/application/mod.rs
//
// Use-case orchestration layer: wires domain + infrastructure together into
// the operations `verity` (and anything embedding `verity-core`) calls.

pub mod assertions;
pub mod change_detection;
pub mod execution;
pub mod orchestrator;
pub mod profiler;
pub mod query;
pub mod validation;

// --- RE-EXPORTS (FACADE PATTERN) ---
// Lets callers write `use verity_core::application::{run_transform, validate_models};`
// without reaching into individual modules.

pub use assertions::{run_assertions, save_assertions};
pub use change_detection::{compute_upstream_hashes, has_changed};
pub use execution::{execute_model, ExecutionOutcome};
pub use orchestrator::{run_transform, WarehouseFactory};
pub use profiler::{high_null_columns, profile_model, save_profile};
pub use query::{check_freshness, impact_analysis, run_query, FreshnessReport, ImpactReport};
pub use validation::{check_cycle, check_duplicates, check_missing_upstream, validate_models, IssueSeverity, ValidationIssue};
