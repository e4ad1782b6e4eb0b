// verity-core/src/application/change_detection.rs
//
// Upstream hashing and change detection (spec §4.5).

use std::collections::HashMap;
use tracing::instrument;

use crate::domain::hash::combine_upstream_hash;
use crate::domain::model::SQLModel;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::warehouse::Warehouse;

/// Computes `upstream_hash` for every model in `models`, keyed by
/// `full_name`. External refs never contribute — a seed changing does not,
/// by this mechanism, trigger a downstream rebuild.
pub fn compute_upstream_hashes(models: &[SQLModel]) -> HashMap<String, String> {
    let by_name: HashMap<String, &SQLModel> =
        models.iter().map(|m| (m.full_name(), m)).collect();

    models
        .iter()
        .map(|m| {
            let hashes = m
                .depends_on
                .iter()
                .filter_map(|dep| by_name.get(dep))
                .map(|dep| dep.content_hash.clone());
            (m.full_name(), combine_upstream_hash(hashes))
        })
        .collect()
}

/// `has_changed(m)` per spec §4.5: true if no stored `ModelState` row exists,
/// or if either hash differs from what's stored.
#[instrument(skip(warehouse, model), fields(model = %model.full_name()))]
pub fn has_changed(
    warehouse: &dyn Warehouse,
    model: &SQLModel,
    upstream_hash: &str,
) -> Result<bool, InfrastructureError> {
    let sql = format!(
        "SELECT content_hash, upstream_hash FROM _dp_internal.model_state WHERE model_path = '{}'",
        model.full_name().replace('\'', "''")
    );
    let result = warehouse.execute(&sql)?;

    let Some(row) = result.rows.first() else {
        return Ok(true);
    };

    let stored_content_hash = row.first().and_then(|c| c.as_str()).unwrap_or_default();
    let stored_upstream_hash = row.get(1).and_then(|c| c.as_str()).unwrap_or_default();

    Ok(stored_content_hash != model.content_hash || stored_upstream_hash != upstream_hash)
}
