// verity-core/src/infrastructure/discovery.rs
//
// Walks a transform directory and turns each `.sql` file into a `SQLModel`
// (spec §4.3). Schema defaults to the file's immediate parent directory
// name; name defaults to the file stem.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::domain::hash::content_hash;
use crate::domain::identifier::validate_identifier;
use crate::domain::model::{IncrementalStrategy, MaterializationType, SQLModel};
use crate::domain::sql::{extract_table_refs, parse_metadata};
use crate::domain::DomainError;
use crate::infrastructure::error::InfrastructureError;

#[instrument(skip(transform_root))]
pub fn discover_models(transform_root: &Path) -> Result<Vec<SQLModel>, InfrastructureError> {
    let mut models = Vec::new();

    if !transform_root.exists() {
        warn!(path = ?transform_root, "transform root does not exist, no models discovered");
        return Ok(models);
    }

    let mut sql_files: Vec<_> = WalkDir::new(transform_root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("sql")
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();
    sql_files.sort();

    for sql_file in sql_files {
        models.push(parse_model_file(transform_root, &sql_file)?);
    }

    info!(count = models.len(), "discovered models");
    Ok(models)
}

fn parse_model_file(transform_root: &Path, sql_file: &Path) -> Result<SQLModel, InfrastructureError> {
    let sql = fs::read_to_string(sql_file)?;
    let metadata = parse_metadata(&sql);

    let rel = sql_file
        .strip_prefix(transform_root)
        .unwrap_or(sql_file);
    let folder_schema = rel
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("public");

    let schema = metadata
        .config
        .get("schema")
        .cloned()
        .unwrap_or_else(|| folder_schema.to_string());
    let name = sql_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    validate_identifier(&schema).map_err(|e| domain_to_infra(e, sql_file))?;
    validate_identifier(&name).map_err(|e| domain_to_infra(e, sql_file))?;

    let query = crate::domain::sql::strip_config_comments(&sql);
    let own_full_name = format!("{schema}.{name}");

    let depends_on = if !metadata.depends_on.is_empty() {
        metadata.depends_on.clone()
    } else {
        extract_table_refs(&query, Some(&own_full_name))
    };

    let materialized = match metadata.config.get("materialized").map(String::as_str) {
        Some("table") => MaterializationType::Table,
        Some("incremental") => MaterializationType::Incremental,
        _ => MaterializationType::View,
    };

    let incremental_strategy = metadata
        .config
        .get("incremental_strategy")
        .and_then(|s| s.parse::<IncrementalStrategy>().ok());

    let mut column_docs = BTreeMap::new();
    column_docs.extend(metadata.column_docs.clone());

    Ok(SQLModel {
        path: sql_file.to_string_lossy().into_owned(),
        schema,
        name,
        sql: sql.clone(),
        query: query.clone(),
        materialized,
        depends_on,
        description: metadata.description.clone(),
        column_docs,
        assertions: metadata.assertions.clone(),
        unique_key: metadata.config.get("unique_key").cloned(),
        incremental_strategy,
        incremental_filter: metadata.config.get("incremental_filter").cloned(),
        partition_by: metadata.config.get("partition_by").cloned(),
        content_hash: content_hash(&query),
        upstream_hash: String::new(),
    })
}

fn domain_to_infra(err: DomainError, sql_file: &Path) -> InfrastructureError {
    InfrastructureError::ConfigError(format!("{sql_file:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write sql file");
    }

    #[test]
    fn schema_defaults_to_parent_folder_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "bronze/customers.sql", "SELECT 1 AS id");

        let models = discover_models(dir.path()).expect("discover");
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].schema, "bronze");
        assert_eq!(models[0].name, "customers");
    }

    #[test]
    fn config_comment_overrides_folder_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "bronze/customers.sql",
            "-- config: schema=silver, materialized=table\nSELECT 1 AS id",
        );

        let models = discover_models(dir.path()).expect("discover");
        assert_eq!(models[0].schema, "silver");
        assert_eq!(models[0].materialized, MaterializationType::Table);
    }

    #[test]
    fn explicit_depends_on_overrides_ast_extraction() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "gold/report.sql",
            "-- depends_on: bronze.customers\nSELECT * FROM silver.orders",
        );

        let models = discover_models(dir.path()).expect("discover");
        assert_eq!(models[0].depends_on, vec!["bronze.customers".to_string()]);
    }

    #[test]
    fn invalid_identifier_aborts_discovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "bronze/9bad.sql",
            "SELECT 1",
        );

        let result = discover_models(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn missing_transform_root_returns_empty_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("does-not-exist");
        let models = discover_models(&missing).expect("discover on missing root");
        assert!(models.is_empty());
    }
}
