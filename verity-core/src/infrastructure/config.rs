// verity-core/src/infrastructure/config.rs
//
// Project configuration loading (SPEC_FULL.md §11). Trimmed down from the
// teacher's `ProjectConfig`/satellite-config cascade to the fields the
// transform engine actually needs; same discovery-then-parse shape and
// environment-variable override convention.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::infrastructure::error::InfrastructureError;

fn default_transform_root() -> String {
    "transform".to_string()
}

fn default_target_path() -> String {
    "target/warehouse.duckdb".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_max_workers() -> usize {
    4
}

fn default_parallel() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project_name: String,

    #[serde(default = "default_transform_root")]
    pub transform_root: String,

    #[serde(default = "default_target_path")]
    pub target_path: String,

    #[serde(default = "default_schema")]
    pub default_schema: String,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_name: "verity_project".to_string(),
            transform_root: default_transform_root(),
            target_path: default_target_path(),
            default_schema: default_schema(),
            max_workers: default_max_workers(),
            parallel: default_parallel(),
        }
    }
}

const CONFIG_CANDIDATES: [&str; 2] = ["verity_project.yaml", "verity.yaml"];

#[instrument(skip(project_dir))]
pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig, InfrastructureError> {
    let config_path = find_main_config(project_dir)?;
    info!(path = ?config_path, "Loading project configuration");

    let content = fs::read_to_string(&config_path)?;
    let mut config: ProjectConfig = serde_yaml::from_str(&content)?;

    apply_env_overrides(&mut config);
    Ok(config)
}

fn find_main_config(root: &Path) -> Result<PathBuf, InfrastructureError> {
    for filename in CONFIG_CANDIDATES {
        let candidate = root.join(filename);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(InfrastructureError::ConfigNotFound(format!(
        "no configuration file found in {root:?}. checked: {CONFIG_CANDIDATES:?}"
    )))
}

fn apply_env_overrides(config: &mut ProjectConfig) {
    if let Ok(val) = std::env::var("VERITY_TARGET_PATH") {
        info!(old = ?config.target_path, new = ?val, "overriding target_path via env");
        config.target_path = val;
    }
    if let Ok(val) = std::env::var("VERITY_TRANSFORM_ROOT") {
        info!(old = ?config.transform_root, new = ?val, "overriding transform_root via env");
        config.transform_root = val;
    }
    if let Ok(val) = std::env::var("VERITY_MAX_WORKERS") {
        if let Ok(n) = val.parse::<usize>() {
            info!(old = config.max_workers, new = n, "overriding max_workers via env");
            config.max_workers = n;
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("verity_project.yaml"),
            "project_name: demo\n",
        )
        .expect("write config");

        let config = load_project_config(dir.path()).expect("load config");
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.transform_root, "transform");
        assert_eq!(config.max_workers, 4);
        assert!(config.parallel);
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_project_config(dir.path()).is_err());
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("verity_project.yaml"),
            "project_name: demo\ntarget_path: target/default.duckdb\n",
        )
        .expect("write config");

        // SAFETY-equivalent for tests: single-threaded env var set/unset,
        // scoped tightly around the call under test.
        unsafe {
            std::env::set_var("VERITY_TARGET_PATH", "/tmp/override.duckdb");
        }
        let config = load_project_config(dir.path()).expect("load config");
        unsafe {
            std::env::remove_var("VERITY_TARGET_PATH");
        }
        assert_eq!(config.target_path, "/tmp/override.duckdb");
    }
}
