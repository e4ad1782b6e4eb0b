// verity-core/src/application/validation.rs
//
// Pre-run validation: duplicate models, dependency cycles, and missing
// upstream references (spec §4.3/§4.9/§7), callable standalone from `verity
// validate` without executing anything.

use std::collections::{HashMap, HashSet};

use tracing::instrument;

use crate::domain::graph::dag::build_dag_tiers;
use crate::domain::model::SQLModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub model: Option<String>,
    pub severity: IssueSeverity,
    pub message: String,
}

fn issue(model: Option<&str>, severity: IssueSeverity, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        model: model.map(String::from),
        severity,
        message: message.into(),
    }
}

/// Every `full_name` that appears on more than one model file.
pub fn check_duplicates(models: &[SQLModel]) -> Vec<ValidationIssue> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut duplicated: HashSet<String> = HashSet::new();

    for model in models {
        let name = model.full_name();
        if seen.contains_key(&name) {
            duplicated.insert(name);
        } else {
            seen.insert(name, model.path.as_str());
        }
    }

    let mut duplicated: Vec<String> = duplicated.into_iter().collect();
    duplicated.sort();
    duplicated
        .into_iter()
        .map(|name| issue(Some(&name), IssueSeverity::Error, format!("duplicate model '{name}' found at multiple paths")))
        .collect()
}

/// Delegates to [`build_dag_tiers`] purely to surface its cycle error as a
/// validation issue instead of aborting the caller.
pub fn check_cycle(models: &[SQLModel]) -> Vec<ValidationIssue> {
    match build_dag_tiers(models) {
        Ok(_) => vec![],
        Err(e) => vec![issue(None, IssueSeverity::Error, e.to_string())],
    }
}

/// Flags `depends_on` entries that resolve to neither another discovered
/// model nor a name in `known_seeds`/`known_sources` — likely a typo or a
/// reference to something that hasn't been declared anywhere.
pub fn check_missing_upstream(
    models: &[SQLModel],
    known_seeds: &HashSet<String>,
    known_sources: &HashSet<String>,
) -> Vec<ValidationIssue> {
    let known_models: HashSet<String> = models.iter().map(|m| m.full_name()).collect();
    let mut issues = Vec::new();

    for model in models {
        for dep in &model.depends_on {
            let dep_lower = dep.to_lowercase();
            if known_models.contains(&dep_lower)
                || known_seeds.contains(&dep_lower)
                || known_sources.contains(&dep_lower)
            {
                continue;
            }
            issues.push(issue(
                Some(&model.full_name()),
                IssueSeverity::Warning,
                format!("upstream reference '{dep}' does not resolve to a known model, seed, or source"),
            ));
        }
    }

    issues
}

/// Runs every pre-run check and returns the combined issue list. Duplicates
/// and cycles are checked first since missing-upstream resolution assumes a
/// well-formed, acyclic model set; all three still run even if earlier
/// checks find something; only `run_transform` treats an `Error`-severity
/// issue as fatal.
#[instrument(skip(models, known_seeds, known_sources), fields(n_models = models.len()))]
pub fn validate_models(
    models: &[SQLModel],
    known_seeds: &HashSet<String>,
    known_sources: &HashSet<String>,
) -> Vec<ValidationIssue> {
    let mut issues = check_duplicates(models);
    issues.extend(check_cycle(models));
    issues.extend(check_missing_upstream(models, known_seeds, known_sources));
    issues
}
