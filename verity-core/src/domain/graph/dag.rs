// verity-core/src/domain/graph/dag.rs

use crate::domain::error::DomainError;
use crate::domain::model::SQLModel;
use std::collections::{HashMap, HashSet, VecDeque};

/// Flat topological order over `models`. External refs in `depends_on`
/// (seeds, sources, landing tables — anything not itself a discovered
/// model) are ignored for ordering, per spec §4.4.
pub fn build_dag(models: &[SQLModel]) -> Result<Vec<String>, DomainError> {
    Ok(build_dag_tiers(models)?.into_iter().flatten().collect())
}

/// Tiered topological order: each inner list contains every model whose
/// upstream models have all appeared in an earlier tier. Within a tier,
/// models are sorted alphabetically by `full_name` for determinism.
pub fn build_dag_tiers(models: &[SQLModel]) -> Result<Vec<Vec<String>>, DomainError> {
    let known: HashSet<String> = models.iter().map(|m| m.full_name()).collect();

    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for full_name in &known {
        in_degree.insert(full_name.clone(), 0);
        adjacency.insert(full_name.clone(), Vec::new());
    }

    for model in models {
        let full_name = model.full_name();
        for dep in &model.depends_on {
            let dep = dep.to_lowercase();
            if dep == full_name {
                continue; // self-reference, already filtered at discovery but stay defensive
            }
            if known.contains(&dep) {
                adjacency.entry(dep).or_default().push(full_name.clone());
                *in_degree.entry(full_name.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut tiers: Vec<Vec<String>> = Vec::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| name.clone())
        .collect();
    ready.sort();
    queue.extend(ready);

    let mut resolved = 0usize;

    while !queue.is_empty() {
        let tier_size = queue.len();
        let mut tier = Vec::with_capacity(tier_size);

        for _ in 0..tier_size {
            if let Some(current) = queue.pop_front() {
                tier.push(current.clone());
                resolved += 1;

                if let Some(neighbors) = adjacency.get(&current) {
                    for neighbor in neighbors {
                        if let Some(degree) = in_degree.get_mut(neighbor) {
                            *degree -= 1;
                            if *degree == 0 {
                                queue.push_back(neighbor.clone());
                            }
                        }
                    }
                }
            }
        }

        tier.sort();
        tiers.push(tier);

        // Next tier's ready set must also be sorted before draining, since
        // nodes become ready in discovery order, not alphabetical order.
        let mut next_ready: Vec<String> = queue.drain(..).collect();
        next_ready.sort();
        queue.extend(next_ready);
    }

    if resolved != known.len() {
        let stuck: Vec<&String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(name, _)| name)
            .collect();
        let mut stuck: Vec<String> = stuck.into_iter().cloned().collect();
        stuck.sort();
        return Err(DomainError::CircularDependency(stuck.join(", ")));
    }

    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MaterializationType;
    use std::collections::BTreeMap;

    fn model(schema: &str, name: &str, depends_on: &[&str]) -> SQLModel {
        SQLModel {
            path: format!("transform/{schema}/{name}.sql"),
            schema: schema.to_string(),
            name: name.to_string(),
            sql: String::new(),
            query: String::new(),
            materialized: MaterializationType::Table,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            description: None,
            column_docs: BTreeMap::new(),
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
    fn linear_chain_produces_one_tier_per_model() {
        let models = vec![
            model("bronze", "e", &[]),
            model("silver", "d", &["bronze.e"]),
        ];
        let tiers = build_dag_tiers(&models).unwrap();
        assert_eq!(tiers, vec![vec!["bronze.e".to_string()], vec!["silver.d".to_string()]]);
        assert_eq!(build_dag(&models).unwrap(), vec!["bronze.e", "silver.d"]);
    }

    #[test]
    fn independent_branches_share_a_tier_sorted_alphabetically() {
        let models = vec![
            model("bronze", "b", &[]),
            model("bronze", "a", &[]),
            model("silver", "x", &["bronze.a"]),
            model("silver", "y", &["bronze.b"]),
        ];
        let tiers = build_dag_tiers(&models).unwrap();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0], vec!["bronze.a".to_string(), "bronze.b".to_string()]);
        assert_eq!(tiers[1], vec!["silver.x".to_string(), "silver.y".to_string()]);
    }

    #[test]
    fn external_refs_are_ignored_for_ordering() {
        let models = vec![model("silver", "d", &["seeds.users"])];
        let tiers = build_dag_tiers(&models).unwrap();
        assert_eq!(tiers, vec![vec!["silver.d".to_string()]]);
    }

    #[test]
    fn cycle_is_reported() {
        let models = vec![
            model("bronze", "a", &["bronze.b"]),
            model("bronze", "b", &["bronze.a"]),
        ];
        let result = build_dag_tiers(&models);
        assert!(matches!(result, Err(DomainError::CircularDependency(_))));
    }

    #[test]
    fn no_model_appears_in_more_than_one_tier() {
        let models = vec![
            model("bronze", "a", &[]),
            model("silver", "b", &["bronze.a"]),
            model("gold", "c", &["silver.b"]),
        ];
        let tiers = build_dag_tiers(&models).unwrap();
        let mut seen = HashSet::new();
        for tier in &tiers {
            for name in tier {
                assert!(seen.insert(name.clone()), "{name} appeared twice");
            }
        }
    }
}
