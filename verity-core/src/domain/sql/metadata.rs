// verity-core/src/domain/sql/metadata.rs
//
// Metadata-comment grammar (spec §4.2/§6.2): `-- config:`, `-- depends_on:`,
// `-- description:`, `-- col: name:`, `-- assert:` line-prefix comments
// carried over raw SQL text before the executable query is extracted.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static CONFIG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s*config:\s*(.+)$").expect("static regex is valid"));
static DEPENDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s*depends_on:\s*(.+)$").expect("static regex is valid"));
static DESCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s*description:\s*(.+)$").expect("static regex is valid"));
static COL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--\s*col:\s*(\w+):\s*(.+)$").expect("static regex is valid")
});
static ASSERT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s*assert:\s*(.+)$").expect("static regex is valid"));

const META_PREFIXES: [&str; 5] = [
    "-- config:",
    "-- depends_on:",
    "-- description:",
    "-- col:",
    "-- assert:",
];

/// Parsed metadata pulled from the leading comment block of a model file.
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    pub config: BTreeMap<String, String>,
    pub depends_on: Vec<String>,
    pub description: Option<String>,
    pub column_docs: BTreeMap<String, String>,
    pub assertions: Vec<String>,
}

/// Parses every recognized metadata comment out of raw SQL text in one pass.
pub fn parse_metadata(sql: &str) -> ModelMetadata {
    ModelMetadata {
        config: parse_config(sql),
        depends_on: parse_depends(sql),
        description: parse_description(sql),
        column_docs: parse_column_docs(sql),
        assertions: parse_assertions(sql),
    }
}

/// `-- config: k=v, k=v` (first occurrence only, matching the source).
pub fn parse_config(sql: &str) -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    let Some(captures) = CONFIG_RE.captures(sql) else {
        return config;
    };
    for pair in captures[1].split(',') {
        let pair = pair.trim();
        if let Some((key, value)) = pair.split_once('=') {
            config.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    config
}

/// `-- depends_on: s.t, s.t` (first occurrence only).
pub fn parse_depends(sql: &str) -> Vec<String> {
    let Some(captures) = DEPENDS_RE.captures(sql) else {
        return Vec::new();
    };
    captures[1]
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `-- assert: <expr>` (every occurrence).
pub fn parse_assertions(sql: &str) -> Vec<String> {
    ASSERT_RE
        .captures_iter(sql)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// `-- description: …` (first occurrence only).
pub fn parse_description(sql: &str) -> Option<String> {
    DESCRIPTION_RE
        .captures(sql)
        .map(|c| c[1].trim().to_string())
}

/// `-- col: name: …` (every occurrence).
pub fn parse_column_docs(sql: &str) -> BTreeMap<String, String> {
    COL_RE
        .captures_iter(sql)
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .collect()
}

/// Removes every metadata comment line, leaving the executable query. Other
/// `--` comments are preserved (spec §6.2).
pub fn strip_config_comments(sql: &str) -> String {
    let mut query_lines: Vec<&str> = sql
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !META_PREFIXES
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
        })
        .collect();

    while matches!(query_lines.first(), Some(line) if line.trim().is_empty()) {
        query_lines.remove(0);
    }

    query_lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL_SOURCE: &str = "-- config: materialized=incremental, unique_key=id\n\
-- depends_on: bronze.e, bronze.f\n\
-- description: silver layer rollup\n\
-- col: id: primary key\n\
-- col: name: display name\n\
-- assert: row_count > 0\n\
-- assert: unique(id)\n\
-- this is a normal comment, not metadata\n\
SELECT id, name FROM bronze.e\n";

    #[test]
    fn parses_config_pairs() {
        let config = parse_config(MODEL_SOURCE);
        assert_eq!(config.get("materialized").map(String::as_str), Some("incremental"));
        assert_eq!(config.get("unique_key").map(String::as_str), Some("id"));
    }

    #[test]
    fn parses_explicit_depends_on() {
        assert_eq!(
            parse_depends(MODEL_SOURCE),
            vec!["bronze.e".to_string(), "bronze.f".to_string()]
        );
    }

    #[test]
    fn parses_description() {
        assert_eq!(
            parse_description(MODEL_SOURCE),
            Some("silver layer rollup".to_string())
        );
    }

    #[test]
    fn parses_column_docs() {
        let docs = parse_column_docs(MODEL_SOURCE);
        assert_eq!(docs.get("id").map(String::as_str), Some("primary key"));
        assert_eq!(docs.get("name").map(String::as_str), Some("display name"));
    }

    #[test]
    fn parses_every_assertion() {
        assert_eq!(
            parse_assertions(MODEL_SOURCE),
            vec!["row_count > 0".to_string(), "unique(id)".to_string()]
        );
    }

    #[test]
    fn stripping_leaves_only_executable_sql_and_plain_comments() {
        let query = strip_config_comments(MODEL_SOURCE);
        assert!(!query.contains("-- config:"));
        assert!(!query.contains("-- depends_on:"));
        assert!(query.contains("-- this is a normal comment, not metadata"));
        assert!(query.trim_end().ends_with("SELECT id, name FROM bronze.e"));
    }
}
