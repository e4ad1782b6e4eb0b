// verity-core/src/domain/sql/analyzer.rs
//
// AST-based SQL analysis (spec §4.2): table-reference extraction with a
// regex fallback, and column-lineage extraction. Uses the same recursive
// `sqlparser::ast` walk idiom as the identifier quoter elsewhere in this
// crate, repointed at collecting references instead of mutating quote
// style.

use regex::Regex;
use sqlparser::ast::{
    Expr, ObjectName, ObjectNamePart, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

/// Schemas that are never real upstream dependencies.
const SKIP_SCHEMAS: [&str; 4] = ["information_schema", "_dp_internal", "pg_catalog", "sys"];

static FALLBACK_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_]\w*)\.([A-Za-z_]\w*)\b")
        .expect("static regex is valid")
});
static LINE_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("static regex is valid"));

/// Extracts sorted, deduplicated `schema.table` references from `query`.
/// `exclude` is the model's own `full_name`, dropped as a self-reference.
pub fn extract_table_refs(query: &str, exclude: Option<&str>) -> Vec<String> {
    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, query) {
        Ok(statements) => {
            let mut collector = RefCollector::default();
            for stmt in &statements {
                collector.visit_statement(stmt);
            }
            collector.finalize(exclude)
        }
        Err(_) => fallback_extract_table_refs(query, exclude),
    }
}

fn fallback_extract_table_refs(query: &str, exclude: Option<&str>) -> Vec<String> {
    let clean = LINE_COMMENT_RE.replace_all(query, "");
    let mut refs = HashSet::new();
    for caps in FALLBACK_REF_RE.captures_iter(&clean) {
        let schema = caps[1].to_lowercase();
        let table = caps[2].to_lowercase();
        if SKIP_SCHEMAS.contains(&schema.as_str()) {
            continue;
        }
        let fqn = format!("{schema}.{table}");
        if Some(fqn.as_str()) == exclude {
            continue;
        }
        refs.insert(fqn);
    }
    let mut refs: Vec<String> = refs.into_iter().collect();
    refs.sort();
    refs
}

#[derive(Default)]
struct RefCollector {
    cte_names: HashSet<String>,
    refs: HashSet<(String, String)>,
}

impl RefCollector {
    fn visit_statement(&mut self, stmt: &Statement) {
        if let Statement::Query(query) = stmt {
            self.visit_query(query);
        }
    }

    fn visit_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
                self.visit_query(&cte.query);
            }
        }
        self.visit_set_expr(&query.body);
    }

    fn visit_set_expr(&mut self, set_expr: &SetExpr) {
        match set_expr {
            SetExpr::Select(select) => self.visit_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_expr(left);
                self.visit_set_expr(right);
            }
            SetExpr::Query(query) => self.visit_query(query),
            _ => {}
        }
    }

    fn visit_select(&mut self, select: &Select) {
        for twj in &select.from {
            self.visit_table_factor(&twj.relation);
            for join in &twj.joins {
                self.visit_table_factor(&join.relation);
            }
        }
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.visit_expr(expr);
                }
                _ => {}
            }
        }
        if let Some(selection) = &select.selection {
            self.visit_expr(selection);
        }
        if let Some(having) = &select.having {
            self.visit_expr(having);
        }
    }

    fn visit_table_factor(&mut self, tf: &TableFactor) {
        match tf {
            TableFactor::Table { name, .. } => self.record_table_name(name),
            TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
            _ => {}
        }
    }

    fn record_table_name(&mut self, name: &ObjectName) {
        let parts: Vec<String> = name
            .0
            .iter()
            .filter_map(|part| match part {
                ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
                _ => None,
            })
            .collect();
        if parts.len() == 2 {
            self.refs.insert((parts[0].clone(), parts[1].clone()));
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::BinaryOp { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => self.visit_expr(expr),
            Expr::InSubquery { expr, subquery, .. } => {
                self.visit_expr(expr);
                self.visit_query(subquery);
            }
            Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
                self.visit_query(subquery);
            }
            Expr::InList { expr, list, .. } => {
                self.visit_expr(expr);
                for item in list {
                    self.visit_expr(item);
                }
            }
            Expr::Case {
                operand,
                conditions,
                else_result,
                ..
            } => {
                if let Some(op) = operand {
                    self.visit_expr(op);
                }
                for cw in conditions {
                    self.visit_expr(&cw.condition);
                    self.visit_expr(&cw.result);
                }
                if let Some(el) = else_result {
                    self.visit_expr(el);
                }
            }
            Expr::IsNull(e) | Expr::IsNotNull(e) => self.visit_expr(e),
            Expr::Between {
                expr, low, high, ..
            } => {
                self.visit_expr(expr);
                self.visit_expr(low);
                self.visit_expr(high);
            }
            _ => {}
        }
    }

    fn finalize(self, exclude: Option<&str>) -> Vec<String> {
        let mut refs: Vec<String> = self
            .refs
            .into_iter()
            .filter(|(schema, table)| {
                !SKIP_SCHEMAS.contains(&schema.as_str())
                    && !self.cte_names.contains(table)
                    && !self.cte_names.contains(schema)
            })
            .map(|(schema, table)| format!("{schema}.{table}"))
            .filter(|fqn| Some(fqn.as_str()) != exclude)
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}

/// A single source column contributing to an output column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSource {
    pub source_table: String,
    pub source_column: String,
}

/// `output_column -> [source columns]`, in projection order.
pub type ColumnLineage = BTreeMap<String, Vec<ColumnSource>>;

/// Extracts column-level lineage (spec §4.2). `depends_on` is the model's
/// resolved upstream list (used to attribute unqualified columns when
/// exactly one upstream exists, and to expand `SELECT *` when
/// `upstream_columns` supplies a column catalog for that upstream).
pub fn extract_column_lineage(
    query: &str,
    depends_on: &[String],
    upstream_columns: Option<&HashMap<String, Vec<String>>>,
) -> ColumnLineage {
    let dialect = GenericDialect {};
    let statements = match Parser::parse_sql(&dialect, query) {
        Ok(statements) => statements,
        Err(_) => return ColumnLineage::new(),
    };

    let Some(Statement::Query(top_query)) = statements.first() else {
        return ColumnLineage::new();
    };

    let alias_map = build_alias_map(top_query);

    let mut cte_names = HashSet::new();
    let mut cte_lineage: HashMap<String, ColumnLineage> = HashMap::new();
    if let Some(with) = &top_query.with {
        for cte in &with.cte_tables {
            let alias = cte.alias.name.value.to_lowercase();
            cte_names.insert(alias.clone());
        }
        for cte in &with.cte_tables {
            let alias = cte.alias.name.value.to_lowercase();
            if let SetExpr::Select(select) = cte.query.body.as_ref() {
                let lineage =
                    trace_select_lineage(select, &alias_map, &cte_names, &cte_lineage, depends_on);
                cte_lineage.insert(alias, lineage);
            }
        }
    }

    let Some(main_select) = find_main_select(&top_query.body) else {
        return ColumnLineage::new();
    };

    let mut lineage = ColumnLineage::new();
    for item in &main_select.projection {
        match item {
            SelectItem::ExprWithAlias { expr, alias } => {
                let sources = resolve_sources(expr, &alias_map, &cte_names, &cte_lineage, depends_on);
                lineage.insert(alias.value.to_lowercase(), dedup(sources));
            }
            SelectItem::UnnamedExpr(expr) => {
                let out_col = output_name(expr).unwrap_or_else(|| "?".to_string());
                let sources = resolve_sources(expr, &alias_map, &cte_names, &cte_lineage, depends_on);
                lineage.insert(out_col, dedup(sources));
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                if let (Some(catalog), Some(dep)) = (upstream_columns, depends_on.first()) {
                    if let Some(columns) = catalog.get(dep) {
                        for column in columns {
                            lineage.insert(
                                column.to_lowercase(),
                                vec![ColumnSource {
                                    source_table: dep.to_lowercase(),
                                    source_column: column.to_lowercase(),
                                }],
                            );
                        }
                    }
                }
            }
        }
    }
    lineage
}

fn output_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(idents) => idents.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn find_main_select(body: &SetExpr) -> Option<&Select> {
    match body {
        SetExpr::Select(select) => Some(select),
        SetExpr::SetOperation { left, .. } => find_main_select(left),
        SetExpr::Query(query) => find_main_select(&query.body),
        _ => None,
    }
}

fn build_alias_map(query: &Query) -> HashMap<String, String> {
    let mut collector = AliasCollector::default();
    collector.visit_query(query);
    collector.alias_map
}

#[derive(Default)]
struct AliasCollector {
    alias_map: HashMap<String, String>,
}

impl AliasCollector {
    fn visit_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.visit_query(&cte.query);
            }
        }
        self.visit_set_expr(&query.body);
    }

    fn visit_set_expr(&mut self, set_expr: &SetExpr) {
        match set_expr {
            SetExpr::Select(select) => self.visit_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_expr(left);
                self.visit_set_expr(right);
            }
            SetExpr::Query(query) => self.visit_query(query),
            _ => {}
        }
    }

    fn visit_select(&mut self, select: &Select) {
        for twj in &select.from {
            self.visit_table_factor(&twj.relation);
            for join in &twj.joins {
                self.visit_table_factor(&join.relation);
            }
        }
    }

    fn visit_table_factor(&mut self, tf: &TableFactor) {
        match tf {
            TableFactor::Table { name, alias, .. } => {
                let parts: Vec<String> = name
                    .0
                    .iter()
                    .filter_map(|part| match part {
                        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
                        _ => None,
                    })
                    .collect();
                let fqn = if parts.len() == 2 {
                    format!("{}.{}", parts[0], parts[1])
                } else if parts.len() == 1 {
                    parts[0].clone()
                } else {
                    return;
                };
                if let Some(a) = alias {
                    self.alias_map.insert(a.name.value.to_lowercase(), fqn.clone());
                }
                self.alias_map.insert(fqn.clone(), fqn);
            }
            TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
            _ => {}
        }
    }
}

fn trace_select_lineage(
    select: &Select,
    alias_map: &HashMap<String, String>,
    cte_names: &HashSet<String>,
    cte_lineage: &HashMap<String, ColumnLineage>,
    depends_on: &[String],
) -> ColumnLineage {
    let mut lineage = ColumnLineage::new();
    for item in &select.projection {
        let (out_col, expr) = match item {
            SelectItem::ExprWithAlias { expr, alias } => (alias.value.to_lowercase(), expr),
            SelectItem::UnnamedExpr(expr) => match output_name(expr) {
                Some(name) => (name, expr),
                None => continue,
            },
            _ => continue,
        };
        let sources = resolve_sources(expr, alias_map, cte_names, cte_lineage, depends_on);
        lineage.insert(out_col, dedup(sources));
    }
    lineage
}

fn resolve_sources(
    expr: &Expr,
    alias_map: &HashMap<String, String>,
    cte_names: &HashSet<String>,
    cte_lineage: &HashMap<String, ColumnLineage>,
    depends_on: &[String],
) -> Vec<ColumnSource> {
    let mut raw = Vec::new();
    collect_columns(expr, &mut raw);

    let mut sources = Vec::new();
    for (table_prefix, column) in raw {
        match table_prefix {
            Some(prefix) => {
                let resolved = alias_map.get(&prefix).cloned().unwrap_or(prefix);
                if cte_names.contains(&resolved) {
                    if let Some(inner) = cte_lineage.get(&resolved) {
                        if let Some(cols) = inner.get(&column) {
                            sources.extend(cols.iter().cloned());
                        }
                    }
                    continue;
                }
                sources.push(ColumnSource {
                    source_table: resolved,
                    source_column: column,
                });
            }
            None => {
                if let Some(dep) = depends_on.first() {
                    sources.push(ColumnSource {
                        source_table: dep.to_lowercase(),
                        source_column: column,
                    });
                }
            }
        }
    }
    sources
}

/// Collects every column reference in `expr` as `(table_prefix, column)`.
fn collect_columns(expr: &Expr, out: &mut Vec<(Option<String>, String)>) {
    match expr {
        Expr::Identifier(ident) => out.push((None, ident.value.to_lowercase())),
        Expr::CompoundIdentifier(idents) => {
            if idents.len() >= 2 {
                let table = idents[idents.len() - 2].value.to_lowercase();
                let column = idents[idents.len() - 1].value.to_lowercase();
                out.push((Some(table), column));
            } else if let Some(ident) = idents.last() {
                out.push((None, ident.value.to_lowercase()));
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_columns(left, out);
            collect_columns(right, out);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            collect_columns(expr, out)
        }
        Expr::IsNull(e) | Expr::IsNotNull(e) => collect_columns(e, out),
        Expr::InList { expr, list, .. } => {
            collect_columns(expr, out);
            for item in list {
                collect_columns(item, out);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_columns(expr, out);
            collect_columns(low, out);
            collect_columns(high, out);
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(op) = operand {
                collect_columns(op, out);
            }
            for cw in conditions {
                collect_columns(&cw.condition, out);
                collect_columns(&cw.result, out);
            }
            if let Some(el) = else_result {
                collect_columns(el, out);
            }
        }
        Expr::Function(func) => {
            if let sqlparser::ast::FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    let inner = match arg {
                        sqlparser::ast::FunctionArg::Named { arg, .. }
                        | sqlparser::ast::FunctionArg::Unnamed(arg) => arg,
                        sqlparser::ast::FunctionArg::ExprNamed { arg, .. } => arg,
                    };
                    if let sqlparser::ast::FunctionArgExpr::Expr(e) = inner {
                        collect_columns(e, out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn dedup(sources: Vec<ColumnSource>) -> Vec<ColumnSource> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for source in sources {
        let key = (source.source_table.clone(), source.source_column.clone());
        if seen.insert(key) {
            unique.push(source);
        }
    }
    unique
}
