// verity-core/src/domain/identifier.rs
//
// Identifier grammar shared by schema names, model names and column names
// before they are interpolated into generated SQL.

use crate::domain::error::DomainError;
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid"));

/// Validates `ident` against `[A-Za-z_][A-Za-z0-9_]*`. Every identifier that
/// ends up interpolated into SQL (schema, table, column) must pass this
/// before a single statement is issued.
pub fn validate_identifier(ident: &str) -> Result<(), DomainError> {
    if IDENTIFIER_RE.is_match(ident) {
        Ok(())
    } else {
        Err(DomainError::InvalidIdentifier(ident.to_string()))
    }
}
