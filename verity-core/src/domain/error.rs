// verity-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("invalid identifier '{0}': must match [A-Za-z_][A-Za-z0-9_]*")]
    #[diagnostic(
        code(verity::domain::invalid_identifier),
        help("rename the schema, model or column so it matches the identifier grammar")
    )]
    InvalidIdentifier(String),

    #[error("duplicate model '{0}' found at multiple paths")]
    #[diagnostic(
        code(verity::domain::duplicate_model),
        help("each schema.name pair must come from exactly one .sql file")
    )]
    DuplicateModel(String),

    #[error("circular dependency detected involving: {0}")]
    #[diagnostic(code(verity::domain::cycle), help("break the cycle in depends_on / FROM-JOIN references"))]
    CircularDependency(String),

    #[error("model '{0}' not found")]
    #[diagnostic(code(verity::domain::model_not_found))]
    ModelNotFound(String),

    #[error("execution failed for '{model}': {reason}")]
    #[diagnostic(code(verity::domain::execution))]
    Execution { model: String, reason: String },

    #[error("project configuration error: {0}")]
    #[diagnostic(code(verity::domain::config))]
    ConfigError(String),
}
