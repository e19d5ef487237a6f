//! Error taxonomy for policy compilation, evaluation and enforcement.

use thiserror::Error;

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors surfaced by the policy context, PDP and PEP.
///
/// A deny is not represented here: denies travel as data (see
/// [`crate::Decision`]) so callers must check the allow flag explicitly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Duplicate module or cache names, unresolved modules, arity
    /// mismatches, unknown method paths (programming errors).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rule language diagnostics raised while compiling a module set.
    #[error("policy compilation failed: {0}")]
    Compile(String),

    /// Runtime failure inside a rule or the evaluator.
    #[error("policy evaluation failed: {0}")]
    Eval(String),

    /// Decision store assembly failure (duplicate or conflicting mounts).
    #[error("decision store error: {0}")]
    Store(String),

    /// The ambient request context was cancelled mid-operation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl PolicyError {
    /// Error category for log fields and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            PolicyError::Configuration(_) => "configuration",
            PolicyError::Compile(_) => "compile",
            PolicyError::Eval(_) => "eval",
            PolicyError::Store(_) => "store",
            PolicyError::Cancelled(_) => "cancelled",
        }
    }
}
