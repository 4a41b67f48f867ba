//! Error types for the meaning engine.
//!
//! Most variants are recoverable at the smallest scope that produced them (one file,
//! one rule, one library entry) and travel back to the caller as warnings rather than
//! aborting a request. Only an empty registry is fatal at startup.

use thiserror::Error;

/// Result type alias for engine operations
pub type MeaningResult<T> = Result<T, MeaningError>;

/// Errors and recoverable conditions raised by the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeaningError {
    /// Malformed or missing definition file (dimensions, rulebase, world model, library, config).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed logical-rule formula.
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// Forward chaining stopped at the pass cap before reaching a fixed point.
    #[error("Reasoning limit exceeded after {passes} passes")]
    ReasoningLimitExceeded { passes: usize },

    /// Library entry length differs from the registry length.
    #[error("Vector shape mismatch for '{id}': expected {expected}, got {actual}")]
    VectorShapeMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    /// No usable comparison target in the library.
    #[error("Library contains no comparable vectors")]
    EmptyLibrary,

    #[error("IO error: {0}")]
    Io(String),

    /// The LLM narrator failed; the caller falls back to a mechanical justification.
    #[error("Narrator error: {0}")]
    Narrator(String),

    /// An external handler failed, timed out or returned malformed output.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Narrative history store failure.
    #[error("History store error: {0}")]
    History(String),
}

impl MeaningError {
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        MeaningError::Parse {
            offset,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for MeaningError {
    fn from(err: std::io::Error) -> Self {
        MeaningError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MeaningError {
    fn from(err: serde_json::Error) -> Self {
        MeaningError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for MeaningError {
    fn from(err: serde_yaml::Error) -> Self {
        MeaningError::Config(err.to_string())
    }
}

impl From<config::ConfigError> for MeaningError {
    fn from(err: config::ConfigError) -> Self {
        MeaningError::Config(err.to_string())
    }
}

impl From<sled::Error> for MeaningError {
    fn from(err: sled::Error) -> Self {
        MeaningError::History(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_includes_offset() {
        let err = MeaningError::parse(7, "unbalanced parentheses");
        assert_eq!(err.to_string(), "Parse error at offset 7: unbalanced parentheses");
    }

    #[test]
    fn shape_mismatch_display() {
        let err = MeaningError::VectorShapeMismatch {
            id: "cat_01".to_string(),
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Vector shape mismatch for 'cat_01': expected 4, got 3"
        );
    }
}
