//! Errors reported by the scenario runner.

use entiscope_core::CoreError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that stop a scenario run.
#[derive(Debug, Error)]
pub enum CliError {
    /// The scenario file could not be read.
    #[error("cannot read scenario: {0}")]
    Io(#[from] std::io::Error),

    /// The scenario file is not valid JSON for the scenario format.
    #[error("malformed scenario: {0}")]
    Parse(#[from] serde_json::Error),

    /// The scenario refers to something it never declared.
    #[error("unknown {what} `{name}`")]
    Unknown {
        /// Kind of name ("class", "object", "scope", "relation").
        what: &'static str,
        /// The offending name.
        name: String,
    },

    /// The scenario declares something twice or inconsistently.
    #[error("invalid scenario: {0}")]
    Invalid(String),

    /// A step failed with an engine error.
    #[error("step {index} ({op}) failed: {source}")]
    StepFailed {
        /// Zero-based step index.
        index: usize,
        /// Step operation name.
        op: &'static str,
        /// The engine error.
        #[source]
        source: CoreError,
    },

    /// An `expect_error` step succeeded or failed differently.
    #[error("step {index}: expected {expected}, got {actual}")]
    Expectation {
        /// Zero-based step index.
        index: usize,
        /// The expected error kind.
        expected: String,
        /// What happened instead.
        actual: String,
    },

    /// The schema declared by the scenario is rejected by the engine.
    #[error("schema rejected: {0}")]
    Schema(#[source] CoreError),
}

impl CliError {
    pub(crate) fn unknown(what: &'static str, name: &str) -> Self {
        Self::Unknown {
            what,
            name: name.to_string(),
        }
    }
}
