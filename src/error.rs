// In: src/error.rs

//! This module defines the single, unified error type for the entire tambak dataset library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum tambakError {
    // =========================================================================
    // === Caller Errors (raised before any evaluation happens)
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation requires at least one element: {0}")]
    EmptyCollection(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid engine configuration: {0}")]
    ConfigError(String),

    // =========================================================================
    // === Engine Errors (raised while a job is being evaluated)
    // =========================================================================
    #[error("Batch could not be decoded into the requested type: {0}")]
    Decoding(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Stage '{stage}' failed on partition {partition} after {attempts} attempt(s): {source}")]
    TaskFailed {
        stage: String,
        partition: usize,
        attempts: u32,
        #[source]
        source: Box<tambakError>,
    },

    #[error("Block store failure: {0}")]
    Storage(String),

    #[error("Zstd operation failed: {0}")]
    ZstdError(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error originating from the underlying I/O subsystem (spill files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library (config loading, schema and row rendering).
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl tambakError {
    /// Returns the innermost cause of a `TaskFailed` chain, or `self` for any other variant.
    pub fn root_cause(&self) -> &tambakError {
        match self {
            tambakError::TaskFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_task_failures() {
        let err = tambakError::TaskFailed {
            stage: "map".to_string(),
            partition: 2,
            attempts: 3,
            source: Box::new(tambakError::TaskPanicked("boom".to_string())),
        };

        assert!(matches!(err.root_cause(), tambakError::TaskPanicked(msg) if msg == "boom"));
        assert!(err.to_string().contains("partition 2 after 3 attempt(s)"));
    }
}
