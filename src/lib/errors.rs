//! Error types for the bamflow engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type covering every failure surfaced by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Underlying read/write/seek failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record violated a format invariant mid-stream.
    #[error("Malformed record: {reason}")]
    MalformedRecord {
        /// Explanation of the violated invariant.
        reason: String,
    },

    /// EOF was reached inside a record.
    #[error("Truncated stream: {reason}")]
    TruncatedStream {
        /// Where in the record the stream ended.
        reason: String,
    },

    /// The container's magic bytes were not recognized.
    #[error("Unsupported container version in '{path}'")]
    UnsupportedVersion {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// Chunk write, temp read, or merge invariant failure in the external sorter.
    #[error("Sort error: {reason}")]
    Sort {
        /// Description of the failed phase.
        reason: String,
    },

    /// A stage's precondition was violated.
    #[error("Graph error in stage '{stage}': {reason}")]
    Graph {
        /// Name of the stage that failed.
        stage: String,
        /// Explanation of the violated precondition.
        reason: String,
    },

    /// Could not open a file, allocate a temp directory, or spawn a thread.
    #[error("Resource error: {reason}")]
    Resource {
        /// Explanation of the missing resource.
        reason: String,
    },
}

impl EngineError {
    /// Convenience constructor for malformed-record errors.
    pub fn malformed(reason: impl Into<String>) -> Self {
        EngineError::MalformedRecord { reason: reason.into() }
    }

    /// Convenience constructor for truncated-stream errors.
    pub fn truncated(reason: impl Into<String>) -> Self {
        EngineError::TruncatedStream { reason: reason.into() }
    }

    /// Convenience constructor for sort errors.
    pub fn sort(reason: impl Into<String>) -> Self {
        EngineError::Sort { reason: reason.into() }
    }

    /// Convenience constructor for graph errors.
    pub fn graph(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Graph { stage: stage.into(), reason: reason.into() }
    }

    /// Convenience constructor for resource errors.
    pub fn resource(reason: impl Into<String>) -> Self {
        EngineError::Resource { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_component() {
        let err = EngineError::graph("sorted-merger", "missing source");
        let msg = format!("{err}");
        assert!(msg.contains("sorted-merger"));
        assert!(msg.contains("missing source"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EngineError = io.into();
        assert!(format!("{err}").contains("gone"));
    }

    #[test]
    fn test_truncated_message() {
        let err = EngineError::truncated("EOF inside record body");
        assert!(format!("{err}").contains("Truncated stream"));
    }
}
