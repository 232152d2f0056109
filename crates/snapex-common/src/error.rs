//! Error types for snapex

use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, SnapexError>;

/// Main error type for the export pipeline
#[derive(Error, Debug)]
pub enum SnapexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport or protocol failure talking to the search store
    #[error("Store error: {0}")]
    Store(String),

    /// Partition listing failed; the entity type cannot be exported
    #[error("Partition discovery failed for {entity_type}: {source}")]
    Discovery {
        entity_type: String,
        #[source]
        source: Box<SnapexError>,
    },

    #[error("Dedup store error: {0}")]
    Dedup(String),

    #[error("Manifest error for {entity_type}: {message}")]
    Manifest { entity_type: String, message: String },

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl SnapexError {
    pub fn store(message: impl std::fmt::Display) -> Self {
        SnapexError::Store(message.to_string())
    }

    pub fn dedup(message: impl std::fmt::Display) -> Self {
        SnapexError::Dedup(message.to_string())
    }

    pub fn discovery(entity_type: impl Into<String>, source: SnapexError) -> Self {
        SnapexError::Discovery {
            entity_type: entity_type.into(),
            source: Box::new(source),
        }
    }

    pub fn manifest(entity_type: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SnapexError::Manifest {
            entity_type: entity_type.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_discovery_keeps_source() {
        let err = SnapexError::discovery("works", SnapexError::store("connection refused"));
        assert_eq!(
            err.to_string(),
            "Partition discovery failed for works: Store error: connection refused"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SnapexError = io.into();
        assert!(matches!(err, SnapexError::Io(_)));
    }
}
