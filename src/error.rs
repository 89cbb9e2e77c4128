//! Error types for the memory store

use thiserror::Error;

use crate::core::types::RecordKind;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Which half of a two-store write an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSide {
    Content,
    Index,
}

impl std::fmt::Display for StoreSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content => write!(f, "content store"),
            Self::Index => write!(f, "metadata index"),
        }
    }
}

fn kind_label(kind: &Option<RecordKind>) -> &'static str {
    kind.map(|k| k.as_str()).unwrap_or("record")
}

/// Main error type for the memory store
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("{} not found: {id}", kind_label(.kind))]
    NotFound {
        kind: Option<RecordKind>,
        id: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    /// One store accepted the write, the other rejected it. Nothing is rolled back.
    #[error("Partial write during {operation} of {id}: {succeeded} succeeded, {failed} failed: {source}")]
    PartialWrite {
        operation: &'static str,
        id: String,
        succeeded: StoreSide,
        failed: StoreSide,
        #[source]
        source: Box<MemoryError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl MemoryError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: None,
            id: id.into(),
        }
    }

    pub fn not_found_kind(kind: RecordKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: Some(kind),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Stable error code for callers that render errors
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::PartialWrite { .. } => "partial_write",
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) | Self::Config(_) => "storage",
        }
    }

    pub(crate) fn partial(
        operation: &'static str,
        id: &str,
        succeeded: StoreSide,
        source: MemoryError,
    ) -> Self {
        let failed = match succeeded {
            StoreSide::Content => StoreSide::Index,
            StoreSide::Index => StoreSide::Content,
        };
        Self::PartialWrite {
            operation,
            id: id.to_string(),
            succeeded,
            failed,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_write_names_both_sides() {
        let err = MemoryError::partial(
            "create",
            "abc",
            StoreSide::Content,
            MemoryError::Validation("boom".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("content store succeeded"));
        assert!(msg.contains("metadata index failed"));
        assert_eq!(err.code(), "partial_write");
    }

    #[test]
    fn test_not_found_display() {
        let err = MemoryError::not_found_kind(RecordKind::Knowledge, "k1");
        assert_eq!(err.to_string(), "knowledge not found: k1");
        assert!(err.is_not_found());
        assert_eq!(MemoryError::not_found("x").to_string(), "record not found: x");
    }
}
