//! Error types for the sync core.

use thiserror::Error;

/// Failures observed by the sync core.
///
/// None of these cross the public operations as a return value; they are
/// handed to `on_error` observers or logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Failed to transform inbound event: {0}")]
    Transformation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl SyncError {
    /// True for failures that came from the transport rather than the payload.
    pub fn is_connection(&self) -> bool {
        matches!(self, SyncError::Connection(_))
    }

    /// Collapse payload-level failures into a single `Transformation` error.
    pub fn into_transformation(self) -> Self {
        match self {
            SyncError::Transformation(_) | SyncError::Connection(_) => self,
            SyncError::Deserialization(msg) | SyncError::InvalidTimestamp(msg) => {
                SyncError::Transformation(msg)
            }
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

impl From<chrono::ParseError> for SyncError {
    fn from(e: chrono::ParseError) -> Self {
        SyncError::InvalidTimestamp(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
