//! Error types for creditgate storage.

use creditgate_core::MeterError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// Business outcomes of conditional updates (insufficient balance, exhausted
/// promo) are not errors; they come back as outcome enums.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed or could not be reached.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A row the operation requires does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of row.
        entity: &'static str,
        /// Its key.
        id: String,
    },

    /// An insert collided with an existing row.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StoreError> for MeterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Validation(msg),
            StoreError::NotFound { entity, id } => Self::Validation(format!("{entity} not found: {id}")),
            StoreError::Database(msg) | StoreError::Serialization(msg) => {
                tracing::error!(error = %msg, "Store failure");
                Self::StorageUnavailable(msg)
            }
        }
    }
}
