//! Error types for state-store backends.

use thiserror::Error;

/// Errors that can occur in a state-store backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Attempted to create a record under a key that already exists.
    #[error("Record already exists for key '{key}'")]
    DuplicateKey { key: String },

    /// A record lookup failed.
    #[error("Record not found for key '{key}'")]
    RecordNotFound { key: String },
}

impl StoreError {
    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::RecordNotFound { .. })
    }

    /// Check if this is a duplicate-key conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

// Conversion from StoreError to the main Error type
impl From<StoreError> for crate::Error {
    fn from(err: StoreError) -> Self {
        crate::Error::Store(err)
    }
}
