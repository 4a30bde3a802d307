//! Error types for the incident detection engine.

use thiserror::Error;

/// Errors that can occur during incident detection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DetectionError {
    /// The caller passed an empty device identifier.
    #[error("Device id must not be empty")]
    EmptyDeviceId,

    /// A threshold-configuration field failed validation.
    #[error("Invalid threshold '{field}': {reason}")]
    InvalidThreshold { field: &'static str, reason: String },

    /// Incident lookup failed.
    #[error("Incident not found: {0}")]
    IncidentNotFound(String),
}

impl DetectionError {
    /// Check if this is a validation error.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            DetectionError::EmptyDeviceId | DetectionError::InvalidThreshold { .. }
        )
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DetectionError::IncidentNotFound(_))
    }
}

// Conversion from DetectionError to the main Error type
impl From<DetectionError> for crate::Error {
    fn from(err: DetectionError) -> Self {
        crate::Error::Detection(err)
    }
}
