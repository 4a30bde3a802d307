//! Error types for the cross-device rotation protocol.

use thiserror::Error;

/// Errors that can occur while coordinating a rotation session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Session lookup failed.
    #[error("Rotation session not found: {0}")]
    SessionNotFound(String),

    /// The device is not a participant of the session.
    #[error("Device {device_id} is not a participant of rotation {rotation_id}")]
    NotParticipant {
        rotation_id: String,
        device_id: String,
    },

    /// A rotation needs at least one participating device.
    #[error("Participant list must not be empty")]
    EmptyParticipants,

    /// A required protocol field was empty.
    #[error("Empty protocol field: {0}")]
    EmptyField(&'static str),

    /// The session is not in a phase that accepts this message.
    #[error("Rotation {rotation_id} does not accept {message} in its current phase")]
    PhaseViolation {
        rotation_id: String,
        message: &'static str,
    },

    /// The reveal did not match the binding pledge, the pledge was
    /// missing, or the proof was empty.
    #[error("Invalid commitment verification")]
    InvalidCommitmentVerification,

    /// The synchronization strategy is outside the closed set.
    #[error("Unknown offline sync strategy: '{0}'")]
    UnknownSyncStrategy(String),

    /// The conflict type is outside the closed set.
    #[error("Unknown conflict type: '{0}'")]
    UnknownConflictType(String),

    /// The resolution strategy is outside the closed set.
    #[error("Unknown resolution strategy: '{0}'")]
    UnknownResolutionStrategy(String),

    /// Delayed sync was requested for a device that never registered.
    #[error("Device not found in offline devices: {0}")]
    DeviceNotOffline(String),
}

impl ProtocolError {
    /// Check if this is a validation error.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::EmptyParticipants
                | ProtocolError::EmptyField(_)
                | ProtocolError::UnknownSyncStrategy(_)
                | ProtocolError::UnknownConflictType(_)
                | ProtocolError::UnknownResolutionStrategy(_)
        )
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProtocolError::SessionNotFound(_) | ProtocolError::DeviceNotOffline(_)
        )
    }

    /// Check if this is a commitment binding failure.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, ProtocolError::InvalidCommitmentVerification)
    }

    /// Check if this is an ordering/state violation.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::PhaseViolation { .. } | ProtocolError::NotParticipant { .. }
        )
    }
}

// Conversion from ProtocolError to the main Error type
impl From<ProtocolError> for crate::Error {
    fn from(err: ProtocolError) -> Self {
        crate::Error::Protocol(err)
    }
}
