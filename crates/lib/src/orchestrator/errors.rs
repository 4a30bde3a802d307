//! Error types for the emergency rotation orchestrator.

use thiserror::Error;

/// Errors that can occur while driving an emergency response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The trigger type is outside the closed enumerated set.
    #[error("Unknown emergency trigger type: '{0}'")]
    UnknownTriggerType(String),

    /// Severity must be on the 1-10 scale.
    #[error("Invalid severity {0}: must be between 1 and 10")]
    InvalidSeverity(u8),

    /// Incident lookup failed.
    #[error("Incident not found: {0}")]
    IncidentNotFound(String),

    /// Recovery was requested before any rotation executed for the incident.
    #[error("Recovery plan not found for incident {0}")]
    RecoveryPlanNotFound(String),

    /// Access restoration attempted before the incident was resolved.
    #[error("Cannot restore access until incident {incident_id} is fully resolved")]
    AccessRestorationBlocked { incident_id: String },

    /// Restore was requested for a device that is not isolated.
    #[error("Device {device_id} is not isolated")]
    DeviceNotIsolated { device_id: String },
}

impl OrchestratorError {
    /// Check if this is a validation error.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnknownTriggerType(_) | OrchestratorError::InvalidSeverity(_)
        )
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OrchestratorError::IncidentNotFound(_) | OrchestratorError::RecoveryPlanNotFound(_)
        )
    }

    /// Check if this is an ordering/state violation.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            OrchestratorError::AccessRestorationBlocked { .. }
                | OrchestratorError::DeviceNotIsolated { .. }
        )
    }
}

// Conversion from OrchestratorError to the main Error type
impl From<OrchestratorError> for crate::Error {
    fn from(err: OrchestratorError) -> Self {
        crate::Error::Orchestrator(err)
    }
}
