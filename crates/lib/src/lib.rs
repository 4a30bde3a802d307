//!
//! Keywarden: coordinated key-lifecycle management for multi-device
//! personal data.
//!
//! ## Core Concepts
//!
//! * **Telemetry (`telemetry::DeviceEvent`)**: Per-device observations
//!   reported by agents at the boundary, decoded from JSON and validated
//!   before any engine sees them.
//! * **Baselines (`baseline::DeviceBaseline`)**: Rolling per-device
//!   behavioral profiles (active hours, typical data volume) that detection
//!   judges new activity against. Each device's baseline is isolated.
//! * **Detection (`detection::IncidentDetectionEngine`)**: Rule-based
//!   incident detection over telemetry with runtime-tunable thresholds and
//!   a bounded active-incident store.
//! * **Orchestration (`orchestrator::EmergencyOrchestrator`)**: The
//!   emergency response state machine driving device isolation, key
//!   invalidation, emergency rotation, and recovery, per incident.
//! * **Protocol (`protocol::RotationCoordinator`)**: A zero-knowledge
//!   commit-reveal protocol that synchronizes key rotations across devices
//!   without key material ever crossing the coordination boundary.
//! * **State stores (`backend::StateStore`)**: A pluggable keyed-record
//!   storage layer with atomic per-record read-modify-write.
//! * **Audit (`audit::AuditSink`)**: A privacy-safe action log covering
//!   every lifecycle operation.

pub mod audit;
pub mod backend;
pub mod baseline;
pub mod clock;
pub mod detection;
pub mod orchestrator;
pub mod protocol;
pub mod telemetry;
pub mod wire;

pub use clock::{Clock, FixedClock, SystemClock};
pub use detection::IncidentDetectionEngine;
pub use orchestrator::EmergencyOrchestrator;
pub use protocol::RotationCoordinator;

/// Result type used throughout the Keywarden library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Keywarden library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured storage errors from the backend module
    #[error(transparent)]
    Store(backend::StoreError),

    /// Structured boundary-decoding errors from the telemetry module
    #[error(transparent)]
    Telemetry(telemetry::TelemetryError),

    /// Structured detection errors from the detection module
    #[error(transparent)]
    Detection(detection::DetectionError),

    /// Structured response errors from the orchestrator module
    #[error(transparent)]
    Orchestrator(orchestrator::OrchestratorError),

    /// Structured protocol errors from the protocol module
    #[error(transparent)]
    Protocol(protocol::ProtocolError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Serialize(_) => "serialize",
            Error::Store(_) => "backend",
            Error::Telemetry(_) => "telemetry",
            Error::Detection(_) => "detection",
            Error::Orchestrator(_) => "orchestrator",
            Error::Protocol(_) => "protocol",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Store(store_err) => store_err.is_not_found(),
            Error::Detection(detection_err) => detection_err.is_not_found(),
            Error::Orchestrator(orchestrator_err) => orchestrator_err.is_not_found(),
            Error::Protocol(protocol_err) => protocol_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is validation-related.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Telemetry(telemetry_err) => telemetry_err.is_validation_error(),
            Error::Detection(detection_err) => detection_err.is_validation_error(),
            Error::Orchestrator(orchestrator_err) => orchestrator_err.is_validation_error(),
            Error::Protocol(protocol_err) => protocol_err.is_validation_error(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict (already exists).
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Store(store_err) => store_err.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error indicates an operation attempted out of order.
    pub fn is_state_violation(&self) -> bool {
        match self {
            Error::Orchestrator(orchestrator_err) => orchestrator_err.is_state_violation(),
            Error::Protocol(protocol_err) => protocol_err.is_state_violation(),
            _ => false,
        }
    }

    /// Check if this error is a commitment binding failure.
    pub fn is_verification_failure(&self) -> bool {
        match self {
            Error::Protocol(protocol_err) => protocol_err.is_verification_failure(),
            _ => false,
        }
    }

    /// Check if this error is a boundary decode failure.
    pub fn is_malformed(&self) -> bool {
        match self {
            Error::Serialize(_) => true,
            Error::Telemetry(telemetry_err) => telemetry_err.is_malformed(),
            _ => false,
        }
    }
}
