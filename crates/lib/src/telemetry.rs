//! Wire-format telemetry records observed at the boundary.
//!
//! Telemetry and configuration arrive as JSON from device agents. Parsing
//! lives here so the engines themselves only ever see structured records.
//! Malformed payloads fail the ingesting call: silently dropping unparsable
//! security telemetry is unsafe.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding or validating boundary payloads.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TelemetryError {
    /// The event payload could not be decoded.
    #[error("Malformed telemetry event: {0}")]
    MalformedEvent(String),

    /// The threshold-configuration payload could not be decoded.
    #[error("Malformed threshold configuration: {0}")]
    MalformedConfig(String),

    /// A configuration field failed validation.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidConfigValue { field: String, reason: String },

    /// A required identifier was empty.
    #[error("Empty identifier: {0}")]
    EmptyIdentifier(&'static str),

    /// An enumerated value was outside its closed set.
    #[error("Unknown {what}: '{value}'")]
    UnknownVariant { what: &'static str, value: String },
}

impl TelemetryError {
    /// Check if this is a decode failure.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            TelemetryError::MalformedEvent(_) | TelemetryError::MalformedConfig(_)
        )
    }

    /// Check if this is a validation error.
    pub fn is_validation_error(&self) -> bool {
        true
    }
}

// Conversion from TelemetryError to the main Error type
impl From<TelemetryError> for crate::Error {
    fn from(err: TelemetryError) -> Self {
        crate::Error::Telemetry(err)
    }
}

/// One per-device telemetry event.
///
/// All detection-relevant fields are optional; agents report what they
/// observed. Fields this crate does not understand are preserved in
/// `extra` and ignored by the rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Consecutive failed authentication attempts observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_auth_count: Option<u32>,

    /// When the access occurred (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_time: Option<DateTime<Utc>>,

    /// Compromise-indicator tags reported by the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compromise_indicators: Vec<String>,

    /// Bytes of data accessed during the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_access_volume: Option<u64>,

    /// Agent-specific fields, carried opaquely.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DeviceEvent {
    /// Decode an event from its JSON wire format.
    pub fn from_json(payload: &str) -> Result<Self, TelemetryError> {
        serde_json::from_str(payload).map_err(|e| TelemetryError::MalformedEvent(e.to_string()))
    }
}

/// Detection sensitivity presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSensitivity {
    Low,
    Medium,
    High,
    Critical,
}

impl DetectionSensitivity {
    /// Parse from the wire spelling. Unknown values are rejected, never
    /// coerced to a default.
    pub fn parse(value: &str) -> Result<Self, TelemetryError> {
        match value {
            "low" => Ok(DetectionSensitivity::Low),
            "medium" => Ok(DetectionSensitivity::Medium),
            "high" => Ok(DetectionSensitivity::High),
            "critical" => Ok(DetectionSensitivity::Critical),
            other => Err(TelemetryError::UnknownVariant {
                what: "detection sensitivity",
                value: other.to_string(),
            }),
        }
    }
}

/// Partial update to the detection configuration.
///
/// Absent fields leave the existing configuration untouched; updates merge,
/// never replace wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_auth_threshold: Option<u32>,

    /// Fraction in (0, 1]; see `DetectionConfig` for semantics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unusual_access_pattern_threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_sensitivity: Option<DetectionSensitivity>,

    /// Absolute data-volume threshold in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume_threshold: Option<u64>,

    /// Multiple of a device's baseline volume that counts as a spike.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_spike_multiplier: Option<f64>,

    /// Severity at and above which responses auto-trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_response_threshold: Option<u8>,

    /// Retention cap for the active-incident store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_active_incidents: Option<usize>,

    /// Samples required before a baseline is trusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_min_samples: Option<u64>,
}

impl ThresholdUpdate {
    /// Decode a partial update from its JSON wire format.
    pub fn from_json(payload: &str) -> Result<Self, TelemetryError> {
        serde_json::from_str(payload).map_err(|e| TelemetryError::MalformedConfig(e.to_string()))
    }
}
