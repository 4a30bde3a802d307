//! JSON boundary adapters.
//!
//! The core API passes structs; these helpers are the thin serialization
//! seam for callers that speak JSON at the edge.

use crate::{
    Result,
    detection::SecurityIncident,
    orchestrator::IncidentStatusReport,
    protocol::SyncStatusReport,
    telemetry::{DeviceEvent, ThresholdUpdate},
};

/// Decode a telemetry event from its JSON wire format.
pub fn parse_device_event(payload: &str) -> Result<DeviceEvent> {
    Ok(DeviceEvent::from_json(payload)?)
}

/// Decode a partial threshold update from its JSON wire format.
pub fn parse_threshold_update(payload: &str) -> Result<ThresholdUpdate> {
    Ok(ThresholdUpdate::from_json(payload)?)
}

/// Serialize an incident status report for the wire.
pub fn incident_status_to_json(report: &IncidentStatusReport) -> Result<String> {
    Ok(serde_json::to_string(report)?)
}

/// Serialize a synchronization status report for the wire.
pub fn sync_status_to_json(report: &SyncStatusReport) -> Result<String> {
    Ok(serde_json::to_string(report)?)
}

/// Serialize a list of incidents for the wire.
pub fn incidents_to_json(incidents: &[SecurityIncident]) -> Result<String> {
    Ok(serde_json::to_string(incidents)?)
}
