use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use keywarden::{
    FixedClock, IncidentDetectionEngine,
    audit::MemoryAuditLog,
    backend::InMemoryStore,
    detection::DetectionConfig,
    orchestrator::{EmergencyOrchestrator, KeyMaterialProvider, OrchestratorConfig},
    protocol::RotationCoordinator,
    telemetry::DeviceEvent,
};

/// A detection engine pinned to a fixed clock, with its audit log exposed.
pub fn detection_engine() -> (IncidentDetectionEngine, Arc<FixedClock>, Arc<MemoryAuditLog>) {
    detection_engine_with(DetectionConfig::default())
}

pub fn detection_engine_with(
    config: DetectionConfig,
) -> (IncidentDetectionEngine, Arc<FixedClock>, Arc<MemoryAuditLog>) {
    let clock = Arc::new(FixedClock::default());
    let audit = MemoryAuditLog::shared();
    let engine = IncidentDetectionEngine::with_parts(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryStore::new()),
        clock.clone(),
        audit.clone(),
    );
    (engine, clock, audit)
}

/// An orchestrator pinned to a fixed clock, with the default key provider.
pub fn orchestrator() -> (EmergencyOrchestrator, Arc<FixedClock>, Arc<MemoryAuditLog>) {
    orchestrator_with_provider(Arc::new(keywarden::orchestrator::UuidKeyProvider))
}

pub fn orchestrator_with_provider(
    provider: Arc<dyn KeyMaterialProvider>,
) -> (EmergencyOrchestrator, Arc<FixedClock>, Arc<MemoryAuditLog>) {
    let clock = Arc::new(FixedClock::default());
    let audit = MemoryAuditLog::shared();
    let orchestrator = EmergencyOrchestrator::with_parts(
        OrchestratorConfig::default(),
        provider,
        clock.clone(),
        audit.clone(),
    );
    (orchestrator, clock, audit)
}

/// A rotation coordinator pinned to a fixed clock.
pub fn coordinator(device_id: &str) -> (RotationCoordinator, Arc<FixedClock>, Arc<MemoryAuditLog>) {
    let clock = Arc::new(FixedClock::default());
    let audit = MemoryAuditLog::shared();
    let coordinator = RotationCoordinator::with_parts(device_id, clock.clone(), audit.clone());
    (coordinator, clock, audit)
}

/// A telemetry event accessed at the given hour of day.
pub fn event_at_hour(hour: u32) -> DeviceEvent {
    DeviceEvent {
        access_time: Some(timestamp_at_hour(hour)),
        ..Default::default()
    }
}

pub fn timestamp_at_hour(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

/// A telemetry event carrying only a failed-auth count.
pub fn failed_auth_event(count: u32) -> DeviceEvent {
    DeviceEvent {
        failed_auth_count: Some(count),
        ..Default::default()
    }
}

/// A telemetry event carrying an access volume at a business hour.
pub fn volume_event(bytes: u64) -> DeviceEvent {
    DeviceEvent {
        access_time: Some(timestamp_at_hour(14)),
        data_access_volume: Some(bytes),
        ..Default::default()
    }
}
