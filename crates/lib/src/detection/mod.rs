//! Incident detection engine.
//!
//! Ingests per-device telemetry events, judges them against the device's
//! own [`DeviceBaseline`] (or global defaults while no baseline exists),
//! and records [`SecurityIncident`]s. Four independent rules are evaluated
//! per event: failed authentication, unusual access hours, compromise
//! indicators, and data-volume spikes. Every event updates the device's
//! baseline regardless of whether it fired a rule.
//!
//! The active-incident store is bounded: past the configured cap the oldest
//! incidents are evicted so sustained event volume cannot grow memory
//! without limit.

mod errors;

pub use errors::DetectionError;

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Result,
    audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditLog},
    backend::{InMemoryStore, StateStore},
    baseline::{BaselineConfig, DeviceBaseline},
    clock::{Clock, SystemClock},
    telemetry::{DetectionSensitivity, DeviceEvent, ThresholdUpdate},
};

/// The closed set of incident classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    FailedAuthenticationAttempts,
    UnusualAccessPatterns,
    SuspiciousDeviceActivity,
    PotentialDataBreach,
    MalwareIndicators,
    UnauthorizedDeviceAccess,
    KeyExposureRisk,
    SystemCompromise,
}

/// A detected anomalous condition attributed to one or more devices.
///
/// Immutable once created, except for the auto-response flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityIncident {
    /// Unique incident id.
    pub id: String,
    /// Classification.
    pub incident_type: IncidentType,
    /// When the incident was detected.
    pub detected_at: DateTime<Utc>,
    /// Detection confidence in (0, 1].
    pub confidence: f64,
    /// Severity on a 1-10 scale.
    pub severity: u8,
    /// Devices implicated in the incident.
    pub affected_devices: Vec<String>,
    /// Human-readable description.
    pub description: String,
    /// The observations that fired the rule.
    pub indicators: Vec<String>,
    /// Whether an automated response was triggered for this incident.
    pub auto_response_triggered: bool,
}

/// Detection thresholds and policy parameters.
///
/// All fields are runtime-tunable through [`ThresholdUpdate`] merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Failed-auth counts strictly above this fire an incident.
    pub failed_auth_threshold: u32,
    /// Fraction in (0, 1] controlling how far below a device's peak hourly
    /// share an hour may fall before it counts as unusual.
    pub unusual_access_pattern_threshold: f64,
    /// Absolute data-volume threshold in bytes, applied while a device has
    /// no established baseline.
    pub data_volume_threshold: u64,
    /// Multiple of a device's baseline volume that counts as a spike.
    pub volume_spike_multiplier: f64,
    /// Sensitivity preset; sets the minimum rule confidence that is
    /// reported as an incident.
    pub detection_sensitivity: DetectionSensitivity,
    /// Severity at and above which the auto-response flag is set.
    pub auto_response_threshold: u8,
    /// Retention cap for the active-incident store.
    pub max_active_incidents: usize,
    /// Baseline learning tunables.
    pub baseline: BaselineConfig,
    /// Recognized compromise-indicator tags. Tags outside this vocabulary
    /// are ignored, never treated as evidence.
    pub compromise_indicators: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            failed_auth_threshold: 5,
            unusual_access_pattern_threshold: 0.8,
            data_volume_threshold: 1_000_000,
            volume_spike_multiplier: 3.0,
            detection_sensitivity: DetectionSensitivity::High,
            auto_response_threshold: 8,
            max_active_incidents: 512,
            baseline: BaselineConfig::default(),
            compromise_indicators: vec![
                "multiple_failed_biometric".to_string(),
                "unknown_location_access".to_string(),
                "unusual_timing".to_string(),
                "modified_device_fingerprint".to_string(),
                "suspicious_network_activity".to_string(),
                "system_intrusion".to_string(),
                "malware_detection".to_string(),
            ],
        }
    }
}

impl DetectionConfig {
    /// Business-hours fallback window for devices without a baseline:
    /// access before this hour is unusual.
    pub const BUSINESS_HOURS_START: u32 = 6;
    /// Access at or after this hour is unusual absent a baseline.
    pub const BUSINESS_HOURS_END: u32 = 23;

    fn confidence_floor(&self) -> f64 {
        match self.detection_sensitivity {
            DetectionSensitivity::Low => 0.8,
            DetectionSensitivity::Medium => 0.7,
            DetectionSensitivity::High => 0.6,
            DetectionSensitivity::Critical => 0.0,
        }
    }
}

/// Automated security incident detection over per-device telemetry.
pub struct IncidentDetectionEngine {
    config: RwLock<DetectionConfig>,
    incidents: Arc<dyn StateStore<SecurityIncident>>,
    baselines: Arc<dyn StateStore<DeviceBaseline>>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl IncidentDetectionEngine {
    /// Create an engine with in-memory stores and the system clock.
    pub fn new() -> Self {
        Self::with_parts(
            DetectionConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
            MemoryAuditLog::shared(),
        )
    }

    /// Create an engine with injected stores, clock, and audit sink.
    pub fn with_parts(
        config: DetectionConfig,
        incidents: Arc<dyn StateStore<SecurityIncident>>,
        baselines: Arc<dyn StateStore<DeviceBaseline>>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            incidents,
            baselines,
            clock,
            audit,
        }
    }

    /// Ingest one telemetry event for a device.
    ///
    /// Evaluates all detection rules against the device's pre-event
    /// baseline, stores any incidents that fired, then folds the event into
    /// the baseline. Returns whether any incident fired.
    pub fn detect_incident(&self, device_id: &str, event: &DeviceEvent) -> Result<bool> {
        if device_id.is_empty() {
            return Err(DetectionError::EmptyDeviceId.into());
        }

        let config = self.config.read().unwrap().clone();
        let baseline = self.baselines.get(device_id);
        let incidents = self.evaluate_rules(device_id, event, &config, baseline.as_ref());
        let fired = !incidents.is_empty();

        for incident in incidents {
            tracing::info!(
                incident_id = %incident.id,
                device_id,
                incident_type = ?incident.incident_type,
                severity = incident.severity,
                "Security incident detected"
            );
            self.audit.record(
                AuditEvent::new(
                    AuditEventKind::IncidentDetected,
                    self.clock.as_ref(),
                    incident.description.clone(),
                )
                .with_device(device_id)
                .with_subject(incident.id.clone()),
            );
            self.store_incident(incident, config.max_active_incidents);
        }

        self.baselines.update_or_insert(
            device_id,
            &mut || DeviceBaseline::new(device_id, self.clock.as_ref()),
            &mut |baseline| baseline.observe(event, &config.baseline, self.clock.as_ref()),
        );

        Ok(fired)
    }

    /// JSON boundary adapter for [`Self::detect_incident`].
    pub fn detect_incident_json(&self, device_id: &str, payload: &str) -> Result<bool> {
        let event = DeviceEvent::from_json(payload)?;
        self.detect_incident(device_id, &event)
    }

    /// Merge a partial threshold update into the current configuration.
    ///
    /// Each present field is validated before anything is applied; a bad
    /// field rejects the whole update.
    pub fn update_thresholds(&self, update: &ThresholdUpdate) -> Result<()> {
        if let Some(threshold) = update.failed_auth_threshold
            && threshold == 0
        {
            return Err(DetectionError::InvalidThreshold {
                field: "failed_auth_threshold",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if let Some(threshold) = update.unusual_access_pattern_threshold
            && !(threshold > 0.0 && threshold <= 1.0)
        {
            return Err(DetectionError::InvalidThreshold {
                field: "unusual_access_pattern_threshold",
                reason: format!("{threshold} is outside (0, 1]"),
            }
            .into());
        }
        if let Some(threshold) = update.data_volume_threshold
            && threshold == 0
        {
            return Err(DetectionError::InvalidThreshold {
                field: "data_volume_threshold",
                reason: "must be at least 1 byte".to_string(),
            }
            .into());
        }
        if let Some(multiplier) = update.volume_spike_multiplier
            && !(multiplier > 1.0)
        {
            return Err(DetectionError::InvalidThreshold {
                field: "volume_spike_multiplier",
                reason: format!("{multiplier} must exceed 1.0"),
            }
            .into());
        }
        if let Some(severity) = update.auto_response_threshold
            && !(1..=10).contains(&severity)
        {
            return Err(DetectionError::InvalidThreshold {
                field: "auto_response_threshold",
                reason: format!("{severity} is outside 1-10"),
            }
            .into());
        }
        if let Some(cap) = update.max_active_incidents
            && cap == 0
        {
            return Err(DetectionError::InvalidThreshold {
                field: "max_active_incidents",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if let Some(samples) = update.baseline_min_samples
            && samples == 0
        {
            return Err(DetectionError::InvalidThreshold {
                field: "baseline_min_samples",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        let mut config = self.config.write().unwrap();
        if let Some(threshold) = update.failed_auth_threshold {
            config.failed_auth_threshold = threshold;
        }
        if let Some(threshold) = update.unusual_access_pattern_threshold {
            config.unusual_access_pattern_threshold = threshold;
        }
        if let Some(sensitivity) = update.detection_sensitivity {
            config.detection_sensitivity = sensitivity;
        }
        if let Some(threshold) = update.data_volume_threshold {
            config.data_volume_threshold = threshold;
        }
        if let Some(multiplier) = update.volume_spike_multiplier {
            config.volume_spike_multiplier = multiplier;
        }
        if let Some(severity) = update.auto_response_threshold {
            config.auto_response_threshold = severity;
        }
        if let Some(cap) = update.max_active_incidents {
            config.max_active_incidents = cap;
        }
        if let Some(samples) = update.baseline_min_samples {
            config.baseline.min_samples = samples;
        }
        tracing::debug!("Detection thresholds updated");
        Ok(())
    }

    /// JSON boundary adapter for [`Self::update_thresholds`].
    pub fn update_thresholds_json(&self, payload: &str) -> Result<()> {
        let update = ThresholdUpdate::from_json(payload)?;
        self.update_thresholds(&update)
    }

    /// Snapshot of all stored incidents, oldest first.
    pub fn get_active_incidents(&self) -> Vec<SecurityIncident> {
        let mut incidents: Vec<SecurityIncident> = self
            .incidents
            .snapshot()
            .into_iter()
            .map(|(_, incident)| incident)
            .collect();
        incidents.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        incidents
    }

    /// Look up one incident by id.
    pub fn incident(&self, incident_id: &str) -> Result<SecurityIncident> {
        self.incidents
            .get(incident_id)
            .ok_or_else(|| DetectionError::IncidentNotFound(incident_id.to_string()).into())
    }

    /// Mark an incident's auto-response flag.
    ///
    /// The only post-creation mutation an incident permits.
    pub fn mark_auto_response_triggered(&self, incident_id: &str) -> Result<()> {
        if self
            .incidents
            .update(incident_id, &mut |incident| {
                incident.auto_response_triggered = true;
            })
        {
            Ok(())
        } else {
            Err(DetectionError::IncidentNotFound(incident_id.to_string()).into())
        }
    }

    /// Snapshot of a device's baseline, if one exists yet.
    pub fn baseline(&self, device_id: &str) -> Option<DeviceBaseline> {
        self.baselines.get(device_id)
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> DetectionConfig {
        self.config.read().unwrap().clone()
    }

    fn evaluate_rules(
        &self,
        device_id: &str,
        event: &DeviceEvent,
        config: &DetectionConfig,
        baseline: Option<&DeviceBaseline>,
    ) -> Vec<SecurityIncident> {
        let mut incidents = Vec::new();
        let established = baseline
            .map(|b| b.is_established(&config.baseline))
            .unwrap_or(false);

        if let Some(count) = event.failed_auth_count
            && count > config.failed_auth_threshold
        {
            let excess = count - config.failed_auth_threshold;
            incidents.push(self.build_incident(
                IncidentType::FailedAuthenticationAttempts,
                device_id,
                format!(
                    "Failed authentication attempts: {count} (threshold {})",
                    config.failed_auth_threshold
                ),
                vec![format!("failed_auth_count={count}")],
                0.9,
                (7 + excess.min(3) as u8).min(10),
                config,
            ));
        }

        if let Some(access_time) = event.access_time {
            let hour = access_time.hour();
            let unusual = match baseline {
                Some(baseline) if established => {
                    !baseline.hour_is_typical(hour, config.unusual_access_pattern_threshold)
                }
                // No trusted baseline yet: judge against the canonical
                // business-hours window, never silently "normal".
                _ => {
                    hour < DetectionConfig::BUSINESS_HOURS_START
                        || hour >= DetectionConfig::BUSINESS_HOURS_END
                }
            };
            if unusual {
                incidents.push(self.build_incident(
                    IncidentType::UnusualAccessPatterns,
                    device_id,
                    format!("Access at unusual hour {hour:02}:00 for this device"),
                    vec![format!("access_hour={hour}")],
                    0.7,
                    6,
                    config,
                ));
            }
        }

        let matched: Vec<String> = event
            .compromise_indicators
            .iter()
            .filter(|tag| config.compromise_indicators.contains(tag))
            .cloned()
            .collect();
        if !matched.is_empty() {
            incidents.push(self.build_incident(
                IncidentType::SuspiciousDeviceActivity,
                device_id,
                format!("Compromise indicators detected: {}", matched.join(", ")),
                matched,
                0.8,
                9,
                config,
            ));
        }

        if let Some(volume) = event.data_access_volume {
            let spike = match baseline.and_then(|b| b.typical_volume()) {
                Some(typical) if established => {
                    volume as f64 > typical * config.volume_spike_multiplier
                }
                _ => volume > config.data_volume_threshold,
            };
            if spike {
                incidents.push(self.build_incident(
                    IncidentType::PotentialDataBreach,
                    device_id,
                    format!("Unusual data access volume: {volume} bytes"),
                    vec![format!("data_access_volume={volume}")],
                    0.6,
                    7,
                    config,
                ));
            }
        }

        let floor = config.confidence_floor();
        incidents.retain(|incident| incident.confidence >= floor);
        incidents
    }

    fn build_incident(
        &self,
        incident_type: IncidentType,
        device_id: &str,
        description: String,
        indicators: Vec<String>,
        confidence: f64,
        severity: u8,
        config: &DetectionConfig,
    ) -> SecurityIncident {
        SecurityIncident {
            id: Uuid::new_v4().to_string(),
            incident_type,
            detected_at: self.clock.now_utc(),
            confidence,
            severity,
            affected_devices: vec![device_id.to_string()],
            description,
            indicators,
            auto_response_triggered: severity >= config.auto_response_threshold,
        }
    }

    fn store_incident(&self, incident: SecurityIncident, cap: usize) {
        while self.incidents.len() >= cap {
            let oldest = self
                .incidents
                .snapshot()
                .into_iter()
                .min_by(|(_, a), (_, b)| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
            match oldest {
                Some((key, _)) => {
                    self.incidents.remove(&key);
                }
                None => break,
            }
        }
        // Uuid keys cannot collide in practice; ignore the duplicate path.
        let key = incident.id.clone();
        let _ = self.incidents.insert_new(&key, incident);
    }
}

impl Default for IncidentDetectionEngine {
    fn default() -> Self {
        Self::new()
    }
}
