//! Emergency rotation orchestrator.
//!
//! Owns the incident response state machine:
//!
//! ```text
//! Detected -> ResponseInitiated -> (Isolating | KeyInvalidating, any order)
//!          -> Rotating -> Recovering -> Resolved
//! ```
//!
//! Isolation and key invalidation are irreversible once performed; a
//! device's access is never restored until its incident reaches the
//! terminal `Resolved` state. Key generation is delegated to an injected
//! [`KeyMaterialProvider`]; the orchestrator only ever handles opaque key
//! identifiers, never key bytes.
//!
//! Each incident is one atomically guarded record, so operations against
//! different incidents run in parallel while same-incident transitions
//! serialize.

mod errors;

pub use errors::OrchestratorError;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Result,
    audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditLog},
    backend::{InMemoryStore, StateStore},
    clock::{Clock, SystemClock},
};

/// The closed set of conditions that can start an emergency response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyTrigger {
    SecurityBreach,
    CompromisedDevice,
    SuspiciousActivity,
    KeyExposureRisk,
    SystemIntrusion,
    MalwareDetection,
    UnauthorizedAccess,
    DataLeakage,
    PhysicalCompromise,
    ManualTrigger,
}

impl EmergencyTrigger {
    /// Parse from the wire spelling, rejecting unknown values before any
    /// state is created.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "security_breach" => Ok(EmergencyTrigger::SecurityBreach),
            "compromised_device" => Ok(EmergencyTrigger::CompromisedDevice),
            "suspicious_activity" => Ok(EmergencyTrigger::SuspiciousActivity),
            "key_exposure_risk" => Ok(EmergencyTrigger::KeyExposureRisk),
            "system_intrusion" => Ok(EmergencyTrigger::SystemIntrusion),
            "malware_detection" => Ok(EmergencyTrigger::MalwareDetection),
            "unauthorized_access" => Ok(EmergencyTrigger::UnauthorizedAccess),
            "data_leakage" => Ok(EmergencyTrigger::DataLeakage),
            "physical_compromise" => Ok(EmergencyTrigger::PhysicalCompromise),
            "manual_trigger" => Ok(EmergencyTrigger::ManualTrigger),
            other => Err(OrchestratorError::UnknownTriggerType(other.to_string()).into()),
        }
    }

    /// Triggers whose affected devices are isolated immediately when the
    /// response is initiated, regardless of severity.
    fn isolates_immediately(&self) -> bool {
        matches!(
            self,
            EmergencyTrigger::CompromisedDevice
                | EmergencyTrigger::PhysicalCompromise
                | EmergencyTrigger::SystemIntrusion
        )
    }
}

/// Position of a response in the incident state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Detected,
    ResponseInitiated,
    Isolating,
    KeyInvalidating,
    Rotating,
    Recovering,
    Resolved,
}

impl ResponseStatus {
    /// Whether isolation/invalidation bookkeeping may still move the status.
    fn accepts_containment(&self) -> bool {
        matches!(
            self,
            ResponseStatus::Detected
                | ResponseStatus::ResponseInitiated
                | ResponseStatus::Isolating
                | ResponseStatus::KeyInvalidating
        )
    }
}

/// Progress of post-rotation recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    NotStarted,
    InProgress,
    Complete,
}

/// The closed set of response actions recorded in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    IsolateDevice,
    InvalidateKey,
    EmergencyRotation,
    RecoveryStep,
    AccessRestore,
}

/// One entry in a response's chronological action log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub id: String,
    pub kind: ActionKind,
    pub target: String,
    pub executed_at: DateTime<Utc>,
    pub detail: String,
}

/// An emergency incident as tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyIncident {
    pub id: String,
    pub trigger: EmergencyTrigger,
    /// Severity on a 1-10 scale.
    pub severity: u8,
    pub detected_at: DateTime<Utc>,
    pub affected_devices: Vec<String>,
    pub description: String,
    /// Whether the response was started automatically.
    pub auto_triggered: bool,
    /// Deadline for the response; tighter for high-severity incidents.
    pub response_deadline: DateTime<Utc>,
}

/// Result of executing an emergency rotation across devices.
///
/// Per-device provider failures are reported here rather than thrown, so a
/// partial rotation never leaves the incident half-mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationOutcome {
    /// Newly issued key identifiers, at least one per rotated device.
    pub rotated_keys: Vec<String>,
    /// Devices the key-material provider could not serve.
    pub failed_devices: Vec<String>,
}

/// A recovery plan generated once rotation has executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub incident_id: String,
    pub steps: Vec<RecoveryStep>,
    pub created_at: DateTime<Utc>,
}

/// One ordered recovery step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub name: String,
    pub description: String,
}

/// Mutable response state for one incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyResponse {
    pub incident_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ResponseStatus,
    pub actions: Vec<ResponseAction>,
    pub devices_isolated: Vec<String>,
    pub keys_invalidated: Vec<String>,
    pub recovery_status: RecoveryStatus,
    /// Recovery must never leave the legitimate user locked out of their
    /// own data; this flag stays true through the whole lifecycle.
    pub data_accessibility: bool,
    pub rotation: Option<RotationOutcome>,
    pub recovery_plan: Option<RecoveryPlan>,
}

/// Serializable snapshot returned by [`EmergencyOrchestrator::get_incident_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentStatusReport {
    pub incident: EmergencyIncident,
    pub response: EmergencyResponse,
    pub isolated_devices: Vec<String>,
    pub invalidated_keys: Vec<String>,
}

/// Supplier of fresh key identifiers during rotation.
///
/// Actual key material never passes through this core; providers hand back
/// opaque identifiers for keys generated elsewhere.
pub trait KeyMaterialProvider: Send + Sync {
    /// Issue a new key identifier for the given device.
    fn issue_key(&self, device_id: &str) -> std::result::Result<String, String>;
}

/// Default provider issuing random opaque identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidKeyProvider;

impl KeyMaterialProvider for UuidKeyProvider {
    fn issue_key(&self, _device_id: &str) -> std::result::Result<String, String> {
        Ok(Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IncidentRecord {
    incident: EmergencyIncident,
    response: EmergencyResponse,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Severity at and above which responses start without manual
    /// intervention.
    pub auto_response_threshold: u8,
    /// Response deadline for incidents at or above the auto threshold.
    pub urgent_response_minutes: i64,
    /// Response deadline for everything else.
    pub standard_response_minutes: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_response_threshold: 8,
            urgent_response_minutes: 5,
            standard_response_minutes: 15,
        }
    }
}

/// Drives emergency responses: isolation, key invalidation, rotation, and
/// recovery.
pub struct EmergencyOrchestrator {
    config: OrchestratorConfig,
    incidents: Arc<dyn StateStore<IncidentRecord>>,
    isolated_devices: Arc<dyn StateStore<DateTime<Utc>>>,
    invalidated_keys: Arc<dyn StateStore<DateTime<Utc>>>,
    key_provider: Arc<dyn KeyMaterialProvider>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl EmergencyOrchestrator {
    /// Create an orchestrator with in-memory stores, the system clock, and
    /// the default key provider.
    pub fn new() -> Self {
        Self::with_parts(
            OrchestratorConfig::default(),
            Arc::new(UuidKeyProvider),
            Arc::new(SystemClock),
            MemoryAuditLog::shared(),
        )
    }

    /// Create an orchestrator with injected collaborators.
    pub fn with_parts(
        config: OrchestratorConfig,
        key_provider: Arc<dyn KeyMaterialProvider>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            incidents: Arc::new(InMemoryStore::new()),
            isolated_devices: Arc::new(InMemoryStore::new()),
            invalidated_keys: Arc::new(InMemoryStore::new()),
            key_provider,
            clock,
            audit,
        }
    }

    /// Open an emergency incident and, for severities at or above the
    /// configured cutoff, start the response automatically.
    ///
    /// An empty device list is accepted; unknown trigger types and
    /// out-of-range severities are rejected before any state is created.
    /// Returns the globally unique incident id.
    pub fn trigger_emergency_rotation(
        &self,
        trigger_type: &str,
        description: &str,
        affected_devices: Vec<String>,
        severity: u8,
    ) -> Result<String> {
        let trigger = EmergencyTrigger::parse(trigger_type)?;
        if !(1..=10).contains(&severity) {
            return Err(OrchestratorError::InvalidSeverity(severity).into());
        }

        let now = self.clock.now_utc();
        let auto = severity >= self.config.auto_response_threshold;
        let deadline_minutes = if auto {
            self.config.urgent_response_minutes
        } else {
            self.config.standard_response_minutes
        };
        let incident_id = Uuid::new_v4().to_string();
        let incident = EmergencyIncident {
            id: incident_id.clone(),
            trigger,
            severity,
            detected_at: now,
            affected_devices,
            description: description.to_string(),
            auto_triggered: auto,
            response_deadline: now + Duration::minutes(deadline_minutes),
        };
        let response = EmergencyResponse {
            incident_id: incident_id.clone(),
            started_at: None,
            completed_at: None,
            status: ResponseStatus::Detected,
            actions: Vec::new(),
            devices_isolated: Vec::new(),
            keys_invalidated: Vec::new(),
            recovery_status: RecoveryStatus::NotStarted,
            data_accessibility: true,
            rotation: None,
            recovery_plan: None,
        };

        self.incidents
            .insert_new(&incident_id, IncidentRecord { incident, response })?;

        tracing::warn!(
            incident_id = %incident_id,
            trigger = trigger_type,
            severity,
            "Emergency incident opened"
        );
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::IncidentDetected,
                self.clock.as_ref(),
                format!("Emergency incident opened: {description}"),
            )
            .with_subject(incident_id.clone()),
        );

        if auto {
            self.initiate_emergency_response(&incident_id)?;
        }

        Ok(incident_id)
    }

    /// Start the response for an incident and execute trigger-specific
    /// immediate actions.
    ///
    /// Compromised-device, physical-compromise, and system-intrusion
    /// triggers isolate all affected devices without a separate call;
    /// other triggers isolate only when severity is at or above the
    /// auto-response cutoff. Calling this again for an already initiated
    /// incident is harmless.
    pub fn initiate_emergency_response(&self, incident_id: &str) -> Result<()> {
        let record = self
            .incidents
            .get(incident_id)
            .ok_or_else(|| OrchestratorError::IncidentNotFound(incident_id.to_string()))?;

        let now = self.clock.now_utc();
        self.incidents.update(incident_id, &mut |record| {
            if record.response.started_at.is_none() {
                record.response.started_at = Some(now);
            }
            if record.response.status == ResponseStatus::Detected {
                record.response.status = ResponseStatus::ResponseInitiated;
            }
        });

        tracing::info!(incident_id = %incident_id, "Emergency response initiated");
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::ResponseInitiated,
                self.clock.as_ref(),
                format!("Response initiated for trigger {:?}", record.incident.trigger),
            )
            .with_subject(incident_id.to_string()),
        );

        let isolate_all = record.incident.trigger.isolates_immediately()
            || record.incident.severity >= self.config.auto_response_threshold;
        if isolate_all {
            for device_id in &record.incident.affected_devices {
                self.isolate_device(device_id, incident_id)?;
            }
        }

        Ok(())
    }

    /// Isolate a device as part of an incident's containment.
    ///
    /// Idempotent: the first call logs an action and updates the isolated
    /// set; repeats succeed silently without duplicating bookkeeping.
    pub fn isolate_device(&self, device_id: &str, incident_id: &str) -> Result<()> {
        if !self.incidents.contains(incident_id) {
            return Err(OrchestratorError::IncidentNotFound(incident_id.to_string()).into());
        }

        let now = self.clock.now_utc();
        let mut first_isolation = false;
        self.incidents.update(incident_id, &mut |record| {
            if record.response.devices_isolated.iter().any(|d| d == device_id) {
                return;
            }
            first_isolation = true;
            record.response.devices_isolated.push(device_id.to_string());
            record.response.actions.push(ResponseAction {
                id: Uuid::new_v4().to_string(),
                kind: ActionKind::IsolateDevice,
                target: device_id.to_string(),
                executed_at: now,
                detail: format!("Device {device_id} isolated for incident {incident_id}"),
            });
            if record.response.status.accepts_containment() {
                record.response.status = ResponseStatus::Isolating;
            }
        });

        if first_isolation {
            self.isolated_devices
                .update_or_insert(device_id, &mut || now, &mut |_| {});
            tracing::info!(incident_id = %incident_id, device_id, "Device isolated");
            self.audit.record(
                AuditEvent::new(
                    AuditEventKind::DeviceIsolated,
                    self.clock.as_ref(),
                    format!("Device isolated for incident {incident_id}"),
                )
                .with_device(device_id)
                .with_subject(incident_id.to_string()),
            );
        }

        Ok(())
    }

    /// Invalidate a key as part of an incident's containment.
    ///
    /// Idempotent, with the same bookkeeping contract as
    /// [`Self::isolate_device`]. Key invalidation has no rollback.
    pub fn invalidate_key(&self, key_id: &str, incident_id: &str) -> Result<()> {
        if !self.incidents.contains(incident_id) {
            return Err(OrchestratorError::IncidentNotFound(incident_id.to_string()).into());
        }

        let now = self.clock.now_utc();
        let mut first_invalidation = false;
        self.incidents.update(incident_id, &mut |record| {
            if record.response.keys_invalidated.iter().any(|k| k == key_id) {
                return;
            }
            first_invalidation = true;
            record.response.keys_invalidated.push(key_id.to_string());
            record.response.actions.push(ResponseAction {
                id: Uuid::new_v4().to_string(),
                kind: ActionKind::InvalidateKey,
                target: key_id.to_string(),
                executed_at: now,
                detail: format!("Key {key_id} invalidated for incident {incident_id}"),
            });
            if record.response.status.accepts_containment() {
                record.response.status = ResponseStatus::KeyInvalidating;
            }
        });

        if first_invalidation {
            self.invalidated_keys
                .update_or_insert(key_id, &mut || now, &mut |_| {});
            tracing::info!(incident_id = %incident_id, key_id, "Key invalidated");
            self.audit.record(
                AuditEvent::new(
                    AuditEventKind::KeyInvalidated,
                    self.clock.as_ref(),
                    format!("Key invalidated for incident {incident_id}"),
                )
                .with_subject(incident_id.to_string()),
            );
        }

        Ok(())
    }

    /// Execute the emergency rotation for an incident's devices.
    ///
    /// Requests at least one fresh key identifier per device from the
    /// key-material provider. Per-device provider failures are captured in
    /// the returned [`RotationOutcome`] rather than thrown; the remaining
    /// devices still rotate. A recovery plan is recorded so recovery can
    /// follow.
    pub fn execute_emergency_rotation(
        &self,
        incident_id: &str,
        device_ids: &[String],
    ) -> Result<RotationOutcome> {
        if !self.incidents.contains(incident_id) {
            return Err(OrchestratorError::IncidentNotFound(incident_id.to_string()).into());
        }

        let mut outcome = RotationOutcome::default();
        for device_id in device_ids {
            match self.key_provider.issue_key(device_id) {
                Ok(key_id) => outcome.rotated_keys.push(key_id),
                Err(reason) => {
                    tracing::warn!(incident_id = %incident_id, device_id, %reason, "Key issuance failed");
                    outcome.failed_devices.push(device_id.clone());
                }
            }
        }

        let now = self.clock.now_utc();
        let plan = RecoveryPlan {
            incident_id: incident_id.to_string(),
            steps: vec![
                RecoveryStep {
                    name: "validate_data_integrity".to_string(),
                    description: "Validate data integrity across affected devices".to_string(),
                },
                RecoveryStep {
                    name: "reencrypt_data".to_string(),
                    description: "Re-encrypt affected data under the rotated keys".to_string(),
                },
                RecoveryStep {
                    name: "validate_user_access".to_string(),
                    description: "Confirm the legitimate user can still reach their data"
                        .to_string(),
                },
            ],
            created_at: now,
        };

        let rotated = outcome.rotated_keys.len();
        self.incidents.update(incident_id, &mut |record| {
            record.response.status = ResponseStatus::Rotating;
            record.response.rotation = Some(outcome.clone());
            record.response.recovery_plan = Some(plan.clone());
            record.response.actions.push(ResponseAction {
                id: Uuid::new_v4().to_string(),
                kind: ActionKind::EmergencyRotation,
                target: incident_id.to_string(),
                executed_at: now,
                detail: format!("Rotated {rotated} keys across {} devices", device_ids.len()),
            });
        });

        tracing::info!(
            incident_id = %incident_id,
            rotated,
            failed = outcome.failed_devices.len(),
            "Emergency rotation executed"
        );
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::EmergencyRotation,
                self.clock.as_ref(),
                format!("Emergency rotation issued {rotated} new keys"),
            )
            .with_subject(incident_id.to_string()),
        );

        Ok(outcome)
    }

    /// Run recovery for an incident whose rotation already executed.
    ///
    /// Walks the recorded recovery plan, then moves the incident to the
    /// terminal `Resolved` state. Data accessibility remains true
    /// throughout: recovery never locks the legitimate user out.
    pub fn initiate_recovery(&self, incident_id: &str) -> Result<()> {
        if !self.incidents.contains(incident_id) {
            return Err(OrchestratorError::IncidentNotFound(incident_id.to_string()).into());
        }

        let now = self.clock.now_utc();
        let mut result: Result<Vec<RecoveryStep>> =
            Err(OrchestratorError::IncidentNotFound(incident_id.to_string()).into());
        self.incidents.update(incident_id, &mut |record| {
            let Some(plan) = record.response.recovery_plan.clone() else {
                result = Err(
                    OrchestratorError::RecoveryPlanNotFound(incident_id.to_string()).into(),
                );
                return;
            };
            record.response.status = ResponseStatus::Recovering;
            record.response.recovery_status = RecoveryStatus::InProgress;
            for step in &plan.steps {
                record.response.actions.push(ResponseAction {
                    id: Uuid::new_v4().to_string(),
                    kind: ActionKind::RecoveryStep,
                    target: step.name.clone(),
                    executed_at: now,
                    detail: step.description.clone(),
                });
            }
            record.response.recovery_status = RecoveryStatus::Complete;
            record.response.status = ResponseStatus::Resolved;
            record.response.completed_at = Some(now);
            record.response.data_accessibility = true;
            result = Ok(plan.steps);
        });

        let steps = result?;
        tracing::info!(incident_id = %incident_id, steps = steps.len(), "Recovery completed");
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::RecoveryStarted,
                self.clock.as_ref(),
                format!("Recovery started with {} steps", steps.len()),
            )
            .with_subject(incident_id.to_string()),
        );
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::RecoveryCompleted,
                self.clock.as_ref(),
                "Recovery completed; incident resolved".to_string(),
            )
            .with_subject(incident_id.to_string()),
        );
        Ok(())
    }

    /// Clear a device's isolation once its incident is fully resolved.
    ///
    /// Fails with a state violation while rotation and recovery have not
    /// both completed, and with [`OrchestratorError::DeviceNotIsolated`]
    /// when the device holds no isolation to clear.
    pub fn restore_device_access(&self, device_id: &str, incident_id: &str) -> Result<()> {
        let record = self
            .incidents
            .get(incident_id)
            .ok_or_else(|| OrchestratorError::IncidentNotFound(incident_id.to_string()))?;

        if record.response.status != ResponseStatus::Resolved {
            return Err(OrchestratorError::AccessRestorationBlocked {
                incident_id: incident_id.to_string(),
            }
            .into());
        }

        if self.isolated_devices.remove(device_id).is_none() {
            return Err(OrchestratorError::DeviceNotIsolated {
                device_id: device_id.to_string(),
            }
            .into());
        }

        let now = self.clock.now_utc();
        self.incidents.update(incident_id, &mut |record| {
            record.response.actions.push(ResponseAction {
                id: Uuid::new_v4().to_string(),
                kind: ActionKind::AccessRestore,
                target: device_id.to_string(),
                executed_at: now,
                detail: format!("Access restored for device {device_id}"),
            });
        });

        tracing::info!(incident_id = %incident_id, device_id, "Device access restored");
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::AccessRestored,
                self.clock.as_ref(),
                format!("Access restored after incident {incident_id}"),
            )
            .with_device(device_id)
            .with_subject(incident_id.to_string()),
        );
        Ok(())
    }

    /// Whether a device is currently isolated under any incident.
    pub fn is_device_isolated(&self, device_id: &str) -> bool {
        self.isolated_devices.contains(device_id)
    }

    /// Whether a key has been invalidated.
    pub fn is_key_invalidated(&self, key_id: &str) -> bool {
        self.invalidated_keys.contains(key_id)
    }

    /// Full status snapshot for one incident.
    pub fn get_incident_status(&self, incident_id: &str) -> Result<IncidentStatusReport> {
        let record = self
            .incidents
            .get(incident_id)
            .ok_or_else(|| OrchestratorError::IncidentNotFound(incident_id.to_string()))?;

        let isolated_devices = record
            .response
            .devices_isolated
            .iter()
            .filter(|device| self.isolated_devices.contains(device))
            .cloned()
            .collect();
        let invalidated_keys = record.response.keys_invalidated.clone();

        Ok(IncidentStatusReport {
            incident: record.incident,
            response: record.response,
            isolated_devices,
            invalidated_keys,
        })
    }
}

impl Default for EmergencyOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
