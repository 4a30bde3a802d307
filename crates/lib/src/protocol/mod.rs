//! Zero-knowledge cross-device rotation protocol.
//!
//! Devices coordinate a key rotation through a commit-reveal exchange:
//! each participant first pledges a commitment hash binding its rotation
//! proof to a nonce, then reveals the proof so the coordinator can check
//! `hex(sha256(proof || nonce))` against the pledge. Key material itself
//! never crosses this boundary; only hashes, nonces, and opaque proofs do,
//! and none of them leak through the status surface.
//!
//! Session flow:
//!
//! ```text
//! Pending -> CommitmentPhase -> RevealPhase -> VerificationPhase
//!         -> Synchronized           (or Failed with a reason)
//! ```
//!
//! The coordinator runs any number of sessions concurrently; every
//! operation addresses a session by its rotation id. Devices that are
//! offline register a deferral strategy and replay completed sessions
//! later through [`RotationCoordinator::process_delayed_sync`].

mod errors;

pub use errors::ProtocolError;

use std::collections::HashMap;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    Result,
    audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditLog},
    backend::{InMemoryStore, StateStore},
    clock::{Clock, SystemClock},
};

/// Why a rotation session was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    Scheduled,
    Emergency,
}

/// Phase of a rotation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    CommitmentPhase,
    RevealPhase,
    VerificationPhase,
    Synchronized,
    Failed(String),
}

impl SessionState {
    /// Whether the session still accepts protocol messages.
    fn in_flight(&self) -> bool {
        !matches!(self, SessionState::Synchronized | SessionState::Failed(_))
    }
}

/// Progress of one device within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePhase {
    Pending,
    Committed,
    Revealed,
    Verified,
}

/// A device's binding pledge: the hash ties its eventual proof to a nonce
/// without revealing either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCommitment {
    pub device_id: String,
    pub commitment_hash: String,
    pub nonce: String,
    pub timestamp: DateTime<Utc>,
}

/// A device's opened commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceReveal {
    pub device_id: String,
    pub rotation_proof: String,
    pub integrity_hash: String,
    pub completed_at: DateTime<Utc>,
}

/// One coordinated rotation across a set of devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationSession {
    pub rotation_id: String,
    pub initiating_device: String,
    pub participants: Vec<String>,
    pub trigger: RotationTrigger,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub commitments: HashMap<String, DeviceCommitment>,
    pub reveals: HashMap<String, DeviceReveal>,
    pub verifications: HashMap<String, bool>,
    pub device_phases: HashMap<String, DevicePhase>,
}

/// How an offline device wants completed rotations replayed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineSyncStrategy {
    Immediate,
    Scheduled,
    Background,
    OnDemand,
}

impl OfflineSyncStrategy {
    /// Parse from the wire spelling, rejecting unknown values.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "immediate" => Ok(OfflineSyncStrategy::Immediate),
            "scheduled" => Ok(OfflineSyncStrategy::Scheduled),
            "background" => Ok(OfflineSyncStrategy::Background),
            "on_demand" => Ok(OfflineSyncStrategy::OnDemand),
            other => Err(ProtocolError::UnknownSyncStrategy(other.to_string()).into()),
        }
    }
}

/// Deferral record for a device that is currently unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineDeviceRecord {
    pub device_id: String,
    pub strategy: OfflineSyncStrategy,
    pub registered_at: DateTime<Utc>,
    /// Rotation ids started while the device was offline.
    pub pending_rotations: Vec<String>,
}

/// Result of replaying rotations to a device that came back online.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedSyncResult {
    pub device_id: String,
    /// Rotations that completed while the device was offline.
    pub synchronized_rotations: Vec<String>,
    pub sync_success: bool,
}

/// The closed set of recognized synchronization conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ConcurrentRotation,
    VersionMismatch,
    TimingConflict,
    DeviceStateConflict,
    KeyVersionConflict,
}

impl ConflictType {
    /// Parse from the wire spelling, rejecting unknown values.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "concurrent_rotation" => Ok(ConflictType::ConcurrentRotation),
            "version_mismatch" => Ok(ConflictType::VersionMismatch),
            "timing_conflict" => Ok(ConflictType::TimingConflict),
            "device_state_conflict" => Ok(ConflictType::DeviceStateConflict),
            "key_version_conflict" => Ok(ConflictType::KeyVersionConflict),
            other => Err(ProtocolError::UnknownConflictType(other.to_string()).into()),
        }
    }
}

/// The closed set of conflict resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    MostRecentWins,
    DevicePriorityBased,
    UserDecision,
    SafestOption,
    Rollback,
}

impl ResolutionStrategy {
    /// Parse from the wire spelling, rejecting unknown values.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "most_recent_wins" => Ok(ResolutionStrategy::MostRecentWins),
            "device_priority_based" => Ok(ResolutionStrategy::DevicePriorityBased),
            "user_decision" => Ok(ResolutionStrategy::UserDecision),
            "safest_option" => Ok(ResolutionStrategy::SafestOption),
            "rollback" => Ok(ResolutionStrategy::Rollback),
            other => Err(ProtocolError::UnknownResolutionStrategy(other.to_string()).into()),
        }
    }
}

/// Outcome of resolving one synchronization conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict_type: ConflictType,
    pub strategy: ResolutionStrategy,
    /// False when the strategy defers to the user.
    pub resolved: bool,
    /// True whenever the rollback strategy was chosen.
    pub rollback_required: bool,
}

/// Coordinator-level synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synchronized,
    Syncing,
}

/// Aggregate synchronization status.
///
/// Carries counts and timestamps only. Commitment hashes, nonces, proofs,
/// and key-derived values never appear here at any nesting level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub state: SyncState,
    pub online_devices: usize,
    pub offline_devices: usize,
    pub pending_rotations: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub conflicts_detected: u64,
}

/// Coordinates commit-reveal rotation sessions across devices.
pub struct RotationCoordinator {
    device_id: String,
    sessions: Arc<dyn StateStore<RotationSession>>,
    offline: Arc<dyn StateStore<OfflineDeviceRecord>>,
    conflicts_detected: AtomicU64,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

/// Compute the binding hash a commitment must carry for a given proof and
/// nonce.
pub fn commitment_binding(rotation_proof: &str, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rotation_proof.as_bytes());
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}

impl RotationCoordinator {
    /// Create a coordinator for the given local device, with in-memory
    /// stores and the system clock.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::with_parts(device_id, Arc::new(SystemClock), MemoryAuditLog::shared())
    }

    /// Create a coordinator with injected collaborators.
    pub fn with_parts(
        device_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            sessions: Arc::new(InMemoryStore::new()),
            offline: Arc::new(InMemoryStore::new()),
            conflicts_detected: AtomicU64::new(0),
            last_sync: RwLock::new(None),
            clock,
            audit,
        }
    }

    /// The local device this coordinator runs on.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Start a new rotation session across the given participants.
    ///
    /// Rejects an empty participant list and empty device ids. Participants
    /// currently registered as offline get the session queued for later
    /// replay. Returns the new session's rotation id.
    pub fn initiate_rotation(
        &self,
        participants: Vec<String>,
        trigger: RotationTrigger,
    ) -> Result<String> {
        if participants.is_empty() {
            return Err(ProtocolError::EmptyParticipants.into());
        }
        if participants.iter().any(|p| p.is_empty()) {
            return Err(ProtocolError::EmptyField("participant device id").into());
        }

        let rotation_id = Uuid::new_v4().to_string();
        let now = self.clock.now_utc();
        let device_phases = participants
            .iter()
            .map(|p| (p.clone(), DevicePhase::Pending))
            .collect();
        let session = RotationSession {
            rotation_id: rotation_id.clone(),
            initiating_device: self.device_id.clone(),
            participants: participants.clone(),
            trigger,
            state: SessionState::Pending,
            started_at: now,
            commitments: HashMap::new(),
            reveals: HashMap::new(),
            verifications: HashMap::new(),
            device_phases,
        };
        self.sessions.insert_new(&rotation_id, session)?;

        for participant in &participants {
            self.offline.update(participant, &mut |record| {
                record.pending_rotations.push(rotation_id.clone());
            });
        }

        tracing::info!(
            rotation_id = %rotation_id,
            participants = participants.len(),
            ?trigger,
            "Rotation session initiated"
        );
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::RotationInitiated,
                self.clock.as_ref(),
                format!("Rotation initiated across {} devices", participants.len()),
            )
            .with_device(self.device_id.clone())
            .with_subject(rotation_id.clone()),
        );
        Ok(rotation_id)
    }

    /// Record a device's binding pledge for a session.
    ///
    /// When every participant has committed the session advances to the
    /// reveal phase.
    pub fn process_commitment(
        &self,
        rotation_id: &str,
        device_id: &str,
        commitment_hash: &str,
        nonce: &str,
    ) -> Result<()> {
        if device_id.is_empty() {
            return Err(ProtocolError::EmptyField("device id").into());
        }
        if commitment_hash.is_empty() {
            return Err(ProtocolError::EmptyField("commitment hash").into());
        }
        if nonce.is_empty() {
            return Err(ProtocolError::EmptyField("nonce").into());
        }

        let now = self.clock.now_utc();
        let mut result: Result<()> =
            Err(ProtocolError::SessionNotFound(rotation_id.to_string()).into());
        self.sessions.update(rotation_id, &mut |session| {
            if !session.participants.iter().any(|p| p == device_id) {
                result = Err(ProtocolError::NotParticipant {
                    rotation_id: rotation_id.to_string(),
                    device_id: device_id.to_string(),
                }
                .into());
                return;
            }
            if !matches!(
                session.state,
                SessionState::Pending | SessionState::CommitmentPhase
            ) {
                result = Err(ProtocolError::PhaseViolation {
                    rotation_id: rotation_id.to_string(),
                    message: "commitment",
                }
                .into());
                return;
            }
            session.state = SessionState::CommitmentPhase;
            session.commitments.insert(
                device_id.to_string(),
                DeviceCommitment {
                    device_id: device_id.to_string(),
                    commitment_hash: commitment_hash.to_string(),
                    nonce: nonce.to_string(),
                    timestamp: now,
                },
            );
            session
                .device_phases
                .insert(device_id.to_string(), DevicePhase::Committed);
            if session.commitments.len() == session.participants.len() {
                session.state = SessionState::RevealPhase;
            }
            result = Ok(());
        });
        result?;

        tracing::debug!(rotation_id = %rotation_id, device_id, "Commitment recorded");
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::CommitmentRecorded,
                self.clock.as_ref(),
                "Commitment pledge recorded".to_string(),
            )
            .with_device(device_id)
            .with_subject(rotation_id.to_string()),
        );
        Ok(())
    }

    /// Open a device's commitment and verify the binding.
    ///
    /// Fails with [`ProtocolError::InvalidCommitmentVerification`] when the
    /// device never committed, the proof is empty, or
    /// `hex(sha256(proof || nonce))` does not match the pledged hash. When
    /// every participant has revealed the session advances to the
    /// verification phase.
    pub fn process_reveal(
        &self,
        rotation_id: &str,
        device_id: &str,
        rotation_proof: &str,
        integrity_hash: &str,
    ) -> Result<()> {
        if device_id.is_empty() {
            return Err(ProtocolError::EmptyField("device id").into());
        }

        let now = self.clock.now_utc();
        let mut result: Result<()> =
            Err(ProtocolError::SessionNotFound(rotation_id.to_string()).into());
        self.sessions.update(rotation_id, &mut |session| {
            if !session.participants.iter().any(|p| p == device_id) {
                result = Err(ProtocolError::NotParticipant {
                    rotation_id: rotation_id.to_string(),
                    device_id: device_id.to_string(),
                }
                .into());
                return;
            }
            if !matches!(
                session.state,
                SessionState::CommitmentPhase | SessionState::RevealPhase
            ) {
                result = Err(ProtocolError::PhaseViolation {
                    rotation_id: rotation_id.to_string(),
                    message: "reveal",
                }
                .into());
                return;
            }
            let Some(commitment) = session.commitments.get(device_id) else {
                result = Err(ProtocolError::InvalidCommitmentVerification.into());
                return;
            };
            if rotation_proof.is_empty()
                || commitment_binding(rotation_proof, &commitment.nonce)
                    != commitment.commitment_hash
            {
                result = Err(ProtocolError::InvalidCommitmentVerification.into());
                return;
            }
            session.reveals.insert(
                device_id.to_string(),
                DeviceReveal {
                    device_id: device_id.to_string(),
                    rotation_proof: rotation_proof.to_string(),
                    integrity_hash: integrity_hash.to_string(),
                    completed_at: now,
                },
            );
            session.verifications.insert(device_id.to_string(), true);
            session
                .device_phases
                .insert(device_id.to_string(), DevicePhase::Revealed);
            if session.reveals.len() == session.participants.len() {
                session.state = SessionState::VerificationPhase;
            }
            result = Ok(());
        });
        result?;

        tracing::debug!(rotation_id = %rotation_id, device_id, "Reveal verified");
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::RevealVerified,
                self.clock.as_ref(),
                "Reveal verified against commitment".to_string(),
            )
            .with_device(device_id)
            .with_subject(rotation_id.to_string()),
        );
        Ok(())
    }

    /// Close the verification phase for a session.
    ///
    /// Returns true and marks the session `Synchronized` only when every
    /// participant holds a verified commit and reveal pair. Otherwise the
    /// session is noted `Failed` and false is returned.
    pub fn complete_verification_phase(&self, rotation_id: &str) -> Result<bool> {
        let now = self.clock.now_utc();
        let mut result: Result<bool> =
            Err(ProtocolError::SessionNotFound(rotation_id.to_string()).into());
        self.sessions.update(rotation_id, &mut |session| {
            let verified = session
                .participants
                .iter()
                .filter(|p| {
                    session.commitments.contains_key(*p)
                        && session.reveals.contains_key(*p)
                        && session.verifications.get(*p).copied().unwrap_or(false)
                })
                .count();
            if verified == session.participants.len() {
                for participant in &session.participants {
                    session
                        .device_phases
                        .insert(participant.clone(), DevicePhase::Verified);
                }
                session.state = SessionState::Synchronized;
                result = Ok(true);
            } else {
                session.state = SessionState::Failed(format!(
                    "verification incomplete: {verified} of {} devices verified",
                    session.participants.len()
                ));
                result = Ok(false);
            }
        });
        let synchronized = result?;

        if synchronized {
            *self.last_sync.write().unwrap() = Some(now);
            tracing::info!(rotation_id = %rotation_id, "Rotation session synchronized");
            self.audit.record(
                AuditEvent::new(
                    AuditEventKind::SessionSynchronized,
                    self.clock.as_ref(),
                    "All participants verified; session synchronized".to_string(),
                )
                .with_subject(rotation_id.to_string()),
            );
        } else {
            tracing::warn!(rotation_id = %rotation_id, "Verification phase incomplete");
        }
        Ok(synchronized)
    }

    /// Register a device as offline with a replay strategy.
    ///
    /// Unknown strategies are rejected. In-flight sessions the device
    /// participates in are queued for replay when it returns.
    pub fn register_offline_device(&self, device_id: &str, strategy: &str) -> Result<()> {
        if device_id.is_empty() {
            return Err(ProtocolError::EmptyField("device id").into());
        }
        let strategy = OfflineSyncStrategy::parse(strategy)?;

        let now = self.clock.now_utc();
        let pending: Vec<String> = self
            .sessions
            .snapshot()
            .into_iter()
            .filter(|(_, session)| {
                session.state.in_flight() && session.participants.iter().any(|p| p == device_id)
            })
            .map(|(rotation_id, _)| rotation_id)
            .collect();

        self.offline.update_or_insert(
            device_id,
            &mut || OfflineDeviceRecord {
                device_id: device_id.to_string(),
                strategy,
                registered_at: now,
                pending_rotations: pending.clone(),
            },
            &mut |record| {
                record.strategy = strategy;
                record.registered_at = now;
                for rotation_id in &pending {
                    if !record.pending_rotations.contains(rotation_id) {
                        record.pending_rotations.push(rotation_id.clone());
                    }
                }
            },
        );

        tracing::info!(device_id, ?strategy, "Offline device registered");
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::OfflineDeviceRegistered,
                self.clock.as_ref(),
                format!("Offline device registered with {strategy:?} strategy"),
            )
            .with_device(device_id),
        );
        Ok(())
    }

    /// Replay completed rotations to a device that came back online.
    ///
    /// Sessions that synchronized while the device was away are reported
    /// in the result; sessions still in flight are left to the normal
    /// commit and reveal path. The offline record is removed.
    pub fn process_delayed_sync(&self, device_id: &str) -> Result<DelayedSyncResult> {
        let record = self
            .offline
            .remove(device_id)
            .ok_or_else(|| ProtocolError::DeviceNotOffline(device_id.to_string()))?;

        let synchronized_rotations: Vec<String> = record
            .pending_rotations
            .iter()
            .filter(|rotation_id| {
                self.sessions
                    .get(rotation_id)
                    .is_some_and(|session| session.state == SessionState::Synchronized)
            })
            .cloned()
            .collect();

        *self.last_sync.write().unwrap() = Some(self.clock.now_utc());
        tracing::info!(
            device_id,
            replayed = synchronized_rotations.len(),
            "Delayed sync completed"
        );
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::DelayedSyncCompleted,
                self.clock.as_ref(),
                format!("Replayed {} completed rotations", synchronized_rotations.len()),
            )
            .with_device(device_id),
        );

        Ok(DelayedSyncResult {
            device_id: device_id.to_string(),
            synchronized_rotations,
            sync_success: true,
        })
    }

    /// Resolve a synchronization conflict.
    ///
    /// Both the conflict type and the strategy come from closed sets;
    /// unknown values are rejected. The `rollback` strategy always flags
    /// `rollback_required`; `user_decision` leaves the conflict pending
    /// with `resolved` false.
    pub fn resolve_conflict(
        &self,
        conflict_type: &str,
        strategy: &str,
    ) -> Result<ConflictResolution> {
        let conflict_type = ConflictType::parse(conflict_type)?;
        let strategy = ResolutionStrategy::parse(strategy)?;

        self.conflicts_detected.fetch_add(1, Ordering::Relaxed);
        let resolution = ConflictResolution {
            conflict_type,
            strategy,
            resolved: strategy != ResolutionStrategy::UserDecision,
            rollback_required: strategy == ResolutionStrategy::Rollback,
        };

        tracing::info!(
            ?conflict_type,
            ?strategy,
            resolved = resolution.resolved,
            "Conflict resolution applied"
        );
        self.audit.record(
            AuditEvent::new(
                AuditEventKind::ConflictResolved,
                self.clock.as_ref(),
                format!("{conflict_type:?} conflict handled with {strategy:?}"),
            ),
        );
        Ok(resolution)
    }

    /// Aggregate synchronization status.
    ///
    /// The report carries counts and timestamps only; nothing derived from
    /// commitments, nonces, proofs, or key material appears in it.
    pub fn get_sync_status(&self) -> SyncStatusReport {
        let sessions = self.sessions.snapshot();
        let offline_ids = self.offline.keys();

        let pending_rotations = sessions
            .iter()
            .filter(|(_, session)| session.state.in_flight())
            .count();
        let mut online: Vec<&String> = sessions
            .iter()
            .flat_map(|(_, session)| session.participants.iter())
            .filter(|p| !offline_ids.contains(*p))
            .collect();
        online.sort();
        online.dedup();

        SyncStatusReport {
            state: if pending_rotations == 0 {
                SyncState::Synchronized
            } else {
                SyncState::Syncing
            },
            online_devices: online.len(),
            offline_devices: offline_ids.len(),
            pending_rotations,
            last_sync: *self.last_sync.read().unwrap(),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
        }
    }

    /// Look up one session by rotation id.
    pub fn session(&self, rotation_id: &str) -> Result<RotationSession> {
        self.sessions
            .get(rotation_id)
            .ok_or_else(|| ProtocolError::SessionNotFound(rotation_id.to_string()).into())
    }
}
