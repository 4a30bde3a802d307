//! Privacy-safe action log for lifecycle operations.
//!
//! Every detection, isolation, invalidation, rotation, recovery, and
//! protocol action is recorded as an [`AuditEvent`] and handed to an
//! [`AuditSink`]. The default sink is a bounded in-memory log; durable
//! append-only delivery belongs to an external collaborator that consumes
//! these events at the boundary.
//!
//! Events never carry key material. They describe who did what and when,
//! with opaque identifiers only.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;

/// The closed set of auditable lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    IncidentDetected,
    ResponseInitiated,
    DeviceIsolated,
    KeyInvalidated,
    EmergencyRotation,
    RecoveryStarted,
    RecoveryCompleted,
    AccessRestored,
    RotationInitiated,
    CommitmentRecorded,
    RevealVerified,
    SessionSynchronized,
    OfflineDeviceRegistered,
    DelayedSyncCompleted,
    ConflictResolved,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique id for this event.
    pub id: String,
    /// What happened.
    pub kind: AuditEventKind,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// The device the action touched, when device-scoped.
    pub device_id: Option<String>,
    /// The incident or rotation the action belongs to, when scoped.
    pub subject_id: Option<String>,
    /// Human-readable summary. Never contains secret material.
    pub detail: String,
    /// Whether the action succeeded.
    pub success: bool,
}

impl AuditEvent {
    /// Build an event stamped with the given clock.
    pub fn new(kind: AuditEventKind, clock: &dyn Clock, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            at: clock.now_utc(),
            device_id: None,
            subject_id: None,
            detail: detail.into(),
            success: true,
        }
    }

    /// Attach the device this action touched.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Attach the incident or rotation id this action belongs to.
    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Mark the action as failed.
    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Record one event. Sinks must not block on external I/O.
    fn record(&self, event: AuditEvent);
}

/// Bounded in-memory audit log.
///
/// Keeps the most recent `capacity` events, evicting the oldest first so a
/// sustained event stream cannot grow memory without limit.
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditLog {
    /// Default retention cap.
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create a log retaining at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Create a log with the default capacity, wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(Self::DEFAULT_CAPACITY))
    }

    /// The most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.read().unwrap();
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Number of retained events of the given kind.
    pub fn count_kind(&self, kind: AuditEventKind) -> usize {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    /// Total number of retained events.
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.write().unwrap();
        if events.len() >= self.capacity {
            let excess = events.len() + 1 - self.capacity;
            events.drain(..excess);
        }
        events.push(event);
    }
}
