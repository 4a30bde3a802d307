use keywarden::{
    audit::AuditEventKind,
    protocol::{
        DevicePhase, RotationTrigger, SessionState, SyncState, commitment_binding,
    },
    wire::sync_status_to_json,
};

use crate::helpers::coordinator;

fn commit(c: &keywarden::RotationCoordinator, rotation_id: &str, device: &str) {
    let nonce = format!("nonce-{device}");
    let proof = format!("proof-{device}");
    c.process_commitment(rotation_id, device, &commitment_binding(&proof, &nonce), &nonce)
        .unwrap();
}

fn reveal(c: &keywarden::RotationCoordinator, rotation_id: &str, device: &str) {
    let proof = format!("proof-{device}");
    c.process_reveal(rotation_id, device, &proof, &format!("integrity-{device}"))
        .unwrap();
}

#[test]
fn full_session_reaches_synchronized() {
    let (coordinator, _clock, audit) = coordinator("phone");
    let devices = ["phone", "laptop", "tablet"];

    let rotation_id = coordinator
        .initiate_rotation(
            devices.iter().map(|d| d.to_string()).collect(),
            RotationTrigger::Emergency,
        )
        .unwrap();

    for device in &devices[..2] {
        commit(&coordinator, &rotation_id, device);
    }
    let session = coordinator.session(&rotation_id).unwrap();
    assert_eq!(session.state, SessionState::CommitmentPhase);
    commit(&coordinator, &rotation_id, devices[2]);
    assert_eq!(
        coordinator.session(&rotation_id).unwrap().state,
        SessionState::RevealPhase
    );

    for device in &devices {
        reveal(&coordinator, &rotation_id, device);
    }
    assert_eq!(
        coordinator.session(&rotation_id).unwrap().state,
        SessionState::VerificationPhase
    );

    assert!(coordinator.complete_verification_phase(&rotation_id).unwrap());
    let session = coordinator.session(&rotation_id).unwrap();
    assert_eq!(session.state, SessionState::Synchronized);
    for device in &devices {
        assert_eq!(session.device_phases[*device], DevicePhase::Verified);
    }
    assert_eq!(audit.count_kind(AuditEventKind::SessionSynchronized), 1);

    let status = coordinator.get_sync_status();
    assert_eq!(status.state, SyncState::Synchronized);
    assert_eq!(status.pending_rotations, 0);
    assert!(status.last_sync.is_some());
}

#[test]
fn reveal_without_commitment_is_rejected() {
    let (coordinator, _clock, _audit) = coordinator("phone");
    let rotation_id = coordinator
        .initiate_rotation(
            vec!["phone".to_string(), "laptop".to_string()],
            RotationTrigger::Scheduled,
        )
        .unwrap();
    commit(&coordinator, &rotation_id, "phone");

    let err = coordinator
        .process_reveal(&rotation_id, "laptop", "proof-laptop", "integrity")
        .unwrap_err();
    assert!(err.is_verification_failure());
    assert_eq!(err.to_string(), "Invalid commitment verification");
}

#[test]
fn mismatched_proof_fails_the_binding() {
    let (coordinator, _clock, _audit) = coordinator("phone");
    let rotation_id = coordinator
        .initiate_rotation(vec!["phone".to_string()], RotationTrigger::Scheduled)
        .unwrap();

    coordinator
        .process_commitment(
            &rotation_id,
            "phone",
            &commitment_binding("the-real-proof", "nonce-1"),
            "nonce-1",
        )
        .unwrap();

    let err = coordinator
        .process_reveal(&rotation_id, "phone", "a-different-proof", "integrity")
        .unwrap_err();
    assert!(err.is_verification_failure());

    let err = coordinator
        .process_reveal(&rotation_id, "phone", "", "integrity")
        .unwrap_err();
    assert!(err.is_verification_failure());

    // The correct proof still goes through.
    coordinator
        .process_reveal(&rotation_id, "phone", "the-real-proof", "integrity")
        .unwrap();
}

#[test]
fn protocol_inputs_are_validated() {
    let (coordinator, _clock, _audit) = coordinator("phone");

    let err = coordinator
        .initiate_rotation(vec![], RotationTrigger::Scheduled)
        .unwrap_err();
    assert!(err.is_validation_error());

    let rotation_id = coordinator
        .initiate_rotation(vec!["phone".to_string()], RotationTrigger::Scheduled)
        .unwrap();
    assert!(
        coordinator
            .process_commitment(&rotation_id, "phone", "", "nonce")
            .unwrap_err()
            .is_validation_error()
    );
    assert!(
        coordinator
            .process_commitment(&rotation_id, "intruder", "hash", "nonce")
            .unwrap_err()
            .is_state_violation()
    );
    assert!(
        coordinator
            .process_commitment("missing", "phone", "hash", "nonce")
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn incomplete_verification_marks_the_session_failed() {
    let (coordinator, _clock, _audit) = coordinator("phone");
    let rotation_id = coordinator
        .initiate_rotation(
            vec!["phone".to_string(), "laptop".to_string()],
            RotationTrigger::Emergency,
        )
        .unwrap();
    commit(&coordinator, &rotation_id, "phone");
    commit(&coordinator, &rotation_id, "laptop");
    reveal(&coordinator, &rotation_id, "phone");

    assert!(!coordinator.complete_verification_phase(&rotation_id).unwrap());
    let session = coordinator.session(&rotation_id).unwrap();
    assert!(matches!(session.state, SessionState::Failed(_)));
}

#[test]
fn offline_device_replays_completed_rotations() {
    let (coordinator, _clock, audit) = coordinator("phone");

    coordinator.register_offline_device("watch", "scheduled").unwrap();
    assert_eq!(coordinator.get_sync_status().offline_devices, 1);

    let rotation_id = coordinator
        .initiate_rotation(
            vec!["phone".to_string(), "watch".to_string()],
            RotationTrigger::Scheduled,
        )
        .unwrap();
    for device in ["phone", "watch"] {
        commit(&coordinator, &rotation_id, device);
    }
    for device in ["phone", "watch"] {
        reveal(&coordinator, &rotation_id, device);
    }
    assert!(coordinator.complete_verification_phase(&rotation_id).unwrap());

    let result = coordinator.process_delayed_sync("watch").unwrap();
    assert!(result.sync_success);
    assert_eq!(result.synchronized_rotations, vec![rotation_id]);
    assert_eq!(coordinator.get_sync_status().offline_devices, 0);
    assert_eq!(audit.count_kind(AuditEventKind::DelayedSyncCompleted), 1);
}

#[test]
fn in_flight_sessions_are_not_replayed() {
    let (coordinator, _clock, _audit) = coordinator("phone");

    coordinator.register_offline_device("watch", "background").unwrap();
    let rotation_id = coordinator
        .initiate_rotation(
            vec!["phone".to_string(), "watch".to_string()],
            RotationTrigger::Scheduled,
        )
        .unwrap();
    commit(&coordinator, &rotation_id, "phone");

    let result = coordinator.process_delayed_sync("watch").unwrap();
    assert!(result.synchronized_rotations.is_empty());
    // The in-flight session continues on the normal path.
    commit(&coordinator, &rotation_id, "watch");
}

#[test]
fn unregistered_devices_cannot_delayed_sync() {
    let (coordinator, _clock, _audit) = coordinator("phone");
    let err = coordinator.process_delayed_sync("ghost").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        err.to_string(),
        "Device not found in offline devices: ghost"
    );
}

#[test]
fn unknown_strategies_are_rejected() {
    let (coordinator, _clock, _audit) = coordinator("phone");
    assert!(
        coordinator
            .register_offline_device("watch", "whenever")
            .unwrap_err()
            .is_validation_error()
    );
    assert!(
        coordinator
            .resolve_conflict("vibes_mismatch", "rollback")
            .unwrap_err()
            .is_validation_error()
    );
    assert!(
        coordinator
            .resolve_conflict("version_mismatch", "coin_flip")
            .unwrap_err()
            .is_validation_error()
    );
}

#[test]
fn conflict_resolution_semantics() {
    let (coordinator, _clock, audit) = coordinator("phone");

    let resolution = coordinator
        .resolve_conflict("concurrent_rotation", "most_recent_wins")
        .unwrap();
    assert!(resolution.resolved);
    assert!(!resolution.rollback_required);

    let resolution = coordinator
        .resolve_conflict("key_version_conflict", "rollback")
        .unwrap();
    assert!(resolution.resolved);
    assert!(resolution.rollback_required);

    let resolution = coordinator
        .resolve_conflict("device_state_conflict", "user_decision")
        .unwrap();
    assert!(!resolution.resolved);
    assert!(!resolution.rollback_required);

    assert_eq!(coordinator.get_sync_status().conflicts_detected, 3);
    assert_eq!(audit.count_kind(AuditEventKind::ConflictResolved), 3);
}

#[test]
fn status_surface_never_leaks_secrets() {
    let (coordinator, _clock, _audit) = coordinator("phone");

    let rotation_id = coordinator
        .initiate_rotation(
            vec!["phone".to_string(), "laptop".to_string()],
            RotationTrigger::Emergency,
        )
        .unwrap();
    let nonce = "nonce-secret-1234";
    let proof = "proof-secret-abcd";
    let binding = commitment_binding(proof, nonce);
    coordinator
        .process_commitment(&rotation_id, "phone", &binding, nonce)
        .unwrap();
    coordinator
        .process_reveal(&rotation_id, "phone", proof, "integrity-xyz")
        .unwrap();

    let status = coordinator.get_sync_status();
    let json = sync_status_to_json(&status).unwrap();
    for secret in [nonce, proof, binding.as_str(), "integrity-xyz"] {
        assert!(!json.contains(secret), "status leaked {secret}");
    }

    assert_eq!(status.state, SyncState::Syncing);
    assert_eq!(status.pending_rotations, 1);
    assert_eq!(status.online_devices, 2);
}

#[test]
fn sessions_run_concurrently() {
    let (coordinator, _clock, _audit) = coordinator("phone");

    let first = coordinator
        .initiate_rotation(vec!["phone".to_string()], RotationTrigger::Scheduled)
        .unwrap();
    let second = coordinator
        .initiate_rotation(vec!["phone".to_string()], RotationTrigger::Emergency)
        .unwrap();
    assert_ne!(first, second);

    commit(&coordinator, &first, "phone");
    reveal(&coordinator, &first, "phone");
    assert!(coordinator.complete_verification_phase(&first).unwrap());

    // The second session is untouched by the first completing.
    assert_eq!(
        coordinator.session(&second).unwrap().state,
        SessionState::Pending
    );
    assert_eq!(coordinator.get_sync_status().pending_rotations, 1);
}
