use keywarden::{
    audit::AuditEventKind,
    detection::{DetectionConfig, IncidentType},
    telemetry::{DeviceEvent, ThresholdUpdate},
};

use crate::helpers::{
    detection_engine, detection_engine_with, event_at_hour, failed_auth_event, volume_event,
};

#[test]
fn failed_auth_fires_strictly_above_threshold() {
    let (engine, _clock, audit) = detection_engine();

    assert!(!engine.detect_incident("phone", &failed_auth_event(3)).unwrap());
    assert!(!engine.detect_incident("phone", &failed_auth_event(5)).unwrap());
    assert!(engine.detect_incident("phone", &failed_auth_event(6)).unwrap());

    let incidents = engine.get_active_incidents();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(
        incident.incident_type,
        IncidentType::FailedAuthenticationAttempts
    );
    assert_eq!(incident.severity, 8);
    assert_eq!(incident.confidence, 0.9);
    assert_eq!(incident.affected_devices, vec!["phone".to_string()]);
    assert!(incident.auto_response_triggered);
    assert_eq!(audit.count_kind(AuditEventKind::IncidentDetected), 1);
}

#[test]
fn json_boundary_drives_detection_end_to_end() {
    let (engine, _clock, _audit) = detection_engine();

    assert!(
        engine
            .detect_incident_json("d1", r#"{"failed_auth_count": 6}"#)
            .unwrap()
    );
    assert!(
        !engine
            .detect_incident_json("d1", r#"{"failed_auth_count": 3}"#)
            .unwrap()
    );

    let incidents = engine.get_active_incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].affected_devices, vec!["d1".to_string()]);
}

#[test]
fn failed_auth_severity_caps_at_ten() {
    let (engine, _clock, _audit) = detection_engine();
    engine.detect_incident("phone", &failed_auth_event(50)).unwrap();
    assert_eq!(engine.get_active_incidents()[0].severity, 10);
}

#[test]
fn night_access_is_unusual_without_a_baseline() {
    let (engine, _clock, _audit) = detection_engine();

    assert!(engine.detect_incident("laptop", &event_at_hour(3)).unwrap());
    assert!(!engine.detect_incident("tablet", &event_at_hour(14)).unwrap());

    let incidents = engine.get_active_incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(
        incidents[0].incident_type,
        IncidentType::UnusualAccessPatterns
    );
    assert_eq!(incidents[0].severity, 6);
}

#[test]
fn repeated_night_work_becomes_this_devices_normal() {
    let (engine, _clock, _audit) = detection_engine();

    // A night-shift device learns its own hours.
    for _ in 0..20 {
        engine.detect_incident("night-shift", &event_at_hour(3)).unwrap();
    }
    assert!(!engine.detect_incident("night-shift", &event_at_hour(3)).unwrap());

    // A fresh device at the same hour is still flagged.
    assert!(engine.detect_incident("day-shift", &event_at_hour(3)).unwrap());
}

#[test]
fn volume_spike_is_judged_against_the_device_baseline() {
    let (engine, _clock, _audit) = detection_engine();

    for _ in 0..10 {
        assert!(!engine.detect_incident("phone", &volume_event(1_000)).unwrap());
    }
    // Under the absolute threshold but far over this device's baseline.
    assert!(engine.detect_incident("phone", &volume_event(5_000)).unwrap());
    let incidents = engine.get_active_incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].incident_type, IncidentType::PotentialDataBreach);

    // Modest growth is not a spike.
    assert!(!engine.detect_incident("phone", &volume_event(2_000)).unwrap());
}

#[test]
fn absolute_volume_threshold_applies_before_a_baseline_exists() {
    let (engine, _clock, _audit) = detection_engine();
    assert!(engine.detect_incident("new-device", &volume_event(2_000_000)).unwrap());
    assert!(!engine.detect_incident("other-device", &volume_event(500_000)).unwrap());
}

#[test]
fn only_recognized_compromise_indicators_count() {
    let (engine, _clock, _audit) = detection_engine();

    let event = DeviceEvent {
        compromise_indicators: vec![
            "unknown_location_access".to_string(),
            "totally_made_up_tag".to_string(),
        ],
        ..Default::default()
    };
    assert!(engine.detect_incident("phone", &event).unwrap());
    let incidents = engine.get_active_incidents();
    assert_eq!(
        incidents[0].incident_type,
        IncidentType::SuspiciousDeviceActivity
    );
    assert_eq!(incidents[0].severity, 9);
    assert_eq!(
        incidents[0].indicators,
        vec!["unknown_location_access".to_string()]
    );

    let unknown_only = DeviceEvent {
        compromise_indicators: vec!["totally_made_up_tag".to_string()],
        ..Default::default()
    };
    assert!(!engine.detect_incident("phone", &unknown_only).unwrap());
}

#[test]
fn sensitivity_filters_low_confidence_rules() {
    let (engine, _clock, _audit) = detection_engine();

    engine
        .update_thresholds_json(r#"{"detection_sensitivity": "low"}"#)
        .unwrap();
    // The volume rule reports at 0.6 confidence, below the low-sensitivity
    // floor of 0.8.
    assert!(!engine.detect_incident("phone", &volume_event(2_000_000)).unwrap());
    // Failed auth reports at 0.9 and still passes.
    assert!(engine.detect_incident("phone", &failed_auth_event(7)).unwrap());
}

#[test]
fn threshold_updates_merge_and_validate() {
    let (engine, _clock, _audit) = detection_engine();

    let update = ThresholdUpdate {
        failed_auth_threshold: Some(2),
        ..Default::default()
    };
    engine.update_thresholds(&update).unwrap();
    let config = engine.config();
    assert_eq!(config.failed_auth_threshold, 2);
    // Untouched fields keep their defaults.
    assert_eq!(config.data_volume_threshold, 1_000_000);

    assert!(engine.detect_incident("phone", &failed_auth_event(3)).unwrap());

    let bad = ThresholdUpdate {
        unusual_access_pattern_threshold: Some(1.5),
        ..Default::default()
    };
    let err = engine.update_thresholds(&bad).unwrap_err();
    assert!(err.is_validation_error());
    // The rejected update changed nothing.
    assert_eq!(engine.config().unusual_access_pattern_threshold, 0.8);
}

#[test]
fn malformed_config_payloads_are_rejected() {
    let (engine, _clock, _audit) = detection_engine();
    assert!(engine.update_thresholds_json("{not json").unwrap_err().is_malformed());
    assert!(
        engine
            .update_thresholds_json(r#"{"detection_sensitivity": "paranoid"}"#)
            .unwrap_err()
            .is_malformed()
    );
    assert!(engine.detect_incident_json("phone", "[1,2]").is_err());
}

#[test]
fn empty_device_id_is_rejected() {
    let (engine, _clock, _audit) = detection_engine();
    let err = engine.detect_incident("", &failed_auth_event(9)).unwrap_err();
    assert!(err.is_validation_error());
}

#[test]
fn incident_store_evicts_oldest_at_cap() {
    let config = DetectionConfig {
        max_active_incidents: 2,
        ..Default::default()
    };
    let (engine, clock, _audit) = detection_engine_with(config);

    engine.detect_incident("d1", &failed_auth_event(6)).unwrap();
    clock.advance(1_000);
    engine.detect_incident("d2", &failed_auth_event(6)).unwrap();
    clock.advance(1_000);
    engine.detect_incident("d3", &failed_auth_event(6)).unwrap();

    let incidents = engine.get_active_incidents();
    assert_eq!(incidents.len(), 2);
    let devices: Vec<_> = incidents
        .iter()
        .flat_map(|i| i.affected_devices.clone())
        .collect();
    assert!(!devices.contains(&"d1".to_string()));
    assert!(devices.contains(&"d2".to_string()));
    assert!(devices.contains(&"d3".to_string()));
}

#[test]
fn auto_response_flag_is_the_only_mutation() {
    let (engine, _clock, _audit) = detection_engine();
    engine.detect_incident("phone", &event_at_hour(2)).unwrap();
    let incident = engine.get_active_incidents().pop().unwrap();
    // Severity 6 is below the auto-response cutoff.
    assert!(!incident.auto_response_triggered);

    engine.mark_auto_response_triggered(&incident.id).unwrap();
    assert!(engine.incident(&incident.id).unwrap().auto_response_triggered);

    let err = engine.mark_auto_response_triggered("missing").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn every_event_feeds_the_baseline() {
    let (engine, _clock, _audit) = detection_engine();

    // This event fires an incident and still trains the baseline.
    engine.detect_incident("phone", &failed_auth_event(9)).unwrap();
    let baseline = engine.baseline("phone").unwrap();
    assert_eq!(baseline.sample_count, 1);

    engine.detect_incident("phone", &volume_event(1_000)).unwrap();
    let baseline = engine.baseline("phone").unwrap();
    assert_eq!(baseline.sample_count, 2);
    assert_eq!(baseline.typical_volume(), Some(1_000.0));

    assert!(engine.baseline("other").is_none());
}
