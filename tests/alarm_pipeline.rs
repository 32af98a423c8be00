//! End-to-end evaluation pipeline tests: a pod worker fed readings on a
//! virtual timeline, asserting the full debounce → trigger → lifecycle →
//! suppression sequence against the real store and sled history.

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use podsentry::alarm_store::AlarmStore;
use podsentry::config::EngineConfig;
use podsentry::engine::{EngineStats, PodRegistry, PodWorker, PolicyCatalog};
use podsentry::storage::HistoryStorage;
use podsentry::types::{
    AlarmPolicy, AlarmStatus, AlarmType, BatchStage, DataSource, EquipmentSnapshot, Isa18Fields,
    ParameterKind, PodProfile, PodType, SensorFaults, Setpoint, Severity, TelemetryReading,
    ThresholdOperator,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn profile() -> PodProfile {
    PodProfile {
        pod_id: "pod-1".into(),
        org_id: "org-1".into(),
        pod_type: PodType::Grow,
        stage: BatchStage::Flower,
        setpoints: vec![Setpoint {
            parameter: ParameterKind::Temperature,
            day_value: 24.0,
            night_value: Some(21.0),
            tolerance: 2.0,
        }],
        lights_on: true,
    }
}

fn temp_policy(auto_clear: bool) -> AlarmPolicy {
    AlarmPolicy {
        id: Uuid::new_v4(),
        org_id: "org-1".into(),
        alarm_type: AlarmType::TemperatureHigh,
        severity: Severity::Warning,
        threshold: 26.0,
        operator: ThresholdOperator::GreaterThan,
        time_in_state_secs: 300,
        deadband: 0.5,
        suppression_duration_mins: 5,
        auto_clear,
        require_out_of_spec: false,
        applies_to_stages: None,
        applies_to_pod_types: None,
        isa18: Isa18Fields {
            priority: 2,
            expected_response_secs: 600,
            rationalized: true,
            consequence: String::new(),
            corrective_action: String::new(),
        },
    }
}

fn reading(temp: f64, ts: DateTime<Utc>) -> TelemetryReading {
    TelemetryReading {
        pod_id: "pod-1".into(),
        timestamp: ts,
        temperature_c: temp,
        humidity_pct: 60.0,
        co2_ppm: 1100.0,
        light_pct: 80.0,
        vpd_kpa: 0.0, // backfilled by the worker
        faults: SensorFaults::default(),
        equipment: EquipmentSnapshot::default(),
        data_source: DataSource::Manual,
        calibration_due: false,
    }
}

struct Harness {
    worker: PodWorker,
    store: Arc<AlarmStore>,
    storage: Arc<HistoryStorage>,
    stats: Arc<EngineStats>,
    _dir: tempfile::TempDir,
}

fn harness(policy: AlarmPolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AlarmStore::new());
    let storage = Arc::new(HistoryStorage::open(dir.path()).unwrap());
    let policies = Arc::new(ArcSwap::from_pointee(PolicyCatalog {
        policies: vec![policy],
    }));
    let pods = Arc::new(ArcSwap::from_pointee(PodRegistry::new(vec![profile()])));
    let stats = Arc::new(EngineStats::default());
    let worker = PodWorker::new(
        "pod-1",
        Arc::clone(&store),
        Arc::clone(&storage),
        policies,
        pods,
        Arc::clone(&stats),
        &EngineConfig::default(),
    );
    Harness {
        worker,
        store,
        storage,
        stats,
        _dir: dir,
    }
}

#[tokio::test]
async fn sustained_breach_triggers_then_suppression_blocks_reopen() {
    let mut h = harness(temp_policy(false));
    let start = t0();

    // 26.5 °C against the 26.0 threshold: the condition holds from t=0
    // but must debounce for 300 s first.
    for secs in [0i64, 100, 200] {
        let now = start + Duration::seconds(secs);
        h.worker.evaluate_cycle(reading(26.5, now), now).await.unwrap();
        assert!(
            h.store.open_alarm("pod-1", AlarmType::TemperatureHigh).is_none(),
            "no alarm expected at t={secs}"
        );
    }

    // t=300: continuous breach long enough.
    let now = start + Duration::seconds(300);
    h.worker.evaluate_cycle(reading(26.5, now), now).await.unwrap();
    let alarm = h
        .store
        .open_alarm("pod-1", AlarmType::TemperatureHigh)
        .expect("alarm should open at t=300");
    assert_eq!(alarm.status, AlarmStatus::Active);
    assert!((alarm.triggering_value - 26.5).abs() < f64::EPSILON);
    assert_eq!(alarm.expected_response_secs, 600);

    // Operator acknowledges at t=310 and resolves at t=350.
    h.store
        .acknowledge(alarm.id, "alice", None, None, start + Duration::seconds(310))
        .unwrap();
    h.store
        .resolve(
            alarm.id,
            "alice",
            "vent opened".into(),
            Some("cooling loop stuck".into()),
            None,
            start + Duration::seconds(350),
        )
        .unwrap();

    // t=360: still breaching, but only 10 s after the resolve — inside
    // the 5 min suppression window, so nothing reopens.
    let now = start + Duration::seconds(360);
    h.worker.evaluate_cycle(reading(26.5, now), now).await.unwrap();
    assert!(h.store.open_alarm("pod-1", AlarmType::TemperatureHigh).is_none());

    // t=660: suppression expired and the breach never cleared — a new
    // episode opens as a distinct row.
    let now = start + Duration::seconds(660);
    h.worker.evaluate_cycle(reading(26.5, now), now).await.unwrap();
    let second = h
        .store
        .open_alarm("pod-1", AlarmType::TemperatureHigh)
        .expect("second episode should open after suppression");
    assert_ne!(second.id, alarm.id);

    assert_eq!(h.stats.readings_processed.load(Ordering::Relaxed), 6);
    assert_eq!(h.stats.alarms_opened.load(Ordering::Relaxed), 2);

    // Every reading landed in history, faulted or not.
    let persisted = h
        .storage
        .readings_in_range("pod-1", start, start + Duration::seconds(700))
        .unwrap();
    assert_eq!(persisted.len(), 6);
    // VPD was backfilled before persisting.
    assert!(persisted.iter().all(|r| r.vpd_kpa > 0.0));
}

#[tokio::test]
async fn open_alarm_refreshes_in_place_and_auto_clears() {
    let mut h = harness(temp_policy(true));
    let start = t0();

    for secs in [0i64, 150, 300] {
        let now = start + Duration::seconds(secs);
        h.worker.evaluate_cycle(reading(27.0, now), now).await.unwrap();
    }
    let alarm = h
        .store
        .open_alarm("pod-1", AlarmType::TemperatureHigh)
        .expect("alarm open");

    // Worsening past the deadband updates the row, never duplicates it.
    let now = start + Duration::seconds(310);
    h.worker.evaluate_cycle(reading(28.0, now), now).await.unwrap();
    let refreshed = h
        .store
        .open_alarm("pod-1", AlarmType::TemperatureHigh)
        .unwrap();
    assert_eq!(refreshed.id, alarm.id);
    assert!((refreshed.triggering_value - 28.0).abs() < f64::EPSILON);

    // 25.4 is past threshold − deadband (25.5): the policy allows
    // auto-clear, so the engine resolves it as "system".
    let now = start + Duration::seconds(320);
    h.worker.evaluate_cycle(reading(25.4, now), now).await.unwrap();
    assert!(h.store.open_alarm("pod-1", AlarmType::TemperatureHigh).is_none());
    let resolved = h.store.get(alarm.id).unwrap();
    assert_eq!(resolved.status, AlarmStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("system"));
}

#[tokio::test]
async fn faulted_sensor_freezes_the_breach_timeline() {
    let mut h = harness(temp_policy(false));
    let start = t0();

    for secs in [0i64, 150] {
        let now = start + Duration::seconds(secs);
        h.worker.evaluate_cycle(reading(26.5, now), now).await.unwrap();
    }

    // Sensor fault right when the debounce would be satisfied: the
    // faulted value must not trigger, and must not reset the timeline.
    let now = start + Duration::seconds(300);
    let mut faulted = reading(26.5, now);
    faulted.faults.temperature = true;
    h.worker.evaluate_cycle(faulted, now).await.unwrap();
    assert!(h.store.open_alarm("pod-1", AlarmType::TemperatureHigh).is_none());
    assert_eq!(h.stats.readings_faulted.load(Ordering::Relaxed), 1);

    // The sensor recovers; the breach has been continuous since t=0.
    let now = start + Duration::seconds(310);
    h.worker.evaluate_cycle(reading(26.5, now), now).await.unwrap();
    let alarm = h
        .store
        .open_alarm("pod-1", AlarmType::TemperatureHigh)
        .expect("alarm opens on the first trusted reading past debounce");
    assert_eq!(alarm.triggered_at, now);
}

#[tokio::test]
async fn restored_open_alarm_refreshes_instead_of_duplicating() {
    let policy = temp_policy(false);
    let start = t0();

    // First run: open an alarm and let the snapshot reach sled.
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = HistoryStorage::open(dir.path()).unwrap();
        let store = AlarmStore::new();
        let alarm = store.open(&policy, "pod-1", 26.5, "high temp".into(), start);
        storage.persist_alarm(&alarm).unwrap();
    }

    // Second run: restore, then evaluate a still-breaching reading. The
    // one-open invariant must survive the restart.
    let store = Arc::new(AlarmStore::new());
    let storage = Arc::new(HistoryStorage::open(dir.path()).unwrap());
    store.restore(storage.load_alarms().unwrap());
    let restored = store
        .open_alarm("pod-1", AlarmType::TemperatureHigh)
        .expect("open alarm restored");

    let policies = Arc::new(ArcSwap::from_pointee(PolicyCatalog {
        policies: vec![policy],
    }));
    let pods = Arc::new(ArcSwap::from_pointee(PodRegistry::new(vec![profile()])));
    let stats = Arc::new(EngineStats::default());
    let mut worker = PodWorker::new(
        "pod-1",
        Arc::clone(&store),
        Arc::clone(&storage),
        policies,
        pods,
        stats,
        &EngineConfig::default(),
    );

    let now = start + Duration::seconds(400);
    worker.evaluate_cycle(reading(28.0, now), now).await.unwrap();

    let after = store
        .open_alarm("pod-1", AlarmType::TemperatureHigh)
        .unwrap();
    assert_eq!(after.id, restored.id);
    assert!((after.triggering_value - 28.0).abs() < f64::EPSILON);
}
