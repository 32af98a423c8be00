//! Escalation scheduler timing, driven on the paused tokio clock so the
//! response windows elapse instantly and deterministically.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use podsentry::alarm_store::AlarmStore;
use podsentry::escalation::EscalationScheduler;
use podsentry::types::{
    Alarm, AlarmPolicy, AlarmStatus, AlarmType, Isa18Fields, Severity, ThresholdOperator,
};

fn temp_policy() -> AlarmPolicy {
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
        auto_clear: false,
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

/// Spawn the scheduler and let it subscribe before any events fire.
async fn start_scheduler(store: &Arc<AlarmStore>, cancel: &CancellationToken) {
    let scheduler = EscalationScheduler::new(Arc::clone(store), 3, 900, cancel.clone());
    tokio::spawn(scheduler.run());
    settle().await;
}

/// Let all ready tasks (scheduler, timer tasks) run to their next await
/// point without advancing the clock.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn advance(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
    settle().await;
}

fn open_alarm(store: &AlarmStore) -> Alarm {
    store.open(&temp_policy(), "pod-1", 26.5, "high temp".into(), Utc::now())
}

#[tokio::test(start_paused = true)]
async fn missed_response_window_escalates_one_level() {
    let store = Arc::new(AlarmStore::new());
    let cancel = CancellationToken::new();
    start_scheduler(&store, &cancel).await;

    let alarm = open_alarm(&store);
    settle().await;

    // Just short of the 600 s window: nothing yet.
    advance(599).await;
    assert_eq!(store.get(alarm.id).unwrap().escalated_to_level, 0);

    advance(2).await;
    let escalated = store.get(alarm.id).unwrap();
    assert_eq!(escalated.escalated_to_level, 1);
    assert!(escalated.escalated_at.is_some());

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn acknowledgment_cancels_the_pending_timer() {
    let store = Arc::new(AlarmStore::new());
    let cancel = CancellationToken::new();
    start_scheduler(&store, &cancel).await;

    let alarm = open_alarm(&store);
    settle().await;
    advance(300).await;

    store
        .acknowledge(alarm.id, "alice", None, None, Utc::now())
        .unwrap();
    settle().await;

    // Well past where the timer would have fired.
    advance(2000).await;
    assert_eq!(store.get(alarm.id).unwrap().escalated_to_level, 0);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn escalation_repeats_each_missed_window_and_caps_at_max() {
    let store = Arc::new(AlarmStore::new());
    let cancel = CancellationToken::new();
    start_scheduler(&store, &cancel).await;

    let alarm = open_alarm(&store);
    settle().await;

    for expected in 1..=3u8 {
        advance(601).await;
        assert_eq!(
            store.get(alarm.id).unwrap().escalated_to_level,
            expected,
            "one level per missed window"
        );
    }

    // At the ceiling: no further timer is armed.
    advance(5000).await;
    assert_eq!(store.get(alarm.id).unwrap().escalated_to_level, 3);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn shelving_suspends_the_timer_and_unshelve_resumes_the_remainder() {
    let store = Arc::new(AlarmStore::new());
    let cancel = CancellationToken::new();
    start_scheduler(&store, &cancel).await;

    let alarm = open_alarm(&store);
    settle().await;

    // 200 s in, 400 s left on the clock.
    advance(200).await;
    store
        .shelve(
            alarm.id,
            "alice",
            "venting the room".into(),
            Utc::now() + chrono::Duration::hours(2),
            false,
            None,
            Utc::now(),
        )
        .unwrap();
    settle().await;

    // Shelved: the original deadline passes harmlessly.
    advance(3000).await;
    assert_eq!(store.get(alarm.id).unwrap().escalated_to_level, 0);

    store.unshelve(alarm.id, Utc::now()).unwrap();
    settle().await;

    // The timer resumes with the 400 s remainder, not a fresh 600 s.
    advance(399).await;
    assert_eq!(store.get(alarm.id).unwrap().escalated_to_level, 0);
    advance(2).await;
    assert_eq!(store.get(alarm.id).unwrap().escalated_to_level, 1);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn auto_unshelve_returns_the_alarm_to_monitoring() {
    let store = Arc::new(AlarmStore::new());
    let cancel = CancellationToken::new();
    start_scheduler(&store, &cancel).await;

    let alarm = open_alarm(&store);
    settle().await;

    store
        .shelve(
            alarm.id,
            "alice",
            "brief maintenance".into(),
            Utc::now() + chrono::Duration::seconds(300),
            true,
            None,
            Utc::now(),
        )
        .unwrap();
    settle().await;
    assert_eq!(store.get(alarm.id).unwrap().status, AlarmStatus::Shelved);

    advance(301).await;
    let back = store.get(alarm.id).unwrap();
    assert_eq!(back.status, AlarmStatus::Active);
    assert!(back.shelve.is_none());

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn restored_active_alarm_still_escalates() {
    // Simulate a restart: the alarm was Active at shutdown, so it comes
    // back through restore, which emits no lifecycle events.
    let scratch = AlarmStore::new();
    let alarm = open_alarm(&scratch);

    let store = Arc::new(AlarmStore::new());
    store.restore(vec![alarm.clone()]);

    let cancel = CancellationToken::new();
    let mut scheduler = EscalationScheduler::new(Arc::clone(&store), 3, 900, cancel.clone());
    scheduler.bootstrap(&[alarm.clone()]);
    tokio::spawn(scheduler.run());
    settle().await;

    advance(599).await;
    assert_eq!(store.get(alarm.id).unwrap().escalated_to_level, 0);
    advance(2).await;
    assert_eq!(
        store.get(alarm.id).unwrap().escalated_to_level,
        1,
        "restored alarm must get a response timer"
    );

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn restored_auto_unshelved_alarm_returns_to_active() {
    let scratch = AlarmStore::new();
    let opened = open_alarm(&scratch);
    let shelved = scratch
        .shelve(
            opened.id,
            "alice",
            "overnight maintenance".into(),
            Utc::now() + chrono::Duration::seconds(300),
            true,
            None,
            Utc::now(),
        )
        .unwrap();

    let store = Arc::new(AlarmStore::new());
    store.restore(vec![shelved.clone()]);

    let cancel = CancellationToken::new();
    let mut scheduler = EscalationScheduler::new(Arc::clone(&store), 3, 900, cancel.clone());
    scheduler.bootstrap(&[shelved.clone()]);
    tokio::spawn(scheduler.run());
    settle().await;
    assert_eq!(store.get(shelved.id).unwrap().status, AlarmStatus::Shelved);

    advance(301).await;
    let back = store.get(shelved.id).unwrap();
    assert_eq!(back.status, AlarmStatus::Active);
    assert!(back.shelve.is_none());

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn resolve_racing_the_timer_produces_no_escalation() {
    let store = Arc::new(AlarmStore::new());
    let cancel = CancellationToken::new();
    start_scheduler(&store, &cancel).await;

    let alarm = open_alarm(&store);
    settle().await;

    // Resolve right at the deadline; whichever order the tasks run, the
    // store's entry lock means the resolved state wins.
    advance(600).await;
    let resolved = store.resolve(alarm.id, "alice", "fixed".into(), None, None, Utc::now());
    settle().await;

    let final_state = store.get(alarm.id).unwrap();
    assert_eq!(final_state.status, AlarmStatus::Resolved);
    if resolved.is_ok() {
        // An escalation may have slipped in before the resolve, but never
        // after it.
        assert!(final_state.escalated_to_level <= 1);
    }

    cancel.cancel();
}
