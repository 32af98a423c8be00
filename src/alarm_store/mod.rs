//! Alarm Lifecycle Store
//!
//! Holds the canonical alarm state machine instances and enforces every
//! transition guard:
//!
//! - at most one open alarm per (pod, alarm_type),
//! - `resolve` on a resolved alarm is an idempotent no-op,
//! - `acknowledge` on a resolved alarm is an [`StoreError::InvalidTransition`],
//! - every user-facing mutation is optimistic-concurrency checked against
//!   the alarm's version counter.
//!
//! Locking is per alarm entry (DashMap shards) — unrelated pods never
//! serialize on each other. The escalation scheduler's `escalate` call
//! takes the same entry lock as `resolve`, which is what makes a resolve
//! racing a firing timer safe: whichever wins the entry, the loser sees
//! the new state and backs off.
//!
//! Every successful mutation emits an [`AlarmEvent`] on a broadcast
//! channel consumed by the escalation scheduler, the notification router,
//! and the persistence task.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::types::{
    Alarm, AlarmEvent, AlarmEventKind, AlarmPolicy, AlarmStatus, AlarmType, Severity, ShelveInfo,
};

/// Capacity of the lifecycle event channel. Laggy subscribers lose old
/// events rather than blocking mutations.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Typed failures for lifecycle mutations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("alarm {0} not found")]
    NotFound(Uuid),

    #[error("invalid transition: cannot {action} an alarm in state {current}")]
    InvalidTransition {
        action: &'static str,
        current: AlarmStatus,
    },

    #[error("concurrent modification: expected version {expected}, found {found}")]
    ConcurrentModification { expected: u64, found: u64 },
}

/// Query filter for the alarm list surface.
#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    pub pod_id: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<AlarmStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// In-memory canonical alarm store.
pub struct AlarmStore {
    alarms: DashMap<Uuid, Alarm>,
    /// (pod, type) → id of the single open alarm, if any.
    open_index: DashMap<(String, AlarmType), Uuid>,
    /// Resolution timestamps feeding the evaluator's suppression window.
    last_resolved: DashMap<(String, AlarmType), DateTime<Utc>>,
    events: broadcast::Sender<AlarmEvent>,
}

impl Default for AlarmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            alarms: DashMap::new(),
            open_index: DashMap::new(),
            last_resolved: DashMap::new(),
            events,
        }
    }

    /// Subscribe to lifecycle events. Each subscriber gets every event
    /// from subscription time onward.
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: AlarmEventKind, alarm: &Alarm, now: DateTime<Utc>) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.events.send(AlarmEvent {
            kind,
            alarm: alarm.clone(),
            occurred_at: now,
        });
    }

    fn check_version(alarm: &Alarm, expected: Option<u64>) -> Result<(), StoreError> {
        match expected {
            Some(v) if v != alarm.version => Err(StoreError::ConcurrentModification {
                expected: v,
                found: alarm.version,
            }),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Evaluator-facing operations
    // ========================================================================

    /// Open a new alarm for a policy breach, or refresh the existing open
    /// one — the one-open-per-(pod,type) invariant lives here.
    pub fn open(
        &self,
        policy: &AlarmPolicy,
        pod_id: &str,
        triggering_value: f64,
        message: String,
        now: DateTime<Utc>,
    ) -> Alarm {
        let key = (pod_id.to_string(), policy.alarm_type);
        if let Some(id) = self.open_index.get(&key).map(|e| *e.value()) {
            if let Some(alarm) = self.refresh_inner(id, triggering_value, message.clone(), now) {
                return alarm;
            }
            // Index pointed at a closed alarm — stale entry, fall through
            // and open fresh.
            self.open_index.remove(&key);
        }

        let alarm = Alarm {
            id: Uuid::new_v4(),
            pod_id: pod_id.to_string(),
            org_id: policy.org_id.clone(),
            alarm_type: policy.alarm_type,
            severity: policy.severity,
            message,
            triggering_value,
            threshold: policy.threshold,
            status: AlarmStatus::Active,
            triggered_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            root_cause: None,
            escalated_to_level: 0,
            escalated_at: None,
            expected_response_secs: policy.isa18.expected_response_secs,
            shelve: None,
            notes: Vec::new(),
            version: 1,
            updated_at: now,
        };
        self.alarms.insert(alarm.id, alarm.clone());
        self.open_index.insert(key, alarm.id);
        debug!(alarm_id = %alarm.id, pod = pod_id, alarm_type = %alarm.alarm_type, "alarm opened");
        self.emit(AlarmEventKind::Opened, &alarm, now);
        alarm
    }

    fn refresh_inner(
        &self,
        id: Uuid,
        triggering_value: f64,
        message: String,
        now: DateTime<Utc>,
    ) -> Option<Alarm> {
        let mut entry = self.alarms.get_mut(&id)?;
        if !entry.is_open() {
            return None;
        }
        entry.triggering_value = triggering_value;
        entry.message = message;
        entry.version += 1;
        entry.updated_at = now;
        let snapshot = entry.clone();
        drop(entry);
        self.emit(AlarmEventKind::Refreshed, &snapshot, now);
        Some(snapshot)
    }

    /// Refresh the open alarm's triggering value (evaluator, step 3 of
    /// the policy state machine). Returns `None` when no open alarm
    /// exists for the pair.
    pub fn refresh(
        &self,
        pod_id: &str,
        alarm_type: AlarmType,
        triggering_value: f64,
        message: String,
        now: DateTime<Utc>,
    ) -> Option<Alarm> {
        let key = (pod_id.to_string(), alarm_type);
        let id = self.open_index.get(&key).map(|e| *e.value())?;
        self.refresh_inner(id, triggering_value, message, now)
    }

    // ========================================================================
    // Lifecycle transitions
    // ========================================================================

    /// Acknowledge an active alarm.
    pub fn acknowledge(
        &self,
        id: Uuid,
        actor: &str,
        note: Option<String>,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Alarm, StoreError> {
        let mut entry = self.alarms.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        Self::check_version(&entry, expected_version)?;
        match entry.status {
            AlarmStatus::Active => {}
            current => {
                return Err(StoreError::InvalidTransition {
                    action: "acknowledge",
                    current,
                })
            }
        }
        entry.status = AlarmStatus::Acknowledged;
        entry.acknowledged_at = Some(now);
        entry.acknowledged_by = Some(actor.to_string());
        if let Some(note) = note {
            entry.notes.push(note);
        }
        entry.version += 1;
        entry.updated_at = now;
        let snapshot = entry.clone();
        drop(entry);
        self.emit(AlarmEventKind::Acknowledged, &snapshot, now);
        Ok(snapshot)
    }

    /// Resolve an alarm (from Active, Acknowledged, or Shelved).
    ///
    /// Resolving an already-resolved alarm is an idempotent no-op that
    /// returns the current state and emits nothing.
    pub fn resolve(
        &self,
        id: Uuid,
        actor: &str,
        note: String,
        root_cause: Option<String>,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Alarm, StoreError> {
        let mut entry = self.alarms.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status == AlarmStatus::Resolved {
            return Ok(entry.clone());
        }
        Self::check_version(&entry, expected_version)?;
        entry.status = AlarmStatus::Resolved;
        entry.resolved_at = Some(now);
        entry.resolved_by = Some(actor.to_string());
        entry.resolution_note = Some(note);
        entry.root_cause = root_cause;
        entry.shelve = None;
        entry.version += 1;
        entry.updated_at = now;
        let snapshot = entry.clone();
        drop(entry);

        let key = (snapshot.pod_id.clone(), snapshot.alarm_type);
        self.open_index.remove(&key);
        self.last_resolved.insert(key, now);
        self.emit(AlarmEventKind::Resolved, &snapshot, now);
        Ok(snapshot)
    }

    /// Shelve an open alarm until `until`. Requires a reason; records the
    /// prior state so unshelve can restore it.
    pub fn shelve(
        &self,
        id: Uuid,
        actor: &str,
        reason: String,
        until: DateTime<Utc>,
        auto_unshelve: bool,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Alarm, StoreError> {
        let mut entry = self.alarms.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        Self::check_version(&entry, expected_version)?;
        let prior_status = match entry.status {
            s @ (AlarmStatus::Active | AlarmStatus::Acknowledged) => s,
            current => {
                return Err(StoreError::InvalidTransition {
                    action: "shelve",
                    current,
                })
            }
        };
        entry.status = AlarmStatus::Shelved;
        entry.shelve = Some(ShelveInfo {
            shelved_at: now,
            shelved_by: actor.to_string(),
            reason,
            shelved_until: until,
            auto_unshelve,
            prior_status,
        });
        entry.version += 1;
        entry.updated_at = now;
        let snapshot = entry.clone();
        drop(entry);
        self.emit(AlarmEventKind::Shelved, &snapshot, now);
        Ok(snapshot)
    }

    /// Return a shelved alarm to the state it was shelved from.
    pub fn unshelve(&self, id: Uuid, now: DateTime<Utc>) -> Result<Alarm, StoreError> {
        let mut entry = self.alarms.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let current = entry.status;
        let info = match entry.shelve.take() {
            Some(info) if current == AlarmStatus::Shelved => info,
            shelve => {
                entry.shelve = shelve;
                return Err(StoreError::InvalidTransition {
                    action: "unshelve",
                    current,
                });
            }
        };
        entry.status = info.prior_status;
        entry.version += 1;
        entry.updated_at = now;
        let snapshot = entry.clone();
        drop(entry);
        self.emit(AlarmEventKind::Unshelved, &snapshot, now);
        Ok(snapshot)
    }

    /// Raise the escalation level of an alarm whose response window
    /// expired. Called only by the escalation scheduler.
    ///
    /// Returns `Ok(None)` when the escalation is suppressed: the alarm
    /// was acknowledged/resolved/shelved since the timer was armed, or it
    /// is already at `max_level`. The state check happens under the same
    /// entry lock as `resolve`, so a racing resolve always wins and no
    /// stale escalation event leaks out.
    pub fn escalate(
        &self,
        id: Uuid,
        max_level: u8,
        now: DateTime<Utc>,
    ) -> Result<Option<Alarm>, StoreError> {
        let mut entry = self.alarms.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status != AlarmStatus::Active || entry.escalated_to_level >= max_level {
            return Ok(None);
        }
        entry.escalated_to_level += 1;
        entry.escalated_at = Some(now);
        entry.version += 1;
        entry.updated_at = now;
        let snapshot = entry.clone();
        drop(entry);
        self.emit(
            AlarmEventKind::Escalated {
                level: snapshot.escalated_to_level,
            },
            &snapshot,
            now,
        );
        Ok(Some(snapshot))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: Uuid) -> Option<Alarm> {
        self.alarms.get(&id).map(|e| e.clone())
    }

    /// The open alarm for a (pod, type) pair, if any.
    pub fn open_alarm(&self, pod_id: &str, alarm_type: AlarmType) -> Option<Alarm> {
        let key = (pod_id.to_string(), alarm_type);
        let id = self.open_index.get(&key).map(|e| *e.value())?;
        self.alarms
            .get(&id)
            .map(|e| e.clone())
            .filter(Alarm::is_open)
    }

    /// When the last alarm for this pair was resolved (feeds the
    /// evaluator's suppression window).
    pub fn last_resolved_at(&self, pod_id: &str, alarm_type: AlarmType) -> Option<DateTime<Utc>> {
        self.last_resolved
            .get(&(pod_id.to_string(), alarm_type))
            .map(|e| *e.value())
    }

    /// List alarms matching a filter, newest first. Time range filters on
    /// `triggered_at`.
    pub fn list(&self, filter: &AlarmFilter) -> Vec<Alarm> {
        let mut out: Vec<Alarm> = self
            .alarms
            .iter()
            .filter(|e| {
                let a = e.value();
                filter.pod_id.as_deref().is_none_or(|p| a.pod_id == p)
                    && filter.severity.is_none_or(|s| a.severity == s)
                    && filter.status.is_none_or(|s| a.status == s)
                    && filter.from.is_none_or(|t| a.triggered_at >= t)
                    && filter.to.is_none_or(|t| a.triggered_at <= t)
            })
            .map(|e| e.clone())
            .collect();
        out.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        out
    }

    /// Restore alarms from persistence at startup. Open alarms are
    /// re-indexed so the one-open invariant survives a restart.
    pub fn restore(&self, alarms: Vec<Alarm>) {
        for alarm in alarms {
            let key = (alarm.pod_id.clone(), alarm.alarm_type);
            if alarm.is_open() {
                self.open_index.insert(key, alarm.id);
            } else if let Some(at) = alarm.resolved_at {
                let newer = self.last_resolved.get(&key).is_none_or(|e| *e.value() < at);
                if newer {
                    self.last_resolved.insert(key, at);
                }
            }
            self.alarms.insert(alarm.id, alarm);
        }
    }
}
