//! Alarm instance types
//!
//! One `Alarm` row records one breach episode of one policy for one pod.
//! Rows are created by the evaluator, mutated only through the lifecycle
//! transitions in the alarm store, and never deleted — resolved alarms are
//! retained for compliance audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AlarmType, Severity};

/// Lifecycle state of an alarm.
///
/// `Resolved` is terminal. `Shelved` is a temporary overlay: the alarm
/// returns to the state it was shelved from on expiry or explicit
/// unshelve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Active,
    Acknowledged,
    Shelved,
    Resolved,
}

impl std::fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmStatus::Active => write!(f, "active"),
            AlarmStatus::Acknowledged => write!(f, "acknowledged"),
            AlarmStatus::Shelved => write!(f, "shelved"),
            AlarmStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Shelving detail, present only while an alarm is shelved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelveInfo {
    pub shelved_at: DateTime<Utc>,
    pub shelved_by: String,
    pub reason: String,
    pub shelved_until: DateTime<Utc>,
    /// When true the alarm automatically returns to monitoring at
    /// `shelved_until`; when false it waits for an explicit unshelve.
    pub auto_unshelve: bool,
    /// State the alarm held before shelving, restored on unshelve.
    pub prior_status: AlarmStatus,
}

/// One breach episode of one (pod, alarm type).
///
/// Invariant: at most one open (non-resolved) alarm exists per
/// (pod, alarm_type) — enforced by the alarm store, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub id: Uuid,
    pub pod_id: String,
    pub org_id: String,
    pub alarm_type: AlarmType,
    pub severity: Severity,
    pub message: String,

    /// Most recent value that breached the policy. Refreshed in place
    /// while the alarm stays open (no duplicate rows per episode).
    pub triggering_value: f64,
    pub threshold: f64,

    pub status: AlarmStatus,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
    pub root_cause: Option<String>,

    /// Escalation cycles survived without acknowledgment. Starts at 0.
    pub escalated_to_level: u8,
    pub escalated_at: Option<DateTime<Utc>>,
    /// Acknowledgment deadline per cycle, copied from the policy's
    /// ISA-18.2 expected response time.
    pub expected_response_secs: u64,

    pub shelve: Option<ShelveInfo>,

    /// Free-text operator notes, appended by lifecycle transitions.
    #[serde(default)]
    pub notes: Vec<String>,

    /// Optimistic-concurrency version; bumped on every mutation.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    /// Open = participating in evaluation and notification, i.e. not yet
    /// resolved.
    pub fn is_open(&self) -> bool {
        self.status != AlarmStatus::Resolved
    }

    /// Shelved and still inside the shelving window at `now`.
    pub fn is_shelved_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.status, &self.shelve) {
            (AlarmStatus::Shelved, Some(info)) => now < info.shelved_until,
            _ => false,
        }
    }
}

/// What happened to an alarm — broadcast to the escalation scheduler and
/// notification router after every store mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlarmEventKind {
    Opened,
    /// Triggering value refreshed while the alarm stayed open.
    Refreshed,
    Acknowledged,
    Resolved,
    Escalated { level: u8 },
    Shelved,
    Unshelved,
}

/// An alarm lifecycle event with a snapshot of the alarm after the
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub kind: AlarmEventKind,
    pub alarm: Alarm,
    pub occurred_at: DateTime<Utc>,
}
