//! Alarm Policy Evaluator
//!
//! The per-pod state machine that turns classified readings into alarm
//! decisions. For each (pod, alarm type) it tracks when the breach
//! condition was first observed (`breach_since`) and decides, per
//! reading, whether to trigger, refresh, auto-clear, or do nothing.
//!
//! Temporal rules:
//!
//! - **Time-in-state debounce**: the condition must hold continuously for
//!   the policy's `time_in_state_secs` before an alarm triggers. A
//!   transient breach that clears early never alarms.
//! - **Deadband hysteresis, clear side only**: once breached, the value
//!   must fall back past `threshold ∓ deadband` before the breach timer
//!   resets. Values oscillating inside the band neither trigger anew nor
//!   clear. (Whether deadband should also delay triggering is ambiguous
//!   in the domain; this engine applies it to clearing only, and the
//!   tests pin that choice.)
//! - **Suppression**: after a resolve, the same (pod, type) cannot
//!   re-trigger until `suppression_duration_mins` has elapsed.
//!
//! The evaluator never mutates its own state during evaluation. It
//! returns a [`Decision`] plus the proposed [`BreachState`], and the
//! caller commits the state only after the corresponding alarm write
//! succeeded — a failed persistence attempt must not advance the
//! timeline.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::trace;

use crate::classifier::{ParameterVerdict, SpecStatus};
use crate::types::{Alarm, AlarmPolicy, AlarmType};

/// Per-(pod, alarm type) breach tracking state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreachState {
    /// When the breach condition was first observed, or `None` when the
    /// condition is clear.
    pub breach_since: Option<DateTime<Utc>>,
}

/// What the evaluator wants done for one (policy, reading) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nothing to do.
    None,
    /// Condition holds but has not yet persisted for `time_in_state`.
    Debouncing,
    /// Condition persisted long enough but a recent resolution's
    /// suppression window is still open.
    Suppressed,
    /// Open a new alarm with this triggering value.
    Trigger { value: f64 },
    /// Refresh the open alarm's triggering value (moved beyond deadband).
    Refresh { value: f64 },
    /// Condition cleared past the deadband; policy allows auto-resolve.
    AutoClear,
}

/// Evaluation state for one pod. Owned by that pod's worker task; never
/// shared.
pub struct PodEvaluator {
    pod_id: String,
    states: HashMap<AlarmType, BreachState>,
}

impl PodEvaluator {
    pub fn new(pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            states: HashMap::new(),
        }
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Current breach state for an alarm type (defaults to clear).
    pub fn state(&self, alarm_type: AlarmType) -> BreachState {
        self.states.get(&alarm_type).copied().unwrap_or_default()
    }

    /// Commit a proposed state after the caller's alarm write succeeded.
    pub fn commit(&mut self, alarm_type: AlarmType, state: BreachState) {
        self.states.insert(alarm_type, state);
    }

    /// Evaluate one policy against one classified reading.
    ///
    /// `open` is the currently open alarm for this (pod, type), `last_resolved`
    /// the most recent resolution timestamp. Both come from the alarm
    /// store; passing them in keeps this function pure and testable.
    ///
    /// Returns the decision and the breach state to commit if the caller
    /// successfully acts on it.
    pub fn evaluate_policy(
        &self,
        policy: &AlarmPolicy,
        verdicts: &[ParameterVerdict],
        open: Option<&Alarm>,
        last_resolved: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> (Decision, BreachState) {
        let state = self.state(policy.alarm_type);

        let Some(verdict) = verdicts
            .iter()
            .find(|v| v.parameter == policy.alarm_type.parameter())
        else {
            return (Decision::None, state);
        };

        // Faulted values are excluded from alarm evaluation; the breach
        // timeline neither advances nor resets on untrusted data.
        if !verdict.health.usable_for_evaluation() {
            trace!(pod = %self.pod_id, alarm_type = %policy.alarm_type, "skipping faulted value");
            return (Decision::None, state);
        }
        let value = verdict.value;

        let mut condition = policy.operator.holds(value, policy.threshold);
        if condition && policy.require_out_of_spec {
            condition = verdict.spec == Some(SpecStatus::OutOfSpec);
        }

        // A shelved alarm is excluded from re-triggering, refreshing, and
        // auto-clearing until its window elapses or it is unshelved.
        if let Some(alarm) = open {
            if alarm.is_shelved_at(now) {
                return (Decision::None, state);
            }
        }

        if condition {
            match open {
                Some(alarm) => {
                    // Breach of an already-open alarm: refresh in place
                    // when the value moved meaningfully, never duplicate.
                    if (value - alarm.triggering_value).abs() > policy.deadband {
                        (Decision::Refresh { value }, state)
                    } else {
                        (Decision::None, state)
                    }
                }
                None => {
                    let since = state.breach_since.unwrap_or(now);
                    let next = BreachState {
                        breach_since: Some(since),
                    };
                    if now - since >= Duration::seconds(policy.time_in_state_secs as i64) {
                        let suppressed = last_resolved.is_some_and(|resolved| {
                            now - resolved
                                < Duration::minutes(policy.suppression_duration_mins as i64)
                        });
                        if suppressed {
                            (Decision::Suppressed, next)
                        } else {
                            (Decision::Trigger { value }, next)
                        }
                    } else {
                        (Decision::Debouncing, next)
                    }
                }
            }
        } else if policy
            .operator
            .cleared_with_deadband(value, policy.threshold, policy.deadband)
        {
            // Cleanly back in range: reset the breach timeline, and
            // auto-resolve the open alarm if the policy permits it.
            let next = BreachState { breach_since: None };
            match open {
                Some(_) if policy.auto_clear => (Decision::AutoClear, next),
                _ => (Decision::None, next),
            }
        } else {
            // Inside the hysteresis band: not breaching, not cleared.
            // Hold the breach timeline to prevent boundary flapping.
            (Decision::None, state)
        }
    }
}
