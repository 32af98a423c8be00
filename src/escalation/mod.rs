//! Escalation Scheduler
//!
//! Watches the alarm event stream and keeps one acknowledgment timer per
//! active alarm. When a timer expires while the alarm is still Active,
//! the alarm's escalation level is raised (through the store, which
//! re-checks state under the alarm's entry lock) and a new timer is
//! armed, up to the configured maximum level.
//!
//! Timer rules:
//! - acknowledge/resolve cancels the pending timer immediately,
//! - shelving *suspends* the timer: the remaining duration is recorded
//!   and restored on unshelve, it does not restart from scratch,
//! - a timer firing concurrently with a resolve is harmless — the
//!   escalate call observes the resolved state and produces no event,
//! - alarms shelved with `auto_unshelve` get a second timer that calls
//!   `unshelve` at `shelved_until`.
//!
//! All sleeping uses the tokio clock, so tests drive the scheduler with
//! `tokio::time::pause()` and `advance()` instead of real waiting.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alarm_store::AlarmStore;
use crate::types::{Alarm, AlarmEventKind, AlarmStatus};

/// One armed response timer.
struct TimerEntry {
    token: CancellationToken,
    /// When the timer will fire (tokio clock).
    deadline: Instant,
    /// Set while the alarm is shelved: time that was left on the clock.
    suspended_remaining: Option<Duration>,
}

/// Escalation timer supervisor. One instance per engine.
pub struct EscalationScheduler {
    store: Arc<AlarmStore>,
    max_level: u8,
    default_response_secs: u64,
    cancel: CancellationToken,
    timers: HashMap<Uuid, TimerEntry>,
    /// Auto-unshelve timers, keyed by alarm id.
    unshelve_timers: HashMap<Uuid, CancellationToken>,
}

impl EscalationScheduler {
    pub fn new(
        store: Arc<AlarmStore>,
        max_level: u8,
        default_response_secs: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            max_level,
            default_response_secs,
            cancel,
            timers: HashMap::new(),
            unshelve_timers: HashMap::new(),
        }
    }

    fn response_window(&self, alarm: &Alarm) -> Duration {
        let secs = if alarm.expected_response_secs > 0 {
            alarm.expected_response_secs
        } else {
            self.default_response_secs
        };
        Duration::from_secs(secs)
    }

    fn arm(&mut self, alarm: &Alarm, window: Duration) {
        // Replace any previous timer for this alarm.
        if let Some(prev) = self.timers.remove(&alarm.id) {
            prev.token.cancel();
        }
        let token = CancellationToken::new();
        let deadline = Instant::now() + window;
        self.timers.insert(
            alarm.id,
            TimerEntry {
                token: token.clone(),
                deadline,
                suspended_remaining: None,
            },
        );

        let store = Arc::clone(&self.store);
        let id = alarm.id;
        let max_level = self.max_level;
        debug!(alarm_id = %id, window_secs = window.as_secs(), "response timer armed");
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(window) => {
                    // The store re-checks state under the entry lock; a
                    // resolve that raced this expiry wins and we emit
                    // nothing.
                    match store.escalate(id, max_level, Utc::now()) {
                        Ok(Some(alarm)) => {
                            info!(
                                alarm_id = %id,
                                level = alarm.escalated_to_level,
                                "alarm escalated: response window expired without acknowledgment"
                            );
                        }
                        Ok(None) => {
                            debug!(alarm_id = %id, "escalation suppressed (alarm handled or at max level)");
                        }
                        Err(e) => warn!(alarm_id = %id, error = %e, "escalation failed"),
                    }
                }
            }
        });
    }

    fn cancel_timer(&mut self, id: Uuid) {
        if let Some(entry) = self.timers.remove(&id) {
            entry.token.cancel();
            debug!(alarm_id = %id, "response timer cancelled");
        }
    }

    /// Suspend the response timer, retaining the unelapsed portion.
    fn suspend(&mut self, id: Uuid) {
        if let Some(entry) = self.timers.get_mut(&id) {
            entry.token.cancel();
            let remaining = entry.deadline.saturating_duration_since(Instant::now());
            entry.suspended_remaining = Some(remaining);
            debug!(alarm_id = %id, remaining_secs = remaining.as_secs(), "response timer suspended");
        }
    }

    fn arm_auto_unshelve(&mut self, alarm: &Alarm) {
        let Some(info) = &alarm.shelve else { return };
        if !info.auto_unshelve {
            return;
        }
        let wait = (info.shelved_until - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let token = CancellationToken::new();
        if let Some(prev) = self.unshelve_timers.insert(alarm.id, token.clone()) {
            prev.cancel();
        }
        let store = Arc::clone(&self.store);
        let id = alarm.id;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(wait) => {
                    match store.unshelve(id, Utc::now()) {
                        Ok(alarm) => info!(alarm_id = %id, status = %alarm.status, "shelving window elapsed, alarm unshelved"),
                        // Resolved while shelved — nothing to restore.
                        Err(e) => debug!(alarm_id = %id, error = %e, "auto-unshelve skipped"),
                    }
                }
            }
        });
    }

    fn cancel_auto_unshelve(&mut self, id: Uuid) {
        if let Some(token) = self.unshelve_timers.remove(&id) {
            token.cancel();
        }
    }

    /// Arm timers for alarms restored from persistence. The restore path
    /// emits no lifecycle events, so alarms that were Active (or shelved
    /// with auto-unshelve) at shutdown would otherwise sit without a
    /// response timer until their next transition.
    pub fn bootstrap(&mut self, alarms: &[Alarm]) {
        for alarm in alarms {
            match alarm.status {
                AlarmStatus::Active if alarm.escalated_to_level < self.max_level => {
                    let window = self.response_window(alarm);
                    self.arm(alarm, window);
                }
                AlarmStatus::Shelved => self.arm_auto_unshelve(alarm),
                _ => {}
            }
        }
    }

    /// Run the scheduler until cancelled. Consumes the store's event
    /// stream.
    pub async fn run(mut self) {
        let mut events = self.store.subscribe();
        info!(max_level = self.max_level, "escalation scheduler started");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("escalation scheduler stopping");
                    return;
                }
                event = events.recv() => {
                    let event = match event {
                        Ok(ev) => ev,
                        Err(RecvError::Lagged(n)) => {
                            warn!(missed = n, "escalation scheduler lagged on alarm events");
                            continue;
                        }
                        Err(RecvError::Closed) => {
                            info!("alarm event channel closed, escalation scheduler stopping");
                            return;
                        }
                    };
                    self.handle(&event.kind, &event.alarm);
                }
            }
        }
    }

    fn handle(&mut self, kind: &AlarmEventKind, alarm: &Alarm) {
        match kind {
            AlarmEventKind::Opened => {
                let window = self.response_window(alarm);
                self.arm(alarm, window);
            }
            AlarmEventKind::Escalated { level } => {
                // Re-arm for the next cycle unless the ceiling is hit.
                if *level < self.max_level {
                    let window = self.response_window(alarm);
                    self.arm(alarm, window);
                } else {
                    self.timers.remove(&alarm.id);
                }
            }
            AlarmEventKind::Acknowledged => {
                self.cancel_timer(alarm.id);
            }
            AlarmEventKind::Resolved => {
                self.cancel_timer(alarm.id);
                self.cancel_auto_unshelve(alarm.id);
            }
            AlarmEventKind::Shelved => {
                self.suspend(alarm.id);
                self.arm_auto_unshelve(alarm);
            }
            AlarmEventKind::Unshelved => {
                self.cancel_auto_unshelve(alarm.id);
                // Resume with whatever was left on the clock, but only if
                // the alarm came back unacknowledged.
                if alarm.status == AlarmStatus::Active {
                    let remaining = self
                        .timers
                        .get(&alarm.id)
                        .and_then(|e| e.suspended_remaining)
                        .unwrap_or_else(|| self.response_window(alarm));
                    self.arm(alarm, remaining);
                } else {
                    self.cancel_timer(alarm.id);
                }
            }
            AlarmEventKind::Refreshed => {}
        }
    }
}
