//! Notification Router
//!
//! Fans alarm lifecycle events out to channels (in-app, email, SMS,
//! push) based on severity subscriptions and role routes.
//!
//! Routing: a [`RouteRule`] fires only at or below the alarm's current
//! escalation level, so level-0 routes hear about every open and level-2
//! routes only join after two missed response windows.
//!
//! Deduplication: at most one "alarm opened" notification per
//! (alarm, channel, recipient) within one open period. Escalations are
//! tagged with their level and always distinct. The dedup set is cleared
//! when the alarm resolves, so a later episode notifies again.
//!
//! Delivery is fire-and-forget: the router enqueues onto a bounded mpsc
//! queue and never waits on a channel backend. A full queue or a backend
//! error records the notification as `Failed`; redelivery belongs to the
//! external delivery subsystem, not this engine.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alarm_store::AlarmStore;
use crate::types::{
    Alarm, AlarmEvent, AlarmEventKind, Channel, DeliveryStatus, Notification, RouteRule,
    Severity, Subscriber,
};

// ============================================================================
// Notification store
// ============================================================================

/// In-memory notification records, queried by the UI layer.
#[derive(Default)]
pub struct NotificationStore {
    records: DashMap<Uuid, Notification>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, notification: Notification) {
        self.records.insert(notification.id, notification);
    }

    pub fn get(&self, id: Uuid) -> Option<Notification> {
        self.records.get(&id).map(|e| e.clone())
    }

    /// All notifications for one recipient, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Vec<Notification> {
        let mut out: Vec<Notification> = self
            .records
            .iter()
            .filter(|e| e.recipient == user_id)
            .map(|e| e.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Mark a notification read. Returns the updated record.
    pub fn mark_read(&self, id: Uuid, now: DateTime<Utc>) -> Option<Notification> {
        let mut entry = self.records.get_mut(&id)?;
        if entry.read_at.is_none() {
            entry.read_at = Some(now);
        }
        Some(entry.clone())
    }

    pub fn set_status(&self, id: Uuid, status: DeliveryStatus, now: DateTime<Utc>) {
        if let Some(mut entry) = self.records.get_mut(&id) {
            entry.status = status;
            if status == DeliveryStatus::Delivered {
                entry.delivered_at = Some(now);
            }
        }
    }
}

// ============================================================================
// Delivery backends
// ============================================================================

/// Outbound channel backend. The real email/SMS/push integrations live
/// outside this engine; the default backend just records the attempt.
#[async_trait::async_trait]
pub trait DeliveryBackend: Send + Sync + 'static {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default backend: in-app is a store write (always succeeds); external
/// channels are logged for the delivery subsystem to pick up.
pub struct LoggingBackend;

#[async_trait::async_trait]
impl DeliveryBackend for LoggingBackend {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            channel = ?notification.channel,
            recipient = %notification.recipient,
            urgency = %notification.urgency,
            title = %notification.title,
            "notification dispatched"
        );
        Ok(())
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routing table: who hears about what, where.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub subscribers: Vec<Subscriber>,
    pub routes: Vec<RouteRule>,
}

impl RoutingTable {
    /// (recipient, channel) pairs eligible for an alarm at
    /// `effective_level`.
    fn recipients(&self, alarm: &Alarm, effective_level: u8) -> Vec<(String, Channel)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for sub in &self.subscribers {
            if sub.org_id != alarm.org_id || alarm.severity < sub.min_severity {
                continue;
            }
            for route in &self.routes {
                if route.org_id != alarm.org_id
                    || route.notify_role != sub.role
                    || route.escalation_level > effective_level
                    || !sub.channels.contains(&route.channel)
                {
                    continue;
                }
                if let Some(min) = route.min_severity {
                    if alarm.severity < min {
                        continue;
                    }
                }
                if seen.insert((sub.user_id.clone(), route.channel)) {
                    out.push((sub.user_id.clone(), route.channel));
                }
            }
        }
        out
    }
}

/// Routes alarm lifecycle events to notification records.
pub struct NotificationRouter {
    store: Arc<AlarmStore>,
    notifications: Arc<NotificationStore>,
    table: arc_swap::ArcSwap<RoutingTable>,
    delivery_tx: mpsc::Sender<Notification>,
    /// One "opened"/escalation notification per key per open period.
    /// Key: (alarm, channel, recipient, level).
    sent: HashSet<(Uuid, Channel, String, u8)>,
    /// Last notification instant per (recipient, channel) for the
    /// open-notification suppression window.
    last_sent: HashMap<(String, Channel), DateTime<Utc>>,
    suppression_secs: u64,
    notify_on_handled: bool,
    cancel: CancellationToken,
}

impl NotificationRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<AlarmStore>,
        notifications: Arc<NotificationStore>,
        table: RoutingTable,
        backend: Arc<dyn DeliveryBackend>,
        queue_depth: usize,
        suppression_secs: u64,
        notify_on_handled: bool,
        cancel: CancellationToken,
    ) -> Self {
        let (delivery_tx, delivery_rx) = mpsc::channel(queue_depth);
        Self::spawn_delivery_worker(
            delivery_rx,
            Arc::clone(&notifications),
            backend,
            cancel.clone(),
        );
        Self {
            store,
            notifications,
            table: arc_swap::ArcSwap::from_pointee(table),
            delivery_tx,
            sent: HashSet::new(),
            last_sent: HashMap::new(),
            suppression_secs,
            notify_on_handled,
            cancel,
        }
    }

    /// Swap the routing table without restart.
    pub fn update_table(&self, table: RoutingTable) {
        self.table.store(Arc::new(table));
    }

    fn spawn_delivery_worker(
        mut rx: mpsc::Receiver<Notification>,
        notifications: Arc<NotificationStore>,
        backend: Arc<dyn DeliveryBackend>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    item = rx.recv() => {
                        let Some(notification) = item else { return };
                        let id = notification.id;
                        match backend.deliver(&notification).await {
                            Ok(()) => notifications.set_status(id, DeliveryStatus::Delivered, Utc::now()),
                            Err(e) => {
                                warn!(notification_id = %id, error = %e, "delivery failed");
                                notifications.set_status(id, DeliveryStatus::Failed, Utc::now());
                            }
                        }
                    }
                }
            }
        });
    }

    fn enqueue(&mut self, notification: Notification) {
        self.notifications.insert(notification.clone());
        // Never block evaluation on a slow channel: drop to Failed if the
        // queue is full.
        if let Err(e) = self.delivery_tx.try_send(notification) {
            let notification = match e {
                mpsc::error::TrySendError::Full(n) | mpsc::error::TrySendError::Closed(n) => n,
            };
            warn!(notification_id = %notification.id, "delivery queue unavailable, marking failed");
            self.notifications
                .set_status(notification.id, DeliveryStatus::Failed, Utc::now());
        }
    }

    fn build_notification(
        alarm: &Alarm,
        channel: Channel,
        recipient: String,
        level: u8,
        title: String,
        body: String,
        urgency: Severity,
        now: DateTime<Utc>,
    ) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            alarm_id: Some(alarm.id),
            channel,
            recipient,
            urgency,
            title,
            body,
            escalation_level: level,
            status: DeliveryStatus::Pending,
            created_at: now,
            delivered_at: None,
            read_at: None,
        }
    }

    /// Handle one lifecycle event. Public for deterministic tests; the
    /// run loop feeds it real events.
    pub fn handle_event(&mut self, event: &AlarmEvent, now: DateTime<Utc>) {
        let alarm = &event.alarm;
        match &event.kind {
            AlarmEventKind::Opened => self.notify_opened(alarm, now),
            AlarmEventKind::Escalated { level } => self.notify_escalated(alarm, *level, now),
            AlarmEventKind::Acknowledged | AlarmEventKind::Resolved => {
                if self.notify_on_handled {
                    self.notify_handled(alarm, &event.kind, now);
                }
                if event.kind == AlarmEventKind::Resolved {
                    // Close out the open period: the next episode of this
                    // (pod, type) notifies afresh.
                    self.sent.retain(|(id, _, _, _)| *id != alarm.id);
                }
            }
            // Shelving suppresses notifications by construction: no new
            // events reach us until unshelve, and unshelve itself is not
            // notified.
            AlarmEventKind::Refreshed
            | AlarmEventKind::Shelved
            | AlarmEventKind::Unshelved => {}
        }
    }

    fn notify_opened(&mut self, alarm: &Alarm, now: DateTime<Utc>) {
        let table = self.table.load();
        for (recipient, channel) in table.recipients(alarm, alarm.escalated_to_level) {
            let key = (alarm.id, channel, recipient.clone(), 0);
            if self.sent.contains(&key) {
                debug!(alarm_id = %alarm.id, recipient = %recipient, "duplicate open notification suppressed");
                continue;
            }
            if self.within_suppression(&recipient, channel, now) {
                debug!(recipient = %recipient, "open notification inside suppression window, skipped");
                continue;
            }
            let n = Self::build_notification(
                alarm,
                channel,
                recipient.clone(),
                0,
                format!("{} alarm: {}", alarm.severity, alarm.alarm_type),
                alarm.message.clone(),
                alarm.severity,
                now,
            );
            self.sent.insert(key);
            self.last_sent.insert((recipient, channel), now);
            self.enqueue(n);
        }
    }

    fn notify_escalated(&mut self, alarm: &Alarm, level: u8, now: DateTime<Utc>) {
        let table = self.table.load();
        // Escalation widens the audience to every route at or below the
        // new level and bypasses the suppression window.
        for (recipient, channel) in table.recipients(alarm, level) {
            let key = (alarm.id, channel, recipient.clone(), level);
            if self.sent.contains(&key) {
                continue;
            }
            let n = Self::build_notification(
                alarm,
                channel,
                recipient.clone(),
                level,
                format!(
                    "ESCALATION L{level}: {} alarm {} unacknowledged",
                    alarm.severity, alarm.alarm_type
                ),
                format!(
                    "{} (triggered {}, no acknowledgment after {} escalation cycle(s))",
                    alarm.message, alarm.triggered_at, level
                ),
                alarm.severity,
                now,
            );
            self.sent.insert(key);
            self.last_sent.insert((recipient, channel), now);
            self.enqueue(n);
        }
    }

    fn notify_handled(&mut self, alarm: &Alarm, kind: &AlarmEventKind, now: DateTime<Utc>) {
        let table = self.table.load();
        let verb = if *kind == AlarmEventKind::Resolved {
            "resolved"
        } else {
            "acknowledged"
        };
        let by = alarm
            .resolved_by
            .as_deref()
            .or(alarm.acknowledged_by.as_deref())
            .unwrap_or("unknown");
        // Tell the audience that had been escalated to that it's handled.
        for (recipient, channel) in table.recipients(alarm, alarm.escalated_to_level) {
            let n = Self::build_notification(
                alarm,
                channel,
                recipient,
                alarm.escalated_to_level,
                format!("{} alarm {} {verb}", alarm.severity, alarm.alarm_type),
                format!("{verb} by {by}"),
                Severity::Info,
                now,
            );
            self.enqueue(n);
        }
    }

    fn within_suppression(&self, recipient: &str, channel: Channel, now: DateTime<Utc>) -> bool {
        self.last_sent
            .get(&(recipient.to_string(), channel))
            .is_some_and(|last| now - *last < Duration::seconds(self.suppression_secs as i64))
    }

    /// Run the router until cancelled.
    pub async fn run(mut self) {
        let mut events = self.store.subscribe();
        info!("notification router started");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("notification router stopping");
                    return;
                }
                event = events.recv() => {
                    match event {
                        Ok(ev) => self.handle_event(&ev, Utc::now()),
                        Err(RecvError::Lagged(n)) => {
                            warn!(missed = n, "notification router lagged on alarm events");
                        }
                        Err(RecvError::Closed) => {
                            info!("alarm event channel closed, notification router stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}
