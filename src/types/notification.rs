//! Notification delivery records and routing rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Severity;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    InApp,
    Email,
    Sms,
    Push,
}

/// Facility roles the router can target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyRole {
    Grower,
    FacilityManager,
    ComplianceOfficer,
    Technician,
}

/// Delivery status, mutated only by the delivery subsystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// One delivery record. Referencing alarm is optional — system notices
/// (e.g. engine restart) have no alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub alarm_id: Option<Uuid>,
    pub channel: Channel,
    pub recipient: String,
    pub urgency: Severity,
    pub title: String,
    pub body: String,
    /// Escalation level this notification was produced at (0 for the
    /// initial open notification). Distinguishes escalation re-notifies
    /// from dedup'd repeats.
    pub escalation_level: u8,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// A user's standing subscription to alarm notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub user_id: String,
    pub org_id: String,
    pub role: NotifyRole,
    /// Channels this user wants, in preference order.
    pub channels: Vec<Channel>,
    /// Minimum severity the user cares about.
    pub min_severity: Severity,
}

/// Role-based routing rule: which role hears about alarms on which
/// channel, and from which escalation level onward.
///
/// A rule fires when `rule.escalation_level <= alarm.escalated_to_level`,
/// so level-0 rules fire on open and level-2 rules only after two missed
/// response windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub org_id: String,
    pub notify_role: NotifyRole,
    pub channel: Channel,
    pub escalation_level: u8,
    /// Minimum alarm severity this route carries.
    #[serde(default)]
    pub min_severity: Option<Severity>,
}
