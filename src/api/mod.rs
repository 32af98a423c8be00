//! HTTP surface for the excluded dashboard layer
//!
//! Read-only queries (alarms, notifications, transitions, readings) plus
//! the four lifecycle commands. Commands follow a command/result
//! pattern: the caller sends the action and applies the authoritative
//! alarm state from the response — client-side optimistic mutation is
//! not supported.

mod handlers;
mod routes;

pub use routes::api_routes;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::alarm_store::AlarmStore;
use crate::engine::EngineStats;
use crate::notifier::NotificationStore;
use crate::storage::HistoryStorage;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub alarms: Arc<AlarmStore>,
    pub notifications: Arc<NotificationStore>,
    pub storage: Arc<HistoryStorage>,
    pub stats: Arc<EngineStats>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        alarms: Arc<AlarmStore>,
        notifications: Arc<NotificationStore>,
        storage: Arc<HistoryStorage>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            alarms,
            notifications,
            storage,
            stats,
            started_at: Utc::now(),
        }
    }
}
