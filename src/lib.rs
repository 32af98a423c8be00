//! PodSentry: Environmental Alarm Engine
//!
//! Turns a continuous stream of pod telemetry into health
//! classifications, spec-compliance verdicts, debounced alarms, an
//! acknowledge/resolve/shelve lifecycle, and role-routed escalating
//! notifications.
//!
//! ## Architecture
//!
//! - **Metrics**: pure derived-metric calculation (VPD, dew point) and
//!   physical-bounds validation
//! - **Classifier**: per-parameter health and spec-status verdicts
//! - **Evaluator**: per-pod alarm policy state machine (time-in-state
//!   debounce, deadband hysteresis, suppression windows)
//! - **Alarm Store**: canonical lifecycle state with per-entry locking
//!   and optimistic concurrency
//! - **Escalation**: cancellable, suspendable response timers
//! - **Notifier**: severity/role-routed, deduplicated fan-out

pub mod alarm_store;
pub mod api;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod escalation;
pub mod evaluator;
pub mod ingest;
pub mod metrics;
pub mod notifier;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::EngineConfig;

// Re-export commonly used types
pub use types::{
    Alarm, AlarmEvent, AlarmEventKind, AlarmPolicy, AlarmStatus, AlarmType, BatchStage, Channel,
    DataSource, EquipmentSnapshot, EquipmentState, Notification, NotifyRole, ParameterKind,
    PodProfile, PodType, RouteRule, Setpoint, Severity, Subscriber, TelemetryReading,
    ThresholdOperator,
};

// Re-export the pipeline stages
pub use alarm_store::{AlarmFilter, AlarmStore, StoreError};
pub use classifier::{HealthState, SpecStatus};
pub use engine::{Engine, PodRegistry, PodWorker, PolicyCatalog};
pub use escalation::EscalationScheduler;
pub use evaluator::{Decision, PodEvaluator};
pub use notifier::{NotificationRouter, NotificationStore, RoutingTable};
pub use storage::{HistoryStorage, StorageError};
