//! Engine-wide default constants.
//!
//! Centralises the tunables the TOML config can override, grouped by
//! subsystem.

// ============================================================================
// Ingestion & Classification
// ============================================================================

/// Expected interval between readings per pod (seconds).
pub const INGEST_INTERVAL_SECS: u64 = 10;

/// A reading older than this is classified `Stale` (seconds).
pub const STALENESS_THRESHOLD_SECS: u64 = 30;

/// Fraction of the tolerance band at which a parameter is flagged
/// `Approaching` rather than `InSpec`.
pub const SPEC_WARNING_RATIO: f64 = 0.8;

// ============================================================================
// Physical sensor bounds (validation, not alarming)
// ============================================================================

/// Air temperature plausibility range (°C).
pub const TEMP_BOUNDS_C: (f64, f64) = (-10.0, 50.0);

/// Relative humidity plausibility range (%).
pub const HUMIDITY_BOUNDS_PCT: (f64, f64) = (0.0, 100.0);

/// CO₂ plausibility range (ppm).
pub const CO2_BOUNDS_PPM: (f64, f64) = (0.0, 10_000.0);

/// Light intensity plausibility range (%).
pub const LIGHT_BOUNDS_PCT: (f64, f64) = (0.0, 100.0);

/// VPD plausibility range (kPa). Upper bound is the theoretical SVP at
/// 50 °C with bone-dry air.
pub const VPD_BOUNDS_KPA: (f64, f64) = (0.0, 12.5);

// ============================================================================
// Alarm evaluation
// ============================================================================

/// Default continuous-breach duration before an alarm triggers (seconds).
pub const DEFAULT_TIME_IN_STATE_SECS: u64 = 300;

/// Default post-resolution suppression window (minutes).
pub const DEFAULT_SUPPRESSION_MINS: u64 = 5;

// ============================================================================
// Escalation
// ============================================================================

/// Highest escalation level an alarm can reach.
pub const MAX_ESCALATION_LEVEL: u8 = 3;

/// Fallback acknowledgment deadline when a policy omits the ISA-18.2
/// expected response time (seconds).
pub const DEFAULT_EXPECTED_RESPONSE_SECS: u64 = 900;

// ============================================================================
// Notification
// ============================================================================

/// Per-(recipient, channel) suppression window for repeat open
/// notifications (seconds). Escalation notifications bypass this.
pub const NOTIFY_SUPPRESSION_SECS: u64 = 60;

/// Depth of the fire-and-forget delivery queue. A full queue drops the
/// notification as `Failed` rather than blocking evaluation.
pub const DELIVERY_QUEUE_DEPTH: usize = 512;

// ============================================================================
// Persistence
// ============================================================================

/// Attempts per alarm write before the evaluation cycle is failed.
pub const PERSIST_RETRY_ATTEMPTS: u32 = 3;

/// Base backoff between persistence retries (milliseconds); doubles per
/// attempt.
pub const PERSIST_RETRY_BASE_MS: u64 = 100;

/// Default sled database location.
pub const DEFAULT_DB_PATH: &str = "./data/podsentry.db";

// ============================================================================
// API
// ============================================================================

/// Default HTTP port for the query/command surface.
pub const DEFAULT_API_PORT: u16 = 8080;
