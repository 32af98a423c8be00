//! Alarm & Reading History Storage
//!
//! Persists telemetry readings, alarm rows, and alarm state transitions
//! to sled for audit and export. Keys are timestamp-based (big-endian
//! u64 milliseconds) so iteration order is chronological, which is what
//! the export collaborator needs for its date-range queries.
//!
//! Trees:
//! - `readings`      — key `pod_id \0 ts_millis_be`, value JSON reading
//! - `alarms`        — key alarm UUID bytes, value JSON alarm snapshot
//! - `transitions`   — key `ts_millis_be ++ uuid`, value JSON alarm event
//!
//! Alarm writes from the evaluation path go through
//! [`HistoryStorage::persist_alarm_with_retry`]: bounded exponential
//! backoff, and the caller must not advance evaluator state if it still
//! fails.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::types::{Alarm, AlarmEvent, TelemetryReading};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

fn ts_key(ts: DateTime<Utc>) -> [u8; 8] {
    // Clamp pre-epoch timestamps to zero; sub-ms ordering is not needed.
    let millis = ts.timestamp_millis().max(0) as u64;
    millis.to_be_bytes()
}

fn reading_key(pod_id: &str, ts: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(pod_id.len() + 9);
    key.extend_from_slice(pod_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&ts_key(ts));
    key
}

/// History storage for readings, alarms, and transitions.
#[derive(Clone)]
pub struct HistoryStorage {
    readings: sled::Tree,
    alarms: sled::Tree,
    transitions: sled::Tree,
    _db: Arc<sled::Db>,
}

impl HistoryStorage {
    /// Open or create the history database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            readings: db.open_tree("readings")?,
            alarms: db.open_tree("alarms")?,
            transitions: db.open_tree("transitions")?,
            _db: Arc::new(db),
        })
    }

    // ========================================================================
    // Readings
    // ========================================================================

    /// Persist one reading. Faulted readings are persisted too — the gap
    /// must stay visible in the audit trail.
    pub fn persist_reading(&self, reading: &TelemetryReading) -> Result<(), StorageError> {
        let key = reading_key(&reading.pod_id, reading.timestamp);
        let bytes = serde_json::to_vec(reading)?;
        self.readings.insert(key, bytes)?;
        Ok(())
    }

    /// Readings for one pod in `[from, to]`, oldest first.
    pub fn readings_in_range(
        &self,
        pod_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetryReading>, StorageError> {
        let lo = reading_key(pod_id, from);
        let hi = reading_key(pod_id, to);
        let mut out = Vec::new();
        for item in self.readings.range(lo..=hi) {
            let (_, value) = item?;
            match serde_json::from_slice::<TelemetryReading>(&value) {
                Ok(r) => out.push(r),
                Err(e) => warn!(error = %e, "skipping unparseable reading row"),
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Alarms
    // ========================================================================

    /// Persist one alarm snapshot (insert or overwrite by id).
    pub fn persist_alarm(&self, alarm: &Alarm) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(alarm)?;
        self.alarms.insert(alarm.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Persist an alarm with bounded exponential-backoff retry.
    ///
    /// On final failure the error is returned and the caller must treat
    /// the evaluation cycle as failed (do not advance evaluator state).
    pub async fn persist_alarm_with_retry(
        &self,
        alarm: &Alarm,
        attempts: u32,
        base_backoff: Duration,
    ) -> Result<(), StorageError> {
        let mut backoff = base_backoff;
        let mut last_err = None;
        for attempt in 1..=attempts.max(1) {
            match self.persist_alarm(alarm) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        alarm_id = %alarm.id,
                        attempt,
                        error = %e,
                        "alarm persist failed, backing off"
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        let err = last_err.unwrap_or_else(|| StorageError::Database("no attempts made".into()));
        error!(alarm_id = %alarm.id, error = %err, "alarm persist exhausted retries");
        Err(err)
    }

    /// Load every stored alarm (startup restore).
    pub fn load_alarms(&self) -> Result<Vec<Alarm>, StorageError> {
        let mut out = Vec::new();
        for item in self.alarms.iter() {
            let (_, value) = item?;
            match serde_json::from_slice::<Alarm>(&value) {
                Ok(a) => out.push(a),
                Err(e) => warn!(error = %e, "skipping unparseable alarm row"),
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Transitions (audit trail for export)
    // ========================================================================

    /// Record one lifecycle transition, keyed by occurrence time.
    pub fn persist_transition(&self, event: &AlarmEvent) -> Result<(), StorageError> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(&ts_key(event.occurred_at));
        key.extend_from_slice(event.alarm.id.as_bytes());
        let bytes = serde_json::to_vec(event)?;
        self.transitions.insert(key, bytes)?;
        Ok(())
    }

    /// Transitions in `[from, to]`, oldest first, optionally filtered to
    /// one alarm. This is the export collaborator's query surface.
    pub fn transitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        alarm_id: Option<Uuid>,
    ) -> Result<Vec<AlarmEvent>, StorageError> {
        let lo = ts_key(from).to_vec();
        let mut hi = ts_key(to).to_vec();
        // Inclusive upper bound across all uuid suffixes at `to`.
        hi.extend_from_slice(&[0xff; 16]);
        let mut out = Vec::new();
        for item in self.transitions.range(lo..=hi) {
            let (_, value) = item?;
            match serde_json::from_slice::<AlarmEvent>(&value) {
                Ok(ev) => {
                    if alarm_id.is_none_or(|id| ev.alarm.id == id) {
                        out.push(ev);
                    }
                }
                Err(e) => warn!(error = %e, "skipping unparseable transition row"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlarmEventKind, DataSource, EquipmentSnapshot, SensorFaults};
    use chrono::TimeZone;

    fn reading(pod: &str, ts: DateTime<Utc>, temp: f64) -> TelemetryReading {
        TelemetryReading {
            pod_id: pod.into(),
            timestamp: ts,
            temperature_c: temp,
            humidity_pct: 60.0,
            co2_ppm: 1100.0,
            light_pct: 80.0,
            vpd_kpa: 1.19,
            faults: SensorFaults::default(),
            equipment: EquipmentSnapshot::default(),
            data_source: DataSource::Simulated,
            calibration_due: false,
        }
    }

    #[test]
    fn reading_range_queries_are_per_pod_and_chronological() {
        let dir = tempfile::tempdir().unwrap();
        let storage = HistoryStorage::open(dir.path()).unwrap();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        for i in 0..10 {
            let ts = base + chrono::Duration::seconds(i * 10);
            storage.persist_reading(&reading("pod-1", ts, 24.0 + i as f64)).unwrap();
            storage.persist_reading(&reading("pod-2", ts, 20.0)).unwrap();
        }

        let got = storage
            .readings_in_range(
                "pod-1",
                base + chrono::Duration::seconds(20),
                base + chrono::Duration::seconds(50),
            )
            .unwrap();
        assert_eq!(got.len(), 4);
        assert!(got.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(got.iter().all(|r| r.pod_id == "pod-1"));
    }

    #[test]
    fn transitions_round_trip_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = HistoryStorage::open(dir.path()).unwrap();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let store = crate::alarm_store::AlarmStore::new();
        let mut rx = store.subscribe();
        let policy = crate::types::AlarmPolicy {
            id: Uuid::new_v4(),
            org_id: "org-1".into(),
            alarm_type: crate::types::AlarmType::TemperatureHigh,
            severity: crate::types::Severity::Warning,
            threshold: 26.0,
            operator: crate::types::ThresholdOperator::GreaterThan,
            time_in_state_secs: 300,
            deadband: 0.5,
            suppression_duration_mins: 5,
            auto_clear: false,
            require_out_of_spec: false,
            applies_to_stages: None,
            applies_to_pod_types: None,
            isa18: crate::types::Isa18Fields::default(),
        };
        let alarm = store.open(&policy, "pod-1", 26.5, "m".into(), base);
        store
            .resolve(alarm.id, "alice", "fixed".into(), None, None, base + chrono::Duration::seconds(60))
            .unwrap();

        while let Ok(ev) = rx.try_recv() {
            storage.persist_transition(&ev).unwrap();
        }

        let got = storage
            .transitions_in_range(base, base + chrono::Duration::minutes(5), None)
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].kind, AlarmEventKind::Opened);
        assert_eq!(got[1].kind, AlarmEventKind::Resolved);
    }
}
