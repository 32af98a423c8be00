//! Reading source abstraction for telemetry ingestion.
//!
//! Provides a unified trait for reading telemetry from different sources:
//! an in-process channel (the TagoIO bridge pushes into it), JSON lines
//! on stdin (manual replay), and the built-in simulator.

mod simulator;

pub use simulator::{SimulatedSource, SimulatorConfig};

use crate::types::TelemetryReading;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Events produced by a reading source.
pub enum ReadingEvent {
    /// A valid reading was produced.
    Reading(TelemetryReading),
    /// Source reached end of data (EOF for stdin/replay, channel closed
    /// for the bridge).
    Eof,
}

/// Trait abstracting where telemetry readings come from.
///
/// Implementations handle format parsing and pacing internally. The
/// engine calls [`next_reading`](ReadingSource::next_reading) in a
/// `select!` with cancellation.
#[async_trait]
pub trait ReadingSource: Send + 'static {
    /// Read the next reading from the source.
    async fn next_reading(&mut self) -> Result<ReadingEvent>;

    /// Human-readable name for logging (e.g. "bridge", "stdin", "sim").
    fn source_name(&self) -> &str;
}

// ============================================================================
// Channel Source (ingestion bridge)
// ============================================================================

/// Receives readings pushed by an external bridge task.
pub struct ChannelSource {
    rx: mpsc::Receiver<TelemetryReading>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<TelemetryReading>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl ReadingSource for ChannelSource {
    async fn next_reading(&mut self) -> Result<ReadingEvent> {
        match self.rx.recv().await {
            Some(reading) => Ok(ReadingEvent::Reading(reading)),
            None => Ok(ReadingEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "bridge"
    }
}

// ============================================================================
// Stdin Source (JSON readings, one per line)
// ============================================================================

/// Reads JSON-formatted readings from stdin, one object per line.
///
/// Unparseable lines are logged and skipped — one corrupt record must
/// not end the stream.
pub struct StdinSource {
    reader: tokio::io::BufReader<tokio::io::Stdin>,
    line_buffer: String,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: tokio::io::BufReader::new(tokio::io::stdin()),
            line_buffer: String::new(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingSource for StdinSource {
    async fn next_reading(&mut self) -> Result<ReadingEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let n = self.reader.read_line(&mut self.line_buffer).await?;
            if n == 0 {
                return Ok(ReadingEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TelemetryReading>(line) {
                Ok(reading) => return Ok(ReadingEvent::Reading(reading)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable reading line");
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataSource, EquipmentSnapshot, SensorFaults};
    use chrono::Utc;

    fn reading(pod: &str) -> TelemetryReading {
        TelemetryReading {
            pod_id: pod.into(),
            timestamp: Utc::now(),
            temperature_c: 24.0,
            humidity_pct: 60.0,
            co2_ppm: 1100.0,
            light_pct: 80.0,
            vpd_kpa: 1.19,
            faults: SensorFaults::default(),
            equipment: EquipmentSnapshot::default(),
            data_source: DataSource::Tagoio,
            calibration_due: false,
        }
    }

    #[tokio::test]
    async fn channel_source_yields_readings_then_eof_on_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut source = ChannelSource::new(rx);

        tx.send(reading("pod-1")).await.unwrap();
        tx.send(reading("pod-2")).await.unwrap();
        drop(tx);

        let ReadingEvent::Reading(first) = source.next_reading().await.unwrap() else {
            panic!("expected a reading");
        };
        assert_eq!(first.pod_id, "pod-1");
        let ReadingEvent::Reading(second) = source.next_reading().await.unwrap() else {
            panic!("expected a reading");
        };
        assert_eq!(second.pod_id, "pod-2");
        assert!(matches!(
            source.next_reading().await.unwrap(),
            ReadingEvent::Eof
        ));
    }
}
