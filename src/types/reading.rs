//! Telemetry reading types
//!
//! One `TelemetryReading` is produced per pod per ingestion interval.
//! Readings are immutable once persisted: ingestion creates them, the
//! evaluator consumes them, and the export collaborator queries them by
//! timestamp range. A faulted reading is still persisted so gaps stay
//! visible in the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EquipmentSnapshot;

/// Where a reading came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Live hardware telemetry via the TagoIO bridge.
    Tagoio,
    /// Manually entered by an operator.
    Manual,
    /// Derived from other readings (e.g. VPD backfill).
    Calculated,
    /// Produced by the built-in simulator.
    Simulated,
}

impl Default for DataSource {
    fn default() -> Self {
        DataSource::Tagoio
    }
}

/// The environmental parameters the engine evaluates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Air temperature (°C)
    Temperature,
    /// Relative humidity (%)
    Humidity,
    /// CO₂ concentration (ppm)
    Co2,
    /// Light intensity (% of fixture max)
    Light,
    /// Vapor pressure deficit (kPa) — derived, never sensed directly
    Vpd,
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterKind::Temperature => write!(f, "temperature"),
            ParameterKind::Humidity => write!(f, "humidity"),
            ParameterKind::Co2 => write!(f, "co2"),
            ParameterKind::Light => write!(f, "light"),
            ParameterKind::Vpd => write!(f, "vpd"),
        }
    }
}

/// Per-sensor fault flags reported by the ingestion bridge.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorFaults {
    #[serde(default)]
    pub temperature: bool,
    #[serde(default)]
    pub humidity: bool,
    #[serde(default)]
    pub co2: bool,
    #[serde(default)]
    pub light: bool,
}

impl SensorFaults {
    /// Fault flag for one parameter. VPD inherits faults from both of its
    /// inputs (temperature and humidity).
    pub fn for_parameter(&self, parameter: super::ParameterKind) -> bool {
        use super::ParameterKind;
        match parameter {
            ParameterKind::Temperature => self.temperature,
            ParameterKind::Humidity => self.humidity,
            ParameterKind::Co2 => self.co2,
            ParameterKind::Light => self.light,
            ParameterKind::Vpd => self.temperature || self.humidity,
        }
    }
}

/// One telemetry sample for one pod at one instant.
///
/// All timestamps are UTC; the caller renders local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub pod_id: String,
    pub timestamp: DateTime<Utc>,

    /// Air temperature (°C)
    pub temperature_c: f64,
    /// Relative humidity (%)
    pub humidity_pct: f64,
    /// CO₂ concentration (ppm)
    pub co2_ppm: f64,
    /// Light intensity (%)
    pub light_pct: f64,
    /// Vapor pressure deficit (kPa). Stamped by ingestion from
    /// temperature/humidity when the source does not provide it.
    #[serde(default)]
    pub vpd_kpa: f64,

    #[serde(default)]
    pub faults: SensorFaults,

    /// Climate equipment state at sample time.
    #[serde(default)]
    pub equipment: EquipmentSnapshot,

    #[serde(default)]
    pub data_source: DataSource,

    /// Set when the pod's sensors are past their calibration interval.
    #[serde(default)]
    pub calibration_due: bool,
}

impl TelemetryReading {
    /// Raw value for one parameter.
    pub fn value(&self, parameter: ParameterKind) -> f64 {
        match parameter {
            ParameterKind::Temperature => self.temperature_c,
            ParameterKind::Humidity => self.humidity_pct,
            ParameterKind::Co2 => self.co2_ppm,
            ParameterKind::Light => self.light_pct,
            ParameterKind::Vpd => self.vpd_kpa,
        }
    }
}

/// Target value and tolerance for one parameter under the active recipe
/// stage. Supplied externally; read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setpoint {
    pub parameter: ParameterKind,
    /// Target while lights are on.
    pub day_value: f64,
    /// Target while lights are off. Falls back to `day_value` when absent
    /// (parameters without a photoperiod split, e.g. CO₂ in dry rooms).
    #[serde(default)]
    pub night_value: Option<f64>,
    /// Symmetric tolerance band around the target.
    pub tolerance: f64,
}

impl Setpoint {
    /// Resolve the target for the current photoperiod.
    pub fn target(&self, lights_on: bool) -> f64 {
        if lights_on {
            self.day_value
        } else {
            self.night_value.unwrap_or(self.day_value)
        }
    }
}
