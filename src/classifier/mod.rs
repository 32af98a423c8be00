//! Spec & Health Classifier
//!
//! Turns one raw parameter value plus its sensor metadata into two
//! verdicts:
//!
//! - **Health**: can this value be trusted at all? Precedence is fixed:
//!   `Faulted` beats `CalDue` beats `Stale` beats `Healthy`.
//! - **Spec status**: how far is the value from the active recipe
//!   setpoint? Drives the per-parameter drift display and feeds alarm
//!   policies that require an out-of-spec condition.
//!
//! Classification is pure: the caller supplies `now` so tests and replay
//! drive virtual time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::validate_reading;
use crate::types::{ParameterKind, Setpoint, TelemetryReading};

/// Trustworthiness of one sensed value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Last update older than the staleness threshold.
    Stale,
    /// Sensor fault flag set, or value outside physical bounds.
    Faulted,
    /// Sensor past its calibration interval; value usable but flagged.
    CalDue,
}

impl HealthState {
    /// Faulted values are excluded from spec classification and alarm
    /// evaluation entirely.
    pub fn usable_for_evaluation(self) -> bool {
        self != HealthState::Faulted
    }
}

/// Position of a value relative to its setpoint and tolerance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    InSpec,
    /// Inside tolerance but past `tolerance × warning_ratio` — drifting.
    Approaching,
    OutOfSpec,
}

/// Combined verdict for one parameter of one reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterVerdict {
    pub parameter: ParameterKind,
    pub value: f64,
    pub health: HealthState,
    /// Absent when the parameter has no setpoint, or when the value is
    /// faulted (no spec verdict for untrusted data).
    pub spec: Option<SpecStatus>,
    /// Signed deviation from the resolved setpoint target.
    pub deviation: Option<f64>,
}

/// Classify sensor health for one parameter.
///
/// Precedence: fault flag / bounds failure, then calibration due, then
/// staleness, then healthy.
pub fn classify_health(
    parameter: ParameterKind,
    value: f64,
    fault_flag: bool,
    age: Duration,
    calibration_due: bool,
    staleness_secs: u64,
) -> HealthState {
    if fault_flag || !validate_reading(parameter, value) {
        return HealthState::Faulted;
    }
    if calibration_due {
        return HealthState::CalDue;
    }
    if age > Duration::seconds(staleness_secs as i64) {
        return HealthState::Stale;
    }
    HealthState::Healthy
}

/// Classify a value against its setpoint and tolerance.
///
/// `warning_ratio` (default 0.8) sets where `Approaching` begins:
/// deviation past `tolerance × ratio` but within `tolerance`.
pub fn get_spec_status(actual: f64, setpoint: f64, tolerance: f64, warning_ratio: f64) -> SpecStatus {
    let deviation = (actual - setpoint).abs();
    if deviation > tolerance {
        SpecStatus::OutOfSpec
    } else if deviation > tolerance * warning_ratio {
        SpecStatus::Approaching
    } else {
        SpecStatus::InSpec
    }
}

/// Classify every parameter of one reading against the pod's setpoints.
///
/// `now` is supplied by the caller; staleness is `now − reading.timestamp`.
pub fn classify_reading(
    reading: &TelemetryReading,
    setpoints: &[Setpoint],
    lights_on: bool,
    now: DateTime<Utc>,
    staleness_secs: u64,
    warning_ratio: f64,
) -> Vec<ParameterVerdict> {
    let age = now - reading.timestamp;
    [
        ParameterKind::Temperature,
        ParameterKind::Humidity,
        ParameterKind::Co2,
        ParameterKind::Light,
        ParameterKind::Vpd,
    ]
    .into_iter()
    .map(|parameter| {
        let value = reading.value(parameter);
        let health = classify_health(
            parameter,
            value,
            reading.faults.for_parameter(parameter),
            age,
            reading.calibration_due,
            staleness_secs,
        );

        let setpoint = setpoints.iter().find(|s| s.parameter == parameter);
        let (spec, deviation) = match setpoint {
            Some(sp) if health.usable_for_evaluation() => {
                let target = sp.target(lights_on);
                (
                    Some(get_spec_status(value, target, sp.tolerance, warning_ratio)),
                    Some(value - target),
                )
            }
            _ => (None, None),
        };

        ParameterVerdict {
            parameter,
            value,
            health,
            spec,
            deviation,
        }
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataSource, EquipmentSnapshot, SensorFaults};

    fn reading_at(ts: DateTime<Utc>) -> TelemetryReading {
        TelemetryReading {
            pod_id: "pod-1".into(),
            timestamp: ts,
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

    #[test]
    fn health_precedence_fault_beats_everything() {
        let h = classify_health(
            ParameterKind::Temperature,
            24.0,
            true, // fault flag
            Duration::seconds(120),
            true,
            30,
        );
        assert_eq!(h, HealthState::Faulted);
    }

    #[test]
    fn out_of_bounds_value_is_faulted_even_without_flag() {
        let h = classify_health(
            ParameterKind::Humidity,
            130.0,
            false,
            Duration::seconds(5),
            false,
            30,
        );
        assert_eq!(h, HealthState::Faulted);
    }

    #[test]
    fn cal_due_beats_stale() {
        let h = classify_health(
            ParameterKind::Temperature,
            24.0,
            false,
            Duration::seconds(120),
            true,
            30,
        );
        assert_eq!(h, HealthState::CalDue);
    }

    #[test]
    fn stale_after_threshold() {
        let fresh = classify_health(
            ParameterKind::Temperature,
            24.0,
            false,
            Duration::seconds(29),
            false,
            30,
        );
        let stale = classify_health(
            ParameterKind::Temperature,
            24.0,
            false,
            Duration::seconds(31),
            false,
            30,
        );
        assert_eq!(fresh, HealthState::Healthy);
        assert_eq!(stale, HealthState::Stale);
    }

    #[test]
    fn spec_status_fixtures() {
        // deviation 1.8 > 1.6 (= 2.0 × 0.8) but ≤ 2.0 → approaching
        assert_eq!(
            get_spec_status(25.8, 24.0, 2.0, 0.8),
            SpecStatus::Approaching
        );
        // deviation 3.0 > 2.0 → out of spec
        assert_eq!(get_spec_status(27.0, 24.0, 2.0, 0.8), SpecStatus::OutOfSpec);
        assert_eq!(get_spec_status(24.5, 24.0, 2.0, 0.8), SpecStatus::InSpec);
        // symmetric on the low side
        assert_eq!(
            get_spec_status(22.2, 24.0, 2.0, 0.8),
            SpecStatus::Approaching
        );
    }

    #[test]
    fn faulted_parameter_gets_no_spec_verdict() {
        let now = Utc::now();
        let mut reading = reading_at(now);
        reading.faults.temperature = true;
        let setpoints = vec![Setpoint {
            parameter: ParameterKind::Temperature,
            day_value: 24.0,
            night_value: None,
            tolerance: 2.0,
        }];
        let verdicts = classify_reading(&reading, &setpoints, true, now, 30, 0.8);
        let temp = verdicts
            .iter()
            .find(|v| v.parameter == ParameterKind::Temperature)
            .unwrap();
        assert_eq!(temp.health, HealthState::Faulted);
        assert!(temp.spec.is_none());
        // VPD inherits the temperature fault.
        let vpd = verdicts
            .iter()
            .find(|v| v.parameter == ParameterKind::Vpd)
            .unwrap();
        assert_eq!(vpd.health, HealthState::Faulted);
    }

    #[test]
    fn night_setpoint_selected_when_lights_off() {
        let now = Utc::now();
        let reading = reading_at(now);
        let setpoints = vec![Setpoint {
            parameter: ParameterKind::Temperature,
            day_value: 26.0,
            night_value: Some(21.0),
            tolerance: 2.0,
        }];
        let day = classify_reading(&reading, &setpoints, true, now, 30, 0.8);
        let night = classify_reading(&reading, &setpoints, false, now, 30, 0.8);
        let day_temp = day
            .iter()
            .find(|v| v.parameter == ParameterKind::Temperature)
            .unwrap();
        let night_temp = night
            .iter()
            .find(|v| v.parameter == ParameterKind::Temperature)
            .unwrap();
        // 24.0 vs day 26.0: deviation 2.0 is past 1.6 but within
        // tolerance → approaching. vs night 21.0: deviation 3.0 → out of
        // spec.
        assert_eq!(day_temp.spec, Some(SpecStatus::Approaching));
        assert_eq!(night_temp.spec, Some(SpecStatus::OutOfSpec));
    }
}
