//! Derived Metric Calculator
//!
//! Pure functions computing vapor pressure deficit and dew point from
//! temperature/humidity, unit conversions, and physical-bounds validation
//! of raw sensor values.
//!
//! Everything here is deterministic: same inputs, same outputs, no clock,
//! no state. The evaluator depends on that for audit reproducibility.

use crate::config::defaults::{
    CO2_BOUNDS_PPM, HUMIDITY_BOUNDS_PCT, LIGHT_BOUNDS_PCT, TEMP_BOUNDS_C, VPD_BOUNDS_KPA,
};
use crate::types::ParameterKind;

/// Saturation vapor pressure (kPa) via the Tetens approximation.
///
/// Valid for the greenhouse range; diverges below freezing but our
/// plausibility bounds keep inputs in range before this is trusted.
fn saturation_vapor_pressure_kpa(temp_c: f64) -> f64 {
    0.6108 * f64::exp(17.27 * temp_c / (temp_c + 237.3))
}

/// Vapor pressure deficit (kPa) from air temperature (°C) and relative
/// humidity (%).
///
/// VPD = SVP(T) − SVP(T) × RH/100. Rounded to 2 decimal places, which is
/// the resolution the recipe setpoints use.
///
/// Anchor: `calculate_vpd(24.0, 60.0)` ≈ 1.19 kPa.
pub fn calculate_vpd(temp_c: f64, rh_percent: f64) -> f64 {
    let svp = saturation_vapor_pressure_kpa(temp_c);
    let avp = svp * rh_percent / 100.0;
    round2(svp - avp)
}

/// Dew point (°C) via the Magnus formula inversion.
///
/// Uses the same coefficients as the Tetens form above so that
/// `calculate_dew_point(t, 100.0) == t` to rounding precision.
pub fn calculate_dew_point(temp_c: f64, rh_percent: f64) -> f64 {
    // RH of exactly zero has no dew point; clamp to a small positive
    // value rather than returning -inf.
    let rh = rh_percent.max(0.01);
    let gamma = (rh / 100.0).ln() + 17.27 * temp_c / (temp_c + 237.3);
    round2(237.3 * gamma / (17.27 - gamma))
}

/// Celsius to Fahrenheit (for legacy display consumers).
pub fn celsius_to_fahrenheit(temp_c: f64) -> f64 {
    temp_c * 9.0 / 5.0 + 32.0
}

/// Fahrenheit to Celsius (manual entries arrive in either unit).
pub fn fahrenheit_to_celsius(temp_f: f64) -> f64 {
    (temp_f - 32.0) * 5.0 / 9.0
}

/// Check a raw value against fixed physical plausibility bounds.
///
/// A failing value marks the reading's sensor as faulted — the reading is
/// still persisted for audit, but it is excluded from spec and alarm
/// evaluation. NaN and infinities always fail.
pub fn validate_reading(parameter: ParameterKind, value: f64) -> bool {
    if !value.is_finite() {
        return false;
    }
    let (lo, hi) = match parameter {
        ParameterKind::Temperature => TEMP_BOUNDS_C,
        ParameterKind::Humidity => HUMIDITY_BOUNDS_PCT,
        ParameterKind::Co2 => CO2_BOUNDS_PPM,
        ParameterKind::Light => LIGHT_BOUNDS_PCT,
        ParameterKind::Vpd => VPD_BOUNDS_KPA,
    };
    (lo..=hi).contains(&value)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpd_regression_anchor() {
        // 24 °C / 60% RH is the canonical flower-stage operating point.
        let vpd = calculate_vpd(24.0, 60.0);
        assert!((vpd - 1.19).abs() <= 0.02, "got {vpd}");
    }

    #[test]
    fn vpd_is_non_negative_and_monotone_in_rh() {
        for t in -10..=50 {
            let t = f64::from(t);
            let mut prev = f64::INFINITY;
            for rh in 0..=100 {
                let vpd = calculate_vpd(t, f64::from(rh));
                assert!(vpd >= 0.0, "negative VPD at T={t} RH={rh}");
                assert!(vpd <= prev, "VPD rose with RH at T={t} RH={rh}");
                prev = vpd;
            }
            // Saturated air has no deficit.
            assert!(calculate_vpd(t, 100.0).abs() < 0.01);
        }
    }

    #[test]
    fn dew_point_equals_temp_at_saturation() {
        for t in [5.0, 18.0, 24.0, 30.0] {
            let dp = calculate_dew_point(t, 100.0);
            assert!((dp - t).abs() < 0.05, "T={t} dp={dp}");
        }
    }

    #[test]
    fn dew_point_below_temp_when_unsaturated() {
        let dp = calculate_dew_point(24.0, 60.0);
        assert!(dp < 24.0);
        // Published psychrometric value for 24 °C / 60% is ~15.7 °C.
        assert!((dp - 15.7).abs() < 0.3, "got {dp}");
    }

    #[test]
    fn unit_conversions_round_trip() {
        assert!((celsius_to_fahrenheit(24.0) - 75.2).abs() < 1e-9);
        assert!((fahrenheit_to_celsius(celsius_to_fahrenheit(18.5)) - 18.5).abs() < 1e-9);
    }

    #[test]
    fn bounds_validation() {
        assert!(validate_reading(ParameterKind::Temperature, 24.0));
        assert!(validate_reading(ParameterKind::Temperature, -10.0));
        assert!(!validate_reading(ParameterKind::Temperature, 50.1));
        assert!(!validate_reading(ParameterKind::Humidity, 101.0));
        assert!(validate_reading(ParameterKind::Co2, 10_000.0));
        assert!(!validate_reading(ParameterKind::Co2, -1.0));
        assert!(!validate_reading(ParameterKind::Light, f64::NAN));
        assert!(!validate_reading(ParameterKind::Vpd, f64::INFINITY));
    }
}
