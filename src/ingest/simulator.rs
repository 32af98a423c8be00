//! Simulated telemetry source for demos and soak testing.
//!
//! Produces one reading per configured pod per interval. Values follow a
//! mean-reverting random walk around each pod's setpoints, so simulated
//! pods drift realistically instead of jumping.
//!
//! The per-sensor smoothing state is owned by this source and keyed
//! explicitly by (pod, parameter). It is created fresh with the source —
//! nothing survives a restart and no state is shared across pods.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;

use super::{ReadingEvent, ReadingSource};
use crate::metrics::calculate_vpd;
use crate::types::{
    DataSource, EquipmentSnapshot, EquipmentState, ParameterKind, PodProfile, SensorFaults,
    TelemetryReading,
};

/// Simulator tuning.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Seconds between rounds (one reading per pod per round).
    pub interval_secs: u64,
    /// Fraction of the gap to the setpoint closed per round (0.0–1.0).
    pub reversion: f64,
    /// Standard deviation of per-round noise, as a fraction of the
    /// parameter's tolerance.
    pub noise_ratio: f64,
    /// RNG seed, fixed so demo runs are reproducible.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: crate::config::defaults::INGEST_INTERVAL_SECS,
            reversion: 0.2,
            noise_ratio: 0.3,
            seed: 42,
        }
    }
}

/// Mean-reverting random-walk reading generator.
pub struct SimulatedSource {
    pods: Vec<PodProfile>,
    config: SimulatorConfig,
    rng: StdRng,
    /// Last smoothed value per (pod, parameter). Process-scoped, reset
    /// when the source is rebuilt.
    smoothed: HashMap<(String, ParameterKind), f64>,
    /// Round-robin cursor into `pods`.
    cursor: usize,
    started: bool,
}

impl SimulatedSource {
    pub fn new(pods: Vec<PodProfile>, config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            pods,
            config,
            rng,
            smoothed: HashMap::new(),
            cursor: 0,
            started: false,
        }
    }

    fn next_value(&mut self, pod: &PodProfile, parameter: ParameterKind, fallback: f64) -> f64 {
        let (target, tolerance) = pod
            .setpoint_for(parameter)
            .map_or((fallback, fallback.abs().max(1.0) * 0.05), |sp| {
                (sp.target(pod.lights_on), sp.tolerance)
            });
        let key = (pod.pod_id.clone(), parameter);
        let prev = *self.smoothed.get(&key).unwrap_or(&target);
        let noise = Normal::new(0.0, tolerance * self.config.noise_ratio)
            .map(|d| d.sample(&mut self.rng))
            .unwrap_or(0.0);
        let next = prev + (target - prev) * self.config.reversion + noise;
        self.smoothed.insert(key, next);
        next
    }

    fn generate(&mut self, idx: usize) -> TelemetryReading {
        let pod = self.pods[idx].clone();
        let temperature_c = self.next_value(&pod, ParameterKind::Temperature, 24.0);
        let humidity_pct = self
            .next_value(&pod, ParameterKind::Humidity, 60.0)
            .clamp(0.0, 100.0);
        let co2_ppm = self.next_value(&pod, ParameterKind::Co2, 1000.0).max(0.0);
        let light_pct = if pod.lights_on { 85.0 } else { 0.0 };

        TelemetryReading {
            pod_id: pod.pod_id.clone(),
            timestamp: Utc::now(),
            temperature_c,
            humidity_pct,
            co2_ppm,
            light_pct,
            vpd_kpa: calculate_vpd(temperature_c, humidity_pct),
            faults: SensorFaults::default(),
            equipment: EquipmentSnapshot {
                cooling: EquipmentState::Auto {
                    target: pod
                        .setpoint_for(ParameterKind::Temperature)
                        .map_or(24.0, |sp| sp.target(pod.lights_on)),
                },
                lighting: if pod.lights_on {
                    EquipmentState::Manual { level: 0.85 }
                } else {
                    EquipmentState::Off
                },
                ..Default::default()
            },
            data_source: DataSource::Simulated,
            calibration_due: false,
        }
    }
}

#[async_trait]
impl ReadingSource for SimulatedSource {
    async fn next_reading(&mut self) -> Result<ReadingEvent> {
        if self.pods.is_empty() {
            return Ok(ReadingEvent::Eof);
        }
        // Sleep once per round, not per pod.
        if self.cursor == 0 && self.started {
            tokio::time::sleep(std::time::Duration::from_secs(self.config.interval_secs)).await;
        }
        self.started = true;
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.pods.len();
        Ok(ReadingEvent::Reading(self.generate(idx)))
    }

    fn source_name(&self) -> &str {
        "sim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatchStage, PodType, Setpoint};

    fn pod() -> PodProfile {
        PodProfile {
            pod_id: "pod-1".into(),
            org_id: "org-1".into(),
            pod_type: PodType::Grow,
            stage: BatchStage::Flower,
            setpoints: vec![
                Setpoint {
                    parameter: ParameterKind::Temperature,
                    day_value: 24.0,
                    night_value: Some(21.0),
                    tolerance: 2.0,
                },
                Setpoint {
                    parameter: ParameterKind::Humidity,
                    day_value: 60.0,
                    night_value: None,
                    tolerance: 5.0,
                },
            ],
            lights_on: true,
        }
    }

    #[tokio::test]
    async fn simulated_values_stay_near_setpoints() {
        let mut source = SimulatedSource::new(
            vec![pod()],
            SimulatorConfig {
                interval_secs: 0,
                ..Default::default()
            },
        );
        for _ in 0..50 {
            let ReadingEvent::Reading(r) = source.next_reading().await.unwrap() else {
                panic!("unexpected EOF");
            };
            assert!((r.temperature_c - 24.0).abs() < 6.0, "temp drifted: {}", r.temperature_c);
            assert!((0.0..=100.0).contains(&r.humidity_pct));
            assert_eq!(r.data_source, DataSource::Simulated);
            assert!(r.vpd_kpa >= 0.0);
        }
    }

    #[test]
    fn smoothing_state_is_keyed_per_pod() {
        let mut p2 = pod();
        p2.pod_id = "pod-2".into();
        let mut source = SimulatedSource::new(vec![pod(), p2], SimulatorConfig::default());
        let a = source.generate(0);
        let b = source.generate(1);
        assert!(source
            .smoothed
            .contains_key(&("pod-1".to_string(), ParameterKind::Temperature)));
        assert!(source
            .smoothed
            .contains_key(&("pod-2".to_string(), ParameterKind::Temperature)));
        assert_ne!(a.pod_id, b.pod_id);
    }
}
