//! Core data contracts for the alarm engine
//!
//! Everything the evaluator consumes or produces is defined here:
//! telemetry readings, setpoints, alarm policies, alarm instances, and
//! notification records. These types are the stable boundary between the
//! engine and the excluded CRUD/dashboard layers.

mod alarm;
mod equipment;
mod notification;
mod policy;
mod reading;

pub use alarm::*;
pub use equipment::*;
pub use notification::*;
pub use policy::*;
pub use reading::*;

use serde::{Deserialize, Serialize};

/// Alarm severity, ordered so that `Critical > Warning > Info`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Critical = 2,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Batch growth stage, used by policy applicability filters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BatchStage {
    Clone,
    Vegetative,
    Flower,
    Dry,
    Cure,
}

/// Physical pod/room class, used by policy applicability filters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PodType {
    Grow,
    Dry,
    Mother,
    Clone,
}

/// Static description of one pod the engine monitors.
///
/// Supplied externally (the pod CRUD layer owns it); the evaluator only
/// reads it to resolve setpoints and policy applicability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodProfile {
    pub pod_id: String,
    pub org_id: String,
    pub pod_type: PodType,
    pub stage: BatchStage,
    /// Active recipe-stage setpoints, one per parameter.
    pub setpoints: Vec<Setpoint>,
    /// True while the photoperiod lights are on (selects day setpoints).
    pub lights_on: bool,
}

impl PodProfile {
    /// Find the setpoint for a parameter, if the active recipe defines one.
    pub fn setpoint_for(&self, parameter: ParameterKind) -> Option<&Setpoint> {
        self.setpoints.iter().find(|s| s.parameter == parameter)
    }
}
