//! Alarm policy types
//!
//! An `AlarmPolicy` configures one (organization, alarm type): what
//! condition trips it, how long the condition must persist, how it clears,
//! and the ISA-18.2 rationalization metadata carried for compliance audit.
//! Policies are created by administrators and are read-only to the
//! evaluator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BatchStage, ParameterKind, PodType, Severity};

/// The alarm conditions the engine can evaluate, one per (parameter,
/// direction).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlarmType {
    TemperatureHigh,
    TemperatureLow,
    HumidityHigh,
    HumidityLow,
    Co2High,
    Co2Low,
    VpdHigh,
    VpdLow,
}

impl AlarmType {
    /// The parameter this alarm type watches.
    pub fn parameter(self) -> ParameterKind {
        match self {
            AlarmType::TemperatureHigh | AlarmType::TemperatureLow => ParameterKind::Temperature,
            AlarmType::HumidityHigh | AlarmType::HumidityLow => ParameterKind::Humidity,
            AlarmType::Co2High | AlarmType::Co2Low => ParameterKind::Co2,
            AlarmType::VpdHigh | AlarmType::VpdLow => ParameterKind::Vpd,
        }
    }
}

impl std::fmt::Display for AlarmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlarmType::TemperatureHigh => "temperature_high",
            AlarmType::TemperatureLow => "temperature_low",
            AlarmType::HumidityHigh => "humidity_high",
            AlarmType::HumidityLow => "humidity_low",
            AlarmType::Co2High => "co2_high",
            AlarmType::Co2Low => "co2_low",
            AlarmType::VpdHigh => "vpd_high",
            AlarmType::VpdLow => "vpd_low",
        };
        write!(f, "{name}")
    }
}

/// Comparison operator for the threshold condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl ThresholdOperator {
    /// Evaluate `actual <op> threshold`.
    pub fn holds(self, actual: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::GreaterThan => actual > threshold,
            ThresholdOperator::GreaterOrEqual => actual >= threshold,
            ThresholdOperator::LessThan => actual < threshold,
            ThresholdOperator::LessOrEqual => actual <= threshold,
        }
    }

    /// True once the value has fallen back inside `threshold ∓ deadband`,
    /// i.e. cleared the hysteresis band on the safe side.
    pub fn cleared_with_deadband(self, actual: f64, threshold: f64, deadband: f64) -> bool {
        match self {
            ThresholdOperator::GreaterThan | ThresholdOperator::GreaterOrEqual => {
                actual < threshold - deadband
            }
            ThresholdOperator::LessThan | ThresholdOperator::LessOrEqual => {
                actual > threshold + deadband
            }
        }
    }
}

/// ISA-18.2 rationalization fields carried on every policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Isa18Fields {
    /// Alarm priority per the site's rationalization matrix (1 = highest).
    #[serde(default)]
    pub priority: u8,
    /// Seconds the responsible operator has to acknowledge before the
    /// alarm escalates.
    pub expected_response_secs: u64,
    /// Whether this alarm has been through rationalization review.
    #[serde(default)]
    pub rationalized: bool,
    /// Consequence of no action, for the operator display.
    #[serde(default)]
    pub consequence: String,
    /// Prescribed corrective action.
    #[serde(default)]
    pub corrective_action: String,
}

/// Configuration for one (organization, alarm type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmPolicy {
    pub id: Uuid,
    pub org_id: String,
    pub alarm_type: AlarmType,
    pub severity: Severity,

    /// Threshold the actual value is compared against.
    pub threshold: f64,
    pub operator: ThresholdOperator,

    /// Minimum continuous breach duration before the alarm triggers.
    #[serde(default = "default_time_in_state")]
    pub time_in_state_secs: u64,

    /// Hysteresis margin. Applies to clearing only: the condition must
    /// fall back past `threshold ∓ deadband` before the breach timer
    /// resets. Trigger-side evaluation uses the bare threshold.
    #[serde(default)]
    pub deadband: f64,

    /// After a resolve, suppress re-triggering of the same (pod, type)
    /// for this long.
    #[serde(default = "default_suppression_minutes")]
    pub suppression_duration_mins: u64,

    /// When true the engine may auto-resolve the alarm once the condition
    /// clears; when false a human must resolve it regardless of the
    /// underlying value.
    #[serde(default)]
    pub auto_clear: bool,

    /// Additionally require the parameter to be out of spec (relative to
    /// the recipe setpoint) before the threshold condition counts.
    #[serde(default)]
    pub require_out_of_spec: bool,

    /// Stage filter: when set, the policy only applies to pods whose
    /// batch is in one of these stages.
    #[serde(default)]
    pub applies_to_stages: Option<Vec<BatchStage>>,
    /// Pod-type filter, same semantics.
    #[serde(default)]
    pub applies_to_pod_types: Option<Vec<PodType>>,

    #[serde(default)]
    pub isa18: Isa18Fields,
}

fn default_time_in_state() -> u64 {
    300
}

fn default_suppression_minutes() -> u64 {
    5
}

impl AlarmPolicy {
    /// Whether this policy applies to a pod in the given stage/type.
    ///
    /// A non-matching policy is skipped entirely: no breach state is kept
    /// for it.
    pub fn applies_to(&self, stage: BatchStage, pod_type: PodType) -> bool {
        if let Some(stages) = &self.applies_to_stages {
            if !stages.contains(&stage) {
                return false;
            }
        }
        if let Some(types) = &self.applies_to_pod_types {
            if !types.contains(&pod_type) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_evaluation() {
        assert!(ThresholdOperator::GreaterThan.holds(26.1, 26.0));
        assert!(!ThresholdOperator::GreaterThan.holds(26.0, 26.0));
        assert!(ThresholdOperator::GreaterOrEqual.holds(26.0, 26.0));
        assert!(ThresholdOperator::LessThan.holds(380.0, 400.0));
    }

    #[test]
    fn deadband_clears_on_the_safe_side_only() {
        let op = ThresholdOperator::GreaterThan;
        // Breached at 26.0 threshold, deadband 0.5: 25.8 is inside the
        // hysteresis band and must NOT clear.
        assert!(!op.cleared_with_deadband(25.8, 26.0, 0.5));
        assert!(op.cleared_with_deadband(25.4, 26.0, 0.5));

        let op = ThresholdOperator::LessThan;
        assert!(!op.cleared_with_deadband(401.0, 400.0, 25.0));
        assert!(op.cleared_with_deadband(430.0, 400.0, 25.0));
    }

    #[test]
    fn stage_filter_excludes_non_matching_pods() {
        let policy = AlarmPolicy {
            id: Uuid::new_v4(),
            org_id: "org-1".into(),
            alarm_type: AlarmType::HumidityHigh,
            severity: Severity::Warning,
            threshold: 60.0,
            operator: ThresholdOperator::GreaterThan,
            time_in_state_secs: 300,
            deadband: 2.0,
            suppression_duration_mins: 5,
            auto_clear: true,
            require_out_of_spec: false,
            applies_to_stages: Some(vec![BatchStage::Flower]),
            applies_to_pod_types: None,
            isa18: Isa18Fields::default(),
        };
        assert!(policy.applies_to(BatchStage::Flower, PodType::Grow));
        assert!(!policy.applies_to(BatchStage::Vegetative, PodType::Grow));
    }
}
