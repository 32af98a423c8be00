//! Climate equipment state model
//!
//! The hardware bridge historically reported plain on/off booleans while
//! newer controllers report a three-state OFF/ON/AUTO model. The engine
//! stores the tagged form only; the boolean view exists as a pure
//! conversion for older consumers.

use serde::{Deserialize, Serialize};

/// State of one piece of climate equipment (cooler, dehumidifier, CO₂
/// injector, lights).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum EquipmentState {
    /// Hard off.
    Off,
    /// Manually forced on at a fixed output level (0.0–1.0).
    Manual { level: f64 },
    /// Controller-driven, modulating toward the given target.
    Auto { target: f64 },
}

impl Default for EquipmentState {
    fn default() -> Self {
        EquipmentState::Off
    }
}

impl EquipmentState {
    /// Legacy boolean view: is the equipment commanded on at all?
    ///
    /// `Auto` counts as on — the legacy dashboards treated any enabled
    /// controller loop as "running".
    pub fn as_legacy_bool(self) -> bool {
        !matches!(self, EquipmentState::Off)
    }
}

/// Snapshot of all climate equipment for a pod at reading time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EquipmentSnapshot {
    #[serde(default)]
    pub cooling: EquipmentState,
    #[serde(default)]
    pub dehumidifier: EquipmentState,
    #[serde(default)]
    pub co2_injection: EquipmentState,
    #[serde(default)]
    pub lighting: EquipmentState,
}
