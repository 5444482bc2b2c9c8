use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// State of a binary sensor entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BinarySensorState {
    /// Whether the sensor is active (meaning depends on the entity:
    /// switch on, sensor port pulled low, connected load drawing power, etc.)
    pub on: bool,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub binary_sensors: HashMap<String, BinarySensorState>,
}
