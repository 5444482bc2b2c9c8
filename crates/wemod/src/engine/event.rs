use super::state::BinarySensorState;

/// Automation-level events.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    EntityAdded {
        entity_id: String,
        platform: &'static str,
    },
    EntityRemoved {
        entity_id: String,
    },
    BinarySensorStateChanged {
        entity_id: String,
        state: BinarySensorState,
    },
}
