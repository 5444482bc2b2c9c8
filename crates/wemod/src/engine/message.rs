//! Type-safe message system for wemod
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use std::sync::Arc;

use super::Entity;

/// Messages FROM integrations TO the engine (events/state updates)
pub enum FromIntegrationMessage {
    /// An entity was discovered and should be registered
    EntityDiscovered {
        entity_id: String,
        entity: Arc<dyn Entity>,
        integration_name: String,
    },

    /// An entity was removed (device unplugged, etc.)
    EntityRemoved { entity_id: String },

    /// A binary sensor's state changed
    BinarySensorStateChanged { entity_id: String, on: bool },
}

impl std::fmt::Debug for FromIntegrationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                entity,
                integration_name,
            } => f
                .debug_struct("EntityDiscovered")
                .field("entity_id", entity_id)
                .field("integration_name", integration_name)
                .field("entity", &entity.platform())
                .finish(),
            FromIntegrationMessage::EntityRemoved { entity_id } => f
                .debug_struct("EntityRemoved")
                .field("entity_id", entity_id)
                .finish(),
            FromIntegrationMessage::BinarySensorStateChanged { entity_id, on } => f
                .debug_struct("BinarySensorStateChanged")
                .field("entity_id", entity_id)
                .field("on", on)
                .finish(),
        }
    }
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToIntegrationMessage {
    /// Re-read an entity's state from its device and report it back
    RefreshEntity { entity_id: String },
}

impl ToIntegrationMessage {
    /// The entity this command targets, used for routing.
    pub fn entity_id(&self) -> &str {
        match self {
            ToIntegrationMessage::RefreshEntity { entity_id } => entity_id,
        }
    }
}
