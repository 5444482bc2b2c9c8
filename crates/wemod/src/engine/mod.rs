mod engine;
mod entity;
mod event;
mod integration;
mod message;
pub mod state;

pub use engine::Engine;
pub use entity::Entity;
pub use event::Event;
pub use integration::AddEntities;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::BinarySensorState;
pub use state::State;
