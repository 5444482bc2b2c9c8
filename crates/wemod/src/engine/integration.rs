use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;

use super::Entity;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use crate::config::Config;
use crate::integrations::wemo::WemoDomain;

/// Channel types for messages FROM integrations TO the engine
/// These are bounded channels to provide backpressure
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Channel types for messages FROM the engine TO integrations (unbounded - engine must not block)
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// Result type for integration factory functions
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,

    /// Discovery signal and pending queue for WeMo devices
    pub wemo: &'a Arc<WemoDomain>,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Set up the integration - subscribe to signals, register entities, etc.
    ///
    /// The integration receives a sender to report events back to the engine
    /// (discovery, state changes, etc.)
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>>;

    /// Handle a command from the engine
    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Shut down the integration gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}

/// Entity-addition callback handed to integration platforms.
#[derive(Debug, Clone)]
pub struct AddEntities {
    integration_name: String,
    tx: FromIntegrationSender,
}

impl AddEntities {
    pub fn new(integration_name: impl Into<String>, tx: FromIntegrationSender) -> Self {
        Self {
            integration_name: integration_name.into(),
            tx,
        }
    }

    /// Register entities with the engine.
    ///
    /// Fails if the engine has gone away; nothing is retried.
    pub async fn add(
        &self,
        entities: Vec<(String, Arc<dyn Entity>)>,
    ) -> Result<(), Box<dyn Error + Send>> {
        for (entity_id, entity) in entities {
            let msg = FromIntegrationMessage::EntityDiscovered {
                entity_id,
                entity,
                integration_name: self.integration_name.clone(),
            };
            self.tx
                .send(msg)
                .await
                .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
        }
        Ok(())
    }

    /// Tell the engine an entity is gone.
    pub async fn remove(&self, entity_id: &str) -> Result<(), Box<dyn Error + Send>> {
        let msg = FromIntegrationMessage::EntityRemoved {
            entity_id: entity_id.to_string(),
        };
        self.tx
            .send(msg)
            .await
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
    }

    /// Report a binary sensor reading to the engine.
    pub async fn report_binary_sensor(
        &self,
        entity_id: &str,
        on: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        let msg = FromIntegrationMessage::BinarySensorStateChanged {
            entity_id: entity_id.to_string(),
            on,
        };
        self.tx
            .send(msg)
            .await
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
    }
}
