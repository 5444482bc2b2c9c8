use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::entity::Entity;
use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::BinarySensorState;
use super::state::State;
use crate::engine::IntegrationContext;

/// An entity known to the engine, with the integration that owns it.
struct RegisteredEntity {
    integration_name: String,
    entity: Arc<dyn Entity>,
}

/// wemod engine
///
/// This structure handles the flow of events, keeps the entity registry, routes
/// commands to the correct integration, and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> registered entity, used for command routing
    entities: std::sync::Mutex<HashMap<String, RegisteredEntity>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Automation-level events for anyone who subscribed
    events: broadcast::Sender<Event>,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Capacity for the event broadcast channel; slow subscribers lag rather than block
const EVENT_CHANNEL_SIZE: usize = 256;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entities: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            events,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every factory in the integration registry and registers the ones
    /// that are enabled.
    pub fn register_integrations(&mut self, ctx: &IntegrationContext) {
        for constr in super::integration::REGISTRY {
            let integration = match constr(ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), to_integration_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the integration that owns the target entity.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        let integration_name = {
            let entities = self
                .entities
                .lock()
                .map_err(|e| -> Box<dyn Error + Send> {
                    Box::new(std::io::Error::other(e.to_string()))
                })?;

            entities
                .get(msg.entity_id())
                .map(|registered| registered.integration_name.clone())
                .ok_or_else(|| -> Box<dyn Error + Send> {
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("No integration found for entity: {}", msg.entity_id()),
                    ))
                })?
        };

        let channels = self
            .integration_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = channels.get(&integration_name).ok_or_else(
            || -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Integration channel not found: {}", integration_name),
                ))
            },
        )?;

        tx.send(msg)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
    }

    /// Ask the owning integration to re-read an entity's state
    pub fn refresh_entity(&self, entity_id: String) -> Result<(), Box<dyn Error + Send>> {
        self.send_command(ToIntegrationMessage::RefreshEntity { entity_id })
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.handle_event(msg).await {
                warn!("Error handling event: {}", e);
            }
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Stop every integration and wait for it to finish.
    ///
    /// Closing an integration's command channel ends its message loop, which
    /// then runs `Integration::shutdown`. Messages the integrations send while
    /// stopping are applied to the state here unless `run` is still consuming
    /// them.
    pub async fn shutdown(&self) {
        let channels = std::mem::take(
            &mut *self
                .integration_channels
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        info!("Stopping {} integrations", channels.len());
        drop(channels);

        let handles = std::mem::take(
            &mut *self
                .integration_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let integrations = futures::future::join_all(handles);
        tokio::pin!(integrations);

        let mut rx = self.message_rx.try_lock().ok();
        loop {
            tokio::select! {
                results = &mut integrations => {
                    for result in results {
                        if let Err(e) = result {
                            warn!("Integration task ended abnormally: {}", e);
                        }
                    }
                    break;
                }
                Some(msg) = async {
                    match rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => None,
                    }
                } => {
                    if let Err(e) = self.handle_event(msg).await {
                        warn!("Error handling event: {}", e);
                    }
                }
            }
        }

        if let Some(rx) = rx.as_mut() {
            while let Ok(msg) = rx.try_recv() {
                if let Err(e) = self.handle_event(msg).await {
                    warn!("Error handling event: {}", e);
                }
            }
        }
        info!("All integrations stopped");
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Subscribe to automation-level events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Number of entities currently registered
    pub fn entity_count(&self) -> usize {
        self.entities.lock().map(|e| e.len()).unwrap_or_default()
    }

    /// Current JSON state of a registered entity, read through to its device
    pub fn entity_state_json(&self, entity_id: &str) -> Option<anyhow::Result<serde_json::Value>> {
        let entity = {
            let entities = self.entities.lock().ok()?;
            entities.get(entity_id)?.entity.clone()
        };
        Some(entity.state_json())
    }

    fn publish(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Handle an event from an integration
    async fn handle_event(&self, msg: FromIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                entity,
                integration_name,
            } => {
                let platform = entity.platform();
                {
                    let mut entities =
                        self.entities
                            .lock()
                            .map_err(|e| -> Box<dyn Error + Send> {
                                Box::new(std::io::Error::other(e.to_string()))
                            })?;

                    if entities.contains_key(&entity_id) {
                        warn!(
                            "Entity {} already registered, ignoring duplicate from {}",
                            entity_id, integration_name
                        );
                        return Ok(());
                    }

                    info!(
                        "Entity discovered: {} ({}, from {})",
                        entity_id, platform, integration_name
                    );

                    // State is not populated until the first state-change message arrives.
                    entities.insert(
                        entity_id.clone(),
                        RegisteredEntity {
                            integration_name,
                            entity,
                        },
                    );
                }

                self.publish(Event::EntityAdded {
                    entity_id,
                    platform,
                });
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.binary_sensors.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                if let Ok(mut entities) = self.entities.lock() {
                    entities.remove(&entity_id);
                }

                self.publish(Event::EntityRemoved { entity_id });
            }
            FromIntegrationMessage::BinarySensorStateChanged { entity_id, on } => {
                let sensor_state = BinarySensorState { on };
                info!("Binary sensor state changed: {} -> on={}", entity_id, on);

                {
                    let mut state = State::clone(&self.state.load());
                    state
                        .binary_sensors
                        .insert(entity_id.clone(), sensor_state.clone());
                    self.state.store(Arc::new(state));
                }

                self.publish(Event::BinarySensorStateChanged {
                    entity_id,
                    state: sensor_state,
                });
            }
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let handles = self
            .integration_handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}
