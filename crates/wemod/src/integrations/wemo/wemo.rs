use std::collections::HashMap;
use std::collections::HashSet;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Platform;
use super::binary_sensor::WemoBinarySensor;
use super::device::DeviceError;
use super::device::WemoHandle;
use super::dispatcher::WemoDomain;
use super::dispatcher::signal_topic;
use crate::engine::AddEntities;
use crate::engine::Entity;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

/// Type alias for the shared binary sensors map
type BinarySensorsMap = Arc<Mutex<HashMap<String, Arc<WemoBinarySensor>>>>;

/// Serial numbers that are registered, or claimed by a registration in flight
type RegisteredSerials = Arc<Mutex<HashSet<String>>>;

#[derive(Debug, thiserror::Error)]
enum WemoError {
    #[error("Binary sensor not found: {0}")]
    EntityNotFound(String),

    #[error("WeMo integration not set up")]
    NotSetUp,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl From<WemoError> for Box<dyn Error + Send> {
    fn from(e: WemoError) -> Self {
        Box::new(e)
    }
}

/// Drive every registration to completion, then report the first failure.
async fn register_all<F>(
    registrations: impl IntoIterator<Item = F>,
) -> Result<(), Box<dyn Error + Send>>
where
    F: Future<Output = Result<(), Box<dyn Error + Send>>>,
{
    futures::future::join_all(registrations)
        .await
        .into_iter()
        .collect()
}

/// WeMo integration for wemod
///
/// Turns devices found by the WeMo device layer into binary sensor entities.
pub struct WemoIntegration {
    domain: Arc<WemoDomain>,
    binary_sensors: BinarySensorsMap,
    registered: RegisteredSerials,
    add_entities: Option<AddEntities>,
    /// Handle to the background signal listener
    listener_task: Option<JoinHandle<()>>,
}

impl WemoIntegration {
    pub fn new(domain: Arc<WemoDomain>) -> Self {
        Self {
            domain,
            binary_sensors: Arc::new(Mutex::new(HashMap::new())) as BinarySensorsMap,
            registered: Arc::new(Mutex::new(HashSet::new())) as RegisteredSerials,
            add_entities: None,
            listener_task: None,
        }
    }

    /// Set up the binary_sensor platform.
    ///
    /// Registers everything already waiting in the pending queue, then keeps
    /// listening on the platform signal for devices found later.
    async fn setup_binary_sensors(
        &mut self,
        add_entities: AddEntities,
    ) -> Result<(), Box<dyn Error + Send>> {
        let (mut rx, pending) = self.domain.connect_platform(Platform::BinarySensor);
        info!(
            "Listening on {} with {} pending devices",
            signal_topic(Platform::BinarySensor),
            pending.len()
        );

        let pending: Vec<WemoHandle> = {
            let mut registered = self.registered.lock().await;
            pending
                .into_iter()
                .filter(|device| registered.insert(device.serial_number().to_string()))
                .collect()
        };

        register_all(pending.into_iter().map(|device| {
            Self::register(device, &self.binary_sensors, &self.registered, &add_entities)
        }))
        .await?;

        let binary_sensors = self.binary_sensors.clone();
        let registered = self.registered.clone();
        let task = tokio::spawn(async move {
            while let Some(device) = rx.recv().await {
                if !registered
                    .lock()
                    .await
                    .insert(device.serial_number().to_string())
                {
                    debug!("Ignoring {}: already registered", device.serial_number());
                    continue;
                }

                let binary_sensors = binary_sensors.clone();
                let registered = registered.clone();
                let add_entities = add_entities.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        Self::register(device, &binary_sensors, &registered, &add_entities).await
                    {
                        warn!("Failed to add binary sensor: {}", e);
                    }
                });
            }
            info!("WeMo discovery listener exiting");
        });
        self.listener_task = Some(task);

        Ok(())
    }

    /// Register a device whose serial number is already claimed.
    ///
    /// The claim is released when registration fails, so a later delivery of
    /// the same device can try again.
    async fn register(
        device: WemoHandle,
        binary_sensors: &BinarySensorsMap,
        registered: &RegisteredSerials,
        add_entities: &AddEntities,
    ) -> Result<(), Box<dyn Error + Send>> {
        let serial_number = device.serial_number().to_string();
        let result = Self::discovered(device, binary_sensors, add_entities).await;
        if result.is_err() {
            registered.lock().await.remove(&serial_number);
        }
        result
    }

    /// Handle a discovered device: wrap it and register the entity.
    async fn discovered(
        device: WemoHandle,
        binary_sensors: &BinarySensorsMap,
        add_entities: &AddEntities,
    ) -> Result<(), Box<dyn Error + Send>> {
        let sensor = Arc::new(WemoBinarySensor::from_device(device));
        let entity_id = sensor.entity_id();
        info!(
            "Discovered binary sensor entity: {} ({}, {:?})",
            sensor.name(),
            entity_id,
            sensor.kind()
        );

        add_entities
            .add(vec![(entity_id.clone(), sensor.clone() as Arc<dyn Entity>)])
            .await?;

        // Only entities the engine accepted are tracked for refresh and removal
        binary_sensors
            .lock()
            .await
            .insert(entity_id.clone(), sensor.clone());

        match sensor.is_on() {
            Ok(on) => {
                if let Err(e) = add_entities.report_binary_sensor(&entity_id, on).await {
                    warn!("Failed to send BinarySensorStateChanged message: {}", e);
                }
            }
            Err(e) => warn!("Failed to read initial state of {}: {}", entity_id, e),
        }

        Ok(())
    }

    /// Re-read a binary sensor and report its state to the engine
    async fn refresh(&self, entity_id: &str) -> Result<(), Box<dyn Error + Send>> {
        let add_entities = self.add_entities.as_ref().ok_or(WemoError::NotSetUp)?;

        let sensor = self
            .binary_sensors
            .lock()
            .await
            .get(entity_id)
            .cloned()
            .ok_or_else(|| WemoError::EntityNotFound(entity_id.to_string()))?;

        let on = sensor.is_on().map_err(WemoError::from)?;
        debug!("Refreshed {}: on={}", entity_id, on);

        add_entities.report_binary_sensor(entity_id, on).await
    }
}

#[async_trait]
impl Integration for WemoIntegration {
    fn name(&self) -> &str {
        "wemo"
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        let add_entities = AddEntities::new(self.name(), tx);
        self.add_entities = Some(add_entities.clone());

        self.setup_binary_sensors(add_entities).await?;

        info!("WeMo integration setup complete");
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::RefreshEntity { entity_id } => self.refresh(&entity_id).await,
        }
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("WeMo integration shutting down");
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }

        let entity_ids: Vec<String> = self
            .binary_sensors
            .lock()
            .await
            .drain()
            .map(|(entity_id, _)| entity_id)
            .collect();
        self.registered.lock().await.clear();
        if let Some(add_entities) = &self.add_entities {
            for entity_id in entity_ids {
                add_entities.remove(&entity_id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::Engine;
    use crate::engine::Event;
    use crate::engine::FromIntegrationMessage;
    use crate::integrations::wemo::device::DeviceKind;
    use crate::integrations::wemo::device::DeviceSnapshot;
    use crate::integrations::wemo::device::InsightParams;
    use crate::integrations::wemo::device::StaticDevice;
    use crate::integrations::wemo::device::snapshot;

    fn device(kind: DeviceKind, serial: &str) -> Arc<StaticDevice> {
        Arc::new(StaticDevice::new(snapshot(kind, serial)))
    }

    /// Drain everything currently queued, returning the discovered entity ids
    /// and the reported states.
    fn drain(
        rx: &mut mpsc::Receiver<FromIntegrationMessage>,
    ) -> (Vec<String>, HashMap<String, bool>) {
        let mut discovered = Vec::new();
        let mut states = HashMap::new();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                FromIntegrationMessage::EntityDiscovered { entity_id, .. } => {
                    discovered.push(entity_id)
                }
                FromIntegrationMessage::BinarySensorStateChanged { entity_id, on } => {
                    states.insert(entity_id, on);
                }
                FromIntegrationMessage::EntityRemoved { .. } => {}
            }
        }
        discovered.sort();
        (discovered, states)
    }

    async fn next_discovered(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> String {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for discovery")
                .expect("channel closed");
            if let FromIntegrationMessage::EntityDiscovered { entity_id, .. } = msg {
                return entity_id;
            }
        }
    }

    #[tokio::test]
    async fn test_pending_devices_registered_once() {
        let domain = Arc::new(WemoDomain::new());
        let maker = device(DeviceKind::Maker, "MAKER1");
        domain.discover(maker.clone());
        domain.discover(maker.clone());
        domain.discover(Arc::new(StaticDevice::new(DeviceSnapshot {
            state: 1,
            insight_params: Some(InsightParams {
                state: "1".to_string(),
            }),
            ..snapshot(DeviceKind::Insight, "INSIGHT1")
        })));
        domain.discover(device(DeviceKind::Motion, "MOTION1"));
        domain.discover(device(DeviceKind::Socket, "SOCKET1"));

        let (tx, mut rx) = mpsc::channel(64);
        let mut integration = WemoIntegration::new(domain.clone());
        integration.setup(tx).await.unwrap();

        let (discovered, states) = drain(&mut rx);
        assert_eq!(
            discovered,
            vec![
                "binary_sensor.insight1_device",
                "binary_sensor.maker1_sensor",
                "binary_sensor.motion1",
            ]
        );
        assert_eq!(states.get("binary_sensor.insight1_device"), Some(&true));
        assert_eq!(states.get("binary_sensor.maker1_sensor"), Some(&false));
        assert_eq!(states.get("binary_sensor.motion1"), Some(&false));

        // Redelivering a known device is ignored; a new one is registered
        domain.discover(maker);
        domain.discover(device(DeviceKind::Motion, "MOTION2"));
        assert_eq!(next_discovered(&mut rx).await, "binary_sensor.motion2");
    }

    #[tokio::test]
    async fn test_shutdown_removes_entities() {
        let domain = Arc::new(WemoDomain::new());
        domain.discover(device(DeviceKind::Motion, "MOTION1"));
        domain.discover(device(DeviceKind::Maker, "MAKER1"));

        let (tx, mut rx) = mpsc::channel(64);
        let mut integration = WemoIntegration::new(domain);
        integration.setup(tx).await.unwrap();
        drain(&mut rx);

        integration.shutdown().await.unwrap();

        let mut removed = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let FromIntegrationMessage::EntityRemoved { entity_id } = msg {
                removed.push(entity_id);
            }
        }
        removed.sort();
        assert_eq!(
            removed,
            vec!["binary_sensor.maker1_sensor", "binary_sensor.motion1"]
        );
    }

    #[tokio::test]
    async fn test_unreadable_device_still_registered() {
        let domain = Arc::new(WemoDomain::new());
        domain.discover(Arc::new(StaticDevice::new(DeviceSnapshot {
            unreachable: true,
            ..snapshot(DeviceKind::Motion, "GONE")
        })));

        let (tx, mut rx) = mpsc::channel(64);
        let mut integration = WemoIntegration::new(domain);
        integration.setup(tx).await.unwrap();

        let (discovered, states) = drain(&mut rx);
        assert_eq!(discovered, vec!["binary_sensor.gone"]);
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_reports_current_state() {
        let domain = Arc::new(WemoDomain::new());
        let motion = device(DeviceKind::Motion, "MOTION1");
        domain.discover(motion.clone());

        let (tx, mut rx) = mpsc::channel(64);
        let mut integration = WemoIntegration::new(domain);
        integration.setup(tx).await.unwrap();
        drain(&mut rx);

        motion.update(|s| s.state = 1).unwrap();
        integration
            .handle_message(ToIntegrationMessage::RefreshEntity {
                entity_id: "binary_sensor.motion1".to_string(),
            })
            .await
            .unwrap();

        let (_, states) = drain(&mut rx);
        assert_eq!(states.get("binary_sensor.motion1"), Some(&true));
    }

    #[tokio::test]
    async fn test_refresh_unknown_entity() {
        let (tx, _rx) = mpsc::channel(64);
        let mut integration = WemoIntegration::new(Arc::new(WemoDomain::new()));
        integration.setup(tx).await.unwrap();

        let err = integration
            .handle_message(ToIntegrationMessage::RefreshEntity {
                entity_id: "binary_sensor.nope".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WemoError>(),
            Some(WemoError::EntityNotFound(id)) if id == "binary_sensor.nope"
        ));
        assert_eq!(err.to_string(), "Binary sensor not found: binary_sensor.nope");
    }

    #[tokio::test]
    async fn test_refresh_before_setup() {
        let mut integration = WemoIntegration::new(Arc::new(WemoDomain::new()));

        let err = integration
            .handle_message(ToIntegrationMessage::RefreshEntity {
                entity_id: "binary_sensor.motion1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WemoError>(),
            Some(WemoError::NotSetUp)
        ));
    }

    #[tokio::test]
    async fn test_refresh_unreadable_device() {
        let domain = Arc::new(WemoDomain::new());
        let motion = device(DeviceKind::Motion, "MOTION1");
        domain.discover(motion.clone());

        let (tx, mut rx) = mpsc::channel(64);
        let mut integration = WemoIntegration::new(domain);
        integration.setup(tx).await.unwrap();
        drain(&mut rx);

        motion.update(|s| s.unreachable = true).unwrap();
        let err = integration
            .handle_message(ToIntegrationMessage::RefreshEntity {
                entity_id: "binary_sensor.motion1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WemoError>(),
            Some(WemoError::Device(DeviceError::Unreachable(_)))
        ));
    }

    #[tokio::test]
    async fn test_burst_of_discoveries_all_registered() {
        let domain = Arc::new(WemoDomain::new());
        let (tx, mut rx) = mpsc::channel(64);
        let mut integration = WemoIntegration::new(domain.clone());
        integration.setup(tx).await.unwrap();

        // Far more devices than any channel buffer, sent before the listener runs
        let expected: Vec<String> = (0..200)
            .map(|i| {
                let serial = format!("M{:03}", i);
                domain.discover(device(DeviceKind::Motion, &serial));
                format!("binary_sensor.{}", serial.to_lowercase())
            })
            .collect();

        let mut discovered = Vec::new();
        while discovered.len() < expected.len() {
            discovered.push(next_discovered(&mut rx).await);
        }
        discovered.sort();
        assert_eq!(discovered, expected);
    }

    #[tokio::test]
    async fn test_failed_setup_keeps_nothing() {
        let domain = Arc::new(WemoDomain::new());
        domain.discover(device(DeviceKind::Motion, "MOTION1"));
        domain.discover(device(DeviceKind::Maker, "MAKER1"));

        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        let mut integration = WemoIntegration::new(domain);
        assert!(integration.setup(tx).await.is_err());

        assert!(integration.binary_sensors.lock().await.is_empty());
        assert!(integration.registered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_releases_serial() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        let add_entities = AddEntities::new("wemo", tx);
        let binary_sensors: BinarySensorsMap = Arc::default();
        let registered: RegisteredSerials = Arc::default();
        registered.lock().await.insert("MOTION1".to_string());

        let result = WemoIntegration::register(
            device(DeviceKind::Motion, "MOTION1"),
            &binary_sensors,
            &registered,
            &add_entities,
        )
        .await;

        assert!(result.is_err());
        assert!(binary_sensors.lock().await.is_empty());
        assert!(registered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_all_runs_every_registration() {
        let finished = Arc::new(AtomicUsize::new(0));
        let registration = |fail: bool| {
            let finished = finished.clone();
            async move {
                if fail {
                    return Err(Box::new(WemoError::NotSetUp) as Box<dyn Error + Send>);
                }
                tokio::task::yield_now().await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        let result =
            register_all([registration(false), registration(true), registration(false)]).await;

        assert!(result.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_engine_shutdown_removes_entities() {
        let domain = Arc::new(WemoDomain::new());
        domain.discover(device(DeviceKind::Maker, "MAKER1"));
        domain.discover(device(DeviceKind::Motion, "MOTION1"));

        let mut engine = Engine::new();
        engine.register_integration("wemo".to_string(), Box::new(WemoIntegration::new(domain)));
        let mut events = engine.subscribe();

        engine.shutdown().await;

        let mut removed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Event::EntityRemoved { entity_id } = event {
                removed.push(entity_id);
            }
        }
        removed.sort();
        assert_eq!(
            removed,
            vec!["binary_sensor.maker1_sensor", "binary_sensor.motion1"]
        );
        assert_eq!(engine.entity_count(), 0);
        assert!(engine.state_snapshot().binary_sensors.is_empty());
    }

    #[tokio::test]
    async fn test_engine_registers_pending_devices() {
        let domain = Arc::new(WemoDomain::new());
        domain.discover(device(DeviceKind::Maker, "MAKER1"));
        domain.discover(device(DeviceKind::Motion, "MOTION1"));

        let mut engine = Engine::new();
        engine.register_integration(
            "wemo".to_string(),
            Box::new(WemoIntegration::new(domain.clone())),
        );
        let engine = Arc::new(engine);
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await.ok() })
        };

        tokio::time::timeout(Duration::from_secs(1), async {
            while engine.state_snapshot().binary_sensors.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entities never reported state");

        assert_eq!(engine.entity_count(), 2);
        let json = engine
            .entity_state_json("binary_sensor.maker1_sensor")
            .unwrap()
            .unwrap();
        assert_eq!(json["name"], "WeMo maker Sensor");
        assert_eq!(json["on"], false);

        runner.abort();
    }
}
