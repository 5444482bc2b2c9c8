use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::mpsc;
use tracing::debug;

use super::DOMAIN;
use super::Platform;
use super::device::WemoHandle;

/// Topic-keyed publish/subscribe channel.
///
/// Every subscriber gets its own unbounded queue, so a burst of sends is never
/// dropped for a subscriber that has not caught up yet.
#[derive(Debug)]
pub struct Dispatcher<T> {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic.
    pub fn connect(&self, topic: &str) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.entry(topic.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver a value to every current subscriber of `topic`.
    ///
    /// Subscribers whose receiver was dropped are forgotten. Returns the number
    /// of subscribers reached.
    pub fn send(&self, topic: &str, value: T) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };
        subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal topic carrying devices for one platform, e.g. `wemo.binary_sensor`.
pub fn signal_topic(platform: Platform) -> String {
    format!("{}.{}", DOMAIN, platform)
}

#[derive(Debug, Default)]
struct Platforms {
    /// Platforms that have connected to their signal
    loaded: HashSet<Platform>,

    /// Devices discovered before their platform connected
    pending: HashMap<Platform, Vec<WemoHandle>>,
}

/// Discovery plumbing for the WeMo domain.
///
/// Devices found before a platform is set up wait in that platform's pending
/// queue; afterwards they are delivered on the platform's signal.
#[derive(Debug, Default)]
pub struct WemoDomain {
    dispatcher: Dispatcher<WemoHandle>,
    platforms: Mutex<Platforms>,
}

impl WemoDomain {
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            platforms: Mutex::new(Platforms::default()),
        }
    }

    /// Hand a newly discovered device to each platform its kind maps to.
    pub fn discover(&self, device: WemoHandle) {
        let mut platforms = self.platforms.lock().unwrap_or_else(PoisonError::into_inner);

        for &platform in device.kind().platforms() {
            if platforms.loaded.contains(&platform) {
                let reached = self
                    .dispatcher
                    .send(&signal_topic(platform), device.clone());
                debug!(
                    "Dispatched {} to {} ({} receivers)",
                    device.serial_number(),
                    signal_topic(platform),
                    reached
                );
            } else {
                debug!(
                    "Queued {} for {} until the platform is set up",
                    device.serial_number(),
                    platform
                );
                platforms
                    .pending
                    .entry(platform)
                    .or_default()
                    .push(device.clone());
            }
        }
    }

    /// Subscribe a platform to its signal and take everything queued for it.
    ///
    /// Both happen under one lock, so a device is either in the returned queue
    /// or delivered on the receiver.
    pub fn connect_platform(
        &self,
        platform: Platform,
    ) -> (mpsc::UnboundedReceiver<WemoHandle>, Vec<WemoHandle>) {
        let mut platforms = self.platforms.lock().unwrap_or_else(PoisonError::into_inner);
        let rx = self.dispatcher.connect(&signal_topic(platform));
        platforms.loaded.insert(platform);
        let pending = platforms.pending.remove(&platform).unwrap_or_default();
        (rx, pending)
    }

    /// Number of devices waiting for `platform` to be set up
    pub fn pending_count(&self, platform: Platform) -> usize {
        let platforms = self.platforms.lock().unwrap_or_else(PoisonError::into_inner);
        platforms.pending.get(&platform).map_or(0, Vec::len)
    }
}
