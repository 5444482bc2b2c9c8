mod binary_sensor;
mod config;
mod device;
mod dispatcher;
#[allow(clippy::module_inception)]
mod wemo;

use std::sync::Arc;

pub use binary_sensor::SensorKind;
pub use binary_sensor::WemoBinarySensor;
pub use config::Config as WemoConfig;
pub use device::DeviceError;
pub use device::DeviceKind;
pub use device::DeviceSnapshot;
pub use device::InsightParams;
pub use device::StaticDevice;
pub use device::WemoDevice;
pub use device::WemoHandle;
pub use dispatcher::Dispatcher;
pub use dispatcher::WemoDomain;
pub use dispatcher::signal_topic;
use linkme::distributed_slice;
pub use wemo::WemoIntegration;

use crate::engine;

/// Domain name, used as the prefix of every signal topic
pub const DOMAIN: &str = "wemo";

/// Entity platforms WeMo devices are set up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Fan,
    Light,
    Sensor,
    Switch,
}

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_wemo(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    match &ctx.config.integrations.wemo {
        Some(c) if c.enabled => {}
        _ => return Ok(None),
    }

    Ok(Some(Box::new(WemoIntegration::new(Arc::clone(ctx.wemo)))))
}
