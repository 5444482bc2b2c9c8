//! Device handles for WeMo hardware.
//!
//! The device layer (network discovery, UPnP, polling) lives outside this
//! crate. It hands us `WemoHandle`s; everything here reads through them.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use super::Platform;

/// Shared, non-owning reference to a device owned by the device layer.
pub type WemoHandle = Arc<dyn WemoDevice>;

/// WeMo hardware models, as reported by the device layer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    Bridge,
    CoffeeMaker,
    Dimmer,
    Humidifier,
    /// Switch with energy monitoring
    Insight,
    LightSwitch,
    /// Programmable relay with a sensor port
    Maker,
    Motion,
    Socket,
}

impl DeviceKind {
    /// Entity platforms a device of this kind is set up on.
    pub fn platforms(self) -> &'static [Platform] {
        match self {
            DeviceKind::Bridge => &[Platform::Light],
            DeviceKind::CoffeeMaker => &[Platform::Switch],
            DeviceKind::Dimmer => &[Platform::Light],
            DeviceKind::Humidifier => &[Platform::Fan],
            DeviceKind::Insight => &[Platform::BinarySensor, Platform::Sensor, Platform::Switch],
            DeviceKind::LightSwitch => &[Platform::Switch],
            DeviceKind::Maker => &[Platform::BinarySensor, Platform::Switch],
            DeviceKind::Motion => &[Platform::BinarySensor],
            DeviceKind::Socket => &[Platform::Switch],
        }
    }
}

/// Errors raised by the device layer when reading a device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} is unreachable")]
    Unreachable(String),

    #[error("device {serial_number} does not support {attribute}")]
    Unsupported {
        serial_number: String,
        attribute: &'static str,
    },

    #[error("device state lock poisoned")]
    Poisoned,
}

/// Status block reported by Insight switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightParams {
    /// "0" = off, "1" = load drawing power, "8" = standby
    pub state: String,
}

/// Read access to a WeMo device.
///
/// Reads may hit the network and fail; failures are returned unchanged.
pub trait WemoDevice: Send + Sync + fmt::Debug {
    fn kind(&self) -> DeviceKind;

    fn name(&self) -> &str;

    fn serial_number(&self) -> &str;

    /// Generic switch state: 0 = off, 1 = on, 8 = standby
    fn get_state(&self) -> Result<u8, DeviceError>;

    /// Whether a sensor is attached to the device's sensor port
    fn has_sensor(&self) -> Result<bool, DeviceError> {
        Ok(false)
    }

    /// Sensor port reading: 0 = pulled low, 1 = high
    fn sensor_state(&self) -> Result<u8, DeviceError> {
        Err(DeviceError::Unsupported {
            serial_number: self.serial_number().to_string(),
            attribute: "sensor_state",
        })
    }

    fn insight_params(&self) -> Result<InsightParams, DeviceError> {
        Err(DeviceError::Unsupported {
            serial_number: self.serial_number().to_string(),
            attribute: "insight_params",
        })
    }
}

/// Point-in-time readings for a `StaticDevice`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub kind: DeviceKind,
    pub name: String,
    pub serial_number: String,
    #[serde(default)]
    pub state: u8,
    #[serde(default)]
    pub has_sensor: bool,
    #[serde(default)]
    pub sensor_state: Option<u8>,
    #[serde(default)]
    pub insight_params: Option<InsightParams>,
    /// Simulate a device that stopped answering
    #[serde(default)]
    pub unreachable: bool,
}

/// A device whose readings are held in memory.
///
/// Used by `wemod --devices` and in tests; readings can be changed with
/// [`StaticDevice::update`].
#[derive(Debug)]
pub struct StaticDevice {
    kind: DeviceKind,
    name: String,
    serial_number: String,
    readings: Mutex<DeviceSnapshot>,
}

impl StaticDevice {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self {
            kind: snapshot.kind,
            name: snapshot.name.clone(),
            serial_number: snapshot.serial_number.clone(),
            readings: Mutex::new(snapshot),
        }
    }

    /// Load a JSON array of snapshots.
    pub fn load_all(json: &str) -> serde_json::Result<Vec<WemoHandle>> {
        let snapshots: Vec<DeviceSnapshot> = serde_json::from_str(json)?;
        Ok(snapshots
            .into_iter()
            .map(|s| Arc::new(StaticDevice::new(s)) as WemoHandle)
            .collect())
    }

    pub fn update(&self, f: impl FnOnce(&mut DeviceSnapshot)) -> Result<(), DeviceError> {
        let mut readings = self.readings.lock().map_err(|_| DeviceError::Poisoned)?;
        f(&mut readings);
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&DeviceSnapshot) -> T) -> Result<T, DeviceError> {
        let readings = self.readings.lock().map_err(|_| DeviceError::Poisoned)?;
        if readings.unreachable {
            return Err(DeviceError::Unreachable(self.serial_number.clone()));
        }
        Ok(f(&readings))
    }
}

impl WemoDevice for StaticDevice {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn serial_number(&self) -> &str {
        &self.serial_number
    }

    fn get_state(&self) -> Result<u8, DeviceError> {
        self.read(|r| r.state)
    }

    fn has_sensor(&self) -> Result<bool, DeviceError> {
        self.read(|r| r.has_sensor)
    }

    fn sensor_state(&self) -> Result<u8, DeviceError> {
        self.read(|r| r.sensor_state)?
            .ok_or_else(|| DeviceError::Unsupported {
                serial_number: self.serial_number.clone(),
                attribute: "sensor_state",
            })
    }

    fn insight_params(&self) -> Result<InsightParams, DeviceError> {
        self.read(|r| r.insight_params.clone())?
            .ok_or_else(|| DeviceError::Unsupported {
                serial_number: self.serial_number.clone(),
                attribute: "insight_params",
            })
    }
}

#[cfg(test)]
pub(crate) fn snapshot(kind: DeviceKind, serial_number: &str) -> DeviceSnapshot {
    DeviceSnapshot {
        kind,
        name: format!("WeMo {}", kind),
        serial_number: serial_number.to_string(),
        state: 0,
        has_sensor: false,
        sensor_state: None,
        insight_params: None,
        unreachable: false,
    }
}
