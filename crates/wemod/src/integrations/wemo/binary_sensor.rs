use super::device::DeviceError;
use super::device::DeviceKind;
use super::device::WemoHandle;
use crate::engine::Entity;

/// Maker sensor port reading when the input is pulled low
const SENSOR_PULLED_LOW: u8 = 0;

/// Insight status code for a connected load that is drawing power
const INSIGHT_LOAD_ON: &str = "1";

/// Which reading a binary sensor presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Switch state; standby counts as on
    Generic,
    /// Maker sensor port
    Contact,
    /// Device plugged into an Insight switch
    ConnectedLoad,
}

impl SensorKind {
    /// First match wins: Insight, then Maker, then everything else.
    pub fn classify(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Insight => SensorKind::ConnectedLoad,
            DeviceKind::Maker => SensorKind::Contact,
            _ => SensorKind::Generic,
        }
    }

    fn name_suffix(self) -> Option<&'static str> {
        match self {
            SensorKind::Generic => None,
            SensorKind::Contact => Some("Sensor"),
            SensorKind::ConnectedLoad => Some("Device"),
        }
    }
}

/// Binary sensor entity backed by a WeMo device.
///
/// Holds nothing but the device handle; every read goes to the device.
#[derive(Debug, Clone)]
pub struct WemoBinarySensor {
    kind: SensorKind,
    device: WemoHandle,
}

impl WemoBinarySensor {
    /// Wrap a device in the variant its kind calls for.
    pub fn from_device(device: WemoHandle) -> Self {
        match SensorKind::classify(device.kind()) {
            SensorKind::Generic => Self::generic(device),
            SensorKind::Contact => Self::contact(device),
            SensorKind::ConnectedLoad => Self::connected_load(device),
        }
    }

    pub fn generic(device: WemoHandle) -> Self {
        Self {
            kind: SensorKind::Generic,
            device,
        }
    }

    pub fn contact(device: WemoHandle) -> Self {
        Self {
            kind: SensorKind::Contact,
            device,
        }
    }

    pub fn connected_load(device: WemoHandle) -> Self {
        Self {
            kind: SensorKind::ConnectedLoad,
            device,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn name(&self) -> String {
        match self.kind.name_suffix() {
            Some(suffix) => format!("{} {}", self.device.name(), suffix),
            None => self.device.name().to_string(),
        }
    }

    pub fn unique_id(&self) -> String {
        match self.kind.name_suffix() {
            Some(suffix) => format!(
                "{}_{}",
                self.device.serial_number(),
                suffix.to_lowercase()
            ),
            None => self.device.serial_number().to_string(),
        }
    }

    pub fn entity_id(&self) -> String {
        format!("binary_sensor.{}", self.unique_id().to_lowercase())
    }

    pub fn is_on(&self) -> Result<bool, DeviceError> {
        match self.kind {
            SensorKind::Generic => self.switch_on(),
            SensorKind::Contact => {
                Ok(self.device.has_sensor()? && self.device.sensor_state()? == SENSOR_PULLED_LOW)
            }
            SensorKind::ConnectedLoad => {
                Ok(self.switch_on()? && self.device.insight_params()?.state == INSIGHT_LOAD_ON)
            }
        }
    }

    fn switch_on(&self) -> Result<bool, DeviceError> {
        Ok(self.device.get_state()? != 0)
    }
}

impl Entity for WemoBinarySensor {
    fn state_json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({
            "entity_id": self.entity_id(),
            "name": self.name(),
            "unique_id": self.unique_id(),
            "on": self.is_on()?,
        }))
    }

    fn platform(&self) -> &'static str {
        "binary_sensor"
    }
}
