use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::{AdvertiseConfig, AdvertiseMode, DEFAULT_READ_VALUE, TxPowerLevel};

/// Peripheral role settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Text served from the read characteristic until the user changes it
    pub initial_read_value: String,
    pub advertise_mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    /// Leave off: a name longer than 8 bytes makes the payload too large
    pub include_device_name: bool,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            initial_read_value: DEFAULT_READ_VALUE.to_string(),
            advertise_mode: AdvertiseMode::Balanced,
            tx_power: TxPowerLevel::Medium,
            connectable: true,
            include_device_name: false,
        }
    }
}

impl PeripheralConfig {
    pub fn advertise_config(&self, service_uuid: Uuid) -> AdvertiseConfig {
        AdvertiseConfig {
            service_uuid,
            mode: self.advertise_mode,
            tx_power: self.tx_power,
            connectable: self.connectable,
            include_device_name: self.include_device_name,
        }
    }
}
