//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_CCC_DESCRIPTOR, UUID_CHAR_FOR_INDICATE, UUID_CHAR_FOR_READ, UUID_CHAR_FOR_WRITE,
    UUID_SERVICE,
};

/// Represents a device reported by a scan, or a known device to connect to directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The name of the device, if available
    pub name: Option<String>,
    /// The address of the device (MAC address on most platforms)
    pub address: String,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Creates a new DiscoveredDevice instance
    pub fn new(id: String, name: Option<String>, address: String, rssi: Option<i16>) -> Self {
        Self {
            id,
            name,
            address,
            rssi,
        }
    }
}

/// One physical link to a remote device.
///
/// Identity is the pair (link id, address): a reconnect to the same device
/// yields a different handle, so callbacks for an older link never match the
/// current one. The name is informational.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHandle {
    pub link_id: u64,
    pub address: String,
    pub name: Option<String>,
}

impl ConnectionHandle {
    pub fn new(link_id: u64, address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            link_id,
            address: address.into(),
            name,
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.link_id == other.link_id && self.address == other.address
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.link_id.hash(state);
        self.address.hash(state);
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}#{})", name, self.address, self.link_id),
            None => write!(f, "{}#{}", self.address, self.link_id),
        }
    }
}

/// Access properties of a characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    pub const READ: Self = Self {
        read: true,
        write: false,
        write_without_response: false,
        notify: false,
        indicate: false,
    };

    pub const WRITE: Self = Self {
        read: false,
        write: true,
        write_without_response: false,
        notify: false,
        indicate: false,
    };

    pub const INDICATE: Self = Self {
        read: false,
        write: false,
        write_without_response: false,
        notify: false,
        indicate: true,
    };
}

/// A characteristic as defined by a server or reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: Uuid) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn has_descriptor(&self, descriptor: Uuid) -> bool {
        self.descriptors.contains(&descriptor)
    }
}

/// A primary service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Fixed GATT identity shared by both roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service: Uuid,
    pub read: Uuid,
    pub write: Uuid,
    pub indicate: Uuid,
    pub ccc: Uuid,
}

/// The BLEProof service layout
pub const BLEPROOF_SERVICE: ServiceDescriptor = ServiceDescriptor {
    service: UUID_SERVICE,
    read: UUID_CHAR_FOR_READ,
    write: UUID_CHAR_FOR_WRITE,
    indicate: UUID_CHAR_FOR_INDICATE,
    ccc: UUID_CCC_DESCRIPTOR,
};

impl ServiceDescriptor {
    /// Builds the server-side definition: one service, three characteristics,
    /// and the CCC descriptor on the indicate characteristic.
    pub fn definition(&self) -> GattService {
        GattService {
            uuid: self.service,
            characteristics: vec![
                GattCharacteristic::new(self.read, CharacteristicProperties::READ),
                GattCharacteristic::new(self.write, CharacteristicProperties::WRITE),
                GattCharacteristic::new(self.indicate, CharacteristicProperties::INDICATE)
                    .with_descriptor(self.ccc),
            ],
        }
    }
}

/// Resolved characteristics of the connected peripheral.
/// Entries stay absent until discovery completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacteristicRefs {
    pub read: Option<GattCharacteristic>,
    pub write: Option<GattCharacteristic>,
    pub indicate: Option<GattCharacteristic>,
}

impl CharacteristicRefs {
    pub fn resolve(service: &GattService, descriptor: &ServiceDescriptor) -> Self {
        Self {
            read: service.characteristic(descriptor.read).cloned(),
            write: service.characteristic(descriptor.write).cloned(),
            indicate: service.characteristic(descriptor.indicate).cloned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none() && self.indicate.is_none()
    }
}

/// Write mode for a characteristic write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Status of a GATT operation, as reported by the stack or sent in a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    RequestNotSupported,
    InvalidOffset,
    InvalidAttributeLength,
    /// Transient stack failure during discovery (129)
    InternalError,
    /// Generic link-level error, the notorious 133
    GattError,
    Failure,
    Other(u16),
}

impl GattStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::ReadNotPermitted,
            3 => Self::WriteNotPermitted,
            6 => Self::RequestNotSupported,
            7 => Self::InvalidOffset,
            13 => Self::InvalidAttributeLength,
            129 => Self::InternalError,
            133 => Self::GattError,
            257 => Self::Failure,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::Success => 0,
            Self::ReadNotPermitted => 2,
            Self::WriteNotPermitted => 3,
            Self::RequestNotSupported => 6,
            Self::InvalidOffset => 7,
            Self::InvalidAttributeLength => 13,
            Self::InternalError => 129,
            Self::GattError => 133,
            Self::Failure => 257,
            Self::Other(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "GATT_SUCCESS",
            Self::ReadNotPermitted => "GATT_READ_NOT_PERMITTED",
            Self::WriteNotPermitted => "GATT_WRITE_NOT_PERMITTED",
            Self::RequestNotSupported => "GATT_REQUEST_NOT_SUPPORTED",
            Self::InvalidOffset => "GATT_INVALID_OFFSET",
            Self::InvalidAttributeLength => "GATT_INVALID_ATTRIBUTE_LENGTH",
            Self::InternalError => "GATT_INTERNAL_ERROR",
            Self::GattError => "GATT_ERROR",
            Self::Failure => "GATT_FAILURE",
            Self::Other(_) => "status",
        };
        write!(f, "{}={}", name, self.code())
    }
}

/// Advertising duty cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Advertising transmit power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

/// Parameters for starting an advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseConfig {
    pub service_uuid: Uuid,
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    /// Names longer than a few bytes overflow the legacy advertising payload
    pub include_device_name: bool,
}

/// Reasons an advertisement could not be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdvertiseFailure {
    DataTooLarge,
    TooManyAdvertisers,
    AlreadyStarted,
    InternalError,
    FeatureUnsupported,
    Unknown(i32),
}

impl AdvertiseFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::DataTooLarge,
            2 => Self::TooManyAdvertisers,
            3 => Self::AlreadyStarted,
            4 => Self::InternalError,
            5 => Self::FeatureUnsupported,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for AdvertiseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataTooLarge => write!(f, "ADVERTISE_FAILED_DATA_TOO_LARGE"),
            Self::TooManyAdvertisers => write!(f, "ADVERTISE_FAILED_TOO_MANY_ADVERTISERS"),
            Self::AlreadyStarted => write!(f, "ADVERTISE_FAILED_ALREADY_STARTED"),
            Self::InternalError => write!(f, "ADVERTISE_FAILED_INTERNAL_ERROR"),
            Self::FeatureUnsupported => write!(f, "ADVERTISE_FAILED_FEATURE_UNSUPPORTED"),
            Self::Unknown(code) => write!(f, "errorCode={}", code),
        }
    }
}

/// Renders a characteristic value the way the log shows it
pub fn display_value(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}
