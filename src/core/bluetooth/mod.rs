//! Bluetooth functionality for BLEProof
//! This module holds both GATT roles: the central session that scans,
//! connects and subscribes, and the peripheral session that advertises and
//! serves the BLEProof service. Both talk to the radio through the
//! transport traits.

mod central;
mod connection;
mod constants;
mod error;
mod manager;
mod peripheral;
mod radio;
mod simulated;
mod transport;
mod types;

#[cfg(feature = "bluest")]
mod bluest_transport;

#[cfg(test)]
mod mock;

// Re-export types that should be publicly accessible
pub use central::{CentralSession, CentralState, CentralUpdate};
pub use connection::{ReconnectPolicy, ReconnectTracker};
pub use constants::*; // Re-export all constants
pub use error::{SessionError, TransportError};
pub use manager::{COMMAND_QUEUE_CAPACITY, Session, SessionManager, spawn_session};
pub use peripheral::{PeripheralSession, PeripheralState, PeripheralUpdate};
pub use radio::{RadioAvailabilityMonitor, RadioState};
pub use simulated::{SimCentral, SimPeripheral, SimulatedAir};
pub use transport::{
    CentralTransport, CentralTransportEvent, PeripheralTransport, PeripheralTransportEvent,
};
pub use types::{
    AdvertiseConfig, AdvertiseFailure, AdvertiseMode, BLEPROOF_SERVICE, CharacteristicProperties,
    CharacteristicRefs, ConnectionHandle, DiscoveredDevice, GattCharacteristic, GattService,
    GattStatus, ServiceDescriptor, TxPowerLevel, WriteType, display_value,
};

#[cfg(feature = "bluest")]
pub use bluest_transport::BluestCentral;
