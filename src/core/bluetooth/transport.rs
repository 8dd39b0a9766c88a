//! Transport contract consumed by the sessions
//!
//! Every command returns immediately. An `Err` means the stack refused the
//! command outright; otherwise its outcome arrives later as a typed event on
//! the session's event queue.

use uuid::Uuid;

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::types::{
    AdvertiseConfig, AdvertiseFailure, ConnectionHandle, DiscoveredDevice, GattService,
    GattStatus, WriteType,
};

/// Client-role capabilities
pub trait CentralTransport {
    /// Starts a scan filtered on one service. Matches arrive as `ScanResult`.
    fn start_scan(&mut self, service_filter: Uuid) -> Result<(), TransportError>;

    fn stop_scan(&mut self);

    /// Starts connecting. The returned handle identifies the link in every
    /// later callback.
    fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, TransportError>;

    fn disconnect(&mut self, handle: &ConnectionHandle);

    /// Releases the link resources. No callbacks follow for this handle.
    fn close(&mut self, handle: &ConnectionHandle);

    fn discover_services(&mut self, handle: &ConnectionHandle) -> Result<(), TransportError>;

    fn read_characteristic(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;

    fn write_characteristic(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError>;

    /// Enables local delivery of value changes; returns false when refused
    fn set_notification(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> bool;

    fn write_descriptor(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;
}

/// Server-role capabilities
pub trait PeripheralTransport {
    /// Opens the GATT server and adds the service
    fn register_service(&mut self, service: &GattService) -> Result<(), TransportError>;

    /// Closes the GATT server, dropping any connected centrals
    fn close_server(&mut self);

    fn start_advertising(&mut self, config: &AdvertiseConfig) -> Result<(), TransportError>;

    fn stop_advertising(&mut self);

    /// Answers one inbound request. Must be called at most once per request.
    fn respond(
        &mut self,
        handle: &ConnectionHandle,
        request_id: u64,
        status: GattStatus,
        offset: usize,
        value: Option<&[u8]>,
    );

    /// Pushes a value change to one subscriber. `confirm` asks for an
    /// indication instead of a notification.
    fn notify(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), TransportError>;
}

/// Callbacks delivered to the central session
#[derive(Debug, Clone, PartialEq)]
pub enum CentralTransportEvent {
    ScanResult(DiscoveredDevice),
    BatchScanResults(Vec<DiscoveredDevice>),
    ScanFailed {
        error_code: i32,
    },
    ConnectionStateChanged {
        handle: ConnectionHandle,
        status: GattStatus,
        connected: bool,
    },
    ServicesDiscovered {
        handle: ConnectionHandle,
        status: GattStatus,
        services: Vec<GattService>,
    },
    CharacteristicRead {
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
    CharacteristicWrite {
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
    },
    CharacteristicChanged {
        handle: ConnectionHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorWrite {
        handle: ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
}

/// Callbacks delivered to the peripheral session
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralTransportEvent {
    AdvertiseStarted,
    AdvertiseFailed(AdvertiseFailure),
    ConnectionStateChanged {
        handle: ConnectionHandle,
        connected: bool,
    },
    NotificationSent {
        handle: ConnectionHandle,
        status: GattStatus,
    },
    ReadRequest {
        handle: ConnectionHandle,
        request_id: u64,
        characteristic: Uuid,
        offset: usize,
    },
    WriteRequest {
        handle: ConnectionHandle,
        request_id: u64,
        characteristic: Uuid,
        value: Vec<u8>,
        response_needed: bool,
        prepared: bool,
        offset: usize,
    },
    DescriptorReadRequest {
        handle: ConnectionHandle,
        request_id: u64,
        characteristic: Uuid,
        descriptor: Uuid,
        offset: usize,
    },
    DescriptorWriteRequest {
        handle: ConnectionHandle,
        request_id: u64,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
}
