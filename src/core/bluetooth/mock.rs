//! Recording transport for unit tests

use std::collections::HashSet;

use uuid::Uuid;

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::{CentralTransport, PeripheralTransport};
use crate::core::bluetooth::types::{
    AdvertiseConfig, ConnectionHandle, DiscoveredDevice, GattService, GattStatus, WriteType,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartScan(Uuid),
    StopScan,
    Connect(String),
    Disconnect(ConnectionHandle),
    Close(ConnectionHandle),
    DiscoverServices(ConnectionHandle),
    Read(ConnectionHandle, Uuid),
    Write(ConnectionHandle, Uuid, Vec<u8>, WriteType),
    SetNotification(ConnectionHandle, Uuid, bool),
    WriteDescriptor(ConnectionHandle, Uuid, Uuid, Vec<u8>),
    RegisterService(Uuid),
    CloseServer,
    StartAdvertising(Uuid),
    StopAdvertising,
    Respond {
        handle: ConnectionHandle,
        request_id: u64,
        status: GattStatus,
        value: Option<Vec<u8>>,
    },
    Notify(ConnectionHandle, Uuid, Vec<u8>),
}

#[derive(Debug, Default)]
pub struct MockTransport {
    pub calls: Vec<Call>,
    next_link: u64,
    pub fail_scan: bool,
    pub fail_connect: bool,
    pub refuse_notification: bool,
    pub fail_register: bool,
    pub fail_notify_for: HashSet<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn responses(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Respond { .. }))
            .collect()
    }
}

impl CentralTransport for MockTransport {
    fn start_scan(&mut self, service_filter: Uuid) -> Result<(), TransportError> {
        self.calls.push(Call::StartScan(service_filter));
        if self.fail_scan {
            return Err(TransportError::Rejected("scanner unavailable".into()));
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.calls.push(Call::StopScan);
    }

    fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, TransportError> {
        self.calls.push(Call::Connect(device.address.clone()));
        if self.fail_connect {
            return Err(TransportError::Busy);
        }
        self.next_link += 1;
        Ok(ConnectionHandle::new(
            self.next_link,
            device.address.clone(),
            device.name.clone(),
        ))
    }

    fn disconnect(&mut self, handle: &ConnectionHandle) {
        self.calls.push(Call::Disconnect(handle.clone()));
    }

    fn close(&mut self, handle: &ConnectionHandle) {
        self.calls.push(Call::Close(handle.clone()));
    }

    fn discover_services(&mut self, handle: &ConnectionHandle) -> Result<(), TransportError> {
        self.calls.push(Call::DiscoverServices(handle.clone()));
        Ok(())
    }

    fn read_characteristic(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.calls.push(Call::Read(handle.clone(), characteristic));
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError> {
        self.calls.push(Call::Write(
            handle.clone(),
            characteristic,
            value.to_vec(),
            write_type,
        ));
        Ok(())
    }

    fn set_notification(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> bool {
        self.calls
            .push(Call::SetNotification(handle.clone(), characteristic, enabled));
        !self.refuse_notification
    }

    fn write_descriptor(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.calls.push(Call::WriteDescriptor(
            handle.clone(),
            characteristic,
            descriptor,
            value.to_vec(),
        ));
        Ok(())
    }
}

impl PeripheralTransport for MockTransport {
    fn register_service(&mut self, service: &GattService) -> Result<(), TransportError> {
        self.calls.push(Call::RegisterService(service.uuid));
        if self.fail_register {
            return Err(TransportError::Rejected("addService".into()));
        }
        Ok(())
    }

    fn close_server(&mut self) {
        self.calls.push(Call::CloseServer);
    }

    fn start_advertising(&mut self, config: &AdvertiseConfig) -> Result<(), TransportError> {
        self.calls.push(Call::StartAdvertising(config.service_uuid));
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.calls.push(Call::StopAdvertising);
    }

    fn respond(
        &mut self,
        handle: &ConnectionHandle,
        request_id: u64,
        status: GattStatus,
        _offset: usize,
        value: Option<&[u8]>,
    ) {
        self.calls.push(Call::Respond {
            handle: handle.clone(),
            request_id,
            status,
            value: value.map(|v| v.to_vec()),
        });
    }

    fn notify(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        value: &[u8],
        _confirm: bool,
    ) -> Result<(), TransportError> {
        self.calls
            .push(Call::Notify(handle.clone(), characteristic, value.to_vec()));
        if self.fail_notify_for.contains(&handle.address) {
            return Err(TransportError::Busy);
        }
        Ok(())
    }
}
