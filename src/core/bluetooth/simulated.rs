//! In-process BLE simulator
//!
//! A shared "air" joining one central transport to one peripheral transport.
//! Central commands become peripheral requests, peripheral responses become
//! central callbacks, and both sides receive their events on the same kind
//! of queue a real adapter would feed. Used by the demo binary and the
//! integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::{
    CentralTransport, CentralTransportEvent, PeripheralTransport, PeripheralTransportEvent,
};
use crate::core::bluetooth::types::{
    AdvertiseConfig, AdvertiseFailure, ConnectionHandle, DiscoveredDevice, GattService,
    GattStatus, WriteType,
};

const PERIPHERAL_ADDRESS: &str = "5A:11:0F:00:00:01";
const PERIPHERAL_NAME: &str = "BLEProof Peripheral";
const CENTRAL_ADDRESS: &str = "5A:11:0C:00:00:01";

/// Status reported to both ends when the air drops a link
const LINK_LOSS_STATUS: GattStatus = GattStatus::Other(8);

#[derive(Debug)]
struct Link {
    /// How the central sees the link
    central: ConnectionHandle,
    /// How the peripheral sees the link
    peripheral: ConnectionHandle,
    connected: bool,
    notifying: HashSet<Uuid>,
}

#[derive(Debug)]
enum Pending {
    Read { link_id: u64, characteristic: Uuid },
    Write { link_id: u64, characteristic: Uuid },
    DescriptorWrite {
        link_id: u64,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
}

struct AirState {
    central_tx: mpsc::UnboundedSender<CentralTransportEvent>,
    peripheral_tx: mpsc::UnboundedSender<PeripheralTransportEvent>,

    service: Option<GattService>,
    advertising: Option<AdvertiseConfig>,
    scan_filter: Option<Uuid>,
    fail_next_advertise: Option<AdvertiseFailure>,

    next_link: u64,
    links: HashMap<u64, Link>,
    next_request: u64,
    pending: HashMap<u64, Pending>,
}

impl AirState {
    fn to_central(&self, event: CentralTransportEvent) {
        if self.central_tx.send(event).is_err() {
            debug!("central event dropped, receiver gone");
        }
    }

    fn to_peripheral(&self, event: PeripheralTransportEvent) {
        if self.peripheral_tx.send(event).is_err() {
            debug!("peripheral event dropped, receiver gone");
        }
    }

    fn device(&self) -> DiscoveredDevice {
        DiscoveredDevice::new(
            format!("sim-{}", PERIPHERAL_ADDRESS),
            Some(PERIPHERAL_NAME.to_string()),
            PERIPHERAL_ADDRESS.to_string(),
            Some(-42),
        )
    }

    /// Reports the advertised device to a scan looking for it
    fn announce(&self) {
        let Some(filter) = self.scan_filter else {
            return;
        };
        let Some(config) = &self.advertising else {
            return;
        };
        if config.service_uuid == filter {
            self.to_central(CentralTransportEvent::ScanResult(self.device()));
        }
    }

    fn connected_link(&self, handle: &ConnectionHandle) -> Result<&Link, TransportError> {
        self.links
            .get(&handle.link_id)
            .filter(|link| link.connected && link.central == *handle)
            .ok_or(TransportError::NotConnected)
    }

    fn request_id(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    /// Ends a link. `status` is what the central sees.
    fn sever(&mut self, link_id: u64, status: GattStatus, tell_peripheral: bool) {
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        if !link.connected {
            return;
        }
        link.connected = false;
        link.notifying.clear();
        let central = link.central.clone();
        let peripheral = link.peripheral.clone();

        self.pending.retain(|_, pending| match pending {
            Pending::Read { link_id: id, .. }
            | Pending::Write { link_id: id, .. }
            | Pending::DescriptorWrite { link_id: id, .. } => *id != link_id,
        });

        self.to_central(CentralTransportEvent::ConnectionStateChanged {
            handle: central,
            status,
            connected: false,
        });
        if tell_peripheral {
            self.to_peripheral(PeripheralTransportEvent::ConnectionStateChanged {
                handle: peripheral,
                connected: false,
            });
        }
    }
}

/// The shared medium. Clones share the same air.
#[derive(Clone)]
pub struct SimulatedAir {
    inner: Arc<Mutex<AirState>>,
}

impl SimulatedAir {
    /// Creates the air and the event queues for both roles
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<CentralTransportEvent>,
        mpsc::UnboundedReceiver<PeripheralTransportEvent>,
    ) {
        let (central_tx, central_rx) = mpsc::unbounded_channel();
        let (peripheral_tx, peripheral_rx) = mpsc::unbounded_channel();
        let state = AirState {
            central_tx,
            peripheral_tx,
            service: None,
            advertising: None,
            scan_filter: None,
            fail_next_advertise: None,
            next_link: 0,
            links: HashMap::new(),
            next_request: 0,
            pending: HashMap::new(),
        };
        let air = Self {
            inner: Arc::new(Mutex::new(state)),
        };
        (air, central_rx, peripheral_rx)
    }

    pub fn central(&self) -> SimCentral {
        SimCentral { air: self.clone() }
    }

    pub fn peripheral(&self) -> SimPeripheral {
        SimPeripheral { air: self.clone() }
    }

    /// The peripheral as a scan would report it
    pub fn peripheral_device(&self) -> DiscoveredDevice {
        self.lock().device()
    }

    pub fn is_advertising(&self) -> bool {
        self.lock().advertising.is_some()
    }

    pub fn connected_links(&self) -> usize {
        self.lock().links.values().filter(|l| l.connected).count()
    }

    /// Drops every live link, as if the devices moved out of range
    pub fn drop_links(&self) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.links.keys().copied().collect();
        for id in ids {
            state.sever(id, LINK_LOSS_STATUS, true);
        }
    }

    /// Makes the next advertise attempt fail with `reason`
    pub fn fail_next_advertise(&self, reason: AdvertiseFailure) {
        self.lock().fail_next_advertise = Some(reason);
    }

    fn lock(&self) -> MutexGuard<'_, AirState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Central side of the air
pub struct SimCentral {
    air: SimulatedAir,
}

impl CentralTransport for SimCentral {
    fn start_scan(&mut self, service_filter: Uuid) -> Result<(), TransportError> {
        let mut state = self.air.lock();
        if state.scan_filter.is_some() {
            return Err(TransportError::Busy);
        }
        state.scan_filter = Some(service_filter);
        state.announce();
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.air.lock().scan_filter = None;
    }

    fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, TransportError> {
        let mut state = self.air.lock();
        if device.address != PERIPHERAL_ADDRESS {
            return Err(TransportError::Rejected(format!(
                "unknown device {}",
                device.address
            )));
        }

        state.next_link += 1;
        let link_id = state.next_link;
        let central = ConnectionHandle::new(link_id, device.address.clone(), device.name.clone());
        let peripheral = ConnectionHandle::new(link_id, CENTRAL_ADDRESS, None);

        let reachable = state.service.is_some()
            && state.advertising.as_ref().is_some_and(|c| c.connectable);
        if reachable {
            state.links.insert(
                link_id,
                Link {
                    central: central.clone(),
                    peripheral: peripheral.clone(),
                    connected: true,
                    notifying: HashSet::new(),
                },
            );
            state.to_central(CentralTransportEvent::ConnectionStateChanged {
                handle: central.clone(),
                status: GattStatus::Success,
                connected: true,
            });
            state.to_peripheral(PeripheralTransportEvent::ConnectionStateChanged {
                handle: peripheral,
                connected: true,
            });
        } else {
            // Nobody answering: the stack gives up with its generic error
            state.to_central(CentralTransportEvent::ConnectionStateChanged {
                handle: central.clone(),
                status: GattStatus::GattError,
                connected: false,
            });
        }
        Ok(central)
    }

    fn disconnect(&mut self, handle: &ConnectionHandle) {
        self.air.lock().sever(handle.link_id, GattStatus::Success, true);
    }

    fn close(&mut self, handle: &ConnectionHandle) {
        let mut state = self.air.lock();
        // Closing without a disconnect drops the link silently for the central
        if let Some(link) = state.links.get(&handle.link_id) {
            if link.connected {
                let peripheral = link.peripheral.clone();
                state.to_peripheral(PeripheralTransportEvent::ConnectionStateChanged {
                    handle: peripheral,
                    connected: false,
                });
            }
        }
        state.links.remove(&handle.link_id);
    }

    fn discover_services(&mut self, handle: &ConnectionHandle) -> Result<(), TransportError> {
        let state = self.air.lock();
        state.connected_link(handle)?;
        let services: Vec<GattService> = state.service.iter().cloned().collect();
        state.to_central(CentralTransportEvent::ServicesDiscovered {
            handle: handle.clone(),
            status: GattStatus::Success,
            services,
        });
        Ok(())
    }

    fn read_characteristic(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let mut state = self.air.lock();
        let peripheral = state.connected_link(handle)?.peripheral.clone();
        let request_id = state.request_id();
        state.pending.insert(
            request_id,
            Pending::Read {
                link_id: handle.link_id,
                characteristic,
            },
        );
        state.to_peripheral(PeripheralTransportEvent::ReadRequest {
            handle: peripheral,
            request_id,
            characteristic,
            offset: 0,
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError> {
        let mut state = self.air.lock();
        let peripheral = state.connected_link(handle)?.peripheral.clone();
        let request_id = state.request_id();
        let response_needed = write_type == WriteType::WithResponse;
        if response_needed {
            state.pending.insert(
                request_id,
                Pending::Write {
                    link_id: handle.link_id,
                    characteristic,
                },
            );
        }
        state.to_peripheral(PeripheralTransportEvent::WriteRequest {
            handle: peripheral,
            request_id,
            characteristic,
            value: value.to_vec(),
            response_needed,
            prepared: false,
            offset: 0,
        });
        if !response_needed {
            state.to_central(CentralTransportEvent::CharacteristicWrite {
                handle: handle.clone(),
                characteristic,
                status: GattStatus::Success,
            });
        }
        Ok(())
    }

    fn set_notification(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> bool {
        let mut state = self.air.lock();
        match state.links.get_mut(&handle.link_id) {
            Some(link) if link.connected => {
                if enabled {
                    link.notifying.insert(characteristic);
                } else {
                    link.notifying.remove(&characteristic);
                }
                true
            }
            _ => false,
        }
    }

    fn write_descriptor(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.air.lock();
        let peripheral = state.connected_link(handle)?.peripheral.clone();
        let request_id = state.request_id();
        state.pending.insert(
            request_id,
            Pending::DescriptorWrite {
                link_id: handle.link_id,
                characteristic,
                descriptor,
                value: value.to_vec(),
            },
        );
        state.to_peripheral(PeripheralTransportEvent::DescriptorWriteRequest {
            handle: peripheral,
            request_id,
            characteristic,
            descriptor,
            value: value.to_vec(),
            response_needed: true,
        });
        Ok(())
    }
}

/// Peripheral side of the air
pub struct SimPeripheral {
    air: SimulatedAir,
}

impl PeripheralTransport for SimPeripheral {
    fn register_service(&mut self, service: &GattService) -> Result<(), TransportError> {
        let mut state = self.air.lock();
        if state.service.is_some() {
            return Err(TransportError::Rejected("service already registered".into()));
        }
        state.service = Some(service.clone());
        Ok(())
    }

    fn close_server(&mut self) {
        let mut state = self.air.lock();
        state.service = None;
        let ids: Vec<u64> = state.links.keys().copied().collect();
        for id in ids {
            state.sever(id, GattStatus::Success, false);
        }
    }

    fn start_advertising(&mut self, config: &AdvertiseConfig) -> Result<(), TransportError> {
        let mut state = self.air.lock();
        if let Some(reason) = state.fail_next_advertise.take() {
            state.to_peripheral(PeripheralTransportEvent::AdvertiseFailed(reason));
            return Ok(());
        }
        if state.advertising.is_some() {
            state.to_peripheral(PeripheralTransportEvent::AdvertiseFailed(
                AdvertiseFailure::AlreadyStarted,
            ));
            return Ok(());
        }

        state.advertising = Some(config.clone());
        state.to_peripheral(PeripheralTransportEvent::AdvertiseStarted);
        state.announce();
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.air.lock().advertising = None;
    }

    fn respond(
        &mut self,
        handle: &ConnectionHandle,
        request_id: u64,
        status: GattStatus,
        _offset: usize,
        value: Option<&[u8]>,
    ) {
        let mut state = self.air.lock();
        let Some(pending) = state.pending.remove(&request_id) else {
            warn!("response to unknown request {} from {}", request_id, handle);
            return;
        };

        let link_id = match &pending {
            Pending::Read { link_id, .. }
            | Pending::Write { link_id, .. }
            | Pending::DescriptorWrite { link_id, .. } => *link_id,
        };
        let Some(central) = state.links.get(&link_id).map(|l| l.central.clone()) else {
            return;
        };

        let event = match pending {
            Pending::Read { characteristic, .. } => CentralTransportEvent::CharacteristicRead {
                handle: central,
                characteristic,
                status,
                value: value.map(<[u8]>::to_vec).unwrap_or_default(),
            },
            Pending::Write { characteristic, .. } => CentralTransportEvent::CharacteristicWrite {
                handle: central,
                characteristic,
                status,
            },
            Pending::DescriptorWrite {
                characteristic,
                descriptor,
                value,
                ..
            } => CentralTransportEvent::DescriptorWrite {
                handle: central,
                characteristic,
                descriptor,
                status,
                value,
            },
        };
        state.to_central(event);
    }

    fn notify(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        value: &[u8],
        _confirm: bool,
    ) -> Result<(), TransportError> {
        let state = self.air.lock();
        let link = state
            .links
            .get(&handle.link_id)
            .filter(|link| link.connected && link.peripheral == *handle)
            .ok_or(TransportError::NotConnected)?;

        if link.notifying.contains(&characteristic) {
            state.to_central(CentralTransportEvent::CharacteristicChanged {
                handle: link.central.clone(),
                characteristic,
                value: value.to_vec(),
            });
        }
        state.to_peripheral(PeripheralTransportEvent::NotificationSent {
            handle: handle.clone(),
            status: GattStatus::Success,
        });
        Ok(())
    }
}
