//! Central-role transport on top of the platform Bluetooth stack
//!
//! bluest exposes async operations; the session wants commands that return
//! at once. Each command therefore spawns a task on the current tokio
//! runtime and reports its outcome as a `CentralTransportEvent`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::{CentralTransport, CentralTransportEvent};
use crate::core::bluetooth::types::{
    CharacteristicProperties, ConnectionHandle, DiscoveredDevice, GattCharacteristic,
    GattService, GattStatus, WriteType,
};

/// Reported when the platform scan cannot start
const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

type Characteristics = Arc<Mutex<HashMap<Uuid, Characteristic>>>;

struct Link {
    device: Device,
    /// Cancels the disconnect watcher and every notify stream of the link
    cancel_token: CancellationToken,
    characteristics: Characteristics,
    notifiers: HashMap<Uuid, CancellationToken>,
}

pub struct BluestCentral {
    adapter: Adapter,
    events: mpsc::UnboundedSender<CentralTransportEvent>,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    links: HashMap<u64, Link>,
    next_link: u64,
    scan_token: Option<CancellationToken>,
}

impl BluestCentral {
    pub fn new(adapter: Adapter) -> (Self, mpsc::UnboundedReceiver<CentralTransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let central = Self {
            adapter,
            events,
            devices: Arc::new(Mutex::new(HashMap::new())),
            links: HashMap::new(),
            next_link: 0,
            scan_token: None,
        };
        (central, receiver)
    }

    /// Opens the default adapter and waits until it is available
    pub async fn open() -> Result<(Self, mpsc::UnboundedReceiver<CentralTransportEvent>)> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("Bluetooth adapter not found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter available");
        Ok(Self::new(adapter))
    }

    fn emit(events: &mpsc::UnboundedSender<CentralTransportEvent>, event: CentralTransportEvent) {
        if events.send(event).is_err() {
            debug!("Central event queue closed, dropping transport event");
        }
    }

    fn link(&self, handle: &ConnectionHandle) -> Result<&Link, TransportError> {
        self.links
            .get(&handle.link_id)
            .ok_or(TransportError::NotConnected)
    }

    fn characteristic(
        &self,
        handle: &ConnectionHandle,
        uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        let link = self.link(handle)?;
        lock(&link.characteristics)
            .get(&uuid)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("unknown characteristic {}", uuid)))
    }

    fn describe_device(device: &Device, rssi: Option<i16>) -> DiscoveredDevice {
        let id = device.id().to_string();
        let name = device.name().ok();
        let address = extract_mac_address(&id).unwrap_or_else(|| id.clone());
        DiscoveredDevice::new(id, name, address, rssi)
    }

    async fn scan_task(
        adapter: Adapter,
        service_filter: Uuid,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        events: mpsc::UnboundedSender<CentralTransportEvent>,
        cancel_token: CancellationToken,
    ) {
        let filter = [service_filter];
        let mut scan_stream = match adapter.scan(&filter).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                Self::emit(
                    &events,
                    CentralTransportEvent::ScanFailed {
                        error_code: SCAN_FAILED_INTERNAL_ERROR,
                    },
                );
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => match result {
                    Some(discovered) => {
                        debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
                        let device = Self::describe_device(&discovered.device, discovered.rssi);
                        lock(&devices).insert(device.id.clone(), discovered.device);
                        Self::emit(&events, CentralTransportEvent::ScanResult(device));
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                },
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn discover(device: Device, characteristics: Characteristics) -> Result<Vec<GattService>> {
        let mut services = Vec::new();
        for service in device.discover_services().await? {
            let mut definition = GattService {
                uuid: service.uuid(),
                characteristics: Vec::new(),
            };
            for characteristic in service.discover_characteristics().await? {
                let props = characteristic.properties().await?;
                let mut gatt = GattCharacteristic::new(
                    characteristic.uuid(),
                    CharacteristicProperties {
                        read: props.read,
                        write: props.write,
                        write_without_response: props.write_without_response,
                        notify: props.notify,
                        indicate: props.indicate,
                    },
                );
                for descriptor in characteristic.discover_descriptors().await? {
                    gatt = gatt.with_descriptor(descriptor.uuid());
                }
                definition.characteristics.push(gatt);
                lock(&characteristics).insert(characteristic.uuid(), characteristic);
            }
            services.push(definition);
        }
        Ok(services)
    }

    /// Reports a link loss the app did not ask for
    fn watch_disconnect(
        adapter: Adapter,
        events: mpsc::UnboundedSender<CentralTransportEvent>,
        handle: ConnectionHandle,
        device: Device,
        cancel_token: CancellationToken,
    ) {
        tokio::spawn(async move {
            let mut connection_events = match adapter.device_connection_events(&device).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot watch connection of {}: {}", handle, e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    event = connection_events.next() => match event {
                        Some(ConnectionEvent::Disconnected) => {
                            info!("Link lost: {}", handle);
                            Self::emit(&events, CentralTransportEvent::ConnectionStateChanged {
                                handle,
                                status: GattStatus::Other(8),
                                connected: false,
                            });
                            break;
                        }
                        Some(ConnectionEvent::Connected) => {}
                        None => break,
                    },
                    _ = cancel_token.cancelled() => break,
                }
            }
        });
    }
}

impl CentralTransport for BluestCentral {
    fn start_scan(&mut self, service_filter: Uuid) -> Result<(), TransportError> {
        if self.scan_token.is_some() {
            return Err(TransportError::Busy);
        }
        let cancel_token = CancellationToken::new();
        self.scan_token = Some(cancel_token.clone());
        tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            service_filter,
            self.devices.clone(),
            self.events.clone(),
            cancel_token,
        ));
        info!("Device scan task started.");
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(token) = self.scan_token.take() {
            info!("Stopping Bluetooth scan.");
            token.cancel();
        }
    }

    fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, TransportError> {
        let platform_device = lock(&self.devices)
            .get(&device.id)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("unknown device {}", device.id)))?;

        self.next_link += 1;
        let handle = ConnectionHandle::new(self.next_link, device.address.clone(), device.name.clone());
        let cancel_token = CancellationToken::new();
        self.links.insert(
            handle.link_id,
            Link {
                device: platform_device.clone(),
                cancel_token: cancel_token.clone(),
                characteristics: Arc::new(Mutex::new(HashMap::new())),
                notifiers: HashMap::new(),
            },
        );

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = adapter.connect_device(&platform_device) => Some(result),
                _ = cancel_token.cancelled() => None,
            };
            match outcome {
                Some(Ok(())) => {
                    Self::emit(&events, CentralTransportEvent::ConnectionStateChanged {
                        handle: task_handle.clone(),
                        status: GattStatus::Success,
                        connected: true,
                    });
                    Self::watch_disconnect(adapter, events, task_handle, platform_device, cancel_token);
                }
                Some(Err(e)) => {
                    error!("Failed to connect to {}: {}", task_handle, e);
                    Self::emit(&events, CentralTransportEvent::ConnectionStateChanged {
                        handle: task_handle,
                        status: GattStatus::GattError,
                        connected: false,
                    });
                }
                None => debug!("Connect to {} abandoned", task_handle),
            }
        });

        Ok(handle)
    }

    fn disconnect(&mut self, handle: &ConnectionHandle) {
        let Some(link) = self.links.get(&handle.link_id) else {
            return;
        };
        link.cancel_token.cancel();
        let adapter = self.adapter.clone();
        let device = link.device.clone();
        let events = self.events.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.disconnect_device(&device).await {
                warn!("Disconnect from {} failed: {}", handle, e);
            }
            Self::emit(&events, CentralTransportEvent::ConnectionStateChanged {
                handle,
                status: GattStatus::Success,
                connected: false,
            });
        });
    }

    fn close(&mut self, handle: &ConnectionHandle) {
        if let Some(link) = self.links.remove(&handle.link_id) {
            link.cancel_token.cancel();
            for token in link.notifiers.values() {
                token.cancel();
            }
            debug!("Released link {}", handle);
        }
    }

    fn discover_services(&mut self, handle: &ConnectionHandle) -> Result<(), TransportError> {
        let link = self.link(handle)?;
        let device = link.device.clone();
        let characteristics = link.characteristics.clone();
        let events = self.events.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let event = match Self::discover(device, characteristics).await {
                Ok(services) => CentralTransportEvent::ServicesDiscovered {
                    handle,
                    status: GattStatus::Success,
                    services,
                },
                Err(e) => {
                    error!("Service discovery on {} failed: {}", handle, e);
                    CentralTransportEvent::ServicesDiscovered {
                        handle,
                        status: GattStatus::InternalError,
                        services: Vec::new(),
                    }
                }
            };
            Self::emit(&events, event);
        });
        Ok(())
    }

    fn read_characteristic(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let target = self.characteristic(handle, characteristic)?;
        let events = self.events.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let (status, value) = match target.read().await {
                Ok(value) => (GattStatus::Success, value),
                Err(e) => {
                    warn!("Read of {} failed: {}", characteristic, e);
                    (GattStatus::Failure, Vec::new())
                }
            };
            Self::emit(&events, CentralTransportEvent::CharacteristicRead {
                handle,
                characteristic,
                status,
                value,
            });
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
        let target = self.characteristic(handle, characteristic)?;
        let events = self.events.clone();
        let handle = handle.clone();
        let value = value.to_vec();
        tokio::spawn(async move {
            let result = match write_type {
                WriteType::WithResponse => target.write(&value).await,
                WriteType::WithoutResponse => target.write_without_response(&value).await,
            };
            let status = match result {
                Ok(()) => GattStatus::Success,
                Err(e) => {
                    warn!("Write of {} failed: {}", characteristic, e);
                    GattStatus::Failure
                }
            };
            Self::emit(&events, CentralTransportEvent::CharacteristicWrite {
                handle,
                characteristic,
                status,
            });
        });
        Ok(())
    }

    fn set_notification(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> bool {
        let Ok(target) = self.characteristic(handle, characteristic) else {
            return false;
        };
        let Some(link) = self.links.get_mut(&handle.link_id) else {
            return false;
        };
        if let Some(previous) = link.notifiers.remove(&characteristic) {
            previous.cancel();
        }
        if !enabled {
            return true;
        }

        let cancel_token = link.cancel_token.child_token();
        link.notifiers.insert(characteristic, cancel_token.clone());
        let events = self.events.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let stream = match target.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", characteristic, e);
                    return;
                }
            };
            let mut stream = std::pin::pin!(stream);
            loop {
                tokio::select! {
                    item = stream.next() => match item {
                        Some(Ok(value)) => Self::emit(&events, CentralTransportEvent::CharacteristicChanged {
                            handle: handle.clone(),
                            characteristic,
                            value,
                        }),
                        Some(Err(e)) => {
                            warn!("Notification stream of {} failed: {}", characteristic, e);
                            break;
                        }
                        None => break,
                    },
                    _ = cancel_token.cancelled() => break,
                }
            }
        });
        true
    }

    /// The platform writes the CCC itself when a notify stream opens, so the
    /// write completes as soon as the stream is in place.
    fn write_descriptor(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.characteristic(handle, characteristic)?;
        Self::emit(&self.events, CentralTransportEvent::DescriptorWrite {
            handle: handle.clone(),
            characteristic,
            descriptor,
            status: GattStatus::Success,
            value: value.to_vec(),
        });
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pulls the last MAC-looking token out of a platform device id
fn extract_mac_address(device_id_str: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().to_uppercase())
}
