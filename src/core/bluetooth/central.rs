//! Central (client) session
//!
//! Drives one link at a time through
//! `Disconnected → Scanning → Connecting → ConnectedDiscovering →
//! ConnectedSubscribing → Connected`. Transport callbacks arrive through
//! [`CentralSession::handle_event`]; each handler issues at most the next
//! transport command and never waits for its outcome.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::commands::CentralCommand;
use crate::config::central_config::CentralConfig;
use crate::core::bluetooth::connection::ReconnectTracker;
use crate::core::bluetooth::constants::{DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE};
use crate::core::bluetooth::error::{SessionError, TransportError};
use crate::core::bluetooth::manager::Session;
use crate::core::bluetooth::radio::RadioState;
use crate::core::bluetooth::transport::{CentralTransport, CentralTransportEvent};
use crate::core::bluetooth::types::{
    BLEPROOF_SERVICE, CharacteristicRefs, ConnectionHandle, DiscoveredDevice, GattCharacteristic,
    GattService, GattStatus, ServiceDescriptor, WriteType, display_value,
};
use crate::logging::LogSink;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of the central link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CentralState {
    Disconnected,
    Scanning,
    Connecting,
    ConnectedDiscovering,
    ConnectedSubscribing,
    Connected,
}

impl CentralState {
    pub fn name(&self) -> &'static str {
        match self {
            CentralState::Disconnected => "Disconnected",
            CentralState::Scanning => "Scanning",
            CentralState::Connecting => "Connecting",
            CentralState::ConnectedDiscovering => "ConnectedDiscovering",
            CentralState::ConnectedSubscribing => "ConnectedSubscribing",
            CentralState::Connected => "Connected",
        }
    }

    /// The edges of the lifecycle graph. `Disconnected → Connecting` is only
    /// taken when connecting to a known device without scanning.
    pub fn can_transition_to(&self, next: CentralState) -> bool {
        use CentralState::*;
        matches!(
            (self, next),
            (Disconnected, Scanning)
                | (Disconnected, Connecting)
                | (Scanning, Connecting)
                | (Scanning, Disconnected)
                | (Connecting, ConnectedDiscovering)
                | (Connecting, Disconnected)
                | (ConnectedDiscovering, ConnectedSubscribing)
                | (ConnectedDiscovering, Connected)
                | (ConnectedDiscovering, Disconnected)
                | (ConnectedSubscribing, Connected)
                | (ConnectedSubscribing, Disconnected)
                | (Connected, Disconnected)
        )
    }

    /// True once the link is up, discovery included
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            CentralState::ConnectedDiscovering
                | CentralState::ConnectedSubscribing
                | CentralState::Connected
        )
    }
}

impl fmt::Display for CentralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observable changes published to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum CentralUpdate {
    StateChanged { from: CentralState, to: CentralState },
    ReadValue(Vec<u8>),
    IndicateValue(Vec<u8>),
    Subscription(bool),
    Failure(SessionError),
}

#[derive(Debug, Clone, PartialEq)]
enum ConnectTarget {
    /// Scan for any device advertising the service
    Scan,
    /// Connect straight to a known device
    Direct(DiscoveredDevice),
}

pub struct CentralSession<T: CentralTransport> {
    transport: T,
    config: CentralConfig,
    descriptor: ServiceDescriptor,
    log: LogSink,
    updates: broadcast::Sender<CentralUpdate>,

    state: CentralState,
    radio: RadioState,
    wants_connection: bool,
    target: ConnectTarget,
    is_scanning: bool,
    link: Option<ConnectionHandle>,
    characteristics: CharacteristicRefs,
    subscribed: bool,
    last_read_value: Option<Vec<u8>>,
    last_indicate_value: Option<Vec<u8>>,

    reconnect: ReconnectTracker,
    restart_at: Option<Instant>,
    deadline: Option<Instant>,
    /// Set while an attempt is being started; a refusal seen then must not
    /// start another attempt on the same stack
    attempting: bool,
}

impl<T: CentralTransport> CentralSession<T> {
    pub fn new(transport: T, config: CentralConfig, log: LogSink, radio: RadioState) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let reconnect = ReconnectTracker::new(config.reconnect.clone());
        Self {
            transport,
            config,
            descriptor: BLEPROOF_SERVICE,
            log,
            updates,
            state: CentralState::Disconnected,
            radio,
            wants_connection: false,
            target: ConnectTarget::Scan,
            is_scanning: false,
            link: None,
            characteristics: CharacteristicRefs::default(),
            subscribed: false,
            last_read_value: None,
            last_indicate_value: None,
            reconnect,
            restart_at: None,
            deadline: None,
            attempting: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CentralUpdate> {
        self.updates.subscribe()
    }

    /// Sender side of the update channel, for handles that subscribe later
    pub fn update_sender(&self) -> broadcast::Sender<CentralUpdate> {
        self.updates.clone()
    }

    pub fn state(&self) -> CentralState {
        self.state
    }

    /// Text for the status label
    pub fn status_label(&self) -> String {
        if self.state == CentralState::Disconnected && !self.radio.is_usable() {
            format!("State: BluetoothNotReady ({})", self.radio)
        } else {
            format!("State: {}", self.state)
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    pub fn wants_connection(&self) -> bool {
        self.wants_connection
    }

    pub fn link(&self) -> Option<&ConnectionHandle> {
        self.link.as_ref()
    }

    pub fn characteristics(&self) -> &CharacteristicRefs {
        &self.characteristics
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn last_read_value(&self) -> Option<&[u8]> {
        self.last_read_value.as_deref()
    }

    pub fn last_indicate_value(&self) -> Option<&[u8]> {
        self.last_indicate_value.as_deref()
    }

    pub fn pending_restart(&self) -> Option<Instant> {
        self.restart_at
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ------------------------------------------------------------------
    // Consumer operations
    // ------------------------------------------------------------------

    /// The connect toggle: scan for the service and stay connected while on
    pub fn set_enabled(&mut self, enabled: bool) {
        self.wants_connection = enabled;
        self.target = ConnectTarget::Scan;
        self.restart_at = None;
        self.reconnect.reset();
        self.restart_lifecycle();
    }

    /// Connects to a known device without scanning, reconnecting after a
    /// fixed delay whenever the link drops
    pub fn connect_to(&mut self, device: DiscoveredDevice) {
        self.wants_connection = true;
        self.target = ConnectTarget::Direct(device);
        self.restart_at = None;
        self.reconnect.reset();
        self.restart_lifecycle();
    }

    pub fn read(&mut self) -> Result<(), SessionError> {
        let result = self.try_read();
        if let Err(e) = &result {
            self.log.error(format!("read failed, {}", e));
        }
        result
    }

    pub fn write(&mut self, value: &[u8]) -> Result<(), SessionError> {
        let result = self.try_write(value);
        if let Err(e) = &result {
            self.log.error(format!("write failed, {}", e));
        }
        result
    }

    /// Subscribes to or unsubscribes from indications on a connected link
    pub fn set_indications(&mut self, enabled: bool) -> Result<(), SessionError> {
        let result = self.try_set_indications(enabled);
        if let Err(e) = &result {
            self.log.error(format!("subscription change failed, {}", e));
        }
        result
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    /// Ends the lifecycle for good, as when the host goes away
    pub fn shutdown(&mut self) {
        self.wants_connection = false;
        self.end_lifecycle();
    }

    fn connected_link(&self) -> Result<ConnectionHandle, SessionError> {
        match &self.link {
            Some(handle) if self.state.is_connected() => Ok(handle.clone()),
            _ => Err(SessionError::NotConnected),
        }
    }

    fn try_read(&mut self) -> Result<(), SessionError> {
        let handle = self.connected_link()?;
        let characteristic = self
            .characteristics
            .read
            .as_ref()
            .ok_or(SessionError::CharacteristicUnavailable(self.descriptor.read))?;
        if !characteristic.properties.read {
            return Err(SessionError::OperationNotPermitted {
                uuid: characteristic.uuid,
                property: "readable",
            });
        }
        let uuid = characteristic.uuid;
        self.transport
            .read_characteristic(&handle, uuid)
            .map_err(|source| SessionError::Transport {
                operation: "readCharacteristic",
                source,
            })
    }

    fn try_write(&mut self, value: &[u8]) -> Result<(), SessionError> {
        let handle = self.connected_link()?;
        let characteristic = self
            .characteristics
            .write
            .as_ref()
            .ok_or(SessionError::CharacteristicUnavailable(self.descriptor.write))?;
        if !characteristic.properties.write {
            return Err(SessionError::OperationNotPermitted {
                uuid: characteristic.uuid,
                property: "writeable",
            });
        }
        let uuid = characteristic.uuid;
        self.transport
            .write_characteristic(&handle, uuid, value, WriteType::WithResponse)
            .map_err(|source| SessionError::Transport {
                operation: "writeCharacteristic",
                source,
            })
    }

    fn try_set_indications(&mut self, enabled: bool) -> Result<(), SessionError> {
        let handle = self.connected_link()?;
        let characteristic = self
            .characteristics
            .indicate
            .clone()
            .ok_or(SessionError::CharacteristicUnavailable(self.descriptor.indicate))?;
        if enabled && !characteristic.properties.indicate {
            return Err(SessionError::OperationNotPermitted {
                uuid: characteristic.uuid,
                property: "indicatable",
            });
        }
        self.write_subscription(&handle, &characteristic, enabled)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    fn transition(&mut self, to: CentralState) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            self.log
                .error(format!("illegal transition {} -> {} ignored", from, to));
            return;
        }

        self.state = to;
        self.log.info(format!("status = {}", to));

        let timeout = match to {
            CentralState::Connecting => Some(self.config.connect_timeout()),
            CentralState::ConnectedDiscovering => Some(self.config.discovery_timeout()),
            CentralState::ConnectedSubscribing => Some(self.config.subscribe_timeout()),
            _ => None,
        };
        self.deadline = timeout.map(|t| Instant::now() + t);

        if to == CentralState::Connected {
            self.reconnect.reset();
        } else {
            self.set_subscribed(false);
        }

        self.emit(CentralUpdate::StateChanged { from, to });
    }

    fn restart_lifecycle(&mut self) {
        if !self.wants_connection {
            self.end_lifecycle();
            return;
        }
        match self.link.clone() {
            None => self.begin_attempt(),
            // The disconnect callback restarts the attempt
            Some(handle) => {
                self.log.info(format!("Disconnecting from {}", handle));
                self.transport.disconnect(&handle);
            }
        }
    }

    fn begin_attempt(&mut self) {
        self.restart_at = None;
        if !self.radio.is_usable() {
            self.report(SessionError::RadioUnavailable(self.radio));
            return;
        }
        self.log.info("Bluetooth ON, ready");

        self.attempting = true;
        match self.target.clone() {
            ConnectTarget::Scan => self.safe_start_scan(),
            ConnectTarget::Direct(device) => self.connect_device(device),
        }
        self.attempting = false;
    }

    fn end_lifecycle(&mut self) {
        self.safe_stop_scan();
        if let Some(handle) = self.link.take() {
            self.transport.disconnect(&handle);
            self.transport.close(&handle);
        }
        self.characteristics = CharacteristicRefs::default();
        self.restart_at = None;
        self.deadline = None;
        self.transition(CentralState::Disconnected);
    }

    fn safe_start_scan(&mut self) {
        if self.is_scanning {
            self.log.info("Already scanning");
            return;
        }

        let filter = self.descriptor.service;
        self.log
            .info(format!("Starting BLE scan, filter: {}", filter));
        match self.transport.start_scan(filter) {
            Ok(()) => {
                self.is_scanning = true;
                self.transition(CentralState::Scanning);
            }
            Err(source) => {
                self.report(SessionError::Transport {
                    operation: "startScan",
                    source,
                });
                self.schedule_restart();
            }
        }
    }

    fn safe_stop_scan(&mut self) {
        if !self.is_scanning {
            self.log.info("Already stopped");
            return;
        }

        self.log.info("Stopping BLE scan");
        self.is_scanning = false;
        self.transport.stop_scan();
    }

    fn connect_device(&mut self, device: DiscoveredDevice) {
        self.log.info(format!(
            "Connecting to {} ({})",
            device.name.as_deref().unwrap_or("<no name>"),
            device.address
        ));
        match self.transport.connect(&device) {
            Ok(handle) => {
                self.link = Some(handle);
                self.transition(CentralState::Connecting);
            }
            Err(source) => {
                self.report(SessionError::Transport {
                    operation: "connect",
                    source,
                });
                self.transition(CentralState::Disconnected);
                self.schedule_restart();
            }
        }
    }

    /// Queues the next attempt after a failure, honouring the backoff policy
    fn schedule_restart(&mut self) {
        if !self.wants_connection || !self.radio.is_usable() {
            return;
        }

        let delay = match &self.target {
            ConnectTarget::Direct(_) => Some(self.config.direct_reconnect_delay()),
            ConnectTarget::Scan => self.reconnect.record_failure(),
        };

        match delay {
            None => {
                self.log.error(format!(
                    "giving up after {} consecutive failures, toggle to retry",
                    self.reconnect.failures()
                ));
            }
            Some(delay) if delay.is_zero() && !self.attempting => self.begin_attempt(),
            Some(delay) => {
                self.log
                    .info(format!("Will try reconnect in {} ms", delay.as_millis()));
                self.restart_at = Some(Instant::now() + delay);
            }
        }
    }

    /// Drops the current link locally, without waiting for any callback
    fn abandon_link(&mut self) {
        if let Some(handle) = self.link.take() {
            self.transport.disconnect(&handle);
            self.transport.close(&handle);
        }
        self.characteristics = CharacteristicRefs::default();
        self.transition(CentralState::Disconnected);
        self.schedule_restart();
    }

    fn is_current(&self, handle: &ConnectionHandle) -> bool {
        self.link.as_ref() == Some(handle)
    }

    fn set_subscribed(&mut self, subscribed: bool) {
        if self.subscribed != subscribed {
            self.subscribed = subscribed;
            self.emit(CentralUpdate::Subscription(subscribed));
        }
    }

    fn write_subscription(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: &GattCharacteristic,
        enabled: bool,
    ) -> Result<(), SessionError> {
        let ccc = self.descriptor.ccc;
        if !characteristic.has_descriptor(ccc) {
            return Err(SessionError::CharacteristicUnavailable(ccc));
        }
        if !self
            .transport
            .set_notification(handle, characteristic.uuid, enabled)
        {
            return Err(SessionError::Transport {
                operation: "setNotification",
                source: TransportError::Rejected(format!(
                    "setNotification({}) for {}",
                    enabled, characteristic.uuid
                )),
            });
        }

        let value = if enabled {
            ENABLE_INDICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        };
        self.transport
            .write_descriptor(handle, characteristic.uuid, ccc, &value)
            .map_err(|source| SessionError::Transport {
                operation: "writeDescriptor",
                source,
            })
    }

    fn emit(&self, update: CentralUpdate) {
        let _ = self.updates.send(update);
    }

    fn report(&self, error: SessionError) {
        self.log.error(error.to_string());
        self.emit(CentralUpdate::Failure(error));
    }

    // ------------------------------------------------------------------
    // Radio and timers
    // ------------------------------------------------------------------

    pub fn on_radio_state(&mut self, radio: RadioState) {
        let previous = self.radio;
        self.radio = radio;
        if previous == radio {
            return;
        }
        self.log.info(format!("onReceive: {}", radio));

        if radio.is_usable() {
            if self.wants_connection
                && self.state == CentralState::Disconnected
                && self.link.is_none()
            {
                self.reconnect.reset();
                self.begin_attempt();
            }
        } else if self.state != CentralState::Disconnected
            || self.is_scanning
            || self.link.is_some()
            || self.restart_at.is_some()
        {
            self.end_lifecycle();
        }
    }

    pub fn next_timer(&self) -> Option<Instant> {
        match (self.deadline, self.restart_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn handle_timer(&mut self, now: Instant) {
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.deadline = None;
            self.report(SessionError::Timeout(self.state.name()));
            self.abandon_link();
        }

        if self.restart_at.is_some_and(|at| now >= at) {
            self.restart_at = None;
            if self.wants_connection
                && self.state == CentralState::Disconnected
                && self.link.is_none()
            {
                self.begin_attempt();
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport callbacks
    // ------------------------------------------------------------------

    pub fn handle_event(&mut self, event: CentralTransportEvent) {
        match event {
            CentralTransportEvent::ScanResult(device) => self.on_scan_result(device),
            CentralTransportEvent::BatchScanResults(_) => {
                self.log.info("onBatchScanResults, ignoring");
            }
            CentralTransportEvent::ScanFailed { error_code } => self.on_scan_failed(error_code),
            CentralTransportEvent::ConnectionStateChanged {
                handle,
                status,
                connected,
            } => self.on_connection_state_change(handle, status, connected),
            CentralTransportEvent::ServicesDiscovered {
                handle,
                status,
                services,
            } => self.on_services_discovered(handle, status, services),
            CentralTransportEvent::CharacteristicRead {
                handle,
                characteristic,
                status,
                value,
            } => self.on_characteristic_read(handle, characteristic, status, value),
            CentralTransportEvent::CharacteristicWrite {
                handle,
                characteristic,
                status,
            } => self.on_characteristic_write(handle, characteristic, status),
            CentralTransportEvent::CharacteristicChanged {
                handle,
                characteristic,
                value,
            } => self.on_characteristic_changed(handle, characteristic, value),
            CentralTransportEvent::DescriptorWrite {
                handle,
                characteristic,
                descriptor,
                status,
                value,
            } => self.on_descriptor_write(handle, characteristic, descriptor, status, value),
        }
    }

    fn on_scan_result(&mut self, device: DiscoveredDevice) {
        // Single shot: anything after the first match is ignored
        if !self.is_scanning || self.state != CentralState::Scanning {
            self.log
                .debug(format!("ignoring scan result {}, not scanning", device.address));
            return;
        }

        self.log.info(format!(
            "onScanResult name={} address={}",
            device.name.as_deref().unwrap_or("null"),
            device.address
        ));
        self.safe_stop_scan();
        self.connect_device(device);
    }

    fn on_scan_failed(&mut self, error_code: i32) {
        if !self.is_scanning {
            self.log
                .debug(format!("ignoring scan failure {}, not scanning", error_code));
            return;
        }
        self.report(SessionError::ScanFailure(error_code));
        self.safe_stop_scan();
        self.transition(CentralState::Disconnected);
        self.schedule_restart();
    }

    fn on_connection_state_change(
        &mut self,
        handle: ConnectionHandle,
        status: GattStatus,
        connected: bool,
    ) {
        if !self.is_current(&handle) {
            self.log
                .debug(format!("ignoring connection state of stale link {}", handle));
            return;
        }

        if status.is_success() && connected {
            self.log.info(format!("Connected to {}", handle.address));
            if self.state != CentralState::Connecting {
                self.log.warn(format!(
                    "connected callback in state {}, ignoring",
                    self.state
                ));
                return;
            }
            self.transition(CentralState::ConnectedDiscovering);
            if let Err(source) = self.transport.discover_services(&handle) {
                self.report(SessionError::Transport {
                    operation: "discoverServices",
                    source,
                });
                self.transport.disconnect(&handle);
            }
            return;
        }

        if status.is_success() {
            self.log.info(format!("Disconnected from {}", handle.address));
        } else {
            self.report(SessionError::ConnectFailure {
                address: handle.address.clone(),
                status,
            });
        }
        self.link = None;
        self.characteristics = CharacteristicRefs::default();
        self.transport.close(&handle);
        self.transition(CentralState::Disconnected);
        self.schedule_restart();
    }

    fn on_services_discovered(
        &mut self,
        handle: ConnectionHandle,
        status: GattStatus,
        services: Vec<GattService>,
    ) {
        if !self.is_current(&handle) || self.state != CentralState::ConnectedDiscovering {
            self.log
                .debug(format!("ignoring discovery result of {} in state {}", handle, self.state));
            return;
        }

        self.log.info(format!(
            "onServicesDiscovered services.count={} status={}",
            services.len(),
            status.code()
        ));

        if status == GattStatus::InternalError {
            // Rare; the disconnect callback restarts the attempt
            self.report(SessionError::DiscoveryInternalError);
            self.log.info("disconnecting");
            self.transport.disconnect(&handle);
            return;
        }

        self.log.info(service_table(&services));

        let service_uuid = self.descriptor.service;
        let Some(service) = services.iter().find(|s| s.uuid == service_uuid) else {
            self.report(SessionError::ServiceNotFound(service_uuid));
            self.log.info("disconnecting");
            self.transport.disconnect(&handle);
            return;
        };

        self.characteristics = CharacteristicRefs::resolve(service, &self.descriptor);

        match self.characteristics.indicate.clone() {
            Some(indicate) => {
                self.transition(CentralState::ConnectedSubscribing);
                if let Err(e) = self.write_subscription(&handle, &indicate, true) {
                    self.report(e);
                    self.transition(CentralState::Connected);
                }
            }
            None => {
                self.log.warn(format!(
                    "characteristic not found {}",
                    self.descriptor.indicate
                ));
                self.transition(CentralState::Connected);
            }
        }
    }

    fn on_characteristic_read(
        &mut self,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    ) {
        if !self.is_current(&handle) {
            return;
        }
        if characteristic != self.descriptor.read {
            self.log
                .info(format!("onCharacteristicRead unknown uuid {}", characteristic));
            return;
        }

        if status.is_success() {
            self.log.info(format!(
                "onCharacteristicRead OK, value=\"{}\"",
                display_value(&value)
            ));
            self.last_read_value = Some(value.clone());
            self.emit(CentralUpdate::ReadValue(value));
        } else {
            self.report(SessionError::RemoteStatusError {
                operation: "onCharacteristicRead",
                uuid: characteristic,
                status,
            });
        }
    }

    fn on_characteristic_write(
        &mut self,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
    ) {
        if !self.is_current(&handle) {
            return;
        }
        if characteristic != self.descriptor.write {
            self.log
                .info(format!("onCharacteristicWrite unknown uuid {}", characteristic));
            return;
        }

        if status.is_success() {
            self.log.info("onCharacteristicWrite OK");
        } else {
            self.report(SessionError::RemoteStatusError {
                operation: "onCharacteristicWrite",
                uuid: characteristic,
                status,
            });
        }
    }

    fn on_characteristic_changed(
        &mut self,
        handle: ConnectionHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    ) {
        if !self.is_current(&handle) {
            return;
        }
        if characteristic != self.descriptor.indicate {
            self.log
                .info(format!("onCharacteristicChanged unknown uuid {}", characteristic));
            return;
        }

        self.log.info(format!(
            "onCharacteristicChanged value=\"{}\"",
            display_value(&value)
        ));
        self.last_indicate_value = Some(value.clone());
        self.emit(CentralUpdate::IndicateValue(value));
    }

    fn on_descriptor_write(
        &mut self,
        handle: ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    ) {
        if !self.is_current(&handle) {
            return;
        }
        if characteristic != self.descriptor.indicate {
            self.log
                .info(format!("onDescriptorWrite unknown uuid {}", characteristic));
            return;
        }

        if status.is_success() {
            let subscribed = value.first().is_some_and(|b| *b != 0);
            self.log.info(format!(
                "onDescriptorWrite {}",
                if subscribed { "subscribed" } else { "not subscribed" }
            ));
            self.set_subscribed(subscribed);
        } else {
            self.report(SessionError::RemoteStatusError {
                operation: "onDescriptorWrite",
                uuid: descriptor,
                status,
            });
        }

        // Subscription processed either way; the link is ready for use
        if self.state == CentralState::ConnectedSubscribing {
            self.transition(CentralState::Connected);
        }
    }
}

fn service_table(services: &[GattService]) -> String {
    let mut table = String::new();
    for service in services {
        table.push_str(&format!("\nService\n{}\nCharacteristics:", service.uuid));
        for characteristic in &service.characteristics {
            table.push_str(&format!("\n    {}", characteristic.uuid));
        }
    }
    table
}

impl<T: CentralTransport> Session for CentralSession<T> {
    type Event = CentralTransportEvent;
    type Command = CentralCommand;

    fn handle_event(&mut self, event: Self::Event) {
        CentralSession::handle_event(self, event);
    }

    fn handle_command(&mut self, command: Self::Command) {
        match command {
            CentralCommand::SetEnabled(enabled) => self.set_enabled(enabled),
            CentralCommand::ConnectTo(device) => self.connect_to(device),
            CentralCommand::Read { responder } => {
                let _ = responder.send(self.read());
            }
            CentralCommand::Write { value, responder } => {
                let _ = responder.send(self.write(&value));
            }
            CentralCommand::SetIndications { enabled, responder } => {
                let _ = responder.send(self.set_indications(enabled));
            }
            CentralCommand::ClearLog => self.clear_log(),
        }
    }

    fn on_radio_state(&mut self, state: RadioState) {
        CentralSession::on_radio_state(self, state);
    }

    fn next_timer(&self) -> Option<Instant> {
        CentralSession::next_timer(self)
    }

    fn handle_timer(&mut self, now: Instant) {
        CentralSession::handle_timer(self, now);
    }

    fn shutdown(&mut self) {
        CentralSession::shutdown(self);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::bluetooth::constants::{
        MIN_RECONNECT_DELAY_MS, UUID_CCC_DESCRIPTOR, UUID_CHAR_FOR_INDICATE, UUID_CHAR_FOR_READ,
        UUID_CHAR_FOR_WRITE, UUID_SERVICE,
    };
    use crate::core::bluetooth::mock::{Call, MockTransport};
    use crate::core::bluetooth::types::CharacteristicProperties;

    fn session(radio: RadioState) -> CentralSession<MockTransport> {
        CentralSession::new(
            MockTransport::new(),
            CentralConfig::default(),
            LogSink::new(),
            radio,
        )
    }

    fn peripheral() -> DiscoveredDevice {
        DiscoveredDevice::new(
            "dev-1".into(),
            Some("BLEProof".into()),
            "AA:BB:CC:DD:EE:01".into(),
            Some(-60),
        )
    }

    fn full_service() -> GattService {
        BLEPROOF_SERVICE.definition()
    }

    fn drain(rx: &mut broadcast::Receiver<CentralUpdate>) -> Vec<CentralUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    fn states(updates: &[CentralUpdate]) -> Vec<CentralState> {
        updates
            .iter()
            .filter_map(|u| match u {
                CentralUpdate::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    fn assert_legal(updates: &[CentralUpdate]) {
        for update in updates {
            if let CentralUpdate::StateChanged { from, to } = update {
                assert!(from.can_transition_to(*to), "illegal edge {from} -> {to}");
            }
        }
    }

    /// Brings a session up to `ConnectedDiscovering` and returns the link
    fn connect(session: &mut CentralSession<MockTransport>) -> ConnectionHandle {
        session.set_enabled(true);
        session.handle_event(CentralTransportEvent::ScanResult(peripheral()));
        let handle = session.link().cloned().unwrap();
        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle: handle.clone(),
            status: GattStatus::Success,
            connected: true,
        });
        handle
    }

    fn discovered(handle: &ConnectionHandle, services: Vec<GattService>) -> CentralTransportEvent {
        CentralTransportEvent::ServicesDiscovered {
            handle: handle.clone(),
            status: GattStatus::Success,
            services,
        }
    }

    fn subscribed(handle: &ConnectionHandle, status: GattStatus) -> CentralTransportEvent {
        CentralTransportEvent::DescriptorWrite {
            handle: handle.clone(),
            characteristic: UUID_CHAR_FOR_INDICATE,
            descriptor: UUID_CCC_DESCRIPTOR,
            status,
            value: ENABLE_INDICATION_VALUE.to_vec(),
        }
    }

    #[test]
    fn test_start_scans_for_service() {
        let mut session = session(RadioState::On);
        session.set_enabled(true);

        assert_eq!(session.state(), CentralState::Scanning);
        assert!(session.is_scanning());
        assert_eq!(session.transport().calls, vec![Call::StartScan(UUID_SERVICE)]);
    }

    #[test]
    fn test_start_refused_while_radio_off() {
        let mut session = session(RadioState::Off);
        let mut rx = session.subscribe();
        session.set_enabled(true);

        assert_eq!(session.state(), CentralState::Disconnected);
        assert!(session.transport().calls.is_empty());
        assert!(session.status_label().contains("BluetoothNotReady"));
        assert!(drain(&mut rx).contains(&CentralUpdate::Failure(
            SessionError::RadioUnavailable(RadioState::Off)
        )));
    }

    #[test]
    fn test_scan_match_connects_then_discovers() {
        let mut session = session(RadioState::On);
        session.set_enabled(true);
        session.handle_event(CentralTransportEvent::ScanResult(peripheral()));

        assert_eq!(session.state(), CentralState::Connecting);
        assert!(!session.is_scanning());
        let handle = session.link().cloned().unwrap();

        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle: handle.clone(),
            status: GattStatus::Success,
            connected: true,
        });
        assert_eq!(session.state(), CentralState::ConnectedDiscovering);
        assert_eq!(
            session.transport().calls,
            vec![
                Call::StartScan(UUID_SERVICE),
                Call::StopScan,
                Call::Connect(peripheral().address),
                Call::DiscoverServices(handle),
            ]
        );
    }

    #[test]
    fn test_only_first_scan_match_is_used() {
        let mut session = session(RadioState::On);
        session.set_enabled(true);
        session.handle_event(CentralTransportEvent::ScanResult(peripheral()));
        session.handle_event(CentralTransportEvent::ScanResult(peripheral()));

        assert_eq!(
            session.transport().count(|c| matches!(c, Call::Connect(_))),
            1
        );
        assert_eq!(session.state(), CentralState::Connecting);
    }

    #[test]
    fn test_missing_indicate_skips_subscribing() {
        let mut session = session(RadioState::On);
        let mut rx = session.subscribe();
        let handle = connect(&mut session);

        let mut service = full_service();
        service.characteristics.retain(|c| c.uuid != UUID_CHAR_FOR_INDICATE);
        session.handle_event(discovered(&handle, vec![service]));

        assert_eq!(session.state(), CentralState::Connected);
        let updates = drain(&mut rx);
        assert_legal(&updates);
        assert!(!states(&updates).contains(&CentralState::ConnectedSubscribing));
        assert!(session.characteristics().read.is_some());
        assert!(session.characteristics().indicate.is_none());
        assert!(session.log.contains("WARN: characteristic not found"));
    }

    #[test]
    fn test_full_lifecycle_subscribes() {
        let mut session = session(RadioState::On);
        let mut rx = session.subscribe();
        let handle = connect(&mut session);

        session.handle_event(discovered(&handle, vec![full_service()]));
        assert_eq!(session.state(), CentralState::ConnectedSubscribing);
        assert!(session.transport().calls.contains(&Call::SetNotification(
            handle.clone(),
            UUID_CHAR_FOR_INDICATE,
            true
        )));
        assert!(session.transport().calls.contains(&Call::WriteDescriptor(
            handle.clone(),
            UUID_CHAR_FOR_INDICATE,
            UUID_CCC_DESCRIPTOR,
            ENABLE_INDICATION_VALUE.to_vec()
        )));

        session.handle_event(subscribed(&handle, GattStatus::Success));
        assert_eq!(session.state(), CentralState::Connected);
        assert!(session.is_subscribed());

        let updates = drain(&mut rx);
        assert_legal(&updates);
        assert_eq!(
            states(&updates),
            vec![
                CentralState::Scanning,
                CentralState::Connecting,
                CentralState::ConnectedDiscovering,
                CentralState::ConnectedSubscribing,
                CentralState::Connected,
            ]
        );
    }

    #[test]
    fn test_failed_subscription_still_connects() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![full_service()]));
        session.handle_event(subscribed(&handle, GattStatus::Failure));

        assert_eq!(session.state(), CentralState::Connected);
        assert!(!session.is_subscribed());
        assert!(session.log.contains("ERROR: onDescriptorWrite failed"));
    }

    #[test]
    fn test_missing_ccc_descriptor_does_not_hang() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);

        let mut service = full_service();
        for c in &mut service.characteristics {
            c.descriptors.clear();
        }
        session.handle_event(discovered(&handle, vec![service]));

        assert_eq!(session.state(), CentralState::Connected);
        assert!(!session.is_subscribed());
    }

    #[test]
    fn test_refused_notification_does_not_hang() {
        let mut session = session(RadioState::On);
        session.transport_mut().refuse_notification = true;
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![full_service()]));

        assert_eq!(session.state(), CentralState::Connected);
        assert_eq!(
            session
                .transport()
                .count(|c| matches!(c, Call::WriteDescriptor(..))),
            0
        );
    }

    #[test]
    fn test_service_absent_disconnects() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![]));

        assert_eq!(
            session.transport().calls.last(),
            Some(&Call::Disconnect(handle))
        );
        // Waits for the disconnect callback
        assert_eq!(session.state(), CentralState::ConnectedDiscovering);
        assert!(session.characteristics().is_empty());
        assert!(session.log.contains("Service not found"));
    }

    #[test]
    fn test_discovery_internal_error_disconnects() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(CentralTransportEvent::ServicesDiscovered {
            handle: handle.clone(),
            status: GattStatus::InternalError,
            services: vec![full_service()],
        });

        assert_eq!(
            session.transport().calls.last(),
            Some(&Call::Disconnect(handle))
        );
        assert!(session.characteristics().is_empty());
    }

    #[test]
    fn test_disconnect_while_subscribing_rescans() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![full_service()]));
        assert_eq!(session.state(), CentralState::ConnectedSubscribing);

        let mut rx = session.subscribe();
        session.transport_mut().take_calls();
        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle: handle.clone(),
            status: GattStatus::Success,
            connected: false,
        });

        assert_eq!(
            states(&drain(&mut rx)),
            vec![CentralState::Disconnected, CentralState::Scanning]
        );
        assert!(session.link().is_none());
        assert!(session.characteristics().is_empty());
        assert_eq!(
            session.transport().calls,
            vec![Call::Close(handle), Call::StartScan(UUID_SERVICE)]
        );
    }

    #[test]
    fn test_connect_error_backs_off() {
        let mut session = session(RadioState::On);
        let handle = {
            session.set_enabled(true);
            session.handle_event(CentralTransportEvent::ScanResult(peripheral()));
            session.link().cloned().unwrap()
        };

        // First failure restarts immediately
        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle,
            status: GattStatus::GattError,
            connected: false,
        });
        assert_eq!(session.state(), CentralState::Scanning);
        assert!(session.log.contains("GATT_ERROR=133"));

        // Second consecutive failure waits
        session.handle_event(CentralTransportEvent::ScanResult(peripheral()));
        let handle = session.link().cloned().unwrap();
        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle,
            status: GattStatus::GattError,
            connected: false,
        });
        assert_eq!(session.state(), CentralState::Disconnected);
        let restart_at = session.pending_restart().unwrap();
        assert_eq!(session.next_timer(), Some(restart_at));

        session.handle_timer(restart_at);
        assert_eq!(session.state(), CentralState::Scanning);
        assert!(session.pending_restart().is_none());
    }

    #[test]
    fn test_scan_failure_retries() {
        let mut session = session(RadioState::On);
        session.set_enabled(true);
        session.handle_event(CentralTransportEvent::ScanFailed { error_code: 2 });

        assert_eq!(session.state(), CentralState::Scanning);
        assert_eq!(
            session
                .transport()
                .count(|c| matches!(c, Call::StartScan(_))),
            2
        );
        assert!(session.log.contains("scan failed, errorCode=2"));
    }

    #[test]
    fn test_attempt_budget_gives_up() {
        let mut config = CentralConfig::default();
        config.reconnect.max_attempts = Some(1);
        let mut session =
            CentralSession::new(MockTransport::new(), config, LogSink::new(), RadioState::On);
        session.set_enabled(true);
        session.handle_event(CentralTransportEvent::ScanFailed { error_code: 1 });
        session.handle_event(CentralTransportEvent::ScanFailed { error_code: 1 });

        assert_eq!(session.state(), CentralState::Disconnected);
        assert!(session.pending_restart().is_none());
        assert!(session.wants_connection());
        assert!(session.log.contains("giving up"));
    }

    #[test]
    fn test_deadline_abandons_link_and_ignores_late_callback() {
        let mut session = session(RadioState::On);
        session.set_enabled(true);
        session.handle_event(CentralTransportEvent::ScanResult(peripheral()));
        let stale = session.link().cloned().unwrap();
        let deadline = session.next_timer().unwrap();

        session.handle_timer(deadline + Duration::from_millis(1));
        assert!(session.transport().calls.contains(&Call::Disconnect(stale.clone())));
        assert!(session.transport().calls.contains(&Call::Close(stale.clone())));
        assert!(session.log.contains("timed out waiting in state Connecting"));
        // Immediate retry after the first failure
        assert_eq!(session.state(), CentralState::Scanning);

        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle: stale,
            status: GattStatus::Success,
            connected: true,
        });
        assert_eq!(session.state(), CentralState::Scanning);
    }

    #[test]
    fn test_discovery_deadline_abandons_link() {
        let mut session = session(RadioState::On);
        let mut rx = session.subscribe();
        let stale = connect(&mut session);
        assert_eq!(session.state(), CentralState::ConnectedDiscovering);
        let deadline = session.next_timer().unwrap();
        drain(&mut rx);

        session.handle_timer(deadline + Duration::from_millis(1));
        assert!(session.log.contains("timed out waiting in state ConnectedDiscovering"));
        assert!(session.transport().calls.contains(&Call::Disconnect(stale.clone())));
        assert!(session.transport().calls.contains(&Call::Close(stale.clone())));
        let updates = drain(&mut rx);
        assert_legal(&updates);
        assert_eq!(
            states(&updates),
            vec![CentralState::Disconnected, CentralState::Scanning]
        );

        session.transport_mut().take_calls();
        session.handle_event(discovered(&stale, vec![full_service()]));
        assert_eq!(session.state(), CentralState::Scanning);
        assert!(session.characteristics().is_empty());
        assert!(session.transport().calls.is_empty());
    }

    #[test]
    fn test_subscribe_deadline_abandons_link() {
        let mut session = session(RadioState::On);
        let mut rx = session.subscribe();
        let stale = connect(&mut session);
        session.handle_event(discovered(&stale, vec![full_service()]));
        assert_eq!(session.state(), CentralState::ConnectedSubscribing);
        let deadline = session.next_timer().unwrap();
        drain(&mut rx);

        session.handle_timer(deadline + Duration::from_millis(1));
        assert!(session.log.contains("timed out waiting in state ConnectedSubscribing"));
        assert!(session.transport().calls.contains(&Call::Disconnect(stale.clone())));
        assert!(session.transport().calls.contains(&Call::Close(stale.clone())));
        let updates = drain(&mut rx);
        assert_legal(&updates);
        assert_eq!(
            states(&updates),
            vec![CentralState::Disconnected, CentralState::Scanning]
        );

        session.handle_event(subscribed(&stale, GattStatus::Success));
        assert_eq!(session.state(), CentralState::Scanning);
        assert!(!session.is_subscribed());
        assert!(states(&drain(&mut rx)).is_empty());
    }

    #[test]
    fn test_zero_delay_scan_refusal_waits_for_timer() {
        let mut config = CentralConfig::default();
        config.reconnect.initial_delay_ms = 0;
        config.reconnect.multiplier = 1.0;
        let mut transport = MockTransport::new();
        transport.fail_scan = true;
        let mut session = CentralSession::new(transport, config, LogSink::new(), RadioState::On);
        let scans = |s: &CentralSession<MockTransport>| {
            s.transport().count(|c| matches!(c, Call::StartScan(_)))
        };

        session.set_enabled(true);
        assert_eq!(scans(&session), 1);
        assert_eq!(session.state(), CentralState::Disconnected);
        let first = session.pending_restart().unwrap();

        session.handle_timer(first);
        assert_eq!(scans(&session), 2);
        let second = session.pending_restart().unwrap();
        assert!(second >= first + Duration::from_millis(MIN_RECONNECT_DELAY_MS));

        session.handle_timer(second);
        assert_eq!(scans(&session), 3);
        assert!(session.pending_restart().is_some());
    }

    #[test]
    fn test_zero_direct_delay_connect_refusal_waits_for_timer() {
        let mut config = CentralConfig::default();
        config.direct_reconnect_delay_ms = 0;
        let mut transport = MockTransport::new();
        transport.fail_connect = true;
        let mut session = CentralSession::new(transport, config, LogSink::new(), RadioState::On);

        session.connect_to(peripheral());
        assert_eq!(
            session.transport().count(|c| matches!(c, Call::Connect(_))),
            1
        );
        assert_eq!(session.state(), CentralState::Disconnected);
        assert!(session.pending_restart().is_some());
        assert!(session.log.contains("Will try reconnect in 100 ms"));
    }

    #[test]
    fn test_read_write_refused_without_link() {
        let mut session = session(RadioState::On);
        assert_eq!(session.read(), Err(SessionError::NotConnected));
        assert_eq!(session.write(b"x"), Err(SessionError::NotConnected));
        assert!(session.transport().calls.is_empty());
        assert!(session.log.contains("ERROR: read failed, no connected device"));
        assert!(session.log.contains("ERROR: write failed, no connected device"));
    }

    #[test]
    fn test_read_refused_without_characteristic() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        let mut service = full_service();
        service.characteristics.retain(|c| c.uuid == UUID_CHAR_FOR_INDICATE);
        session.handle_event(discovered(&handle, vec![service]));
        session.transport_mut().take_calls();

        assert_eq!(
            session.read(),
            Err(SessionError::CharacteristicUnavailable(UUID_CHAR_FOR_READ))
        );
        assert_eq!(
            session.write(b"x"),
            Err(SessionError::CharacteristicUnavailable(UUID_CHAR_FOR_WRITE))
        );
        assert!(session.transport().calls.is_empty());
    }

    #[test]
    fn test_read_refused_when_not_readable() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        let mut service = full_service();
        for c in &mut service.characteristics {
            if c.uuid == UUID_CHAR_FOR_READ {
                c.properties = CharacteristicProperties::WRITE;
            }
        }
        session.handle_event(discovered(&handle, vec![service]));
        session.transport_mut().take_calls();

        assert!(matches!(
            session.read(),
            Err(SessionError::OperationNotPermitted { property: "readable", .. })
        ));
        assert!(session.transport().calls.is_empty());
    }

    #[test]
    fn test_read_write_and_indication_values() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![full_service()]));
        session.handle_event(subscribed(&handle, GattStatus::Success));
        session.transport_mut().take_calls();

        session.read().unwrap();
        session.write(b"hello").unwrap();
        assert_eq!(
            session.transport().calls,
            vec![
                Call::Read(handle.clone(), UUID_CHAR_FOR_READ),
                Call::Write(
                    handle.clone(),
                    UUID_CHAR_FOR_WRITE,
                    b"hello".to_vec(),
                    WriteType::WithResponse
                ),
            ]
        );

        session.handle_event(CentralTransportEvent::CharacteristicRead {
            handle: handle.clone(),
            characteristic: UUID_CHAR_FOR_READ,
            status: GattStatus::Success,
            value: b"abc".to_vec(),
        });
        assert_eq!(session.last_read_value(), Some(&b"abc"[..]));

        session.handle_event(CentralTransportEvent::CharacteristicWrite {
            handle: handle.clone(),
            characteristic: UUID_CHAR_FOR_WRITE,
            status: GattStatus::WriteNotPermitted,
        });
        assert!(session.log.contains("GATT_WRITE_NOT_PERMITTED"));

        session.handle_event(CentralTransportEvent::CharacteristicChanged {
            handle,
            characteristic: UUID_CHAR_FOR_INDICATE,
            value: b"hi".to_vec(),
        });
        assert_eq!(session.last_indicate_value(), Some(&b"hi"[..]));
        assert!(session.log.contains("onCharacteristicChanged value=\"hi\""));
    }

    #[test]
    fn test_unsubscribe_writes_disable_value() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![full_service()]));
        session.handle_event(subscribed(&handle, GattStatus::Success));

        session.set_indications(false).unwrap();
        assert_eq!(
            session.transport().calls.last(),
            Some(&Call::WriteDescriptor(
                handle.clone(),
                UUID_CHAR_FOR_INDICATE,
                UUID_CCC_DESCRIPTOR,
                DISABLE_NOTIFICATION_VALUE.to_vec()
            ))
        );

        session.handle_event(CentralTransportEvent::DescriptorWrite {
            handle,
            characteristic: UUID_CHAR_FOR_INDICATE,
            descriptor: UUID_CCC_DESCRIPTOR,
            status: GattStatus::Success,
            value: DISABLE_NOTIFICATION_VALUE.to_vec(),
        });
        assert!(!session.is_subscribed());
        assert_eq!(session.state(), CentralState::Connected);
    }

    #[test]
    fn test_radio_off_tears_down_and_on_restarts() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![full_service()]));
        session.handle_event(subscribed(&handle, GattStatus::Success));

        session.on_radio_state(RadioState::Off);
        assert_eq!(session.state(), CentralState::Disconnected);
        assert!(session.link().is_none());
        assert!(session.characteristics().is_empty());
        assert!(!session.is_subscribed());
        assert!(session.transport().calls.contains(&Call::Close(handle.clone())));

        // The disconnect callback for the torn-down link is stale
        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle,
            status: GattStatus::Success,
            connected: false,
        });
        assert_eq!(session.state(), CentralState::Disconnected);

        session.on_radio_state(RadioState::On);
        assert_eq!(session.state(), CentralState::Scanning);
    }

    #[test]
    fn test_toggle_off_is_idempotent() {
        let mut session = session(RadioState::On);
        session.set_enabled(false);
        assert_eq!(session.state(), CentralState::Disconnected);
        assert!(session.log.contains("Already stopped"));
        assert!(session.transport().calls.is_empty());

        session.set_enabled(true);
        session.set_enabled(false);
        assert_eq!(session.state(), CentralState::Disconnected);
        assert_eq!(session.transport().calls.last(), Some(&Call::StopScan));
    }

    #[test]
    fn test_toggle_on_while_connected_disconnects_first() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.set_enabled(true);
        assert_eq!(
            session.transport().calls.last(),
            Some(&Call::Disconnect(handle))
        );
    }

    #[test]
    fn test_direct_connect_skips_scan_and_waits_fixed_delay() {
        let mut session = session(RadioState::On);
        let mut rx = session.subscribe();
        session.connect_to(peripheral());

        assert_eq!(session.state(), CentralState::Connecting);
        assert_eq!(
            session.transport().calls,
            vec![Call::Connect(peripheral().address)]
        );

        let handle = session.link().cloned().unwrap();
        session.handle_event(CentralTransportEvent::ConnectionStateChanged {
            handle,
            status: GattStatus::GattError,
            connected: false,
        });
        assert_eq!(session.state(), CentralState::Disconnected);
        assert!(session.pending_restart().is_some());
        assert_legal(&drain(&mut rx));
        assert!(session.log.contains("Will try reconnect in 5000 ms"));
    }

    #[test]
    fn test_discovery_logs_service_table() {
        let mut session = session(RadioState::On);
        let handle = connect(&mut session);
        session.handle_event(discovered(&handle, vec![full_service()]));
        assert!(session.log.contains(&UUID_CHAR_FOR_WRITE.to_string()));
    }
}
