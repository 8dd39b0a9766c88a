//! Peripheral (server) session
//!
//! Hosts the BLEProof service, advertises it, answers inbound requests and
//! fans indications out to every subscribed central.

use std::collections::HashSet;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::commands::PeripheralCommand;
use crate::config::peripheral_config::PeripheralConfig;
use crate::core::bluetooth::constants::{DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE};
use crate::core::bluetooth::error::SessionError;
use crate::core::bluetooth::manager::Session;
use crate::core::bluetooth::radio::RadioState;
use crate::core::bluetooth::transport::{PeripheralTransport, PeripheralTransportEvent};
use crate::core::bluetooth::types::{
    AdvertiseFailure, BLEPROOF_SERVICE, ConnectionHandle, GattStatus, ServiceDescriptor,
    display_value,
};
use crate::logging::LogSink;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeripheralState {
    Idle,
    Advertising,
}

/// Observable changes published to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralUpdate {
    AdvertisingChanged(bool),
    ConnectionChanged {
        handle: ConnectionHandle,
        connected: bool,
    },
    SubscribersChanged(usize),
    WriteValue(Vec<u8>),
    Failure(SessionError),
}

pub struct PeripheralSession<T: PeripheralTransport> {
    transport: T,
    config: PeripheralConfig,
    descriptor: ServiceDescriptor,
    log: LogSink,
    updates: broadcast::Sender<PeripheralUpdate>,

    state: PeripheralState,
    radio: RadioState,
    wants_advertising: bool,
    server_open: bool,
    connected: HashSet<ConnectionHandle>,
    subscribers: HashSet<ConnectionHandle>,

    read_value: Vec<u8>,
    last_write_value: Option<Vec<u8>>,
    last_indicate_value: Option<Vec<u8>>,
}

impl<T: PeripheralTransport> PeripheralSession<T> {
    pub fn new(transport: T, config: PeripheralConfig, log: LogSink, radio: RadioState) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let read_value = config.initial_read_value.clone().into_bytes();
        Self {
            transport,
            config,
            descriptor: BLEPROOF_SERVICE,
            log,
            updates,
            state: PeripheralState::Idle,
            radio,
            wants_advertising: false,
            server_open: false,
            connected: HashSet::new(),
            subscribers: HashSet::new(),
            read_value,
            last_write_value: None,
            last_indicate_value: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeripheralUpdate> {
        self.updates.subscribe()
    }

    /// Sender side of the update channel, for handles that subscribe later
    pub fn update_sender(&self) -> broadcast::Sender<PeripheralUpdate> {
        self.updates.clone()
    }

    pub fn state(&self) -> PeripheralState {
        self.state
    }

    pub fn is_advertising(&self) -> bool {
        self.state == PeripheralState::Advertising
    }

    pub fn subscribers(&self) -> &HashSet<ConnectionHandle> {
        &self.subscribers
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn connected(&self) -> &HashSet<ConnectionHandle> {
        &self.connected
    }

    /// Text for the connection indicator
    pub fn connection_label(&self) -> &'static str {
        if self.connected.is_empty() {
            "Disconnected"
        } else {
            "Connected"
        }
    }

    pub fn read_value(&self) -> &[u8] {
        &self.read_value
    }

    pub fn last_write_value(&self) -> Option<&[u8]> {
        self.last_write_value.as_deref()
    }

    pub fn last_indicate_value(&self) -> Option<&[u8]> {
        self.last_indicate_value.as_deref()
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

    /// Registers the service and starts advertising it
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.wants_advertising = true;
        if self.state == PeripheralState::Advertising {
            self.log.info("Already advertising");
            return Ok(());
        }
        let result = self.try_start();
        if let Err(e) = &result {
            self.report(e.clone());
        }
        result
    }

    /// Stops advertising and closes the server. A no-op when already idle.
    pub fn stop(&mut self) {
        self.wants_advertising = false;
        if self.state == PeripheralState::Idle && !self.server_open {
            self.log.info("Already stopped");
            return;
        }
        self.teardown();
    }

    pub fn set_advertising(&mut self, enabled: bool) -> Result<(), SessionError> {
        if enabled {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    pub fn set_read_value(&mut self, value: Vec<u8>) {
        self.read_value = value;
    }

    /// Sends `value` to every subscriber and returns how many sends were
    /// accepted by the transport
    pub fn send_indication(&mut self, value: &[u8]) -> usize {
        self.last_indicate_value = Some(value.to_vec());

        if !self.server_open {
            self.log.error("indication not sent, GATT server not running");
            return 0;
        }
        if self.subscribers.is_empty() {
            self.log.info("no subscribers, indication not sent");
            return 0;
        }

        let text = display_value(value);
        let indicate = self.descriptor.indicate;
        let targets: Vec<ConnectionHandle> = self.subscribers.iter().cloned().collect();
        let mut sent = 0;
        for handle in targets {
            self.log.info(format!("sending indication \"{}\" to {}", text, handle));
            match self.transport.notify(&handle, indicate, value, true) {
                Ok(()) => sent += 1,
                Err(source) => self.report(SessionError::Transport {
                    operation: "notifyCharacteristicChanged",
                    source,
                }),
            }
        }
        sent
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    fn try_start(&mut self) -> Result<(), SessionError> {
        if !self.radio.is_usable() {
            return Err(SessionError::RadioUnavailable(self.radio));
        }
        self.log.info("Bluetooth ON, ready");

        let service = self.descriptor.definition();
        match self.transport.register_service(&service) {
            Ok(()) => {
                self.log.info("addService OK");
                self.server_open = true;
            }
            Err(e) => {
                self.log.info("addService fail");
                self.transport.close_server();
                return Err(SessionError::ServiceRegistration(e));
            }
        }

        let advertise = self.config.advertise_config(self.descriptor.service);
        if let Err(source) = self.transport.start_advertising(&advertise) {
            self.close_server();
            return Err(SessionError::Transport {
                operation: "startAdvertising",
                source,
            });
        }

        self.set_state(PeripheralState::Advertising);
        Ok(())
    }

    fn teardown(&mut self) {
        self.transport.stop_advertising();
        self.close_server();
        self.set_state(PeripheralState::Idle);
    }

    fn close_server(&mut self) {
        self.transport.close_server();
        self.server_open = false;
        self.log.info("gattServer closed");

        // Closing the server drops every central
        for handle in std::mem::take(&mut self.connected) {
            self.emit(PeripheralUpdate::ConnectionChanged {
                handle,
                connected: false,
            });
        }
        if !self.subscribers.is_empty() {
            self.subscribers.clear();
            self.emit(PeripheralUpdate::SubscribersChanged(0));
        }
    }

    fn set_state(&mut self, state: PeripheralState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.log.info(format!("status = {:?}", state));
        self.emit(PeripheralUpdate::AdvertisingChanged(
            state == PeripheralState::Advertising,
        ));
    }

    fn emit(&self, update: PeripheralUpdate) {
        let _ = self.updates.send(update);
    }

    fn report(&self, error: SessionError) {
        self.log.error(error.to_string());
        self.emit(PeripheralUpdate::Failure(error));
    }

    pub fn on_radio_state(&mut self, radio: RadioState) {
        let previous = self.radio;
        self.radio = radio;
        if previous == radio {
            return;
        }
        self.log.info(format!("onReceive: {}", radio));

        if !radio.is_usable() {
            if self.state == PeripheralState::Advertising || self.server_open {
                self.teardown();
            }
        } else if self.wants_advertising && self.state == PeripheralState::Idle {
            // Failures are already logged and reported
            let _ = self.start();
        }
    }

    // ------------------------------------------------------------------
    // Transport callbacks
    // ------------------------------------------------------------------

    pub fn handle_event(&mut self, event: PeripheralTransportEvent) {
        match event {
            PeripheralTransportEvent::AdvertiseStarted => {
                self.log.info(format!(
                    "Advertise start success\n{}",
                    self.descriptor.service
                ));
            }
            PeripheralTransportEvent::AdvertiseFailed(reason) => self.on_advertise_failed(reason),
            PeripheralTransportEvent::ConnectionStateChanged { handle, connected } => {
                self.on_connection_state_change(handle, connected)
            }
            PeripheralTransportEvent::NotificationSent { handle, status } => {
                self.log.info(format!(
                    "onNotificationSent {} status={}",
                    handle,
                    status.code()
                ));
            }
            PeripheralTransportEvent::ReadRequest {
                handle,
                request_id,
                characteristic,
                offset,
            } => self.on_read_request(handle, request_id, characteristic, offset),
            PeripheralTransportEvent::WriteRequest {
                handle,
                request_id,
                characteristic,
                value,
                response_needed,
                prepared,
                offset,
            } => self.on_write_request(
                handle,
                request_id,
                characteristic,
                value,
                response_needed,
                prepared,
                offset,
            ),
            PeripheralTransportEvent::DescriptorReadRequest {
                handle,
                request_id,
                characteristic: _,
                descriptor,
                offset: _,
            } => self.on_descriptor_read_request(handle, request_id, descriptor),
            PeripheralTransportEvent::DescriptorWriteRequest {
                handle,
                request_id,
                characteristic,
                descriptor,
                value,
                response_needed,
            } => self.on_descriptor_write_request(
                handle,
                request_id,
                characteristic,
                descriptor,
                value,
                response_needed,
            ),
        }
    }

    fn on_advertise_failed(&mut self, reason: AdvertiseFailure) {
        // Terminal: the toggle goes back off and nothing retries
        self.report(SessionError::AdvertiseStartFailure(reason));
        self.wants_advertising = false;
        if self.state == PeripheralState::Advertising || self.server_open {
            self.teardown();
        }
    }

    fn on_connection_state_change(&mut self, handle: ConnectionHandle, connected: bool) {
        if connected {
            self.log.info(format!("Central did connect {}", handle));
            if !self.server_open {
                self.log.warn("GATT server not running, connection ignored");
                return;
            }
            if self.connected.insert(handle.clone()) {
                self.emit(PeripheralUpdate::ConnectionChanged {
                    handle,
                    connected: true,
                });
            }
            return;
        }

        self.log.info(format!("Central did disconnect {}", handle));
        if self.connected.remove(&handle) {
            self.emit(PeripheralUpdate::ConnectionChanged {
                handle: handle.clone(),
                connected: false,
            });
        }
        self.subscribers.remove(&handle);
        self.emit(PeripheralUpdate::SubscribersChanged(self.subscribers.len()));
    }

    /// Requests queued before `stop()` may arrive after it. They belong to
    /// a closed server: answer with a failure and leave the sets untouched.
    fn accept_request(
        &mut self,
        handle: &ConnectionHandle,
        request_id: u64,
        response_needed: bool,
        kind: &str,
    ) -> bool {
        if self.server_open {
            return true;
        }
        if response_needed {
            self.transport
                .respond(handle, request_id, GattStatus::Failure, 0, None);
        }
        self.log
            .warn(format!("{} from {} ignored, GATT server not running", kind, handle));
        false
    }

    /// Requests can arrive before the connection callback; the sender is
    /// connected by definition.
    fn track(&mut self, handle: &ConnectionHandle) {
        if self.connected.insert(handle.clone()) {
            self.emit(PeripheralUpdate::ConnectionChanged {
                handle: handle.clone(),
                connected: true,
            });
        }
    }

    fn on_read_request(
        &mut self,
        handle: ConnectionHandle,
        request_id: u64,
        characteristic: Uuid,
        offset: usize,
    ) {
        if !self.accept_request(&handle, request_id, true, "onCharacteristicRead") {
            return;
        }
        self.track(&handle);
        let mut log = format!("onCharacteristicRead offset={}", offset);

        if characteristic != self.descriptor.read {
            self.transport
                .respond(&handle, request_id, GattStatus::Failure, 0, None);
            log.push_str(&format!("\nresponse=failure, unknown UUID\n{}", characteristic));
            self.log.info(log);
            return;
        }

        match self.read_value.get(offset..) {
            Some(rest) => {
                self.transport
                    .respond(&handle, request_id, GattStatus::Success, offset, Some(rest));
                log.push_str(&format!(
                    "\nresponse=success, value=\"{}\"",
                    display_value(&self.read_value)
                ));
            }
            None => {
                self.transport
                    .respond(&handle, request_id, GattStatus::InvalidOffset, offset, None);
                log.push_str("\nresponse=failure, invalid offset");
            }
        }
        self.log.info(log);
    }

    #[allow(clippy::too_many_arguments)]
    fn on_write_request(
        &mut self,
        handle: ConnectionHandle,
        request_id: u64,
        characteristic: Uuid,
        value: Vec<u8>,
        response_needed: bool,
        prepared: bool,
        offset: usize,
    ) {
        if !self.accept_request(&handle, request_id, response_needed, "onCharacteristicWrite") {
            return;
        }
        self.track(&handle);
        let mut log = format!(
            "onCharacteristicWrite offset={} responseNeeded={} preparedWrite={}",
            offset, response_needed, prepared
        );

        if characteristic == self.descriptor.write {
            let text = display_value(&value);
            if response_needed {
                self.transport.respond(
                    &handle,
                    request_id,
                    GattStatus::Success,
                    0,
                    Some(&value),
                );
                log.push_str(&format!("\nresponse=success, value=\"{}\"", text));
            } else {
                log.push_str(&format!("\nresponse=notNeeded, value=\"{}\"", text));
            }
            self.last_write_value = Some(value.clone());
            self.emit(PeripheralUpdate::WriteValue(value));
        } else if response_needed {
            self.transport
                .respond(&handle, request_id, GattStatus::Failure, 0, None);
            log.push_str(&format!("\nresponse=failure, unknown UUID\n{}", characteristic));
        } else {
            log.push_str(&format!("\nresponse=notNeeded, unknown UUID\n{}", characteristic));
        }
        self.log.info(log);
    }

    fn on_descriptor_read_request(
        &mut self,
        handle: ConnectionHandle,
        request_id: u64,
        descriptor: Uuid,
    ) {
        if !self.accept_request(&handle, request_id, true, "onDescriptorReadRequest") {
            return;
        }
        self.track(&handle);
        let mut log = String::from("onDescriptorReadRequest");

        if descriptor == self.descriptor.ccc {
            let value = if self.subscribers.contains(&handle) {
                log.push_str(" CCCD response=ENABLE_INDICATION");
                ENABLE_INDICATION_VALUE
            } else {
                log.push_str(" CCCD response=DISABLE_NOTIFICATION");
                DISABLE_NOTIFICATION_VALUE
            };
            self.transport
                .respond(&handle, request_id, GattStatus::Success, 0, Some(&value));
        } else {
            log.push_str(&format!(" unknown uuid={}", descriptor));
            self.transport
                .respond(&handle, request_id, GattStatus::Failure, 0, None);
        }
        self.log.info(log);
    }

    fn on_descriptor_write_request(
        &mut self,
        handle: ConnectionHandle,
        request_id: u64,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    ) {
        if !self.accept_request(&handle, request_id, response_needed, "onDescriptorWriteRequest") {
            return;
        }
        self.track(&handle);
        let mut log = String::from("onDescriptorWriteRequest");

        if descriptor != self.descriptor.ccc {
            log.push_str(&format!(" unknown uuid={}", descriptor));
            if response_needed {
                self.transport
                    .respond(&handle, request_id, GattStatus::Failure, 0, None);
            }
            self.log.info(log);
            return;
        }

        let mut status = GattStatus::RequestNotSupported;
        if characteristic == self.descriptor.indicate {
            if value == ENABLE_INDICATION_VALUE {
                self.subscribers.insert(handle.clone());
                status = GattStatus::Success;
                log.push_str(", subscribed");
            } else if value == DISABLE_NOTIFICATION_VALUE {
                self.subscribers.remove(&handle);
                status = GattStatus::Success;
                log.push_str(", unsubscribed");
            }
        }
        if !status.is_success() {
            log.push_str(&format!(", unsupported value {:?}", value));
        }
        if response_needed {
            self.transport.respond(&handle, request_id, status, 0, None);
        }
        self.emit(PeripheralUpdate::SubscribersChanged(self.subscribers.len()));
        self.log.info(log);
    }
}

impl<T: PeripheralTransport> Session for PeripheralSession<T> {
    type Event = PeripheralTransportEvent;
    type Command = PeripheralCommand;

    fn handle_event(&mut self, event: Self::Event) {
        PeripheralSession::handle_event(self, event);
    }

    fn handle_command(&mut self, command: Self::Command) {
        match command {
            PeripheralCommand::SetAdvertising { enabled, responder } => {
                let _ = responder.send(self.set_advertising(enabled));
            }
            PeripheralCommand::SetReadValue(value) => self.set_read_value(value),
            PeripheralCommand::SendIndication { value, responder } => {
                let _ = responder.send(self.send_indication(&value));
            }
            PeripheralCommand::ClearLog => self.clear_log(),
        }
    }

    fn on_radio_state(&mut self, state: RadioState) {
        PeripheralSession::on_radio_state(self, state);
    }

    fn next_timer(&self) -> Option<Instant> {
        None
    }

    fn handle_timer(&mut self, _now: Instant) {}

    fn shutdown(&mut self) {
        self.stop();
    }
}
