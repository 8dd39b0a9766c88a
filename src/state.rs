//! Application state management
//! The host-owned object that wires both sessions to their transports, the
//! radio monitor and their logs. There are no global singletons: the host
//! creates one `AppState` and hands its handles to the UI.

use log::{error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::{CentralHandle, PeripheralHandle};
use crate::config::AppConfig;
use crate::core::bluetooth::{
    CentralSession, CentralTransport, CentralTransportEvent, PeripheralSession,
    PeripheralTransport, PeripheralTransportEvent, RadioAvailabilityMonitor, RadioState,
    SimulatedAir, spawn_session,
};
use crate::logging::LogSink;

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    pub radio: RadioAvailabilityMonitor,
    pub central: CentralHandle,
    pub peripheral: PeripheralHandle,
    /// Log view of the central role
    pub central_log: LogSink,
    /// Log view of the peripheral role
    pub peripheral_log: LogSink,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Starts both sessions on the given transports. Must be called from
    /// within a tokio runtime.
    pub fn new<C, P>(
        config: AppConfig,
        radio: RadioAvailabilityMonitor,
        central_transport: (C, mpsc::UnboundedReceiver<CentralTransportEvent>),
        peripheral_transport: (P, mpsc::UnboundedReceiver<PeripheralTransportEvent>),
    ) -> Self
    where
        C: CentralTransport + Send + 'static,
        P: PeripheralTransport + Send + 'static,
    {
        info!("Initializing BLE sessions...");
        let cancel_token = CancellationToken::new();
        let central_log = LogSink::new().with_target("central");
        let peripheral_log = LogSink::new().with_target("peripheral");

        let (transport, events) = central_transport;
        let session = CentralSession::new(
            transport,
            config.central.clone(),
            central_log.clone(),
            radio.current(),
        );
        let updates = session.update_sender();
        let (sender, central_task) = spawn_session(
            "central",
            session,
            events,
            radio.subscribe(),
            cancel_token.child_token(),
        );
        let central = CentralHandle::new(sender, updates);

        let (transport, events) = peripheral_transport;
        let session = PeripheralSession::new(
            transport,
            config.peripheral.clone(),
            peripheral_log.clone(),
            radio.current(),
        );
        let updates = session.update_sender();
        let (sender, peripheral_task) = spawn_session(
            "peripheral",
            session,
            events,
            radio.subscribe(),
            cancel_token.child_token(),
        );
        let peripheral = PeripheralHandle::new(sender, updates);

        Self {
            config,
            radio,
            central,
            peripheral,
            central_log,
            peripheral_log,
            cancel_token,
            tasks: vec![central_task, peripheral_task],
        }
    }

    /// Both roles over one in-process air, with the radio on
    pub fn simulated(config: AppConfig) -> (Self, SimulatedAir) {
        let (air, central_events, peripheral_events) = SimulatedAir::new();
        let radio = RadioAvailabilityMonitor::new(RadioState::On);
        let state = Self::new(
            config,
            radio,
            (air.central(), central_events),
            (air.peripheral(), peripheral_events),
        );
        (state, air)
    }

    /// Ends both lifecycles and waits for the loops to finish
    pub async fn shutdown(self) {
        info!("Shutting down BLE sessions...");
        self.cancel_token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Session task finished with an error: {:?}", e);
            }
        }
        info!("BLE sessions stopped.");
    }
}
