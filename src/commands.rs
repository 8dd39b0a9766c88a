//! Consumer commands
//! This module defines the operations the UI can invoke on the sessions.
//! Handles are cheap to clone; each call is queued onto the session loop.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::core::bluetooth::{CentralUpdate, DiscoveredDevice, PeripheralUpdate, SessionError};

/// Commands understood by the central session
#[derive(Debug)]
pub enum CentralCommand {
    /// The connect toggle
    SetEnabled(bool),
    /// Connect to a known device without scanning
    ConnectTo(DiscoveredDevice),
    Read {
        responder: oneshot::Sender<Result<(), SessionError>>,
    },
    Write {
        value: Vec<u8>,
        responder: oneshot::Sender<Result<(), SessionError>>,
    },
    SetIndications {
        enabled: bool,
        responder: oneshot::Sender<Result<(), SessionError>>,
    },
    ClearLog,
}

/// Commands understood by the peripheral session
#[derive(Debug)]
pub enum PeripheralCommand {
    /// The advertising toggle
    SetAdvertising {
        enabled: bool,
        responder: oneshot::Sender<Result<(), SessionError>>,
    },
    SetReadValue(Vec<u8>),
    /// Replies with the number of subscribers the value was sent to
    SendIndication {
        value: Vec<u8>,
        responder: oneshot::Sender<usize>,
    },
    ClearLog,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("session loop is not running")]
    Closed,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// UI-facing handle to a running central session
#[derive(Clone)]
pub struct CentralHandle {
    sender: mpsc::Sender<CentralCommand>,
    updates: broadcast::Sender<CentralUpdate>,
}

impl CentralHandle {
    pub fn new(
        sender: mpsc::Sender<CentralCommand>,
        updates: broadcast::Sender<CentralUpdate>,
    ) -> Self {
        Self { sender, updates }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CentralUpdate> {
        self.updates.subscribe()
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), CommandError> {
        self.send(CentralCommand::SetEnabled(enabled)).await
    }

    pub async fn connect_to(&self, device: DiscoveredDevice) -> Result<(), CommandError> {
        self.send(CentralCommand::ConnectTo(device)).await
    }

    /// Issues a read. The value arrives later as [`CentralUpdate::ReadValue`].
    pub async fn read(&self) -> Result<(), CommandError> {
        let (responder, reply) = oneshot::channel();
        self.send(CentralCommand::Read { responder }).await?;
        Ok(reply.await.map_err(|_| CommandError::Closed)??)
    }

    pub async fn write(&self, value: Vec<u8>) -> Result<(), CommandError> {
        let (responder, reply) = oneshot::channel();
        self.send(CentralCommand::Write { value, responder }).await?;
        Ok(reply.await.map_err(|_| CommandError::Closed)??)
    }

    /// Writes UTF-8 text, the way the UI sends its text field
    pub async fn write_text(&self, text: &str) -> Result<(), CommandError> {
        self.write(text.as_bytes().to_vec()).await
    }

    pub async fn set_indications(&self, enabled: bool) -> Result<(), CommandError> {
        let (responder, reply) = oneshot::channel();
        self.send(CentralCommand::SetIndications { enabled, responder })
            .await?;
        Ok(reply.await.map_err(|_| CommandError::Closed)??)
    }

    pub async fn clear_log(&self) -> Result<(), CommandError> {
        self.send(CentralCommand::ClearLog).await
    }

    async fn send(&self, command: CentralCommand) -> Result<(), CommandError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| CommandError::Closed)
    }
}

/// UI-facing handle to a running peripheral session
#[derive(Clone)]
pub struct PeripheralHandle {
    sender: mpsc::Sender<PeripheralCommand>,
    updates: broadcast::Sender<PeripheralUpdate>,
}

impl PeripheralHandle {
    pub fn new(
        sender: mpsc::Sender<PeripheralCommand>,
        updates: broadcast::Sender<PeripheralUpdate>,
    ) -> Self {
        Self { sender, updates }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeripheralUpdate> {
        self.updates.subscribe()
    }

    pub async fn set_advertising(&self, enabled: bool) -> Result<(), CommandError> {
        let (responder, reply) = oneshot::channel();
        self.send(PeripheralCommand::SetAdvertising { enabled, responder })
            .await?;
        Ok(reply.await.map_err(|_| CommandError::Closed)??)
    }

    /// Replaces the value served to read requests
    pub async fn set_read_value(&self, value: Vec<u8>) -> Result<(), CommandError> {
        self.send(PeripheralCommand::SetReadValue(value)).await
    }

    pub async fn set_read_text(&self, text: &str) -> Result<(), CommandError> {
        self.set_read_value(text.as_bytes().to_vec()).await
    }

    pub async fn send_indication(&self, value: Vec<u8>) -> Result<usize, CommandError> {
        let (responder, reply) = oneshot::channel();
        self.send(PeripheralCommand::SendIndication { value, responder })
            .await?;
        reply.await.map_err(|_| CommandError::Closed)
    }

    pub async fn send_text(&self, text: &str) -> Result<usize, CommandError> {
        self.send_indication(text.as_bytes().to_vec()).await
    }

    pub async fn clear_log(&self) -> Result<(), CommandError> {
        self.send(PeripheralCommand::ClearLog).await
    }

    async fn send(&self, command: PeripheralCommand) -> Result<(), CommandError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| CommandError::Closed)
    }
}
