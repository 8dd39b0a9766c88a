//! Error types for the BLE sessions

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::radio::RadioState;
use crate::core::bluetooth::types::{AdvertiseFailure, GattStatus};

/// Immediate rejection of a transport command, before anything reached the radio
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("link is not connected")]
    NotConnected,

    #[error("another operation is in progress")]
    Busy,

    #[error("not supported by this transport: {0}")]
    Unsupported(&'static str),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Failures observed by a session. They are logged and folded into a state
/// transition, or returned to the caller as a refusal for misuse.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Bluetooth not usable: {0}")]
    RadioUnavailable(RadioState),

    #[error("scan failed, errorCode={0}")]
    ScanFailure(i32),

    #[error("connection to {address} failed, {status}")]
    ConnectFailure { address: String, status: GattStatus },

    #[error("Service not found {0}")]
    ServiceNotFound(Uuid),

    #[error("service discovery reported GATT_INTERNAL_ERROR")]
    DiscoveryInternalError,

    #[error("no connected device")]
    NotConnected,

    #[error("characteristic unavailable {0}")]
    CharacteristicUnavailable(Uuid),

    #[error("characteristic not {property} {uuid}")]
    OperationNotPermitted { uuid: Uuid, property: &'static str },

    #[error("{operation} failed on {uuid}, {status}")]
    RemoteStatusError {
        operation: &'static str,
        uuid: Uuid,
        status: GattStatus,
    },

    #[error("timed out waiting in state {0}")]
    Timeout(&'static str),

    #[error("service registration failed: {0}")]
    ServiceRegistration(TransportError),

    #[error("advertise start failed: {0}")]
    AdvertiseStartFailure(AdvertiseFailure),

    #[error("transport rejected {operation}: {source}")]
    Transport {
        operation: &'static str,
        source: TransportError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SessionError::OperationNotPermitted {
            uuid: Uuid::nil(),
            property: "readable",
        };
        assert_eq!(
            err.to_string(),
            "characteristic not readable 00000000-0000-0000-0000-000000000000"
        );

        let err = SessionError::AdvertiseStartFailure(AdvertiseFailure::DataTooLarge);
        assert_eq!(
            err.to_string(),
            "advertise start failed: ADVERTISE_FAILED_DATA_TOO_LARGE"
        );
    }
}
