//! Constants used throughout the application
//! This module contains the GATT identity shared by both roles, the
//! client characteristic configuration values, and default timing values.

use uuid::Uuid;

/// The UUID of the BLEProof service
pub const UUID_SERVICE: Uuid = Uuid::from_u128(0x25ae1441_05d3_4c5b_8281_93d4e07420cf);

/// The UUID of the characteristic the central reads from
pub const UUID_CHAR_FOR_READ: Uuid = Uuid::from_u128(0x25ae1442_05d3_4c5b_8281_93d4e07420cf);

/// The UUID of the characteristic the central writes to
pub const UUID_CHAR_FOR_WRITE: Uuid = Uuid::from_u128(0x25ae1443_05d3_4c5b_8281_93d4e07420cf);

/// The UUID of the characteristic the peripheral indicates on
pub const UUID_CHAR_FOR_INDICATE: Uuid = Uuid::from_u128(0x25ae1444_05d3_4c5b_8281_93d4e07420cf);

/// Standard Client Characteristic Configuration descriptor UUID
pub const UUID_CCC_DESCRIPTOR: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCC descriptor value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCC descriptor value enabling indications
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// CCC descriptor value disabling both notifications and indications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Default time allowed for a connection attempt, in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default time allowed for service discovery, in milliseconds
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 10_000;

/// Default time allowed for the indication subscription, in milliseconds
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 5_000;

/// First backoff step after two consecutive failures, in milliseconds
pub const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 500;

/// Upper bound on the reconnect backoff, in milliseconds
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Floor for every reconnect delay after the first, in milliseconds
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// Fixed reconnect delay used when connecting to a known device without scanning
pub const DEFAULT_DIRECT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Initial value served from the read characteristic
pub const DEFAULT_READ_VALUE: &str = "Hello from peripheral";
