//! Core functionality for BLEProof
//! This module contains the BLE sessions and the transports they run on.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{CentralSession, PeripheralSession, RadioAvailabilityMonitor};
