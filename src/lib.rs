//! BLEProof library
//! Central and peripheral GATT sessions for the BLEProof service, plus the
//! host state and consumer commands that drive them.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
