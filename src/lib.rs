//! GATT central library
//! Scans for BLE peripherals matching a declarative subscription, connects to them,
//! discovers their GATT attribute tree and exposes read, write and notify operations
//! plus a broadcast event stream.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;

pub use crate::config::CentralConfig;
pub use crate::core::bluetooth::*;
pub use crate::state::Session;
