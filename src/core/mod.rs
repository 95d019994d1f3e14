//! Core functionality of the GATT central
//! This module contains the BLE central role: subscription matching, the attribute tree
//! and the central manager that routes radio callbacks into it.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{CentralEvent, CentralManager, GattError, RadioAdapter};
