//! The radio adapter seam
//! The core drives the radio through [`RadioAdapter`] commands; outcomes come back as
//! [`AdapterEvent`]s that the session feeds into the central manager.

use uuid::Uuid;

use crate::core::bluetooth::error::AdapterError;
use crate::core::bluetooth::types::{
    Advertisement, AttributeRef, CharacteristicProperties, CharacteristicRef, DeviceKey, ServiceRef,
};

/// Commands the core issues to the radio.
///
/// Every command only initiates work; the outcome arrives later as an [`AdapterEvent`].
/// An `Err` means the command could not even be issued (e.g. the adapter object behind a
/// reference is gone).
pub trait RadioAdapter: Send {
    fn start_scan(&mut self, services: Option<&[Uuid]>) -> Result<(), AdapterError>;

    fn stop_scan(&mut self) -> Result<(), AdapterError>;

    fn connect(&mut self, peripheral: &DeviceKey) -> Result<(), AdapterError>;

    fn disconnect(&mut self, peripheral: &DeviceKey) -> Result<(), AdapterError>;

    fn discover_services(
        &mut self,
        peripheral: &DeviceKey,
        filter: Option<&[Uuid]>,
    ) -> Result<(), AdapterError>;

    fn discover_characteristics(
        &mut self,
        service: &ServiceRef,
        filter: Option<&[Uuid]>,
    ) -> Result<(), AdapterError>;

    fn discover_descriptors(&mut self, characteristic: &CharacteristicRef) -> Result<(), AdapterError>;

    fn read_value(&mut self, attribute: &AttributeRef) -> Result<(), AdapterError>;

    fn write_value(&mut self, attribute: &AttributeRef, value: &[u8]) -> Result<(), AdapterError>;

    fn set_notify(&mut self, characteristic: &CharacteristicRef, enabled: bool) -> Result<(), AdapterError>;

    /// Drops every adapter-side object and starts a fresh session.
    fn reset(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Power state reported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Unsupported,
    Unknown,
}

/// A characteristic as reported by characteristic discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

impl DiscoveredCharacteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self { uuid, properties }
    }
}

/// Callbacks delivered by the adapter
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    PowerStateChanged(PowerState),
    /// The scan ended without being asked to, with the failure if there was one
    ScanStopped {
        error: Option<AdapterError>,
    },
    DeviceDiscovered {
        peripheral: DeviceKey,
        name: Option<String>,
        advertisement: Advertisement,
        rssi: i16,
    },
    Connected {
        peripheral: DeviceKey,
    },
    ConnectFailed {
        peripheral: DeviceKey,
        error: Option<AdapterError>,
    },
    Disconnected {
        peripheral: DeviceKey,
        error: Option<AdapterError>,
    },
    ServicesDiscovered {
        peripheral: DeviceKey,
        result: Result<Vec<Uuid>, AdapterError>,
    },
    CharacteristicsDiscovered {
        service: ServiceRef,
        result: Result<Vec<DiscoveredCharacteristic>, AdapterError>,
    },
    DescriptorsDiscovered {
        characteristic: CharacteristicRef,
        result: Result<Vec<Uuid>, AdapterError>,
    },
    ValueUpdated {
        attribute: AttributeRef,
        result: Result<Vec<u8>, AdapterError>,
    },
    WriteCompleted {
        attribute: AttributeRef,
        result: Result<(), AdapterError>,
    },
    NotifyStateChanged {
        characteristic: CharacteristicRef,
        result: Result<bool, AdapterError>,
    },
}
