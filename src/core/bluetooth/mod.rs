//! Bluetooth functionality of the GATT central
//! This module handles scanning, connecting, walking the GATT attribute tree of
//! peripherals and reading, writing and subscribing to their attributes.

pub mod adapter;
pub mod attribute;
#[cfg(feature = "bluest")]
pub mod bluest_adapter;
pub mod constants;
pub mod error;
pub mod events;
pub mod manager;
pub mod notification;
pub mod peripheral;
pub mod subscription;
pub mod types;

// Re-export types that should be publicly accessible
pub use adapter::{AdapterEvent, DiscoveredCharacteristic, PowerState, RadioAdapter};
pub use attribute::{Characteristic, Descriptor, DiscoveryState, Operation, Service};
#[cfg(feature = "bluest")]
pub use bluest_adapter::BluestAdapter;
pub use error::{AdapterError, ErrorKind, GattError, GattResult};
pub use events::{CentralEvent, EventBroadcaster, ListenerHandle};
pub use manager::{CentralManager, ManagerState};
pub use notification::{NotificationHandler, NotificationRouting, ReadHandler, ReadResult, WriteHandler};
pub use peripheral::{AdvertisementWatchdog, ConnectionHandler, ConnectionState, Peripheral, ReceptionState};
pub use subscription::{CharacteristicSubscription, Match, PeripheralSubscription, ServiceSubscription};
pub use types::{
    Advertisement, AdvertisementValue, AttributeRef, CharacteristicProperties, CharacteristicRef,
    DescriptorRef, DeviceKey, Identifier, NodeRef, ServiceRef,
};
