#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use gatt_central::config::manager_config::ManagerConfig;
use gatt_central::core::bluetooth::constants::{ADV_IS_CONNECTABLE, ADV_LOCAL_NAME};
use gatt_central::{
    AdapterError, AdapterEvent, Advertisement, AdvertisementValue, AttributeRef, CentralEvent,
    CentralManager, CharacteristicRef, ConnectionState, DeviceKey, GattError, PeripheralSubscription,
    PowerState, RadioAdapter, ServiceRef,
};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// A command issued to the mock adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCommand {
    StartScan(Option<Vec<Uuid>>),
    StopScan,
    Connect(DeviceKey),
    Disconnect(DeviceKey),
    DiscoverServices(DeviceKey, Option<Vec<Uuid>>),
    DiscoverCharacteristics(ServiceRef, Option<Vec<Uuid>>),
    DiscoverDescriptors(CharacteristicRef),
    ReadValue(AttributeRef),
    WriteValue(AttributeRef, Vec<u8>),
    SetNotify(CharacteristicRef, bool),
    Reset,
}

/// Records every command; clones share the same log so a test can keep a handle
/// after moving the adapter into the manager.
#[derive(Clone, Default)]
pub struct MockAdapter {
    commands: Arc<Mutex<Vec<AdapterCommand>>>,
    failure: Arc<Mutex<Option<AdapterError>>>,
}

impl MockAdapter {
    pub fn commands(&self) -> Vec<AdapterCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// Makes every following command fail with `error` until reset with `None`.
    pub fn fail_with(&self, error: Option<AdapterError>) {
        *self.failure.lock().unwrap() = error;
    }

    fn record(&mut self, command: AdapterCommand) -> Result<(), AdapterError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

impl RadioAdapter for MockAdapter {
    fn start_scan(&mut self, services: Option<&[Uuid]>) -> Result<(), AdapterError> {
        self.record(AdapterCommand::StartScan(services.map(<[Uuid]>::to_vec)))
    }

    fn stop_scan(&mut self) -> Result<(), AdapterError> {
        self.record(AdapterCommand::StopScan)
    }

    fn connect(&mut self, peripheral: &DeviceKey) -> Result<(), AdapterError> {
        self.record(AdapterCommand::Connect(peripheral.clone()))
    }

    fn disconnect(&mut self, peripheral: &DeviceKey) -> Result<(), AdapterError> {
        self.record(AdapterCommand::Disconnect(peripheral.clone()))
    }

    fn discover_services(&mut self, peripheral: &DeviceKey, filter: Option<&[Uuid]>) -> Result<(), AdapterError> {
        self.record(AdapterCommand::DiscoverServices(
            peripheral.clone(),
            filter.map(<[Uuid]>::to_vec),
        ))
    }

    fn discover_characteristics(&mut self, service: &ServiceRef, filter: Option<&[Uuid]>) -> Result<(), AdapterError> {
        self.record(AdapterCommand::DiscoverCharacteristics(
            service.clone(),
            filter.map(<[Uuid]>::to_vec),
        ))
    }

    fn discover_descriptors(&mut self, characteristic: &CharacteristicRef) -> Result<(), AdapterError> {
        self.record(AdapterCommand::DiscoverDescriptors(characteristic.clone()))
    }

    fn read_value(&mut self, attribute: &AttributeRef) -> Result<(), AdapterError> {
        self.record(AdapterCommand::ReadValue(attribute.clone()))
    }

    fn write_value(&mut self, attribute: &AttributeRef, value: &[u8]) -> Result<(), AdapterError> {
        self.record(AdapterCommand::WriteValue(attribute.clone(), value.to_vec()))
    }

    fn set_notify(&mut self, characteristic: &CharacteristicRef, enabled: bool) -> Result<(), AdapterError> {
        self.record(AdapterCommand::SetNotify(characteristic.clone(), enabled))
    }

    fn reset(&mut self) -> Result<(), AdapterError> {
        self.record(AdapterCommand::Reset)
    }
}

pub struct Harness {
    pub manager: CentralManager<MockAdapter>,
    pub adapter: MockAdapter,
    pub events: UnboundedReceiver<Arc<CentralEvent>>,
}

impl Harness {
    pub fn new(subscription: PeripheralSubscription) -> Self {
        Self::with_config(subscription, ManagerConfig::default())
    }

    pub fn with_config(subscription: PeripheralSubscription, config: ManagerConfig) -> Self {
        let adapter = MockAdapter::default();
        let manager = CentralManager::new(adapter.clone(), subscription, config);
        let events = manager.subscribe();
        Self { manager, adapter, events }
    }

    /// Powered on, with the readiness event and command log cleared
    pub fn ready(subscription: PeripheralSubscription) -> Self {
        let mut harness = Self::new(subscription);
        harness.manager.handle_event(AdapterEvent::PowerStateChanged(PowerState::PoweredOn));
        harness.take_events();
        harness
    }

    pub fn take_events(&mut self) -> Vec<CentralEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    pub fn errors(events: &[CentralEvent]) -> Vec<GattError> {
        events
            .iter()
            .filter_map(|event| match event {
                CentralEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn discover_device(&mut self, key: &str, advertisement: Advertisement, rssi: i16) {
        self.manager.handle_event(AdapterEvent::DeviceDiscovered {
            peripheral: DeviceKey::from(key),
            name: None,
            advertisement,
            rssi,
        });
    }

    /// Discovered and connected, with events and commands cleared
    pub fn connected_device(&mut self, key: &str) -> DeviceKey {
        let device = DeviceKey::from(key);
        self.discover_device(key, connectable(key), -60);
        if self.manager.peripheral(&device).map(|p| p.state()) == Some(ConnectionState::Disconnected) {
            self.manager.connect(&device, None).unwrap();
        }
        self.manager.handle_event(AdapterEvent::Connected {
            peripheral: device.clone(),
        });
        self.take_events();
        self.adapter.clear();
        device
    }
}

pub fn connectable(name: &str) -> Advertisement {
    Advertisement::new()
        .with(ADV_LOCAL_NAME, AdvertisementValue::Text(name.to_string()))
        .with(ADV_IS_CONNECTABLE, AdvertisementValue::Bool(true))
}
