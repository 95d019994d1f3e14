//! Central manager
//! Owns the radio adapter and every discovered peripheral, and routes adapter callbacks
//! into the attribute tree and the event stream.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::manager_config::ManagerConfig;
use crate::core::bluetooth::adapter::{AdapterEvent, DiscoveredCharacteristic, PowerState, RadioAdapter};
use crate::core::bluetooth::attribute::{Characteristic, Descriptor, DiscoveryState, Service};
use crate::core::bluetooth::error::{AdapterError, GattError, GattResult};
use crate::core::bluetooth::events::{CentralEvent, EventBroadcaster};
use crate::core::bluetooth::notification::{NotificationHandler, ReadResult};
use crate::core::bluetooth::peripheral::{
    AdvertisementWatchdog, ConnectionHandler, ConnectionState, Peripheral, connect_error,
};
use crate::core::bluetooth::subscription::PeripheralSubscription;
use crate::core::bluetooth::types::{
    Advertisement, AttributeRef, CharacteristicRef, DescriptorRef, DeviceKey, NodeRef, ServiceRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unready,
    Ready,
}

/// Drives one radio adapter on behalf of one subscription.
///
/// Every method runs on the caller's context; the manager never locks its tree.
/// Share it across tasks through [`crate::state::Session`].
pub struct CentralManager<A: RadioAdapter> {
    adapter: A,
    subscription: PeripheralSubscription,
    config: ManagerConfig,
    state: ManagerState,
    scanning: bool,
    peripherals: HashMap<DeviceKey, Peripheral>,
    /// Children waiting for automatic discovery, drained after each adapter callback
    discovery_queue: VecDeque<NodeRef>,
    events: EventBroadcaster,
}

impl<A: RadioAdapter> CentralManager<A> {
    pub fn new(adapter: A, subscription: PeripheralSubscription, config: ManagerConfig) -> Self {
        info!("Creating central manager for subscription \"{}\"", subscription.name);
        Self {
            adapter,
            subscription,
            config,
            state: ManagerState::Unready,
            scanning: false,
            peripherals: HashMap::new(),
            discovery_queue: VecDeque::new(),
            events: EventBroadcaster::new(),
        }
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Shortcut for `events().subscribe()`
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<CentralEvent>> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ManagerState::Ready
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn subscription(&self) -> &PeripheralSubscription {
        &self.subscription
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn peripherals(&self) -> impl Iterator<Item = &Peripheral> {
        self.peripherals.values()
    }

    pub fn peripheral(&self, key: &DeviceKey) -> Option<&Peripheral> {
        self.peripherals.get(key)
    }

    pub fn service(&self, service: &ServiceRef) -> Option<&Service> {
        self.peripherals.get(&service.peripheral)?.service(&service.service)
    }

    pub fn characteristic(&self, characteristic: &CharacteristicRef) -> Option<&Characteristic> {
        self.peripherals
            .get(&characteristic.peripheral)?
            .characteristic(&characteristic.service, &characteristic.characteristic)
    }

    pub fn descriptor(&self, descriptor: &DescriptorRef) -> Option<&Descriptor> {
        self.peripherals
            .get(&descriptor.peripheral)?
            .characteristic(&descriptor.service, &descriptor.characteristic)?
            .descriptor(&descriptor.descriptor)
    }

    /// Starts a scan filtered by the subscription's service list.
    pub fn start_scanning(&mut self) -> GattResult<()> {
        if self.state != ManagerState::Ready {
            return Err(GattError::NotReady);
        }
        let services = self.subscription.service_uuids();
        self.adapter
            .start_scan(services.as_deref())
            .map_err(GattError::ScanFailed)?;
        self.scanning = true;
        info!("Started scanning for \"{}\"", self.subscription.name);
        self.events.emit(CentralEvent::StartedScanning { services });
        self.refresh_reception_states();
        Ok(())
    }

    /// Returns false when no scan was running.
    pub fn stop_scanning(&mut self) -> bool {
        if !self.scanning {
            return false;
        }
        if let Err(e) = self.adapter.stop_scan() {
            error!("Failed to stop scanning: {}", e);
            self.events.emit(CentralEvent::Error(GattError::ScanFailed(e)));
        }
        self.scanning = false;
        info!("Stopped scanning");
        self.events.emit(CentralEvent::StoppedScanning);
        self.refresh_reception_states();
        true
    }

    /// Tears the session down and rebuilds it for `subscription`.
    ///
    /// Every known peripheral is discarded with its attribute tree and pending handlers.
    pub fn change_subscription(&mut self, subscription: PeripheralSubscription) {
        info!(
            "Changing subscription from \"{}\" to \"{}\"",
            self.subscription.name, subscription.name
        );
        let was_scanning = self.stop_scanning();

        self.discovery_queue.clear();
        for (key, mut peripheral) in self.peripherals.drain() {
            if is_linked(peripheral.state()) {
                if let Err(e) = self.adapter.disconnect(&key) {
                    warn!("Failed to disconnect discarded peripheral {}: {}", key, e);
                }
            }
            peripheral.drop_handlers();
            self.events.emit(CentralEvent::PeripheralRemoved { peripheral: key });
        }
        if let Err(e) = self.adapter.reset() {
            warn!("Adapter reset failed: {}", e);
        }

        self.subscription = subscription;
        self.events.emit(CentralEvent::SubscriptionUpdated {
            name: self.subscription.name.clone(),
        });

        if was_scanning {
            if let Err(e) = self.start_scanning() {
                error!("Failed to resume scanning: {}", e);
                self.events.emit(CentralEvent::Error(e));
            }
        }
    }

    /// Forgets a peripheral, disconnecting it first if needed. Returns false if it was unknown.
    pub fn remove_peripheral(&mut self, key: &DeviceKey) -> bool {
        let Some(mut peripheral) = self.peripherals.remove(key) else {
            return false;
        };
        if is_linked(peripheral.state()) {
            if let Err(e) = self.adapter.disconnect(key) {
                warn!("Failed to disconnect removed peripheral {}: {}", key, e);
            }
        }
        peripheral.drop_handlers();
        self.discovery_queue.retain(|node| node.peripheral() != key);
        info!("Removed {}", peripheral);
        self.events.emit(CentralEvent::PeripheralRemoved {
            peripheral: key.clone(),
        });
        true
    }

    pub fn connect(&mut self, key: &DeviceKey, handler: Option<ConnectionHandler>) -> GattResult<()> {
        let peripheral = self
            .peripherals
            .get_mut(key)
            .ok_or_else(|| GattError::UnknownPeripheral(key.clone()))?;
        peripheral.connect(&mut self.adapter, handler)?;
        self.events.emit(CentralEvent::PeripheralStateChanged {
            peripheral: key.clone(),
            state: peripheral.state(),
        });
        if let Some(state) = peripheral.update_reception_state(self.scanning) {
            self.events.emit(CentralEvent::ReceptionStateChanged {
                peripheral: key.clone(),
                state,
            });
        }
        Ok(())
    }

    pub fn disconnect(&mut self, key: &DeviceKey, handler: Option<ConnectionHandler>) -> GattResult<()> {
        let peripheral = self
            .peripherals
            .get_mut(key)
            .ok_or_else(|| GattError::UnknownPeripheral(key.clone()))?;
        peripheral.disconnect(&mut self.adapter, handler)?;
        self.events.emit(CentralEvent::PeripheralStateChanged {
            peripheral: key.clone(),
            state: peripheral.state(),
        });
        Ok(())
    }

    pub fn discover_services(&mut self, key: &DeviceKey) -> GattResult<()> {
        let filter = self.subscription.service_uuids();
        self.peripherals
            .get_mut(key)
            .ok_or_else(|| GattError::UnknownPeripheral(key.clone()))?
            .discover_services(&mut self.adapter, filter.as_deref())
    }

    pub fn discover_characteristics(&mut self, service: &ServiceRef) -> GattResult<()> {
        let filter = self.subscription.characteristic_uuids(&service.service);
        service_mut(&mut self.peripherals, service)?.discover(&mut self.adapter, filter.as_deref())
    }

    pub fn discover_descriptors(&mut self, characteristic: &CharacteristicRef) -> GattResult<()> {
        characteristic_mut(&mut self.peripherals, characteristic)?.discover(&mut self.adapter)
    }

    /// Reads a characteristic; `handler` receives the value or the transport failure.
    pub fn read<F>(&mut self, characteristic: &CharacteristicRef, handler: F) -> GattResult<()>
    where
        F: FnOnce(ReadResult) + Send + 'static,
    {
        characteristic_mut(&mut self.peripherals, characteristic)?
            .read(&mut self.adapter, Box::new(handler))
    }

    /// Writes a characteristic with response.
    pub fn write<F>(&mut self, characteristic: &CharacteristicRef, value: &[u8], handler: F) -> GattResult<()>
    where
        F: FnOnce(Result<(), GattError>) + Send + 'static,
    {
        characteristic_mut(&mut self.peripherals, characteristic)?
            .write(&mut self.adapter, value, Box::new(handler))
    }

    /// Enables notifications with `handler`, or disables them when `enabled` is false.
    pub fn set_notify(
        &mut self,
        characteristic: &CharacteristicRef,
        enabled: bool,
        handler: Option<NotificationHandler>,
    ) -> GattResult<()> {
        characteristic_mut(&mut self.peripherals, characteristic)?
            .set_notify(&mut self.adapter, enabled, handler)
    }

    pub fn read_descriptor<F>(&mut self, descriptor: &DescriptorRef, handler: F) -> GattResult<()>
    where
        F: FnOnce(ReadResult) + Send + 'static,
    {
        descriptor_mut(&mut self.peripherals, descriptor)?.read(&mut self.adapter, Box::new(handler))
    }

    pub fn write_descriptor<F>(&mut self, descriptor: &DescriptorRef, value: &[u8], handler: F) -> GattResult<()>
    where
        F: FnOnce(Result<(), GattError>) + Send + 'static,
    {
        descriptor_mut(&mut self.peripherals, descriptor)?
            .write(&mut self.adapter, value, Box::new(handler))
    }

    /// Routes one adapter callback, then issues any automatic discovery it queued.
    pub fn handle_event(&mut self, event: AdapterEvent) {
        debug!("Adapter event: {:?}", event);
        match event {
            AdapterEvent::PowerStateChanged(state) => self.power_state_changed(state),
            AdapterEvent::ScanStopped { error } => self.scan_stopped(error),
            AdapterEvent::DeviceDiscovered {
                peripheral,
                name,
                advertisement,
                rssi,
            } => self.device_discovered(peripheral, name, advertisement, rssi),
            AdapterEvent::Connected { peripheral } => self.connected(peripheral),
            AdapterEvent::ConnectFailed { peripheral, error } => self.connect_failed(peripheral, error),
            AdapterEvent::Disconnected { peripheral, error } => self.disconnected(peripheral, error),
            AdapterEvent::ServicesDiscovered { peripheral, result } => {
                self.services_discovered(peripheral, result)
            }
            AdapterEvent::CharacteristicsDiscovered { service, result } => {
                self.characteristics_discovered(service, result)
            }
            AdapterEvent::DescriptorsDiscovered {
                characteristic,
                result,
            } => self.descriptors_discovered(characteristic, result),
            AdapterEvent::ValueUpdated { attribute, result } => self.value_updated(attribute, result),
            AdapterEvent::WriteCompleted { attribute, result } => self.write_completed(attribute, result),
            AdapterEvent::NotifyStateChanged {
                characteristic,
                result,
            } => self.notify_state_changed(characteristic, result),
        }
        self.drain_discovery_queue();
    }

    /// Checks every advertisement deadline against `now`.
    pub fn check_advertisement_timeouts(&mut self, now: Instant) {
        for peripheral in self.peripherals.values_mut() {
            if peripheral.check_watchdog(now) {
                info!("{} stopped advertising", peripheral);
            }
            if let Some(state) = peripheral.update_reception_state(self.scanning) {
                self.events.emit(CentralEvent::ReceptionStateChanged {
                    peripheral: peripheral.key().clone(),
                    state,
                });
            }
        }
    }

    fn refresh_reception_states(&mut self) {
        for peripheral in self.peripherals.values_mut() {
            if let Some(state) = peripheral.update_reception_state(self.scanning) {
                self.events.emit(CentralEvent::ReceptionStateChanged {
                    peripheral: peripheral.key().clone(),
                    state,
                });
            }
        }
    }

    fn report(&self, error: GattError) {
        warn!("{}", error);
        self.events.emit(CentralEvent::Error(error));
    }

    fn drain_discovery_queue(&mut self) {
        while let Some(node) = self.discovery_queue.pop_front() {
            let result = match &node {
                NodeRef::Peripheral(key) => self.discover_services(key),
                NodeRef::Service(service) => self.discover_characteristics(service),
                NodeRef::Characteristic(characteristic) => self.discover_descriptors(characteristic),
            };
            if let Err(e) = result {
                self.report(e);
            }
        }
    }

    fn power_state_changed(&mut self, power: PowerState) {
        match power {
            PowerState::PoweredOn => {
                if self.state != ManagerState::Ready {
                    info!("Bluetooth adapter is powered on.");
                    self.state = ManagerState::Ready;
                    self.events.emit(CentralEvent::ManagerReady);
                }
            }
            PowerState::PoweredOff => {
                if self.state == ManagerState::Ready {
                    info!("Bluetooth adapter is powered off.");
                    self.state = ManagerState::Unready;
                    self.events.emit(CentralEvent::ManagerUnready);
                    self.radio_lost("adapter powered off");
                }
            }
            PowerState::Unsupported => {
                error!("Bluetooth low energy is not supported on this adapter.");
                self.state = ManagerState::Unready;
                self.events.emit(CentralEvent::Error(GattError::BleNotSupported));
                self.radio_lost("adapter unsupported");
            }
            PowerState::Unknown => debug!("Adapter power state unknown"),
        }
    }

    fn scan_stopped(&mut self, error: Option<AdapterError>) {
        if !self.scanning {
            debug!("Ignoring end of a scan that was already stopped");
            return;
        }
        self.scanning = false;
        if let Some(source) = error {
            error!("Scan aborted: {}", source);
            self.events.emit(CentralEvent::Error(GattError::ScanFailed(source)));
        } else {
            info!("Scan ended by the adapter");
        }
        self.events.emit(CentralEvent::StoppedScanning);
        self.refresh_reception_states();
    }

    /// The radio went away: the scan ends and every link is treated as dropped.
    fn radio_lost(&mut self, reason: &str) {
        if self.scanning {
            self.scanning = false;
            self.events.emit(CentralEvent::StoppedScanning);
        }
        let linked: Vec<DeviceKey> = self
            .peripherals
            .values()
            .filter(|peripheral| peripheral.state() != ConnectionState::Disconnected)
            .map(|peripheral| peripheral.key().clone())
            .collect();
        for key in linked {
            self.disconnected(key, Some(AdapterError::Transport(reason.to_string())));
        }
        self.refresh_reception_states();
    }

    fn device_discovered(
        &mut self,
        key: DeviceKey,
        name: Option<String>,
        advertisement: Advertisement,
        rssi: i16,
    ) {
        let now = Instant::now();
        if let Some(peripheral) = self.peripherals.get_mut(&key) {
            let (added, rssi_changed) = peripheral.advertisement_received(&advertisement, rssi, now);
            if !added.is_empty() {
                self.events.emit(CentralEvent::AdvertisementUpdated {
                    peripheral: key.clone(),
                    added,
                });
            }
            if let Some(rssi) = rssi_changed {
                self.events.emit(CentralEvent::RssiUpdated {
                    peripheral: key.clone(),
                    rssi,
                });
            }
            if let Some(state) = peripheral.update_reception_state(self.scanning) {
                self.events.emit(CentralEvent::ReceptionStateChanged { peripheral: key, state });
            }
            return;
        }

        let watchdog = self
            .subscription
            .monitor_advertisements
            .then(|| AdvertisementWatchdog::new(self.config.advertisement_timeout(), now));
        let mut peripheral = Peripheral::new(key.clone(), name, advertisement, rssi, watchdog);
        peripheral.update_reception_state(self.scanning);
        info!("Discovered {} with RSSI {}", peripheral, rssi);
        self.events.emit(CentralEvent::PeripheralDiscovered {
            peripheral: key.clone(),
            name: peripheral.name(),
            advertisement: peripheral.advertisement().clone(),
            rssi,
        });
        let connectable = peripheral.is_connectable();
        self.peripherals.insert(key.clone(), peripheral);

        if self.subscription.auto_connect {
            if !connectable {
                debug!("Not auto-connecting to {}: not connectable", key);
            } else if let Err(e) = self.connect(&key, None) {
                self.report(e);
            }
        }
    }

    fn connected(&mut self, key: DeviceKey) {
        let Some(peripheral) = self.peripherals.get_mut(&key) else {
            self.report(GattError::UnknownPeripheral(key));
            return;
        };
        info!("Connected to {}", peripheral);
        if let Some(handler) = peripheral.connected() {
            handler(Ok(()));
        }
        self.events.emit(CentralEvent::PeripheralStateChanged {
            peripheral: key.clone(),
            state: ConnectionState::Connected,
        });
        if let Some(state) = peripheral.update_reception_state(self.scanning) {
            self.events.emit(CentralEvent::ReceptionStateChanged {
                peripheral: key.clone(),
                state,
            });
        }
        if self.subscription.auto_discover {
            self.discovery_queue.push_back(NodeRef::Peripheral(key));
        }
    }

    fn connect_failed(&mut self, key: DeviceKey, error: Option<AdapterError>) {
        let Some(peripheral) = self.peripherals.get_mut(&key) else {
            self.report(GattError::UnknownPeripheral(key));
            return;
        };
        let failure = connect_error(&key, error);
        error!("{}", failure);
        if let Some(handler) = peripheral.connect_failed() {
            handler(Err(failure.clone()));
        }
        self.events.emit(CentralEvent::Error(failure));
        self.events.emit(CentralEvent::PeripheralStateChanged {
            peripheral: key.clone(),
            state: ConnectionState::Disconnected,
        });
        if let Some(state) = peripheral.update_reception_state(self.scanning) {
            self.events.emit(CentralEvent::ReceptionStateChanged { peripheral: key, state });
        }
    }

    fn disconnected(&mut self, key: DeviceKey, error: Option<AdapterError>) {
        let Some(peripheral) = self.peripherals.get_mut(&key) else {
            self.report(GattError::UnknownPeripheral(key));
            return;
        };
        info!("Disconnected from {}", peripheral);
        let (connect_handler, disconnect_handler) = peripheral.disconnected();
        if let Some(handler) = connect_handler {
            handler(Err(connect_error(&key, error.clone())));
        }
        let failure = error.map(|source| GattError::Disconnected {
            peripheral: key.clone(),
            source,
        });
        if let Some(handler) = disconnect_handler {
            handler(failure.clone().map_or(Ok(()), Err));
        }
        if let Some(failure) = failure {
            error!("{}", failure);
            self.events.emit(CentralEvent::Error(failure));
        }
        self.events.emit(CentralEvent::PeripheralStateChanged {
            peripheral: key.clone(),
            state: ConnectionState::Disconnected,
        });
        if let Some(state) = peripheral.update_reception_state(self.scanning) {
            self.events.emit(CentralEvent::ReceptionStateChanged {
                peripheral: key.clone(),
                state,
            });
        }
        self.discovery_queue.retain(|node| node.peripheral() != &key);
    }

    fn services_discovered(&mut self, key: DeviceKey, result: Result<Vec<Uuid>, AdapterError>) {
        let Some(peripheral) = self.peripherals.get_mut(&key) else {
            self.report(GattError::UnknownPeripheral(key));
            return;
        };
        let node = NodeRef::Peripheral(key.clone());
        let reported = match result {
            Ok(reported) => reported,
            Err(source) => {
                let failure = discovery_failure(peripheral.discovery_state(), node, source);
                self.report(failure);
                return;
            }
        };
        let outcome = match peripheral.complete_service_discovery(reported, &self.subscription) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        info!("Discovered {} service(s) of {}", outcome.added.len(), peripheral);
        for error in outcome.errors {
            self.report(error);
        }
        if self.subscription.auto_discover {
            self.discovery_queue.extend(
                outcome
                    .added
                    .into_iter()
                    .map(|uuid| NodeRef::Service(ServiceRef::new(key.clone(), uuid))),
            );
        }
        self.events.emit(CentralEvent::ServicesDiscovered { peripheral: key });
    }

    fn characteristics_discovered(
        &mut self,
        service_ref: ServiceRef,
        result: Result<Vec<DiscoveredCharacteristic>, AdapterError>,
    ) {
        let service = match service_mut(&mut self.peripherals, &service_ref) {
            Ok(service) => service,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        let node = NodeRef::Service(service_ref.clone());
        let reported = match result {
            Ok(reported) => reported,
            Err(source) => {
                let failure = discovery_failure(service.discovery_state(), node, source);
                self.report(failure);
                return;
            }
        };
        let outcome = match service.complete_discovery(reported, &self.subscription) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        info!("Discovered {} characteristic(s) of {}", outcome.added.len(), service);
        for error in outcome.errors {
            self.report(error);
        }
        if self.subscription.auto_discover {
            for uuid in outcome.added {
                if self.subscription.wants_descriptors(&service_ref.service, &uuid) {
                    self.discovery_queue
                        .push_back(NodeRef::Characteristic(service_ref.characteristic(uuid)));
                }
            }
        }
        self.events.emit(CentralEvent::CharacteristicsDiscovered { service: service_ref });
    }

    fn descriptors_discovered(&mut self, characteristic_ref: CharacteristicRef, result: Result<Vec<Uuid>, AdapterError>) {
        let characteristic = match characteristic_mut(&mut self.peripherals, &characteristic_ref) {
            Ok(characteristic) => characteristic,
            Err(_) => {
                self.report(GattError::UnknownNode(NodeRef::Characteristic(characteristic_ref)));
                return;
            }
        };
        let node = NodeRef::Characteristic(characteristic_ref.clone());
        let reported = match result {
            Ok(reported) => reported,
            Err(source) => {
                let failure = discovery_failure(characteristic.discovery_state(), node, source);
                self.report(failure);
                return;
            }
        };
        match characteristic.complete_discovery(reported) {
            Ok(outcome) => {
                info!("Discovered {} descriptor(s) of {}", outcome.added.len(), characteristic);
                self.events.emit(CentralEvent::DescriptorsDiscovered {
                    characteristic: characteristic_ref,
                });
            }
            Err(e) => self.report(e),
        }
    }

    fn value_updated(&mut self, attribute: AttributeRef, result: Result<Vec<u8>, AdapterError>) {
        let routing = self.config.notification_routing;
        let errors = match &attribute {
            AttributeRef::Characteristic(reference) => {
                characteristic_mut(&mut self.peripherals, reference)
                    .map(|characteristic| characteristic.value_updated(result, routing))
            }
            AttributeRef::Descriptor(reference) => descriptor_mut(&mut self.peripherals, reference)
                .map(|descriptor| descriptor.value_updated(result)),
        };
        match errors {
            Ok(errors) => errors.into_iter().for_each(|e| self.report(e)),
            Err(e) => self.report(e),
        }
    }

    fn write_completed(&mut self, attribute: AttributeRef, result: Result<(), AdapterError>) {
        let errors = match &attribute {
            AttributeRef::Characteristic(reference) => {
                characteristic_mut(&mut self.peripherals, reference)
                    .map(|characteristic| characteristic.write_completed(result))
            }
            AttributeRef::Descriptor(reference) => descriptor_mut(&mut self.peripherals, reference)
                .map(|descriptor| descriptor.write_completed(result)),
        };
        match errors {
            Ok(errors) => errors.into_iter().for_each(|e| self.report(e)),
            Err(e) => self.report(e),
        }
    }

    fn notify_state_changed(&mut self, reference: CharacteristicRef, result: Result<bool, AdapterError>) {
        match characteristic_mut(&mut self.peripherals, &reference) {
            Ok(characteristic) => {
                if let Some(e) = characteristic.notify_state_changed(result) {
                    self.report(e);
                }
            }
            Err(e) => self.report(e),
        }
    }
}

/// A peripheral the radio holds a link to, or is establishing one with
fn is_linked(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected | ConnectionState::Connecting)
}

/// A failed discovery callback is only legitimate for a node that is waiting for one.
fn discovery_failure(state: DiscoveryState, node: NodeRef, source: AdapterError) -> GattError {
    if state == DiscoveryState::InProgress {
        GattError::DiscoveryFailed { node, source }
    } else {
        GattError::UnexpectedDiscovery(node)
    }
}

fn service_mut<'a>(
    peripherals: &'a mut HashMap<DeviceKey, Peripheral>,
    reference: &ServiceRef,
) -> GattResult<&'a mut Service> {
    peripherals
        .get_mut(&reference.peripheral)
        .and_then(|peripheral| peripheral.service_mut(&reference.service))
        .ok_or_else(|| GattError::UnknownNode(NodeRef::Service(reference.clone())))
}

fn characteristic_mut<'a>(
    peripherals: &'a mut HashMap<DeviceKey, Peripheral>,
    reference: &CharacteristicRef,
) -> GattResult<&'a mut Characteristic> {
    peripherals
        .get_mut(&reference.peripheral)
        .and_then(|peripheral| peripheral.characteristic_mut(&reference.service, &reference.characteristic))
        .ok_or_else(|| GattError::UnknownAttribute(AttributeRef::Characteristic(reference.clone())))
}

fn descriptor_mut<'a>(
    peripherals: &'a mut HashMap<DeviceKey, Peripheral>,
    reference: &DescriptorRef,
) -> GattResult<&'a mut Descriptor> {
    peripherals
        .get_mut(&reference.peripheral)
        .and_then(|peripheral| {
            peripheral.descriptor_mut(&reference.service, &reference.characteristic, &reference.descriptor)
        })
        .ok_or_else(|| GattError::UnknownAttribute(AttributeRef::Descriptor(reference.clone())))
}
