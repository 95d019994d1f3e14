//! Radio adapter backed by the platform Bluetooth stack through `bluest`
//! Every command spawns a task on the runtime; its outcome is sent back as an
//! [`AdapterEvent`] on the channel returned by [`BluestAdapter::new`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use bluest::{Adapter, AdvertisementData, Characteristic, ConnectionEvent, Descriptor, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{AdapterEvent, DiscoveredCharacteristic, PowerState, RadioAdapter};
use crate::core::bluetooth::constants::{
    ADV_IS_CONNECTABLE, ADV_LOCAL_NAME, ADV_MANUFACTURER_DATA, ADV_SERVICE_UUIDS, ADV_TX_POWER_LEVEL,
    CONNECT_RETRY_DELAY_MS, MAX_CONNECT_RETRIES, POWER_POLL_INTERVAL_MS,
};
use crate::core::bluetooth::error::AdapterError;
use crate::core::bluetooth::types::{
    Advertisement, AdvertisementValue, AttributeRef, CharacteristicProperties, CharacteristicRef,
    DescriptorRef, DeviceKey, ServiceRef,
};

/// Live `bluest` objects behind the references the core hands out
#[derive(Default)]
struct Registry {
    devices: HashMap<DeviceKey, Device>,
    services: HashMap<ServiceRef, Service>,
    characteristics: HashMap<CharacteristicRef, Characteristic>,
    descriptors: HashMap<DescriptorRef, Descriptor>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn transport(e: bluest::Error) -> AdapterError {
    AdapterError::Transport(e.to_string())
}

/// Drops every attribute object of a peripheral whose link is gone.
fn forget_attributes(registry: &SharedRegistry, key: &DeviceKey) {
    let mut registry = lock(registry);
    registry.services.retain(|r, _| r.peripheral != *key);
    registry.characteristics.retain(|r, _| r.peripheral != *key);
    registry.descriptors.retain(|r, _| r.peripheral != *key);
}

pub struct BluestAdapter {
    adapter: Adapter,
    runtime: Handle,
    events: mpsc::UnboundedSender<AdapterEvent>,
    registry: SharedRegistry,
    scan_token: Option<CancellationToken>,
    notify_tokens: HashMap<CharacteristicRef, CancellationToken>,
    /// Link watchers of connected peripherals
    link_tokens: HashMap<DeviceKey, CancellationToken>,
    power_token: CancellationToken,
}

impl BluestAdapter {
    /// Opens the default adapter. Must be called from within a tokio runtime.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<AdapterEvent>)> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Self {
            adapter,
            runtime: Handle::current(),
            events: tx,
            registry: SharedRegistry::default(),
            scan_token: None,
            notify_tokens: HashMap::new(),
            link_tokens: HashMap::new(),
            power_token: CancellationToken::new(),
        };
        this.spawn_power_monitor();
        Ok((this, rx))
    }

    /// Reports the power state once the adapter is available and on every later change.
    fn spawn_power_monitor(&self) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let cancel_token = self.power_token.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.wait_available().await {
                error!("Bluetooth adapter never became available: {}", e);
                let _ = events.send(AdapterEvent::PowerStateChanged(PowerState::Unsupported));
                return;
            }
            info!("Bluetooth adapter is available.");
            let _ = events.send(AdapterEvent::PowerStateChanged(PowerState::PoweredOn));

            let mut available = true;
            let mut ticker = tokio::time::interval(Duration::from_millis(POWER_POLL_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_available = adapter.is_available().await.unwrap_or(false);
                        if now_available != available {
                            available = now_available;
                            let state = if available { PowerState::PoweredOn } else { PowerState::PoweredOff };
                            if events.send(AdapterEvent::PowerStateChanged(state)).is_err() {
                                break;
                            }
                        }
                    }
                    _ = cancel_token.cancelled() => break,
                }
            }
        });
    }

    fn send(events: &mpsc::UnboundedSender<AdapterEvent>, event: AdapterEvent) {
        if let Err(e) = events.send(event) {
            error!("Failed to deliver adapter event: {}", e);
        }
    }

    fn device(&self, key: &DeviceKey) -> Result<Device, AdapterError> {
        lock(&self.registry)
            .devices
            .get(key)
            .cloned()
            .ok_or_else(|| AdapterError::Unresolvable(key.to_string()))
    }

    fn service(&self, reference: &ServiceRef) -> Result<Service, AdapterError> {
        lock(&self.registry)
            .services
            .get(reference)
            .cloned()
            .ok_or_else(|| AdapterError::Unresolvable(reference.to_string()))
    }

    fn characteristic(&self, reference: &CharacteristicRef) -> Result<Characteristic, AdapterError> {
        lock(&self.registry)
            .characteristics
            .get(reference)
            .cloned()
            .ok_or_else(|| AdapterError::Unresolvable(reference.to_string()))
    }

    fn descriptor(&self, reference: &DescriptorRef) -> Result<Descriptor, AdapterError> {
        lock(&self.registry)
            .descriptors
            .get(reference)
            .cloned()
            .ok_or_else(|| AdapterError::Unresolvable(reference.to_string()))
    }

    fn extract_mac_address(device_id_str: &str) -> Option<String> {
        let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
        re.find_iter(device_id_str)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }

    fn advertisement(data: &AdvertisementData) -> Advertisement {
        let mut advertisement =
            Advertisement::new().with(ADV_IS_CONNECTABLE, AdvertisementValue::Bool(data.is_connectable));
        if let Some(name) = &data.local_name {
            advertisement = advertisement.with(ADV_LOCAL_NAME, AdvertisementValue::Text(name.clone()));
        }
        if let Some(manufacturer) = &data.manufacturer_data {
            let mut bytes = manufacturer.company_id.to_le_bytes().to_vec();
            bytes.extend_from_slice(&manufacturer.data);
            advertisement = advertisement.with(ADV_MANUFACTURER_DATA, AdvertisementValue::Bytes(bytes));
        }
        if !data.services.is_empty() {
            advertisement = advertisement.with(
                ADV_SERVICE_UUIDS,
                AdvertisementValue::Uuids(data.services.iter().copied().collect()),
            );
        }
        if let Some(tx_power) = data.tx_power_level {
            advertisement =
                advertisement.with(ADV_TX_POWER_LEVEL, AdvertisementValue::Integer(i64::from(tx_power)));
        }
        advertisement
    }

    fn properties(properties: bluest::CharacteristicProperties) -> CharacteristicProperties {
        CharacteristicProperties {
            broadcast: properties.broadcast,
            read: properties.read,
            write_without_response: properties.write_without_response,
            write: properties.write,
            notify: properties.notify,
            indicate: properties.indicate,
            authenticated_signed_writes: properties.authenticated_signed_writes,
            extended_properties: properties.extended_properties,
            ..Default::default()
        }
    }

    async fn scan_task(
        adapter: Adapter,
        filter: Vec<Uuid>,
        registry: SharedRegistry,
        events: mpsc::UnboundedSender<AdapterEvent>,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&filter).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let device = discovered_device.device;
                            let id = device.id().to_string();
                            let key = DeviceKey::new(id.clone());
                            debug!(
                                "Found device - ID: {}, Address: {}, RSSI: {:?}",
                                id,
                                Self::extract_mac_address(&id).unwrap_or_else(|| "N/A".to_string()),
                                discovered_device.rssi
                            );
                            lock(&registry).devices.insert(key.clone(), device.clone());
                            Self::send(&events, AdapterEvent::DeviceDiscovered {
                                peripheral: key,
                                name: device.name().ok(),
                                advertisement: Self::advertisement(&discovered_device.adv_data),
                                rssi: discovered_device.rssi.unwrap_or(i16::MIN),
                            });
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        Ok(())
    }

    async fn connect_with_retry(adapter: &Adapter, device: &Device) -> Result<(), AdapterError> {
        let mut last_error = None;
        for attempt in 1..=MAX_CONNECT_RETRIES {
            if device.is_connected().await {
                return Ok(());
            }
            match adapter.connect_device(device).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(transport(e));
                    if attempt < MAX_CONNECT_RETRIES {
                        info!("Retrying connection in {} ms...", CONNECT_RETRY_DELAY_MS);
                        tokio::time::sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AdapterError::Transport(format!("Failed to connect after {} attempts", MAX_CONNECT_RETRIES))
        }))
    }

    /// Reports a link loss the application did not ask for.
    async fn watch_link(
        adapter: Adapter,
        device: Device,
        key: DeviceKey,
        registry: SharedRegistry,
        events: mpsc::UnboundedSender<AdapterEvent>,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        let mut connection_events = adapter.device_connection_events(&device).await?;
        loop {
            tokio::select! {
                event = connection_events.next() => match event {
                    Some(ConnectionEvent::Disconnected) | None => break,
                    Some(ConnectionEvent::Connected) => continue,
                },
                _ = cancel_token.cancelled() => return Ok(()),
            }
        }
        warn!("Lost the link to {}", key);
        forget_attributes(&registry, &key);
        Self::send(&events, AdapterEvent::Disconnected {
            peripheral: key,
            error: Some(AdapterError::Transport("link lost".to_string())),
        });
        Ok(())
    }

    fn cancel_link_watch(&mut self, peripheral: &DeviceKey) {
        if let Some(token) = self.link_tokens.remove(peripheral) {
            token.cancel();
        }
    }

    fn cancel_notifications(&mut self, characteristic: &CharacteristicRef) {
        if let Some(token) = self.notify_tokens.remove(characteristic) {
            token.cancel();
        }
    }
}

impl RadioAdapter for BluestAdapter {
    fn start_scan(&mut self, services: Option<&[Uuid]>) -> Result<(), AdapterError> {
        self.stop_scan()?;
        let cancel_token = CancellationToken::new();
        self.scan_token = Some(cancel_token.clone());

        let adapter = self.adapter.clone();
        let filter = services.map(<[Uuid]>::to_vec).unwrap_or_default();
        let registry = self.registry.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let outcome =
                Self::scan_task(adapter, filter, registry, events.clone(), cancel_token.clone()).await;
            if cancel_token.is_cancelled() {
                return;
            }
            let error = outcome.err().map(|e| {
                error!("Scan task finished with an error: {:?}", e);
                AdapterError::Transport(e.to_string())
            });
            Self::send(&events, AdapterEvent::ScanStopped { error });
        });
        info!("Device scan task started.");
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), AdapterError> {
        if let Some(token) = self.scan_token.take() {
            info!("Stopping Bluetooth scan.");
            token.cancel();
        }
        Ok(())
    }

    fn connect(&mut self, peripheral: &DeviceKey) -> Result<(), AdapterError> {
        let device = self.device(peripheral)?;
        self.cancel_link_watch(peripheral);
        let link_token = CancellationToken::new();
        self.link_tokens.insert(peripheral.clone(), link_token.clone());

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let registry = self.registry.clone();
        let key = peripheral.clone();
        self.runtime.spawn(async move {
            if let Err(error) = Self::connect_with_retry(&adapter, &device).await {
                link_token.cancel();
                Self::send(&events, AdapterEvent::ConnectFailed {
                    peripheral: key,
                    error: Some(error),
                });
                return;
            }
            Self::send(&events, AdapterEvent::Connected { peripheral: key.clone() });
            if let Err(e) = Self::watch_link(adapter, device, key, registry, events, link_token).await {
                warn!("Cannot watch the link state: {}", e);
            }
        });
        Ok(())
    }

    fn disconnect(&mut self, peripheral: &DeviceKey) -> Result<(), AdapterError> {
        let device = self.device(peripheral)?;
        let stale: Vec<CharacteristicRef> = self
            .notify_tokens
            .keys()
            .filter(|c| c.peripheral == *peripheral)
            .cloned()
            .collect();
        for characteristic in stale {
            self.cancel_notifications(&characteristic);
        }
        self.cancel_link_watch(peripheral);

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let registry = self.registry.clone();
        let key = peripheral.clone();
        self.runtime.spawn(async move {
            let error = adapter.disconnect_device(&device).await.err().map(transport);
            forget_attributes(&registry, &key);
            Self::send(&events, AdapterEvent::Disconnected { peripheral: key, error });
        });
        Ok(())
    }

    fn discover_services(&mut self, peripheral: &DeviceKey, filter: Option<&[Uuid]>) -> Result<(), AdapterError> {
        let device = self.device(peripheral)?;
        let filter = filter.map(<[Uuid]>::to_vec);
        let registry = self.registry.clone();
        let events = self.events.clone();
        let key = peripheral.clone();
        self.runtime.spawn(async move {
            let discovered = match filter {
                None => device.discover_services().await,
                Some(uuids) => {
                    let mut services = Vec::new();
                    let mut failure = None;
                    for uuid in uuids {
                        match device.discover_services_with_uuid(uuid).await {
                            Ok(found) => services.extend(found),
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                    failure.map_or(Ok(services), Err)
                }
            };
            let result = discovered.map_err(transport).map(|services| {
                let mut registry = lock(&registry);
                services
                    .into_iter()
                    .map(|service| {
                        let uuid = service.uuid();
                        registry.services.insert(ServiceRef::new(key.clone(), uuid), service);
                        uuid
                    })
                    .collect()
            });
            Self::send(&events, AdapterEvent::ServicesDiscovered { peripheral: key, result });
        });
        Ok(())
    }

    fn discover_characteristics(&mut self, service: &ServiceRef, filter: Option<&[Uuid]>) -> Result<(), AdapterError> {
        let bluest_service = self.service(service)?;
        let filter = filter.map(<[Uuid]>::to_vec);
        let registry = self.registry.clone();
        let events = self.events.clone();
        let reference = service.clone();
        self.runtime.spawn(async move {
            let result = match bluest_service.discover_characteristics().await {
                Ok(characteristics) => {
                    let mut reported = Vec::new();
                    for characteristic in characteristics {
                        let uuid = characteristic.uuid();
                        if filter.as_ref().is_some_and(|uuids| !uuids.contains(&uuid)) {
                            continue;
                        }
                        let properties = match characteristic.properties().await {
                            Ok(properties) => Self::properties(properties),
                            Err(e) => {
                                warn!("Failed to read properties of {}: {}", uuid, e);
                                CharacteristicProperties::default()
                            }
                        };
                        lock(&registry)
                            .characteristics
                            .insert(reference.characteristic(uuid), characteristic);
                        reported.push(DiscoveredCharacteristic::new(uuid, properties));
                    }
                    Ok(reported)
                }
                Err(e) => Err(transport(e)),
            };
            Self::send(&events, AdapterEvent::CharacteristicsDiscovered { service: reference, result });
        });
        Ok(())
    }

    fn discover_descriptors(&mut self, characteristic: &CharacteristicRef) -> Result<(), AdapterError> {
        let bluest_characteristic = self.characteristic(characteristic)?;
        let registry = self.registry.clone();
        let events = self.events.clone();
        let reference = characteristic.clone();
        self.runtime.spawn(async move {
            let result = bluest_characteristic
                .discover_descriptors()
                .await
                .map_err(transport)
                .map(|descriptors| {
                    let mut registry = lock(&registry);
                    descriptors
                        .into_iter()
                        .map(|descriptor| {
                            let uuid = descriptor.uuid();
                            registry.descriptors.insert(reference.descriptor(uuid), descriptor);
                            uuid
                        })
                        .collect()
                });
            Self::send(&events, AdapterEvent::DescriptorsDiscovered {
                characteristic: reference,
                result,
            });
        });
        Ok(())
    }

    fn read_value(&mut self, attribute: &AttributeRef) -> Result<(), AdapterError> {
        let events = self.events.clone();
        let reference = attribute.clone();
        match attribute {
            AttributeRef::Characteristic(c) => {
                let characteristic = self.characteristic(c)?;
                self.runtime.spawn(async move {
                    let result = characteristic.read().await.map_err(transport);
                    Self::send(&events, AdapterEvent::ValueUpdated { attribute: reference, result });
                });
            }
            AttributeRef::Descriptor(d) => {
                let descriptor = self.descriptor(d)?;
                self.runtime.spawn(async move {
                    let result = descriptor.read().await.map_err(transport);
                    Self::send(&events, AdapterEvent::ValueUpdated { attribute: reference, result });
                });
            }
        }
        Ok(())
    }

    fn write_value(&mut self, attribute: &AttributeRef, value: &[u8]) -> Result<(), AdapterError> {
        let events = self.events.clone();
        let reference = attribute.clone();
        let value = value.to_vec();
        match attribute {
            AttributeRef::Characteristic(c) => {
                let characteristic = self.characteristic(c)?;
                self.runtime.spawn(async move {
                    let result = characteristic.write(&value).await.map_err(transport);
                    Self::send(&events, AdapterEvent::WriteCompleted { attribute: reference, result });
                });
            }
            AttributeRef::Descriptor(d) => {
                let descriptor = self.descriptor(d)?;
                self.runtime.spawn(async move {
                    let result = descriptor.write(&value).await.map_err(transport);
                    Self::send(&events, AdapterEvent::WriteCompleted { attribute: reference, result });
                });
            }
        }
        Ok(())
    }

    fn set_notify(&mut self, characteristic: &CharacteristicRef, enabled: bool) -> Result<(), AdapterError> {
        self.cancel_notifications(characteristic);
        let events = self.events.clone();
        let reference = characteristic.clone();
        if !enabled {
            Self::send(&events, AdapterEvent::NotifyStateChanged {
                characteristic: reference,
                result: Ok(false),
            });
            return Ok(());
        }

        let bluest_characteristic = self.characteristic(characteristic)?;
        let cancel_token = CancellationToken::new();
        self.notify_tokens.insert(reference.clone(), cancel_token.clone());
        self.runtime.spawn(async move {
            let attribute = AttributeRef::Characteristic(reference.clone());
            let mut notification_stream = match bluest_characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start notifications for {}: {}", reference, e);
                    Self::send(&events, AdapterEvent::NotifyStateChanged {
                        characteristic: reference,
                        result: Err(transport(e)),
                    });
                    return;
                }
            };
            info!("Notification stream for {} started.", reference);
            Self::send(&events, AdapterEvent::NotifyStateChanged {
                characteristic: reference.clone(),
                result: Ok(true),
            });

            loop {
                tokio::select! {
                    next = notification_stream.next() => match next {
                        Some(result) => Self::send(&events, AdapterEvent::ValueUpdated {
                            attribute: attribute.clone(),
                            result: result.map_err(transport),
                        }),
                        None => {
                            info!("Notification stream for {} ended.", reference);
                            break;
                        }
                    },
                    _ = cancel_token.cancelled() => break,
                }
            }
        });
        Ok(())
    }

    fn reset(&mut self) -> Result<(), AdapterError> {
        self.stop_scan()?;
        let notify_tokens = self.notify_tokens.drain().map(|(_, token)| token);
        for token in notify_tokens.chain(self.link_tokens.drain().map(|(_, token)| token)) {
            token.cancel();
        }
        *lock(&self.registry) = Registry::default();
        Ok(())
    }
}

impl Drop for BluestAdapter {
    fn drop(&mut self) {
        if let Some(token) = self.scan_token.take() {
            token.cancel();
        }
        let notify_tokens = self.notify_tokens.drain().map(|(_, token)| token);
        for token in notify_tokens.chain(self.link_tokens.drain().map(|(_, token)| token)) {
            token.cancel();
        }
        self.power_token.cancel();
    }
}
