//! A discovered peripheral: advertisement, connection state, services and the
//! advertisement watchdog that tracks whether it is still in range.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::adapter::RadioAdapter;
use crate::core::bluetooth::attribute::{
    Characteristic, Descriptor, DiscoveryOutcome, DiscoveryState, Service,
};
use crate::core::bluetooth::constants::SCAN_RESPONSE_GAP_SECS;
use crate::core::bluetooth::error::{AdapterError, GattError, GattResult};
use crate::core::bluetooth::subscription::{Match, PeripheralSubscription};
use crate::core::bluetooth::types::{Advertisement, DeviceKey, NodeRef};

/// Completion of a connect or disconnect request
pub type ConnectionHandler = Box<dyn FnOnce(Result<(), GattError>) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Whether a peripheral is currently known to be advertising
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReceptionState {
    Receiving,
    NotReceiving,
    Connected,
    NotScanning,
}

/// Tracks the advertising interval of one peripheral and declares it gone when no advert
/// arrives before the deadline.
#[derive(Debug, Clone)]
pub struct AdvertisementWatchdog {
    default_timeout: Duration,
    timeout: Duration,
    last_received: Option<Instant>,
    deadline: Option<Instant>,
    advertising: bool,
}

impl AdvertisementWatchdog {
    pub fn new(default_timeout: Duration, now: Instant) -> Self {
        Self {
            default_timeout,
            timeout: default_timeout,
            last_received: Some(now),
            deadline: Some(now + default_timeout),
            advertising: true,
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Re-arms the deadline. Gaps of more than a second are taken as the advertising
    /// interval and the timeout becomes twice that; shorter gaps are scan responses.
    pub fn advert_received(&mut self, now: Instant) {
        match self.last_received {
            Some(previous) => {
                let gap = now.saturating_duration_since(previous);
                let secs = gap.as_secs() + u64::from(gap.subsec_nanos() > 0);
                if secs > SCAN_RESPONSE_GAP_SECS {
                    self.timeout = Duration::from_secs(secs * 2);
                }
            }
            None => self.timeout = self.default_timeout,
        }
        self.advertising = true;
        self.last_received = Some(now);
        self.deadline = Some(now + self.timeout);
    }

    /// Returns true exactly once when the deadline lapses.
    pub fn check(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if self.advertising && now >= deadline => {
                self.advertising = false;
                self.last_received = None;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct Peripheral {
    key: DeviceKey,
    name: Option<String>,
    advertisement: Advertisement,
    rssi: i16,
    state: ConnectionState,
    services: Vec<Service>,
    discovery: DiscoveryState,
    discovered_at: DateTime<Local>,
    connect_handler: Option<ConnectionHandler>,
    disconnect_handler: Option<ConnectionHandler>,
    watchdog: Option<AdvertisementWatchdog>,
    reception: ReceptionState,
}

impl Peripheral {
    pub fn new(
        key: DeviceKey,
        name: Option<String>,
        advertisement: Advertisement,
        rssi: i16,
        watchdog: Option<AdvertisementWatchdog>,
    ) -> Self {
        Self {
            key,
            name,
            advertisement,
            rssi,
            state: ConnectionState::Disconnected,
            services: Vec::new(),
            discovery: DiscoveryState::NotDiscovered,
            discovered_at: Local::now(),
            connect_handler: None,
            disconnect_handler: None,
            watchdog,
            reception: ReceptionState::Receiving,
        }
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    /// Platform name, else the advertised local name, else the device key.
    pub fn name(&self) -> String {
        self.name
            .as_deref()
            .or_else(|| self.advertisement.local_name())
            .map(str::to_string)
            .unwrap_or_else(|| self.key.to_string())
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connectable(&self) -> bool {
        self.advertisement.is_connectable()
    }

    pub fn discovered_at(&self) -> DateTime<Local> {
        self.discovered_at
    }

    pub fn reception_state(&self) -> ReceptionState {
        self.reception
    }

    pub fn watchdog(&self) -> Option<&AdvertisementWatchdog> {
        self.watchdog.as_ref()
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// The service with `uuid`. Discovery keeps one service per UUID.
    pub fn service(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.iter().find(|s| s.uuid() == *uuid)
    }

    pub fn service_mut(&mut self, uuid: &Uuid) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.uuid() == *uuid)
    }

    pub fn characteristic(&self, service: &Uuid, characteristic: &Uuid) -> Option<&Characteristic> {
        self.service(service)?.characteristic(characteristic)
    }

    pub fn characteristic_mut(&mut self, service: &Uuid, characteristic: &Uuid) -> Option<&mut Characteristic> {
        self.service_mut(service)?.characteristic_mut(characteristic)
    }

    pub fn descriptor_mut(
        &mut self,
        service: &Uuid,
        characteristic: &Uuid,
        descriptor: &Uuid,
    ) -> Option<&mut Descriptor> {
        self.characteristic_mut(service, characteristic)?
            .descriptor_mut(descriptor)
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery
    }

    /// Whether the whole attribute tree below this peripheral has been discovered
    pub fn discovery_completed(&self) -> bool {
        self.discovery == DiscoveryState::Discovered
            && self.services.iter().all(Service::discovery_completed)
    }

    /// Merges a fresh advertisement. Returns the newly added entries and the new RSSI if it changed.
    pub(crate) fn advertisement_received(
        &mut self,
        advertisement: &Advertisement,
        rssi: i16,
        now: Instant,
    ) -> (Advertisement, Option<i16>) {
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.advert_received(now);
        }
        let added = self.advertisement.merge(advertisement);
        let rssi_changed = (self.rssi != rssi).then(|| {
            self.rssi = rssi;
            rssi
        });
        (added, rssi_changed)
    }

    /// Recomputes the reception state; returns it when it changed.
    pub(crate) fn update_reception_state(&mut self, scanning: bool) -> Option<ReceptionState> {
        let advertising = self.watchdog.as_ref().is_none_or(AdvertisementWatchdog::is_advertising);
        let state = if self.state != ConnectionState::Disconnected {
            ReceptionState::Connected
        } else if !scanning {
            ReceptionState::NotScanning
        } else if advertising {
            ReceptionState::Receiving
        } else {
            ReceptionState::NotReceiving
        };
        if state == self.reception {
            return None;
        }
        self.reception = state;
        Some(state)
    }

    /// True when the watchdog lapsed on this check
    pub(crate) fn check_watchdog(&mut self, now: Instant) -> bool {
        self.watchdog.as_mut().is_some_and(|watchdog| watchdog.check(now))
    }

    pub(crate) fn connect(
        &mut self,
        adapter: &mut dyn RadioAdapter,
        handler: Option<ConnectionHandler>,
    ) -> GattResult<()> {
        if !self.is_connectable() {
            return Err(GattError::NotConnectable(self.key.clone()));
        }
        if self.state != ConnectionState::Disconnected {
            return Err(GattError::NotDisconnected(self.key.clone()));
        }
        adapter.connect(&self.key).map_err(|source| GattError::ConnectFailed {
            peripheral: self.key.clone(),
            source: Some(source),
        })?;
        info!("Connecting to {}", self);
        self.state = ConnectionState::Connecting;
        self.connect_handler = handler;
        Ok(())
    }

    pub(crate) fn disconnect(
        &mut self,
        adapter: &mut dyn RadioAdapter,
        handler: Option<ConnectionHandler>,
    ) -> GattResult<()> {
        if !matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting) {
            return Err(GattError::NotConnected(self.key.clone()));
        }
        adapter
            .disconnect(&self.key)
            .map_err(|source| GattError::DisconnectFailed {
                peripheral: self.key.clone(),
                source,
            })?;
        info!("Disconnecting from {}", self);
        self.state = ConnectionState::Disconnecting;
        self.disconnect_handler = handler;
        Ok(())
    }

    pub(crate) fn discover_services(
        &mut self,
        adapter: &mut dyn RadioAdapter,
        filter: Option<&[Uuid]>,
    ) -> GattResult<()> {
        if self.discovery != DiscoveryState::NotDiscovered {
            return Err(GattError::RediscoveryNotAllowed(NodeRef::Peripheral(self.key.clone())));
        }
        if self.state != ConnectionState::Connected {
            return Err(GattError::NotConnected(self.key.clone()));
        }
        adapter
            .discover_services(&self.key, filter)
            .map_err(|source| GattError::DiscoveryFailed {
                node: NodeRef::Peripheral(self.key.clone()),
                source,
            })?;
        info!("Discovering services of {}", self);
        self.discovery = DiscoveryState::InProgress;
        Ok(())
    }

    pub(crate) fn complete_service_discovery(
        &mut self,
        reported: Vec<Uuid>,
        subscription: &PeripheralSubscription,
    ) -> GattResult<DiscoveryOutcome> {
        let node = NodeRef::Peripheral(self.key.clone());
        if self.discovery != DiscoveryState::InProgress {
            return Err(GattError::UnexpectedDiscovery(node));
        }

        let mut outcome = DiscoveryOutcome::default();
        for uuid in reported {
            if self.services.iter().any(|service| service.uuid() == uuid) {
                warn!("{} reported service {} more than once", self, uuid);
                outcome.errors.push(GattError::DuplicateAttribute {
                    parent: node.clone(),
                    uuid,
                });
                continue;
            }
            match subscription.match_service(&uuid) {
                Match::Matched(id) => {
                    outcome.added.push(uuid);
                    self.services.push(Service::new(id, self.key.clone()));
                }
                Match::Mismatch => {
                    warn!("{} reported unsubscribed service {}", self, uuid);
                    outcome.errors.push(GattError::SubscriptionMismatch {
                        parent: node.clone(),
                        uuid,
                    });
                }
            }
        }
        self.discovery = DiscoveryState::Discovered;

        if outcome.added.is_empty() && subscription.expects_services() {
            outcome.errors.push(GattError::NoMatchingAttributes(node));
        }
        Ok(outcome)
    }

    /// Connection established; hands back the connect handler.
    pub(crate) fn connected(&mut self) -> Option<ConnectionHandler> {
        self.state = ConnectionState::Connected;
        self.connect_handler.take()
    }

    /// Connection attempt failed; hands back the connect handler.
    pub(crate) fn connect_failed(&mut self) -> Option<ConnectionHandler> {
        self.state = ConnectionState::Disconnected;
        self.invalidate_attributes();
        self.connect_handler.take()
    }

    /// Link dropped. Returns the pending connect and disconnect handlers, in that order.
    ///
    /// The attribute tree is discarded along with every pending read, write and
    /// notification handler inside it.
    pub(crate) fn disconnected(&mut self) -> (Option<ConnectionHandler>, Option<ConnectionHandler>) {
        self.state = ConnectionState::Disconnected;
        self.invalidate_attributes();
        (self.connect_handler.take(), self.disconnect_handler.take())
    }

    fn invalidate_attributes(&mut self) {
        self.services.clear();
        self.discovery = DiscoveryState::NotDiscovered;
    }

    /// Cancels every pending callback without invoking it.
    pub(crate) fn drop_handlers(&mut self) {
        self.connect_handler = None;
        self.disconnect_handler = None;
        self.invalidate_attributes();
    }
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.key)
    }
}

impl fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripheral")
            .field("key", &self.key)
            .field("name", &self.name())
            .field("rssi", &self.rssi)
            .field("state", &self.state)
            .field("reception", &self.reception)
            .field("discovered_at", &self.discovered_at.to_rfc3339())
            .field("services", &self.services)
            .finish()
    }
}

/// Adapter errors that end a connection attempt are reported without a source when absent.
pub(crate) fn connect_error(peripheral: &DeviceKey, source: Option<AdapterError>) -> GattError {
    GattError::ConnectFailed {
        peripheral: peripheral.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{ADV_IS_CONNECTABLE, ADV_LOCAL_NAME};
    use crate::core::bluetooth::types::AdvertisementValue;

    fn connectable() -> Advertisement {
        Advertisement::new().with(ADV_IS_CONNECTABLE, AdvertisementValue::Bool(true))
    }

    #[test]
    fn watchdog_learns_interval_and_lapses_once() {
        let start = Instant::now();
        let mut watchdog = AdvertisementWatchdog::new(Duration::from_secs(20), start);
        assert_eq!(watchdog.timeout(), Duration::from_secs(20));

        // scan response right after the advert keeps the default
        watchdog.advert_received(start + Duration::from_millis(300));
        assert_eq!(watchdog.timeout(), Duration::from_secs(20));

        let second = start + Duration::from_millis(3500);
        watchdog.advert_received(second);
        assert_eq!(watchdog.timeout(), Duration::from_secs(8));

        assert!(!watchdog.check(second + Duration::from_secs(7)));
        assert!(watchdog.check(second + Duration::from_secs(8)));
        assert!(!watchdog.is_advertising());
        assert!(!watchdog.check(second + Duration::from_secs(60)));

        watchdog.advert_received(second + Duration::from_secs(61));
        assert!(watchdog.is_advertising());
        assert_eq!(watchdog.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn merge_keeps_existing_entries() {
        let mut peripheral = Peripheral::new(DeviceKey::from("D1"), None, connectable(), -60, None);
        let update = Advertisement::new()
            .with(ADV_IS_CONNECTABLE, AdvertisementValue::Bool(false))
            .with(ADV_LOCAL_NAME, AdvertisementValue::Text("Thermo".into()));
        let (added, rssi) = peripheral.advertisement_received(&update, -60, Instant::now());
        assert_eq!(added.len(), 1);
        assert_eq!(rssi, None);
        assert!(peripheral.is_connectable());
        assert_eq!(peripheral.name(), "Thermo");

        let (added, rssi) = peripheral.advertisement_received(&update, -48, Instant::now());
        assert!(added.is_empty());
        assert_eq!(rssi, Some(-48));
    }

    #[test]
    fn name_falls_back_to_key() {
        let peripheral = Peripheral::new(DeviceKey::from("AA:BB"), None, Advertisement::new(), -70, None);
        assert_eq!(peripheral.name(), "AA:BB");
        let named = Peripheral::new(DeviceKey::from("AA:BB"), Some("Sensor".into()), Advertisement::new(), -70, None);
        assert_eq!(named.name(), "Sensor");
    }

    #[test]
    fn reception_state_follows_connection_and_scanning() {
        let now = Instant::now();
        let watchdog = AdvertisementWatchdog::new(Duration::from_secs(5), now);
        let mut peripheral = Peripheral::new(DeviceKey::from("D1"), None, connectable(), -60, Some(watchdog));

        assert_eq!(peripheral.update_reception_state(true), None);
        assert_eq!(peripheral.update_reception_state(false), Some(ReceptionState::NotScanning));
        assert_eq!(peripheral.update_reception_state(true), Some(ReceptionState::Receiving));

        assert!(peripheral.check_watchdog(now + Duration::from_secs(5)));
        assert_eq!(peripheral.update_reception_state(true), Some(ReceptionState::NotReceiving));

        peripheral.connected();
        assert_eq!(peripheral.update_reception_state(true), Some(ReceptionState::Connected));
    }

    #[test]
    fn disconnect_discards_attribute_tree() {
        let mut peripheral = Peripheral::new(DeviceKey::from("D1"), None, connectable(), -60, None);
        peripheral.connected();
        peripheral.discovery = DiscoveryState::InProgress;
        let outcome = peripheral
            .complete_service_discovery(vec![Uuid::nil()], &PeripheralSubscription::default())
            .unwrap();
        assert_eq!(outcome.added, vec![Uuid::nil()]);
        assert_eq!(peripheral.services().len(), 1);

        let (connect, disconnect) = peripheral.disconnected();
        assert!(connect.is_none() && disconnect.is_none());
        assert!(peripheral.services().is_empty());
        assert_eq!(peripheral.discovery_state(), DiscoveryState::NotDiscovered);
        assert_eq!(peripheral.state(), ConnectionState::Disconnected);
    }
}
