//! GATT attribute tree below a peripheral: services, characteristics and descriptors
//! Each node owns its children and keeps a path reference back to its parent, which is
//! re-resolved against the tree whenever an operation needs it.

use std::fmt;

use log::{info, warn};
use uuid::Uuid;

use crate::core::bluetooth::adapter::{DiscoveredCharacteristic, RadioAdapter};
use crate::core::bluetooth::error::{AdapterError, GattError, GattResult};
use crate::core::bluetooth::notification::{
    Delivery, NotificationHandler, NotificationRouting, ReadHandler, WriteHandler, route_value,
};
use crate::core::bluetooth::subscription::{Match, PeripheralSubscription};
use crate::core::bluetooth::types::{
    AttributeRef, CharacteristicProperties, CharacteristicRef, DescriptorRef, DeviceKey, Identifier,
    NodeRef, ServiceRef,
};

/// Discovery state of a node's children
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiscoveryState {
    #[default]
    NotDiscovered,
    InProgress,
    Discovered,
}

/// A single in-flight operation slot holding the completion handler
pub enum Operation<H> {
    Idle,
    Pending(H),
}

impl<H> Default for Operation<H> {
    fn default() -> Self {
        Operation::Idle
    }
}

impl<H> Operation<H> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Operation::Pending(_))
    }

    /// Stores `handler` unless an operation is already pending.
    pub fn begin(&mut self, handler: H) -> bool {
        if self.is_pending() {
            return false;
        }
        *self = Operation::Pending(handler);
        true
    }

    /// Clears the slot, handing back the pending handler.
    pub fn take(&mut self) -> Option<H> {
        match std::mem::take(self) {
            Operation::Pending(handler) => Some(handler),
            Operation::Idle => None,
        }
    }
}

impl<H> fmt::Debug for Operation<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Idle => f.write_str("Idle"),
            Operation::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// What a discovery completion added to the tree
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// UUIDs of the children that were accepted
    pub added: Vec<Uuid>,
    /// Subscription mismatches and an empty-match report, to be emitted as events
    pub errors: Vec<GattError>,
}

fn begin_discovery(
    state: &mut DiscoveryState,
    node: NodeRef,
    issue: impl FnOnce() -> Result<(), AdapterError>,
) -> GattResult<()> {
    if *state != DiscoveryState::NotDiscovered {
        return Err(GattError::RediscoveryNotAllowed(node));
    }
    issue().map_err(|source| GattError::DiscoveryFailed { node, source })?;
    *state = DiscoveryState::InProgress;
    Ok(())
}

pub struct Service {
    id: Identifier,
    reference: ServiceRef,
    characteristics: Vec<Characteristic>,
    discovery: DiscoveryState,
}

impl Service {
    pub fn new(id: Identifier, peripheral: DeviceKey) -> Self {
        let reference = ServiceRef::new(peripheral, id.uuid);
        Self {
            id,
            reference,
            characteristics: Vec::new(),
            discovery: DiscoveryState::NotDiscovered,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.id.uuid
    }

    pub fn name(&self) -> String {
        self.id.name().map(str::to_string).unwrap_or_else(|| self.id.uuid.to_string())
    }

    pub fn reference(&self) -> &ServiceRef {
        &self.reference
    }

    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    /// The characteristic with `uuid`. Discovery keeps one child per UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.id.uuid == *uuid)
    }

    pub fn characteristic_mut(&mut self, uuid: &Uuid) -> Option<&mut Characteristic> {
        self.characteristics.iter_mut().find(|c| c.id.uuid == *uuid)
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery
    }

    /// Whether this service and every characteristic below it have been discovered
    pub fn discovery_completed(&self) -> bool {
        self.discovery == DiscoveryState::Discovered
            && self.characteristics.iter().all(Characteristic::discovery_completed)
    }

    pub(crate) fn discover(
        &mut self,
        adapter: &mut dyn RadioAdapter,
        filter: Option<&[Uuid]>,
    ) -> GattResult<()> {
        let reference = self.reference.clone();
        begin_discovery(&mut self.discovery, NodeRef::Service(reference.clone()), || {
            adapter.discover_characteristics(&reference, filter)
        })?;
        info!("Discovering characteristics of {}", self);
        Ok(())
    }

    pub(crate) fn complete_discovery(
        &mut self,
        reported: Vec<DiscoveredCharacteristic>,
        subscription: &PeripheralSubscription,
    ) -> GattResult<DiscoveryOutcome> {
        let node = NodeRef::Service(self.reference.clone());
        if self.discovery != DiscoveryState::InProgress {
            return Err(GattError::UnexpectedDiscovery(node));
        }

        let mut outcome = DiscoveryOutcome::default();
        for characteristic in reported {
            if self.characteristics.iter().any(|c| c.uuid() == characteristic.uuid) {
                warn!("{} reported characteristic {} more than once", self, characteristic.uuid);
                outcome.errors.push(GattError::DuplicateAttribute {
                    parent: node.clone(),
                    uuid: characteristic.uuid,
                });
                continue;
            }
            match subscription.match_characteristic(&self.id.uuid, &characteristic.uuid) {
                Match::Matched(id) => {
                    outcome.added.push(id.uuid);
                    self.characteristics.push(Characteristic::new(
                        id,
                        self.reference.characteristic(characteristic.uuid),
                        characteristic.properties,
                    ));
                }
                Match::Mismatch => {
                    warn!("{} reported unsubscribed characteristic {}", self, characteristic.uuid);
                    outcome.errors.push(GattError::SubscriptionMismatch {
                        parent: node.clone(),
                        uuid: characteristic.uuid,
                    });
                }
            }
        }
        self.discovery = DiscoveryState::Discovered;

        if outcome.added.is_empty() && subscription.expects_characteristics(&self.id.uuid) {
            outcome.errors.push(GattError::NoMatchingAttributes(node));
        }
        Ok(outcome)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {} of {}", self.id, self.reference.peripheral)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("discovery", &self.discovery)
            .field("characteristics", &self.characteristics)
            .finish()
    }
}

pub struct Characteristic {
    id: Identifier,
    reference: CharacteristicRef,
    properties: CharacteristicProperties,
    descriptors: Vec<Descriptor>,
    discovery: DiscoveryState,
    read: Operation<ReadHandler>,
    write: Operation<WriteHandler>,
    notification: Option<NotificationHandler>,
    notifying: bool,
}

impl Characteristic {
    pub fn new(id: Identifier, reference: CharacteristicRef, properties: CharacteristicProperties) -> Self {
        Self {
            id,
            reference,
            properties,
            descriptors: Vec::new(),
            discovery: DiscoveryState::NotDiscovered,
            read: Operation::Idle,
            write: Operation::Idle,
            notification: None,
            notifying: false,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.id.uuid
    }

    pub fn name(&self) -> String {
        self.id.name().map(str::to_string).unwrap_or_else(|| self.id.uuid.to_string())
    }

    pub fn reference(&self) -> &CharacteristicRef {
        &self.reference
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, uuid: &Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.id.uuid == *uuid)
    }

    pub fn descriptor_mut(&mut self, uuid: &Uuid) -> Option<&mut Descriptor> {
        self.descriptors.iter_mut().find(|d| d.id.uuid == *uuid)
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery
    }

    pub fn discovery_completed(&self) -> bool {
        self.discovery == DiscoveryState::Discovered
    }

    pub fn is_reading(&self) -> bool {
        self.read.is_pending()
    }

    pub fn is_writing(&self) -> bool {
        self.write.is_pending()
    }

    /// Whether notifications were last enabled and not since disabled or failed
    pub fn is_notifying(&self) -> bool {
        self.notifying
    }

    fn attribute(&self) -> AttributeRef {
        AttributeRef::Characteristic(self.reference.clone())
    }

    pub(crate) fn discover(&mut self, adapter: &mut dyn RadioAdapter) -> GattResult<()> {
        let reference = self.reference.clone();
        begin_discovery(
            &mut self.discovery,
            NodeRef::Characteristic(reference.clone()),
            || adapter.discover_descriptors(&reference),
        )?;
        info!("Discovering descriptors of {}", self);
        Ok(())
    }

    /// Descriptors are never filtered by the subscription.
    pub(crate) fn complete_discovery(&mut self, reported: Vec<Uuid>) -> GattResult<DiscoveryOutcome> {
        let node = NodeRef::Characteristic(self.reference.clone());
        if self.discovery != DiscoveryState::InProgress {
            return Err(GattError::UnexpectedDiscovery(node));
        }
        let mut outcome = DiscoveryOutcome::default();
        for uuid in reported {
            if self.descriptors.iter().any(|d| d.uuid() == uuid) {
                warn!("{} reported descriptor {} more than once", self, uuid);
                outcome.errors.push(GattError::DuplicateAttribute {
                    parent: node.clone(),
                    uuid,
                });
                continue;
            }
            self.descriptors.push(Descriptor::new(
                Identifier::from_uuid(uuid),
                self.reference.descriptor(uuid),
            ));
            outcome.added.push(uuid);
        }
        self.discovery = DiscoveryState::Discovered;
        Ok(outcome)
    }

    pub(crate) fn read(&mut self, adapter: &mut dyn RadioAdapter, handler: ReadHandler) -> GattResult<()> {
        if !self.properties.read {
            return Err(GattError::NotReadable(self.reference.clone()));
        }
        if self.read.is_pending() {
            return Err(GattError::ReadInProgress(self.attribute()));
        }
        let attribute = self.attribute();
        adapter
            .read_value(&attribute)
            .map_err(|source| GattError::ReadFailed { attribute, source })?;
        self.read.begin(handler);
        Ok(())
    }

    pub(crate) fn write(
        &mut self,
        adapter: &mut dyn RadioAdapter,
        value: &[u8],
        handler: WriteHandler,
    ) -> GattResult<()> {
        if !self.properties.write {
            return Err(GattError::NotWriteable(self.reference.clone()));
        }
        if self.write.is_pending() {
            return Err(GattError::WriteInProgress(self.attribute()));
        }
        let attribute = self.attribute();
        adapter
            .write_value(&attribute, value)
            .map_err(|source| GattError::WriteFailed { attribute, source })?;
        self.write.begin(handler);
        Ok(())
    }

    /// Enabling requires a handler; disabling drops the current one.
    pub(crate) fn set_notify(
        &mut self,
        adapter: &mut dyn RadioAdapter,
        enabled: bool,
        handler: Option<NotificationHandler>,
    ) -> GattResult<()> {
        if !(self.properties.notify || self.properties.indicate) {
            return Err(GattError::NotNotifiable(self.reference.clone()));
        }
        if enabled && handler.is_none() {
            return Err(GattError::MissingNotificationHandler(self.reference.clone()));
        }
        adapter
            .set_notify(&self.reference, enabled)
            .map_err(|source| GattError::NotifyFailed {
                characteristic: self.reference.clone(),
                source,
            })?;
        self.notification = if enabled { handler } else { None };
        self.notifying = enabled;
        Ok(())
    }

    /// Routes a delivered value and returns the errors to report as events.
    pub(crate) fn value_updated(
        &mut self,
        result: Result<Vec<u8>, AdapterError>,
        routing: NotificationRouting,
    ) -> Vec<GattError> {
        let attribute = self.attribute();
        let result = result.map_err(|source| GattError::ReadFailed {
            attribute: attribute.clone(),
            source,
        });
        let mut errors = Vec::new();
        if let Err(error) = &result {
            errors.push(error.clone());
        }
        if route_value(&mut self.read, &mut self.notification, result, routing) == Delivery::Unclaimed {
            errors.push(GattError::UnexpectedValue(attribute));
        }
        errors
    }

    pub(crate) fn write_completed(&mut self, result: Result<(), AdapterError>) -> Vec<GattError> {
        let attribute = self.attribute();
        write_completed(&mut self.write, attribute, result)
    }

    /// A failed notify change is reported to the notification handler, which is then cleared.
    pub(crate) fn notify_state_changed(&mut self, result: Result<bool, AdapterError>) -> Option<GattError> {
        match result {
            Ok(enabled) => {
                self.notifying = enabled;
                if !enabled {
                    self.notification = None;
                }
                None
            }
            Err(source) => {
                let error = GattError::NotifyFailed {
                    characteristic: self.reference.clone(),
                    source,
                };
                self.notifying = false;
                if let Some(mut handler) = self.notification.take() {
                    handler(Err(error.clone()));
                }
                Some(error)
            }
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "characteristic {} of {}", self.id, self.reference.service_ref())
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("id", &self.id)
            .field("properties", &self.properties.enabled_names())
            .field("discovery", &self.discovery)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("notifying", &self.notifying)
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

pub struct Descriptor {
    id: Identifier,
    reference: DescriptorRef,
    read: Operation<ReadHandler>,
    write: Operation<WriteHandler>,
}

impl Descriptor {
    pub fn new(id: Identifier, reference: DescriptorRef) -> Self {
        Self {
            id,
            reference,
            read: Operation::Idle,
            write: Operation::Idle,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.id.uuid
    }

    pub fn name(&self) -> String {
        self.id.name().map(str::to_string).unwrap_or_else(|| self.id.uuid.to_string())
    }

    pub fn reference(&self) -> &DescriptorRef {
        &self.reference
    }

    pub fn is_reading(&self) -> bool {
        self.read.is_pending()
    }

    pub fn is_writing(&self) -> bool {
        self.write.is_pending()
    }

    fn attribute(&self) -> AttributeRef {
        AttributeRef::Descriptor(self.reference.clone())
    }

    pub(crate) fn read(&mut self, adapter: &mut dyn RadioAdapter, handler: ReadHandler) -> GattResult<()> {
        if self.read.is_pending() {
            return Err(GattError::ReadInProgress(self.attribute()));
        }
        let attribute = self.attribute();
        adapter
            .read_value(&attribute)
            .map_err(|source| GattError::ReadFailed { attribute, source })?;
        self.read.begin(handler);
        Ok(())
    }

    pub(crate) fn write(
        &mut self,
        adapter: &mut dyn RadioAdapter,
        value: &[u8],
        handler: WriteHandler,
    ) -> GattResult<()> {
        if self.write.is_pending() {
            return Err(GattError::WriteInProgress(self.attribute()));
        }
        let attribute = self.attribute();
        adapter
            .write_value(&attribute, value)
            .map_err(|source| GattError::WriteFailed { attribute, source })?;
        self.write.begin(handler);
        Ok(())
    }

    pub(crate) fn value_updated(&mut self, result: Result<Vec<u8>, AdapterError>) -> Vec<GattError> {
        let attribute = self.attribute();
        let result = result.map_err(|source| GattError::ReadFailed {
            attribute: attribute.clone(),
            source,
        });
        let mut errors = Vec::new();
        if let Err(error) = &result {
            errors.push(error.clone());
        }
        match self.read.take() {
            Some(handler) => handler(result),
            None => errors.push(GattError::UnexpectedValue(attribute)),
        }
        errors
    }

    pub(crate) fn write_completed(&mut self, result: Result<(), AdapterError>) -> Vec<GattError> {
        let attribute = self.attribute();
        write_completed(&mut self.write, attribute, result)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "descriptor {} of {}", self.id, self.reference.characteristic_ref())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

fn write_completed(
    slot: &mut Operation<WriteHandler>,
    attribute: AttributeRef,
    result: Result<(), AdapterError>,
) -> Vec<GattError> {
    let Some(handler) = slot.take() else {
        return vec![GattError::UnexpectedWrite(attribute)];
    };
    let result = result.map_err(|source| GattError::WriteFailed { attribute, source });
    let errors = result.as_ref().err().cloned().into_iter().collect();
    handler(result);
    errors
}
