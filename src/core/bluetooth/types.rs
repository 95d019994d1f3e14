//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    ADV_IS_CONNECTABLE, ADV_LOCAL_NAME, name_for_well_known_uuid,
};

/// A GATT attribute UUID plus an optional human readable name.
///
/// Two identifiers are equal when their UUIDs are equal; the name is cosmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl Identifier {
    pub fn new(uuid: Uuid, name: Option<String>) -> Self {
        Self { uuid, name }
    }

    /// An identifier without a caller supplied name
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self { uuid, name: None }
    }

    /// The caller supplied name, else the SIG name of a well-known UUID.
    pub fn name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| name_for_well_known_uuid(&self.uuid))
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.name().unwrap_or("<no name>"), self.uuid)
    }
}

/// Adapter assigned identity of a remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Back reference to a service: enough to re-resolve it in the tree and on the adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceRef {
    pub peripheral: DeviceKey,
    pub service: Uuid,
}

impl ServiceRef {
    pub fn new(peripheral: DeviceKey, service: Uuid) -> Self {
        Self { peripheral, service }
    }

    pub fn characteristic(&self, characteristic: Uuid) -> CharacteristicRef {
        CharacteristicRef {
            peripheral: self.peripheral.clone(),
            service: self.service,
            characteristic,
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.peripheral, self.service)
    }
}

/// Back reference to a characteristic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CharacteristicRef {
    pub peripheral: DeviceKey,
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    pub fn service_ref(&self) -> ServiceRef {
        ServiceRef::new(self.peripheral.clone(), self.service)
    }

    pub fn descriptor(&self, descriptor: Uuid) -> DescriptorRef {
        DescriptorRef {
            peripheral: self.peripheral.clone(),
            service: self.service,
            characteristic: self.characteristic,
            descriptor,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.peripheral, self.service, self.characteristic)
    }
}

/// Back reference to a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DescriptorRef {
    pub peripheral: DeviceKey,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
}

impl DescriptorRef {
    pub fn characteristic_ref(&self) -> CharacteristicRef {
        CharacteristicRef {
            peripheral: self.peripheral.clone(),
            service: self.service,
            characteristic: self.characteristic,
        }
    }
}

impl fmt::Display for DescriptorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.peripheral, self.service, self.characteristic, self.descriptor
        )
    }
}

/// A value-bearing attribute: the target of reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum AttributeRef {
    Characteristic(CharacteristicRef),
    Descriptor(DescriptorRef),
}

impl AttributeRef {
    pub fn peripheral(&self) -> &DeviceKey {
        match self {
            Self::Characteristic(characteristic) => &characteristic.peripheral,
            Self::Descriptor(descriptor) => &descriptor.peripheral,
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Characteristic(characteristic) => write!(f, "characteristic {}", characteristic),
            Self::Descriptor(descriptor) => write!(f, "descriptor {}", descriptor),
        }
    }
}

/// A node of the attribute tree that owns discoverable children
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum NodeRef {
    Peripheral(DeviceKey),
    Service(ServiceRef),
    Characteristic(CharacteristicRef),
}

impl NodeRef {
    pub fn peripheral(&self) -> &DeviceKey {
        match self {
            Self::Peripheral(key) => key,
            Self::Service(service) => &service.peripheral,
            Self::Characteristic(characteristic) => &characteristic.peripheral,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peripheral(key) => write!(f, "peripheral {}", key),
            Self::Service(service) => write!(f, "service {}", service),
            Self::Characteristic(characteristic) => write!(f, "characteristic {}", characteristic),
        }
    }
}

/// Capability flags a characteristic advertises
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
    pub notify_encryption_required: bool,
    pub indicate_encryption_required: bool,
}

impl CharacteristicProperties {
    pub fn readable() -> Self {
        Self { read: true, ..Default::default() }
    }

    pub fn writable() -> Self {
        Self { write: true, ..Default::default() }
    }

    pub fn notifiable() -> Self {
        Self { read: true, notify: true, ..Default::default() }
    }

    /// Names of the enabled capabilities, in declaration order.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        [
            (self.broadcast, "Broadcast"),
            (self.read, "Read"),
            (self.write_without_response, "Write w/o Response"),
            (self.write, "Write"),
            (self.notify, "Notify"),
            (self.indicate, "Indicate"),
            (self.authenticated_signed_writes, "Auth Signed Writes"),
            (self.extended_properties, "Extended Properties"),
            (self.notify_encryption_required, "Notify Encrypt Req"),
            (self.indicate_encryption_required, "Indicate Encrypt Req"),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, name)| name)
        .collect()
    }
}

/// One advertisement entry value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdvertisementValue {
    Bool(bool),
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
    Uuids(Vec<Uuid>),
}

impl fmt::Display for AdvertisementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Text(value) => f.write_str(value),
            Self::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Self::Uuids(uuids) => {
                let joined: Vec<String> = uuids.iter().map(Uuid::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Advertisement payload of a peripheral, keyed by advertisement key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    data: BTreeMap<String, AdvertisementValue>,
}

impl Advertisement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert, used by adapters assembling a snapshot
    pub fn with(mut self, key: impl Into<String>, value: AdvertisementValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AdvertisementValue> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AdvertisementValue)> {
        self.data.iter()
    }

    pub fn is_connectable(&self) -> bool {
        matches!(self.data.get(ADV_IS_CONNECTABLE), Some(AdvertisementValue::Bool(true)))
    }

    pub fn local_name(&self) -> Option<&str> {
        match self.data.get(ADV_LOCAL_NAME) {
            Some(AdvertisementValue::Text(name)) => Some(name),
            _ => None,
        }
    }

    /// Adds the entries of `update` whose keys are not yet present.
    ///
    /// Existing keys are never overwritten. Returns the entries that were added.
    pub fn merge(&mut self, update: &Advertisement) -> Advertisement {
        let mut added = Advertisement::new();
        for (key, value) in &update.data {
            if !self.data.contains_key(key) {
                self.data.insert(key.clone(), value.clone());
                added.data.insert(key.clone(), value.clone());
            }
        }
        added
    }
}

impl fmt::Display for Advertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data.is_empty() {
            return f.write_str("<no advertisement data>");
        }
        let entries: Vec<String> = self
            .data
            .iter()
            .map(|(key, value)| format!("{} = {}", key, value))
            .collect();
        write!(f, "<{}>", entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_BATTERY_SERVICE;

    #[test]
    fn identifier_equality_ignores_name() {
        let a = Identifier::new(UUID_BATTERY_SERVICE, Some("Power".to_string()));
        let b = Identifier::from_uuid(UUID_BATTERY_SERVICE);
        assert_eq!(a, b);
        assert_eq!(a.name(), Some("Power"));
        assert_eq!(b.name(), Some("Battery"));
        assert_eq!(Identifier::from_uuid(Uuid::nil()).name(), None);
    }

    #[test]
    fn merge_only_adds_new_keys() {
        let mut current = Advertisement::new().with("name", AdvertisementValue::Text("X".into()));
        let update = Advertisement::new()
            .with("name", AdvertisementValue::Text("Z".into()))
            .with("extra", AdvertisementValue::Text("Y".into()));

        let added = current.merge(&update);
        assert_eq!(added.len(), 1);
        assert_eq!(added.get("extra"), Some(&AdvertisementValue::Text("Y".into())));
        assert_eq!(current.get("name"), Some(&AdvertisementValue::Text("X".into())));

        // Idempotent on redelivery
        assert!(current.merge(&update).is_empty());
        assert_eq!(current.len(), 2);
    }

    #[test]
    fn connectable_defaults_to_false() {
        assert!(!Advertisement::new().is_connectable());
        let adv = Advertisement::new().with(ADV_IS_CONNECTABLE, AdvertisementValue::Bool(true));
        assert!(adv.is_connectable());
    }

    #[test]
    fn enabled_property_names() {
        let properties = CharacteristicProperties { read: true, notify: true, ..Default::default() };
        assert_eq!(properties.enabled_names(), vec!["Read", "Notify"]);
    }
}
