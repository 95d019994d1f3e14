//! Declarative subscription tree and the matcher that filters reported attributes against it

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::types::Identifier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicSubscription {
    pub id: Identifier,
    #[serde(default)]
    pub discover_descriptors: bool,
}

impl CharacteristicSubscription {
    pub fn new(id: Identifier, discover_descriptors: bool) -> Self {
        Self { id, discover_descriptors }
    }
}

/// A service of interest. An empty characteristic list means "all characteristics".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSubscription {
    pub id: Identifier,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicSubscription>,
}

impl ServiceSubscription {
    pub fn new(id: Identifier, characteristics: Vec<CharacteristicSubscription>) -> Self {
        Self { id, characteristics }
    }

    /// The subscription for a characteristic UUID; `None` unless exactly one entry matches.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicSubscription> {
        unique(self.characteristics.iter().filter(|c| c.id.uuid == *uuid))
    }

    pub fn match_characteristic(&self, uuid: &Uuid) -> Match {
        if self.characteristics.is_empty() {
            return Match::Matched(Identifier::from_uuid(*uuid));
        }
        match self.characteristic(uuid) {
            Some(subscription) => Match::Matched(subscription.id.clone()),
            None => Match::Mismatch,
        }
    }

    /// Filter passed to characteristic discovery; `None` asks for everything.
    pub fn characteristic_uuids(&self) -> Option<Vec<Uuid>> {
        if self.characteristics.is_empty() {
            None
        } else {
            Some(self.characteristics.iter().map(|c| c.id.uuid).collect())
        }
    }
}

/// What the application cares about. An empty service list means an unfiltered scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralSubscription {
    pub name: String,
    #[serde(default)]
    pub services: Vec<ServiceSubscription>,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub auto_discover: bool,
    #[serde(default)]
    pub monitor_advertisements: bool,
}

impl Default for PeripheralSubscription {
    fn default() -> Self {
        Self {
            name: "all peripherals".to_string(),
            services: Vec::new(),
            auto_connect: false,
            auto_discover: false,
            monitor_advertisements: false,
        }
    }
}

/// Outcome of matching a reported attribute against the subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Matched(Identifier),
    Mismatch,
}

impl PeripheralSubscription {
    pub fn new(name: impl Into<String>, services: Vec<ServiceSubscription>) -> Self {
        Self {
            name: name.into(),
            services,
            ..Default::default()
        }
    }

    pub fn service(&self, uuid: &Uuid) -> Option<&ServiceSubscription> {
        unique(self.services.iter().filter(|s| s.id.uuid == *uuid))
    }

    pub fn match_service(&self, uuid: &Uuid) -> Match {
        if self.services.is_empty() {
            return Match::Matched(Identifier::from_uuid(*uuid));
        }
        match self.service(uuid) {
            Some(subscription) => Match::Matched(subscription.id.clone()),
            None => Match::Mismatch,
        }
    }

    /// Two-level match: resolve the owning service's subscription, then the characteristic.
    pub fn match_characteristic(&self, service: &Uuid, characteristic: &Uuid) -> Match {
        if self.services.is_empty() {
            return Match::Matched(Identifier::from_uuid(*characteristic));
        }
        match self.service(service) {
            Some(subscription) => subscription.match_characteristic(characteristic),
            None => Match::Mismatch,
        }
    }

    /// Filter used for scanning and service discovery; `None` asks for everything.
    pub fn service_uuids(&self) -> Option<Vec<Uuid>> {
        if self.services.is_empty() {
            None
        } else {
            Some(self.services.iter().map(|s| s.id.uuid).collect())
        }
    }

    pub fn characteristic_uuids(&self, service: &Uuid) -> Option<Vec<Uuid>> {
        self.service(service)
            .and_then(ServiceSubscription::characteristic_uuids)
    }

    /// Whether the subscription demands at least one service
    pub fn expects_services(&self) -> bool {
        !self.services.is_empty()
    }

    /// Whether the subscription demands at least one characteristic of `service`
    pub fn expects_characteristics(&self, service: &Uuid) -> bool {
        self.service(service)
            .map(|s| !s.characteristics.is_empty())
            .unwrap_or(false)
    }

    /// Whether descriptors of a characteristic should be discovered automatically.
    ///
    /// Pass-through service subscriptions discover every characteristic's descriptors.
    pub fn wants_descriptors(&self, service: &Uuid, characteristic: &Uuid) -> bool {
        match self.service(service) {
            None => self.services.is_empty(),
            Some(subscription) if subscription.characteristics.is_empty() => true,
            Some(subscription) => subscription
                .characteristic(characteristic)
                .map(|c| c.discover_descriptors)
                .unwrap_or(false),
        }
    }
}

fn unique<'a, T>(mut matches: impl Iterator<Item = &'a T>) -> Option<&'a T> {
    let first = matches.next()?;
    match matches.next() {
        Some(_) => None,
        None => Some(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{
        UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_HEART_RATE_MEASUREMENT,
        UUID_HEART_RATE_SERVICE, UUID_MODEL_NUMBER,
    };

    fn battery_only() -> PeripheralSubscription {
        PeripheralSubscription::new(
            "battery",
            vec![ServiceSubscription::new(
                Identifier::new(UUID_BATTERY_SERVICE, Some("Power".into())),
                vec![CharacteristicSubscription::new(
                    Identifier::from_uuid(UUID_BATTERY_LEVEL),
                    true,
                )],
            )],
        )
    }

    #[test]
    fn empty_subscription_passes_everything_through() {
        let subscription = PeripheralSubscription::default();
        for uuid in [UUID_BATTERY_SERVICE, UUID_HEART_RATE_SERVICE, Uuid::new_v4()] {
            assert_eq!(subscription.match_service(&uuid), Match::Matched(Identifier::from_uuid(uuid)));
        }
        assert!(matches!(
            subscription.match_characteristic(&Uuid::new_v4(), &UUID_MODEL_NUMBER),
            Match::Matched(_)
        ));
        assert_eq!(subscription.service_uuids(), None);
    }

    #[test]
    fn matched_service_keeps_caller_name() {
        let subscription = battery_only();
        match subscription.match_service(&UUID_BATTERY_SERVICE) {
            Match::Matched(id) => assert_eq!(id.name(), Some("Power")),
            Match::Mismatch => panic!("battery service should match"),
        }
        assert_eq!(subscription.match_service(&UUID_HEART_RATE_SERVICE), Match::Mismatch);
        assert_eq!(subscription.service_uuids(), Some(vec![UUID_BATTERY_SERVICE]));
    }

    #[test]
    fn characteristic_match_requires_known_service() {
        let subscription = battery_only();
        assert!(matches!(
            subscription.match_characteristic(&UUID_BATTERY_SERVICE, &UUID_BATTERY_LEVEL),
            Match::Matched(_)
        ));
        assert_eq!(
            subscription.match_characteristic(&UUID_BATTERY_SERVICE, &UUID_MODEL_NUMBER),
            Match::Mismatch
        );
        assert_eq!(
            subscription.match_characteristic(&UUID_HEART_RATE_SERVICE, &UUID_HEART_RATE_MEASUREMENT),
            Match::Mismatch
        );
    }

    #[test]
    fn pass_through_service_matches_all_characteristics() {
        let subscription = PeripheralSubscription::new(
            "hr",
            vec![ServiceSubscription::new(Identifier::from_uuid(UUID_HEART_RATE_SERVICE), vec![])],
        );
        assert!(matches!(
            subscription.match_characteristic(&UUID_HEART_RATE_SERVICE, &UUID_HEART_RATE_MEASUREMENT),
            Match::Matched(_)
        ));
        assert_eq!(subscription.characteristic_uuids(&UUID_HEART_RATE_SERVICE), None);
        assert!(subscription.wants_descriptors(&UUID_HEART_RATE_SERVICE, &UUID_HEART_RATE_MEASUREMENT));
        assert!(!subscription.expects_characteristics(&UUID_HEART_RATE_SERVICE));
    }

    #[test]
    fn duplicate_entries_do_not_match() {
        let id = Identifier::from_uuid(UUID_BATTERY_SERVICE);
        let subscription = PeripheralSubscription::new(
            "dup",
            vec![
                ServiceSubscription::new(id.clone(), vec![]),
                ServiceSubscription::new(id, vec![]),
            ],
        );
        assert_eq!(subscription.match_service(&UUID_BATTERY_SERVICE), Match::Mismatch);
    }

    #[test]
    fn subscription_loads_from_json() {
        let json = r#"{
            "name": "battery",
            "services": [{
                "id": { "uuid": "0000180f-0000-1000-8000-00805f9b34fb" },
                "characteristics": [{ "id": { "uuid": "00002a19-0000-1000-8000-00805f9b34fb" } }]
            }],
            "auto_connect": true
        }"#;
        let subscription: PeripheralSubscription = serde_json::from_str(json).unwrap();
        assert!(subscription.auto_connect);
        assert!(!subscription.auto_discover);
        assert!(subscription.expects_characteristics(&UUID_BATTERY_SERVICE));
        assert!(!subscription.wants_descriptors(&UUID_BATTERY_SERVICE, &UUID_BATTERY_LEVEL));
    }
}
