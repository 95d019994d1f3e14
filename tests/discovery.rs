mod common;

use common::{AdapterCommand, Harness, connectable};
use gatt_central::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_CLIENT_CHARACTERISTIC_CONFIGURATION,
    UUID_HEART_RATE_CONTROL_POINT, UUID_HEART_RATE_MEASUREMENT, UUID_HEART_RATE_SERVICE, uuid_from_u16,
};
use gatt_central::{
    AdapterError, AdapterEvent, CentralEvent, CharacteristicProperties, CharacteristicSubscription,
    DeviceKey, DiscoveredCharacteristic, DiscoveryState, ErrorKind, GattError, Identifier, NodeRef,
    PeripheralSubscription, ServiceRef, ServiceSubscription,
};
use uuid::Uuid;

const S1: Uuid = uuid_from_u16(0xfff1);
const S2: Uuid = uuid_from_u16(0xfff2);

fn services_discovered(harness: &mut Harness, device: &DeviceKey, services: Vec<Uuid>) {
    harness.manager.handle_event(AdapterEvent::ServicesDiscovered {
        peripheral: device.clone(),
        result: Ok(services),
    });
}

#[test]
fn unsubscribed_services_are_reported_as_mismatches() {
    let subscription = PeripheralSubscription::new(
        "s1 only",
        vec![ServiceSubscription::new(Identifier::from_uuid(S1), Vec::new())],
    );
    let mut harness = Harness::ready(subscription);
    let device = harness.connected_device("P1");

    harness.manager.discover_services(&device).unwrap();
    assert_eq!(
        harness.adapter.commands(),
        vec![AdapterCommand::DiscoverServices(device.clone(), Some(vec![S1]))]
    );
    services_discovered(&mut harness, &device, vec![S1, S2]);

    let peripheral = harness.manager.peripheral(&device).unwrap();
    assert_eq!(peripheral.services().len(), 1);
    assert_eq!(peripheral.services()[0].uuid(), S1);
    assert_eq!(peripheral.discovery_state(), DiscoveryState::Discovered);

    let events = harness.take_events();
    assert_eq!(
        events,
        vec![
            CentralEvent::Error(GattError::SubscriptionMismatch {
                parent: NodeRef::Peripheral(device.clone()),
                uuid: S2,
            }),
            CentralEvent::ServicesDiscovered { peripheral: device },
        ]
    );
    assert_eq!(events[0].error_kind(), Some(ErrorKind::SubscriptionConsistency));
}

#[test]
fn empty_subscription_passes_every_service_through() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    let device = harness.connected_device("P1");
    let reported = vec![UUID_HEART_RATE_SERVICE, UUID_BATTERY_SERVICE, S1];

    harness.manager.discover_services(&device).unwrap();
    assert_eq!(
        harness.adapter.commands(),
        vec![AdapterCommand::DiscoverServices(device.clone(), None)]
    );
    services_discovered(&mut harness, &device, reported.clone());

    let peripheral = harness.manager.peripheral(&device).unwrap();
    let uuids: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid()).collect();
    assert_eq!(uuids, reported);
    assert_eq!(peripheral.services()[0].name(), "Heart Rate");
    assert!(Harness::errors(&harness.take_events()).is_empty());
}

#[test]
fn repeated_service_uuid_keeps_one_addressable_instance() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    let device = harness.connected_device("P1");

    harness.manager.discover_services(&device).unwrap();
    services_discovered(&mut harness, &device, vec![S1, S1, S2]);

    let peripheral = harness.manager.peripheral(&device).unwrap();
    let uuids: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid()).collect();
    assert_eq!(uuids, vec![S1, S2]);
    assert!(harness.manager.service(&ServiceRef::new(device.clone(), S1)).is_some());

    let events = harness.take_events();
    assert_eq!(
        Harness::errors(&events),
        vec![GattError::DuplicateAttribute {
            parent: NodeRef::Peripheral(device.clone()),
            uuid: S1,
        }]
    );
    assert!(events.contains(&CentralEvent::ServicesDiscovered { peripheral: device.clone() }));

    harness.manager.discover_characteristics(&ServiceRef::new(device, S1)).unwrap();
}

#[test]
fn subscribed_service_without_a_match_is_reported() {
    let subscription = PeripheralSubscription::new(
        "s1 only",
        vec![ServiceSubscription::new(Identifier::from_uuid(S1), Vec::new())],
    );
    let mut harness = Harness::ready(subscription);
    let device = harness.connected_device("P1");

    harness.manager.discover_services(&device).unwrap();
    services_discovered(&mut harness, &device, Vec::new());

    assert_eq!(
        Harness::errors(&harness.take_events()),
        vec![GattError::NoMatchingAttributes(NodeRef::Peripheral(device))]
    );
}

#[test]
fn rediscovery_is_rejected_without_touching_children() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    let device = harness.connected_device("P1");
    let rediscovery = Err(GattError::RediscoveryNotAllowed(NodeRef::Peripheral(device.clone())));

    harness.manager.discover_services(&device).unwrap();
    assert_eq!(harness.manager.discover_services(&device), rediscovery);

    services_discovered(&mut harness, &device, vec![S1]);
    assert_eq!(harness.manager.discover_services(&device), rediscovery);
    assert_eq!(harness.manager.peripheral(&device).unwrap().services().len(), 1);
    assert_eq!(harness.adapter.commands().len(), 1);

    let service = ServiceRef::new(device.clone(), S1);
    harness.manager.discover_characteristics(&service).unwrap();
    assert_eq!(
        harness.manager.discover_characteristics(&service),
        Err(GattError::RediscoveryNotAllowed(NodeRef::Service(service)))
    );
}

#[test]
fn service_discovery_needs_a_connection() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    harness.discover_device("P1", connectable("P1"), -40);
    let device = DeviceKey::from("P1");
    harness.adapter.clear();

    assert_eq!(
        harness.manager.discover_services(&device),
        Err(GattError::NotConnected(device.clone()))
    );
    assert!(harness.adapter.commands().is_empty());
    assert_eq!(
        harness.manager.peripheral(&device).unwrap().discovery_state(),
        DiscoveryState::NotDiscovered
    );
}

#[test]
fn refused_discovery_leaves_the_node_undiscovered() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    let device = harness.connected_device("P1");
    let failure = AdapterError::Unresolvable(device.to_string());

    harness.adapter.fail_with(Some(failure.clone()));
    assert_eq!(
        harness.manager.discover_services(&device),
        Err(GattError::DiscoveryFailed {
            node: NodeRef::Peripheral(device.clone()),
            source: failure,
        })
    );
    harness.adapter.fail_with(None);
    harness.manager.discover_services(&device).unwrap();
}

#[test]
fn failed_and_late_discovery_callbacks_become_events() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    let device = harness.connected_device("P1");
    let node = NodeRef::Peripheral(device.clone());
    let failure = AdapterError::Transport("att timeout".to_string());

    harness.manager.discover_services(&device).unwrap();
    harness.manager.handle_event(AdapterEvent::ServicesDiscovered {
        peripheral: device.clone(),
        result: Err(failure.clone()),
    });
    services_discovered(&mut harness, &device, vec![S1]);
    services_discovered(&mut harness, &device, vec![S2]);

    let errors = Harness::errors(&harness.take_events());
    assert_eq!(
        errors,
        vec![
            GattError::DiscoveryFailed {
                node: node.clone(),
                source: failure,
            },
            GattError::UnexpectedDiscovery(node),
        ]
    );
    assert_eq!(errors[1].kind(), ErrorKind::InternalConsistency);
    let peripheral = harness.manager.peripheral(&device).unwrap();
    assert_eq!(peripheral.services().len(), 1);
}

#[test]
fn callbacks_for_unknown_attributes_are_reported() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    let device = harness.connected_device("P1");
    let service = ServiceRef::new(device, S1);

    harness.manager.handle_event(AdapterEvent::CharacteristicsDiscovered {
        service: service.clone(),
        result: Ok(Vec::new()),
    });
    harness.manager.handle_event(AdapterEvent::DescriptorsDiscovered {
        characteristic: service.characteristic(UUID_BATTERY_LEVEL),
        result: Ok(Vec::new()),
    });

    assert_eq!(
        Harness::errors(&harness.take_events()),
        vec![
            GattError::UnknownNode(NodeRef::Service(service.clone())),
            GattError::UnknownNode(NodeRef::Characteristic(
                service.characteristic(UUID_BATTERY_LEVEL)
            )),
        ]
    );
}

#[test]
fn characteristics_are_matched_against_their_service() {
    let subscription = PeripheralSubscription::new(
        "heart rate",
        vec![ServiceSubscription::new(
            Identifier::from_uuid(UUID_HEART_RATE_SERVICE),
            vec![CharacteristicSubscription::new(
                Identifier::new(UUID_HEART_RATE_MEASUREMENT, Some("Pulse".to_string())),
                false,
            )],
        )],
    );
    let mut harness = Harness::ready(subscription);
    let device = harness.connected_device("P1");
    harness.manager.discover_services(&device).unwrap();
    services_discovered(&mut harness, &device, vec![UUID_HEART_RATE_SERVICE]);
    let service = ServiceRef::new(device.clone(), UUID_HEART_RATE_SERVICE);
    harness.take_events();
    harness.adapter.clear();

    harness.manager.discover_characteristics(&service).unwrap();
    assert_eq!(
        harness.adapter.commands(),
        vec![AdapterCommand::DiscoverCharacteristics(
            service.clone(),
            Some(vec![UUID_HEART_RATE_MEASUREMENT])
        )]
    );
    harness.manager.handle_event(AdapterEvent::CharacteristicsDiscovered {
        service: service.clone(),
        result: Ok(vec![
            DiscoveredCharacteristic::new(UUID_HEART_RATE_MEASUREMENT, CharacteristicProperties::notifiable()),
            DiscoveredCharacteristic::new(UUID_HEART_RATE_CONTROL_POINT, CharacteristicProperties::writable()),
        ]),
    });

    let discovered = harness.manager.service(&service).unwrap();
    assert_eq!(discovered.characteristics().len(), 1);
    assert_eq!(discovered.characteristics()[0].name(), "Pulse");
    assert_eq!(
        harness.take_events(),
        vec![
            CentralEvent::Error(GattError::SubscriptionMismatch {
                parent: NodeRef::Service(service.clone()),
                uuid: UUID_HEART_RATE_CONTROL_POINT,
            }),
            CentralEvent::CharacteristicsDiscovered { service },
        ]
    );
}

#[test]
fn auto_discovery_walks_the_subscribed_tree() {
    let subscription = PeripheralSubscription {
        auto_connect: true,
        auto_discover: true,
        ..PeripheralSubscription::new(
            "battery",
            vec![ServiceSubscription::new(
                Identifier::from_uuid(UUID_BATTERY_SERVICE),
                vec![
                    CharacteristicSubscription::new(Identifier::from_uuid(UUID_BATTERY_LEVEL), true),
                    CharacteristicSubscription::new(Identifier::from_uuid(S2), false),
                ],
            )],
        )
    };
    let mut harness = Harness::ready(subscription);
    let device = DeviceKey::from("P1");
    let service = ServiceRef::new(device.clone(), UUID_BATTERY_SERVICE);
    let level = service.characteristic(UUID_BATTERY_LEVEL);

    harness.discover_device("P1", connectable("P1"), -40);
    harness.manager.handle_event(AdapterEvent::Connected {
        peripheral: device.clone(),
    });
    services_discovered(&mut harness, &device, vec![UUID_BATTERY_SERVICE]);
    harness.manager.handle_event(AdapterEvent::CharacteristicsDiscovered {
        service: service.clone(),
        result: Ok(vec![
            DiscoveredCharacteristic::new(UUID_BATTERY_LEVEL, CharacteristicProperties::notifiable()),
            DiscoveredCharacteristic::new(S2, CharacteristicProperties::readable()),
        ]),
    });
    harness.manager.handle_event(AdapterEvent::DescriptorsDiscovered {
        characteristic: level.clone(),
        result: Ok(vec![UUID_CLIENT_CHARACTERISTIC_CONFIGURATION]),
    });

    assert_eq!(
        harness.adapter.commands(),
        vec![
            AdapterCommand::Connect(device.clone()),
            AdapterCommand::DiscoverServices(device.clone(), Some(vec![UUID_BATTERY_SERVICE])),
            AdapterCommand::DiscoverCharacteristics(
                service.clone(),
                Some(vec![UUID_BATTERY_LEVEL, S2])
            ),
            AdapterCommand::DiscoverDescriptors(level.clone()),
        ]
    );
    let characteristic = harness.manager.characteristic(&level).unwrap();
    assert!(characteristic.discovery_completed());
    assert_eq!(characteristic.descriptors().len(), 1);
    assert!(
        harness
            .manager
            .descriptor(&level.descriptor(UUID_CLIENT_CHARACTERISTIC_CONFIGURATION))
            .is_some()
    );
    let events = harness.take_events();
    assert!(Harness::errors(&events).is_empty());
    assert_eq!(
        events.last(),
        Some(&CentralEvent::DescriptorsDiscovered { characteristic: level })
    );
}

#[test]
fn pass_through_auto_discovery_completes_the_peripheral() {
    let subscription = PeripheralSubscription {
        auto_discover: true,
        ..PeripheralSubscription::default()
    };
    let mut harness = Harness::ready(subscription);
    harness.discover_device("P1", connectable("P1"), -40);
    let device = DeviceKey::from("P1");
    harness.manager.connect(&device, None).unwrap();
    harness.manager.handle_event(AdapterEvent::Connected {
        peripheral: device.clone(),
    });
    let service = ServiceRef::new(device.clone(), UUID_BATTERY_SERVICE);
    let level = service.characteristic(UUID_BATTERY_LEVEL);

    services_discovered(&mut harness, &device, vec![UUID_BATTERY_SERVICE]);
    assert!(!harness.manager.peripheral(&device).unwrap().discovery_completed());
    harness.manager.handle_event(AdapterEvent::CharacteristicsDiscovered {
        service,
        result: Ok(vec![DiscoveredCharacteristic::new(
            UUID_BATTERY_LEVEL,
            CharacteristicProperties::readable(),
        )]),
    });
    harness.manager.handle_event(AdapterEvent::DescriptorsDiscovered {
        characteristic: level,
        result: Ok(Vec::new()),
    });

    assert!(harness.manager.peripheral(&device).unwrap().discovery_completed());
}

#[test]
fn disconnection_discards_the_attribute_tree() {
    let mut harness = Harness::ready(PeripheralSubscription::default());
    let device = harness.connected_device("P1");
    harness.manager.discover_services(&device).unwrap();
    services_discovered(&mut harness, &device, vec![UUID_BATTERY_SERVICE, S1]);
    let service = ServiceRef::new(device.clone(), UUID_BATTERY_SERVICE);
    harness.manager.discover_characteristics(&service).unwrap();

    harness.manager.handle_event(AdapterEvent::Disconnected {
        peripheral: device.clone(),
        error: Some(AdapterError::Transport("link loss".to_string())),
    });

    let peripheral = harness.manager.peripheral(&device).unwrap();
    assert!(peripheral.services().is_empty());
    assert_eq!(peripheral.discovery_state(), DiscoveryState::NotDiscovered);
    assert!(!peripheral.discovery_completed());

    // The in-flight characteristic discovery now points at nothing
    harness.manager.handle_event(AdapterEvent::CharacteristicsDiscovered {
        service: service.clone(),
        result: Ok(Vec::new()),
    });
    let errors = Harness::errors(&harness.take_events());
    assert!(matches!(errors[0], GattError::Disconnected { .. }));
    assert_eq!(errors[1], GattError::UnknownNode(NodeRef::Service(service)));
}
