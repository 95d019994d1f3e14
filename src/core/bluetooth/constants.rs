//! Constants used throughout the BLE core
//! This module contains the well-known Bluetooth SIG UUIDs, the names they
//! resolve to, and the default timing values of the central manager.

use uuid::Uuid;

/// Builds a full 128-bit UUID from a 16-bit SIG-assigned number using the Bluetooth base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

/// Standard Bluetooth Service UUIDs
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = uuid_from_u16(0x180a);
pub const UUID_HEART_RATE_SERVICE: Uuid = uuid_from_u16(0x180d);
pub const UUID_BATTERY_SERVICE: Uuid = uuid_from_u16(0x180f);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_SYSTEM_ID: Uuid = uuid_from_u16(0x2a23);
pub const UUID_MODEL_NUMBER: Uuid = uuid_from_u16(0x2a24);
pub const UUID_SERIAL_NUMBER: Uuid = uuid_from_u16(0x2a25);
pub const UUID_FIRMWARE_REVISION: Uuid = uuid_from_u16(0x2a26);
pub const UUID_HARDWARE_REVISION: Uuid = uuid_from_u16(0x2a27);
pub const UUID_SOFTWARE_REVISION: Uuid = uuid_from_u16(0x2a28);
pub const UUID_MANUFACTURER_NAME: Uuid = uuid_from_u16(0x2a29);
pub const UUID_HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2a37);
pub const UUID_SENSOR_BODY_LOCATION: Uuid = uuid_from_u16(0x2a38);
pub const UUID_HEART_RATE_CONTROL_POINT: Uuid = uuid_from_u16(0x2a39);
pub const UUID_BATTERY_LEVEL: Uuid = uuid_from_u16(0x2a19);

/// Standard Bluetooth Descriptor UUIDs
pub const UUID_CHARACTERISTIC_EXTENDED_PROPERTIES: Uuid = uuid_from_u16(0x2900);
pub const UUID_CHARACTERISTIC_USER_DESCRIPTION: Uuid = uuid_from_u16(0x2901);
pub const UUID_CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = uuid_from_u16(0x2902);
pub const UUID_SERVER_CHARACTERISTIC_CONFIGURATION: Uuid = uuid_from_u16(0x2903);
pub const UUID_CHARACTERISTIC_FORMAT: Uuid = uuid_from_u16(0x2904);
pub const UUID_CHARACTERISTIC_AGGREGATE_FORMAT: Uuid = uuid_from_u16(0x2905);

const WELL_KNOWN_NAMES: &[(Uuid, &str)] = &[
    (UUID_DEVICE_INFORMATION_SERVICE, "Device Information"),
    (UUID_SYSTEM_ID, "System ID"),
    (UUID_MODEL_NUMBER, "Model Number"),
    (UUID_SERIAL_NUMBER, "Serial Number"),
    (UUID_FIRMWARE_REVISION, "Firmware Revision"),
    (UUID_HARDWARE_REVISION, "Hardware Revision"),
    (UUID_SOFTWARE_REVISION, "Software Revision"),
    (UUID_MANUFACTURER_NAME, "Manufacturer Name"),
    (UUID_HEART_RATE_SERVICE, "Heart Rate"),
    (UUID_HEART_RATE_MEASUREMENT, "Heart Rate Measurement"),
    (UUID_SENSOR_BODY_LOCATION, "Sensor Body Location"),
    (UUID_HEART_RATE_CONTROL_POINT, "Heart Rate Control Point"),
    (UUID_BATTERY_SERVICE, "Battery"),
    (UUID_BATTERY_LEVEL, "Battery Level"),
    (UUID_CHARACTERISTIC_EXTENDED_PROPERTIES, "Characteristic Extended Properties"),
    (UUID_CHARACTERISTIC_USER_DESCRIPTION, "User Description"),
    (UUID_CLIENT_CHARACTERISTIC_CONFIGURATION, "Client Characteristic Configuration"),
    (UUID_SERVER_CHARACTERISTIC_CONFIGURATION, "Server Characteristic Configuration"),
    (UUID_CHARACTERISTIC_FORMAT, "Characteristic Format"),
    (UUID_CHARACTERISTIC_AGGREGATE_FORMAT, "Characteristic Aggregate Format"),
];

/// Returns the SIG name of a well-known UUID, if it is one we know about.
pub fn name_for_well_known_uuid(uuid: &Uuid) -> Option<&'static str> {
    WELL_KNOWN_NAMES
        .iter()
        .find(|(known, _)| known == uuid)
        .map(|(_, name)| *name)
}

/// Default advertisement timeout in seconds, before an advertising interval has been observed
pub const DEFAULT_ADVERTISEMENT_TIMEOUT_SECS: u64 = 20;

/// Interval between two adverts below which the gap is attributed to a scan response
pub const SCAN_RESPONSE_GAP_SECS: u64 = 1;

/// How often the session checks the advertisement watchdog, in milliseconds
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 1000;

/// Maximum number of connection attempts made by the bluest adapter
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;

/// How often the bluest adapter polls the adapter power state, in milliseconds
pub const POWER_POLL_INTERVAL_MS: u64 = 2000;

/// Advertisement data keys reported by radio adapters
pub const ADV_LOCAL_NAME: &str = "localName";
pub const ADV_IS_CONNECTABLE: &str = "isConnectable";
pub const ADV_MANUFACTURER_DATA: &str = "manufacturerData";
pub const ADV_SERVICE_UUIDS: &str = "serviceUuids";
pub const ADV_TX_POWER_LEVEL: &str = "txPowerLevel";
