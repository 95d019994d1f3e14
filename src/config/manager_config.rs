use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    DEFAULT_ADVERTISEMENT_TIMEOUT_SECS, DEFAULT_WATCHDOG_INTERVAL_MS,
};
use crate::core::bluetooth::notification::NotificationRouting;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Advertisement timeout used until a peripheral's advertising interval is observed.
    pub advertisement_timeout_secs: u64,

    /// How often the session checks advertisement deadlines.
    pub watchdog_interval_ms: u64,

    /// How "value updated" callbacks are split between a pending read and the
    /// notification handler.
    pub notification_routing: NotificationRouting,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            advertisement_timeout_secs: DEFAULT_ADVERTISEMENT_TIMEOUT_SECS,
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            notification_routing: NotificationRouting::default(),
        }
    }
}

impl ManagerConfig {
    pub fn advertisement_timeout(&self) -> Duration {
        Duration::from_secs(self.advertisement_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}
