//! Routing of "value updated" callbacks
//! The radio reports explicit read completions and unsolicited notifications through the
//! same callback, so a delivered value has to be routed by policy.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::attribute::Operation;
use crate::core::bluetooth::error::GattError;

pub type ReadResult = Result<Vec<u8>, GattError>;

/// One-shot completion of a read
pub type ReadHandler = Box<dyn FnOnce(ReadResult) + Send>;

/// One-shot completion of a write
pub type WriteHandler = Box<dyn FnOnce(Result<(), GattError>) + Send>;

/// Receives every notified value of a characteristic until notifications are disabled
pub type NotificationHandler = Box<dyn FnMut(ReadResult) + Send>;

/// How a delivered value is split between a pending read and the notification handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationRouting {
    /// A pending read receives the result; the notification handler additionally receives
    /// every successful value, and never an error.
    #[default]
    ReadAndNotify,
    /// A pending read receives the result; only when no read is pending does the
    /// notification handler receive it, errors included.
    Exclusive,
}

/// Who ended up receiving a delivered value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Read,
    Notification,
    Both,
    /// A handler exists but the policy withheld the value from it
    Withheld,
    /// Neither a read nor a notification handler was present
    Unclaimed,
}

/// Routes one delivered value.
///
/// The read slot is cleared before its handler runs.
pub fn route_value(
    read: &mut Operation<ReadHandler>,
    notification: &mut Option<NotificationHandler>,
    result: ReadResult,
    routing: NotificationRouting,
) -> Delivery {
    let read_handler = read.take();
    if read_handler.is_none() && notification.is_none() {
        return Delivery::Unclaimed;
    }

    let notify = match (routing, read_handler.is_some()) {
        (NotificationRouting::ReadAndNotify, _) => result.is_ok() && notification.is_some(),
        (NotificationRouting::Exclusive, true) => false,
        (NotificationRouting::Exclusive, false) => notification.is_some(),
    };

    let delivery = match (read_handler.is_some(), notify) {
        (true, true) => Delivery::Both,
        (true, false) => Delivery::Read,
        (false, true) => Delivery::Notification,
        (false, false) => Delivery::Withheld,
    };
    debug!("Routing value with {:?}: {:?}", routing, delivery);

    if notify {
        if let Some(handler) = notification.as_mut() {
            handler(result.clone());
        }
    }
    if let Some(handler) = read_handler {
        handler(result);
    }
    delivery
}
