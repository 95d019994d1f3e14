//! Events published by the central manager and the broadcaster that fans them out
//! to callback listeners and channel subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::{ErrorKind, GattError};
use crate::core::bluetooth::peripheral::{ConnectionState, ReceptionState};
use crate::core::bluetooth::types::{Advertisement, CharacteristicRef, DeviceKey, ServiceRef};

#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    ManagerReady,
    ManagerUnready,
    StartedScanning {
        services: Option<Vec<Uuid>>,
    },
    StoppedScanning,
    SubscriptionUpdated {
        name: String,
    },
    PeripheralDiscovered {
        peripheral: DeviceKey,
        name: String,
        advertisement: Advertisement,
        rssi: i16,
    },
    PeripheralRemoved {
        peripheral: DeviceKey,
    },
    PeripheralStateChanged {
        peripheral: DeviceKey,
        state: ConnectionState,
    },
    /// Only the entries that were new to the merged advertisement
    AdvertisementUpdated {
        peripheral: DeviceKey,
        added: Advertisement,
    },
    RssiUpdated {
        peripheral: DeviceKey,
        rssi: i16,
    },
    ReceptionStateChanged {
        peripheral: DeviceKey,
        state: ReceptionState,
    },
    ServicesDiscovered {
        peripheral: DeviceKey,
    },
    CharacteristicsDiscovered {
        service: ServiceRef,
    },
    DescriptorsDiscovered {
        characteristic: CharacteristicRef,
    },
    Error(GattError),
}

impl CentralEvent {
    /// The error kind of an `Error` event
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            CentralEvent::Error(error) => Some(error.kind()),
            _ => None,
        }
    }
}

/// Callback listener
pub type Listener = Arc<dyn Fn(&CentralEvent) + Send + Sync>;

/// Handle returned by [`EventBroadcaster::add_listener`], used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

#[derive(Clone)]
enum Sink {
    Callback(Listener),
    Channel(mpsc::UnboundedSender<Arc<CentralEvent>>),
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    sinks: Vec<(ListenerHandle, Sink)>,
}

impl ListenerTable {
    fn insert(&mut self, sink: Sink) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id);
        self.next_id += 1;
        self.sinks.push((handle, sink));
        handle
    }
}

/// Fan-out of [`CentralEvent`]s.
///
/// Listeners are invoked on a snapshot taken under the lock, so a listener may add or
/// remove listeners (including itself) while an event is being delivered.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    table: Arc<Mutex<ListenerTable>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&CentralEvent) + Send + Sync + 'static,
    {
        self.lock().insert(Sink::Callback(Arc::new(listener)))
    }

    /// Returns true if the listener was registered.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut table = self.lock();
        let before = table.sinks.len();
        table.sinks.retain(|(h, _)| *h != handle);
        table.sinks.len() != before
    }

    /// Channel subscription; it is dropped automatically once the receiver goes away.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<CentralEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(Sink::Channel(tx));
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.lock().sinks.len()
    }

    pub fn emit(&self, event: CentralEvent) {
        debug!("Event: {:?}", event);
        let snapshot: Vec<(ListenerHandle, Sink)> = self.lock().sinks.clone();
        let event = Arc::new(event);

        let mut closed = Vec::new();
        for (handle, sink) in snapshot {
            match sink {
                Sink::Callback(listener) => listener(&event),
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(handle);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.lock().sinks.retain(|(h, _)| !closed.contains(h));
        }
    }
}
