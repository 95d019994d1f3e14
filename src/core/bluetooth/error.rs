//! Error types of the BLE core

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::types::{AttributeRef, CharacteristicRef, DeviceKey, NodeRef};

/// Failure reported by a radio adapter, either when a command is issued or in a callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The adapter-side object behind a reference no longer exists
    #[error("adapter object for {0} can no longer be resolved")]
    Unresolvable(String),
    #[error("operation not supported by the adapter: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Transport(String),
}

/// Coarse classification of a [`GattError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Readiness,
    StateConflict,
    Capability,
    SubscriptionConsistency,
    Transport,
    InternalConsistency,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("the central manager is not ready")]
    NotReady,
    #[error("bluetooth low energy is not supported by this adapter")]
    BleNotSupported,

    #[error("discovery of {0}'s children was already requested")]
    RediscoveryNotAllowed(NodeRef),
    #[error("a read of {0} is already in progress")]
    ReadInProgress(AttributeRef),
    #[error("a write of {0} is already in progress")]
    WriteInProgress(AttributeRef),
    #[error("peripheral {0} is not disconnected")]
    NotDisconnected(DeviceKey),
    #[error("peripheral {0} is not connected")]
    NotConnected(DeviceKey),
    #[error("peripheral {0} is not connectable")]
    NotConnectable(DeviceKey),

    #[error("characteristic {0} is not readable")]
    NotReadable(CharacteristicRef),
    #[error("characteristic {0} is not writeable")]
    NotWriteable(CharacteristicRef),
    #[error("characteristic {0} is not notifiable")]
    NotNotifiable(CharacteristicRef),
    #[error("notifications of {0} cannot be enabled without a handler")]
    MissingNotificationHandler(CharacteristicRef),

    #[error("{parent} reported {uuid}, which does not match the subscription")]
    SubscriptionMismatch { parent: NodeRef, uuid: Uuid },
    #[error("{0} reported no attributes matching the subscription")]
    NoMatchingAttributes(NodeRef),
    /// Only one child per UUID is kept; further instances could not be addressed
    #[error("{parent} reported {uuid} more than once; only the first instance is kept")]
    DuplicateAttribute { parent: NodeRef, uuid: Uuid },

    #[error("scanning failed: {0}")]
    ScanFailed(#[source] AdapterError),
    #[error("discovery of {node}'s children failed: {source}")]
    DiscoveryFailed {
        node: NodeRef,
        #[source]
        source: AdapterError,
    },
    #[error("peripheral {peripheral} failed to connect")]
    ConnectFailed {
        peripheral: DeviceKey,
        #[source]
        source: Option<AdapterError>,
    },
    #[error("peripheral {peripheral} disconnected: {source}")]
    Disconnected {
        peripheral: DeviceKey,
        #[source]
        source: AdapterError,
    },
    #[error("disconnecting peripheral {peripheral} failed: {source}")]
    DisconnectFailed {
        peripheral: DeviceKey,
        #[source]
        source: AdapterError,
    },
    #[error("reading {attribute} failed: {source}")]
    ReadFailed {
        attribute: AttributeRef,
        #[source]
        source: AdapterError,
    },
    #[error("writing {attribute} failed: {source}")]
    WriteFailed {
        attribute: AttributeRef,
        #[source]
        source: AdapterError,
    },
    #[error("changing the notification state of {characteristic} failed: {source}")]
    NotifyFailed {
        characteristic: CharacteristicRef,
        #[source]
        source: AdapterError,
    },

    #[error("adapter reported unknown peripheral {0}")]
    UnknownPeripheral(DeviceKey),
    #[error("adapter reported an attribute that is not in the tree: {0}")]
    UnknownNode(NodeRef),
    #[error("adapter reported an attribute that is not in the tree: {0}")]
    UnknownAttribute(AttributeRef),
    #[error("adapter completed discovery of {0}, which has no discovery in progress")]
    UnexpectedDiscovery(NodeRef),
    #[error("adapter delivered a value for {0}, which has no read or notification pending")]
    UnexpectedValue(AttributeRef),
    #[error("adapter completed a write of {0}, which has no write pending")]
    UnexpectedWrite(AttributeRef),
}

impl GattError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady | Self::BleNotSupported => ErrorKind::Readiness,
            Self::RediscoveryNotAllowed(_)
            | Self::ReadInProgress(_)
            | Self::WriteInProgress(_)
            | Self::NotDisconnected(_)
            | Self::NotConnected(_)
            | Self::NotConnectable(_) => ErrorKind::StateConflict,
            Self::NotReadable(_)
            | Self::NotWriteable(_)
            | Self::NotNotifiable(_)
            | Self::MissingNotificationHandler(_) => ErrorKind::Capability,
            Self::SubscriptionMismatch { .. }
            | Self::NoMatchingAttributes(_)
            | Self::DuplicateAttribute { .. } => {
                ErrorKind::SubscriptionConsistency
            }
            Self::ScanFailed(_)
            | Self::DiscoveryFailed { .. }
            | Self::ConnectFailed { .. }
            | Self::Disconnected { .. }
            | Self::DisconnectFailed { .. }
            | Self::ReadFailed { .. }
            | Self::WriteFailed { .. }
            | Self::NotifyFailed { .. } => ErrorKind::Transport,
            Self::UnknownPeripheral(_)
            | Self::UnknownNode(_)
            | Self::UnknownAttribute(_)
            | Self::UnexpectedDiscovery(_)
            | Self::UnexpectedValue(_)
            | Self::UnexpectedWrite(_) => ErrorKind::InternalConsistency,
        }
    }
}

pub type GattResult<T> = Result<T, GattError>;
