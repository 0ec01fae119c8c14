//! Device transport abstraction
//!
//! The wire protocol spoken to devices lives behind [`DeviceTransport`].
//! A [`TransportFactory`] opens one handle per device definition, together
//! with the stream of events that handle emits.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{DeviceDefinition, PropertyValue};
use crate::Result;

/// Values of one or more properties reported together
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertySnapshot {
    pub values: BTreeMap<u8, PropertyValue>,
    /// Device-side timestamp in epoch milliseconds, when the device sends one
    pub timestamp_ms: Option<i64>,
}

impl PropertySnapshot {
    /// Snapshot holding a single property
    #[must_use]
    pub fn single(index: u8, value: PropertyValue, timestamp_ms: Option<i64>) -> Self {
        Self {
            values: BTreeMap::from([(index, value)]),
            timestamp_ms,
        }
    }
}

/// Event emitted by a device handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
    Data(PropertySnapshot),
}

/// Receiving end of a handle's event stream
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Handle to one network-attached device
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Discover the device on the network
    async fn find(&self) -> Result<bool>;

    /// Open the persistent connection
    async fn connect(&self) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;

    /// Whether the connection is currently established
    fn is_connected(&self) -> bool;

    /// Read one property
    async fn get(&self, index: u8) -> Result<PropertyValue>;

    /// Write one property, returning the value the device reports afterwards
    async fn set(&self, index: u8, value: PropertyValue) -> Result<PropertyValue>;
}

/// Creates device handles
pub trait TransportFactory: Send + Sync {
    /// Open a handle for a device and the stream of events it will emit
    ///
    /// # Errors
    ///
    /// Returns error if the connection parameters are unusable
    fn open(&self, device: &DeviceDefinition) -> Result<(Arc<dyn DeviceTransport>, EventStream)>;
}
