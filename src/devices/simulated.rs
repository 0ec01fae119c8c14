//! In-process simulated device backend
//!
//! Models reachability, failing connects and property storage so the daemon
//! and its tests can run without hardware. Writes are echoed back as
//! single-property snapshots unless echoing is turned off.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::blind;
use super::events::DEFAULT_PROPERTY;
use super::transport::{DeviceTransport, EventStream, PropertySnapshot, TransportEvent, TransportFactory};
use super::types::{DeviceDefinition, PropertyValue};
use crate::{Error, Result};

/// A simulated device
#[derive(Debug)]
pub struct SimulatedTransport {
    name: String,
    reachable: AtomicBool,
    connected: AtomicBool,
    /// Number of upcoming connect attempts that fail
    failing_connects: AtomicU32,
    searches: AtomicU32,
    /// Writes that still succeed before every write fails; `None` never fails
    write_budget: Mutex<Option<u32>>,
    /// Value reported back by the next write instead of the written one
    next_report: Mutex<Option<PropertyValue>>,
    echo_writes: bool,
    values: Mutex<BTreeMap<u8, PropertyValue>>,
    writes: Mutex<Vec<(u8, PropertyValue)>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SimulatedTransport {
    /// Create a device together with its event stream
    #[must_use]
    pub fn new(
        name: &str,
        initial: BTreeMap<u8, PropertyValue>,
        echo_writes: bool,
    ) -> (Arc<Self>, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = Arc::new(Self {
            name: name.to_string(),
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            failing_connects: AtomicU32::new(0),
            searches: AtomicU32::new(0),
            write_budget: Mutex::new(None),
            next_report: Mutex::new(None),
            echo_writes,
            values: Mutex::new(initial),
            writes: Mutex::new(Vec::new()),
            events: tx,
        });
        (device, rx)
    }

    /// Make discovery succeed or fail
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Let `successes` more writes through, then fail every write
    pub fn fail_writes_after(&self, successes: u32) {
        *self.write_budget.lock().unwrap_or_else(PoisonError::into_inner) = Some(successes);
    }

    /// Stop failing writes
    pub fn allow_writes(&self) {
        *self.write_budget.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Make the next write settle on `value` whatever was written
    pub fn report_next(&self, value: PropertyValue) {
        *self.next_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Drop the link as if the device went away
    pub fn drop_link(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected);
        }
    }

    /// Inject an event as if the device had sent it
    pub fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(device = %self.name, "event stream closed");
        }
    }

    /// Number of discovery attempts so far
    #[must_use]
    pub fn searches(&self) -> u32 {
        self.searches.load(Ordering::SeqCst)
    }

    /// All writes received so far, in order
    #[must_use]
    pub fn writes(&self) -> Vec<(u8, PropertyValue)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl DeviceTransport for SimulatedTransport {
    async fn find(&self) -> Result<bool> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.reachable.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> Result<()> {
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transport("connection refused".to_string()));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.emit(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.drop_link();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, index: u8) -> Result<PropertyValue> {
        if !self.is_connected() {
            return Err(Error::Transport("not connected".to_string()));
        }
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no property {index}")))
    }

    async fn set(&self, index: u8, value: PropertyValue) -> Result<PropertyValue> {
        if !self.is_connected() {
            return Err(Error::Transport("not connected".to_string()));
        }
        if let Some(left) = self
            .write_budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            if *left == 0 {
                return Err(Error::Transport("write timed out".to_string()));
            }
            *left -= 1;
        }
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((index, value.clone()));

        let settled = self
            .next_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(value);
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, settled.clone());
        if self.echo_writes {
            self.emit(TransportEvent::Data(PropertySnapshot::single(
                index,
                settled.clone(),
                Some(Self::now_ms()),
            )));
        }
        Ok(settled)
    }
}

/// Factory producing simulated devices
///
/// Keeps every device it opened, looked up by the name it was opened under.
#[derive(Debug)]
pub struct SimulatedFactory {
    echo_writes: bool,
    devices: Mutex<HashMap<String, Arc<SimulatedTransport>>>,
}

impl Default for SimulatedFactory {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SimulatedFactory {
    #[must_use]
    pub fn new(echo_writes: bool) -> Self {
        Self {
            echo_writes,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Most recently opened device for a name
    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<SimulatedTransport>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl TransportFactory for SimulatedFactory {
    fn open(&self, device: &DeviceDefinition) -> Result<(Arc<dyn DeviceTransport>, EventStream)> {
        let mut initial = BTreeMap::new();
        if device.kind.is_blind() {
            initial.insert(DEFAULT_PROPERTY, PropertyValue::from(blind::STOP));
        }
        let (transport, events) = SimulatedTransport::new(&device.name, initial, self.echo_writes);
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.name.clone(), Arc::clone(&transport));
        tracing::debug!(device = %device.name, address = %device.address, "opened simulated device");
        Ok((transport, events))
    }
}
