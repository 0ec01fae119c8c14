//! Shared test utilities

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use actuator_bridge::devices::{
    Address, DeviceKind, DeviceManager, DeviceSpec, DeviceStore, DeviceTransport,
    PropertySnapshot, PropertyValue, SimulatedFactory, SimulatedTransport, TransportEvent,
};
use actuator_bridge::notify::{Notifier, NotifyEvent};

/// Notifier that records every event it is given
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, NotifyEvent)>>,
}

impl RecordingNotifier {
    /// Events sent for one device, in order
    pub fn events_for(&self, device: &str) -> Vec<NotifyEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name == device)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// How many events with this upstream name were sent for a device
    pub fn count(&self, device: &str, event_name: &str) -> usize {
        self.events_for(device)
            .iter()
            .filter(|e| e.name() == event_name)
            .count()
    }

    /// Text of every `OnMessage` sent for a device
    pub fn messages(&self, device: &str) -> Vec<String> {
        self.events_for(device)
            .into_iter()
            .filter_map(|e| match e {
                NotifyEvent::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, device: &str, event: NotifyEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((device.to_string(), event));
    }
}

/// A manager on the simulated backend with a recording notifier
pub struct Harness {
    pub manager: Arc<DeviceManager>,
    pub factory: Arc<SimulatedFactory>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    /// Harness whose devices echo writes back as events
    pub fn new(echo_writes: bool) -> Self {
        Self::with_retry(echo_writes, Duration::from_secs(10))
    }

    pub fn with_retry(echo_writes: bool, retry: Duration) -> Self {
        Self::build(echo_writes, |manager| manager.with_retry_interval(retry))
    }

    /// Harness whose manager saves definitions to `store`
    pub fn with_store(echo_writes: bool, store: DeviceStore) -> Self {
        Self::build(echo_writes, |manager| manager.with_store(store))
    }

    fn build(echo_writes: bool, configure: impl FnOnce(DeviceManager) -> DeviceManager) -> Self {
        let factory = Arc::new(SimulatedFactory::new(echo_writes));
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = configure(DeviceManager::new(factory.clone(), notifier.clone()));
        Self {
            manager: Arc::new(manager),
            factory,
            notifier,
        }
    }

    /// Simulated device opened under a name
    pub fn device(&self, name: &str) -> Arc<SimulatedTransport> {
        self.factory.device(name).expect("device was never opened")
    }

    /// Define a device and wait for its first connection
    pub async fn define_connected(&self, spec: DeviceSpec) {
        let name = spec.name.clone();
        self.manager.define(spec).await.expect("define failed");
        self.wait_connected(&name).await;
    }

    /// Wait until the current handle of a device is connected
    pub async fn wait_connected(&self, name: &str) {
        let device = self.device(name);
        wait_until(|| {
            let connected = device.is_connected();
            async move { connected }
        })
        .await;
    }
}

/// Blind spec with its default property named `control`
pub fn blind(name: &str, id: &str) -> DeviceSpec {
    DeviceSpec {
        name: name.to_string(),
        kind: DeviceKind::Blind,
        address: Address::Id(id.to_string()),
        local_key: "0123456789abcdef".to_string(),
        properties: BTreeMap::from([(1, "control".to_string())]),
    }
}

/// Switch spec with its default property named `power`
pub fn switch(name: &str, ip: &str) -> DeviceSpec {
    DeviceSpec {
        name: name.to_string(),
        kind: DeviceKind::from("switch"),
        address: Address::Ip(ip.parse().expect("bad test ip")),
        local_key: "fedcba9876543210".to_string(),
        properties: BTreeMap::from([(1, "power".to_string())]),
    }
}

/// Single default-property change as the device would report it
pub fn default_change(value: &str, at_ms: i64) -> TransportEvent {
    TransportEvent::Data(PropertySnapshot::single(
        1,
        PropertyValue::from(value),
        Some(at_ms),
    ))
}

/// Poll until `check` holds, failing the test after a generous deadline
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
