//! Device manager
//!
//! Shared state behind every device operation: the registry of definitions
//! and sessions, the calibration coordinator, the transport factory and the
//! upstream notifier. Locks are always taken registry first, then
//! calibration, and never held across device I/O, store writes or timed
//! waits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use super::blind::{self, CalibrationCoordinator, PERCENTAGE, PercentageMove};
use super::connection::{self, ConnectionState, ReconnectPermit};
use super::events::{self, DEFAULT_PROPERTY, PropertyChange};
use super::registry::{DeviceRegistry, Upsert};
use super::store::DeviceStore;
use super::transport::{DeviceTransport, EventStream, PropertySnapshot, TransportEvent, TransportFactory};
use super::types::{
    DeviceDefinition, DeviceKind, DeviceSession, DeviceSpec, PropertyValue, SessionId, TravelTimes,
};
use crate::notify::{NotifyEvent, SharedNotifier};
use crate::{Error, Result};

/// Default wait between reconnect attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Value of a `set` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetValue {
    Value(PropertyValue),
    /// Negate the current boolean value
    Toggle,
}

impl SetValue {
    /// Parse a command argument; `toggle` is the only keyword
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("toggle") {
            Self::Toggle
        } else {
            Self::Value(PropertyValue::parse(raw))
        }
    }
}

/// What a `define` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefineOutcome {
    Created,
    Unchanged,
    Updated,
    Renamed { from: String },
}

/// One row of `list`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub kind: String,
    pub address: String,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travel: Option<TravelTimes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    pub calibrating: bool,
}

/// Device totals for readiness reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCounts {
    pub defined: usize,
    pub initialized: usize,
    pub connected: usize,
}

/// A session attached under the registry lock, waiting for its tasks
struct PendingSession {
    id: SessionId,
    handle: Arc<dyn DeviceTransport>,
    events: EventStream,
    guard: Arc<AtomicBool>,
}

/// Definitions captured under the registry lock, saved after it is released
struct StoreSnapshot {
    generation: u64,
    definitions: Vec<DeviceDefinition>,
}

/// Where a property command goes
enum Target {
    /// The server-provided percentage of a blind
    Percentage,
    Native {
        kind: DeviceKind,
        handle: Arc<dyn DeviceTransport>,
        index: u8,
    },
}

/// Owns all device state and runs device operations
pub struct DeviceManager {
    registry: Mutex<DeviceRegistry>,
    calibration: Mutex<CalibrationCoordinator>,
    notifier: SharedNotifier,
    transports: Arc<dyn TransportFactory>,
    store: Option<DeviceStore>,
    /// Generation of the newest snapshot taken
    generation: AtomicU64,
    /// Generation of the newest snapshot written; serializes store writes
    saved: Mutex<u64>,
    retry_interval: Duration,
}

impl DeviceManager {
    /// Create a manager without persistence
    #[must_use]
    pub fn new(transports: Arc<dyn TransportFactory>, notifier: SharedNotifier) -> Self {
        Self {
            registry: Mutex::new(DeviceRegistry::new()),
            calibration: Mutex::new(CalibrationCoordinator::new()),
            notifier,
            transports,
            store: None,
            generation: AtomicU64::new(0),
            saved: Mutex::new(0),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Persist definitions to a store
    #[must_use]
    pub fn with_store(mut self, store: DeviceStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the wait between reconnect attempts
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Wait between reconnect attempts
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Define a device and attach a live handle to it
    ///
    /// The first connection attempt runs in the background as a reconnect
    /// loop, so this returns before the device is connected.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot open a handle for the device
    pub async fn define(self: &Arc<Self>, spec: DeviceSpec) -> Result<DefineOutcome> {
        let name = spec.name.clone();
        let (outcome, detached, snapshot, pending) = {
            let mut registry = self.registry.lock().await;
            let (outcome, detached) = match registry.upsert(&spec) {
                Upsert::Unchanged => (DefineOutcome::Unchanged, None),
                Upsert::Created => (DefineOutcome::Created, None),
                Upsert::Updated { detached } => (DefineOutcome::Updated, detached),
                Upsert::Renamed { from } => (DefineOutcome::Renamed { from }, None),
            };
            if let Some(old) = &detached {
                self.cancel_calibration(old.id, &name).await;
            }
            let snapshot = self.snapshot(&registry);

            let pending = if registry.is_live(&name) {
                Ok(None)
            } else {
                self.open_session(&mut registry, &name).map(Some)
            };
            (outcome, detached, snapshot, pending)
        };
        self.persist(snapshot).await;

        if let Some(old) = detached {
            if let Err(e) = connection::disconnect(&name, &*old.handle).await {
                tracing::warn!(device = %name, error = %e, "failed to close replaced handle");
            }
        }
        if let Some(pending) = pending? {
            self.start_session(pending);
        }
        Ok(outcome)
    }

    /// Re-create a persisted definition at startup and attach a handle
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken or no handle can be opened
    pub async fn restore(self: &Arc<Self>, definition: DeviceDefinition) -> Result<()> {
        let name = definition.name.clone();
        let pending = {
            let mut registry = self.registry.lock().await;
            registry.restore(definition)?;
            self.open_session(&mut registry, &name)?
        };
        tracing::info!(device = %name, "restored");
        self.start_session(pending);
        Ok(())
    }

    /// Detach the live handle of a device, keeping its definition
    ///
    /// Cancels the device's calibration if it is running. Returns whether a
    /// handle was detached.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the device is not defined
    pub async fn undefine(&self, name: &str) -> Result<bool> {
        let session = {
            let mut registry = self.registry.lock().await;
            let session = registry.detach(name)?;
            if let Some(session) = &session {
                self.cancel_calibration(session.id, name).await;
            }
            session
        };

        let Some(session) = session else {
            tracing::info!(device = %name, "not initialized, nothing to undefine");
            return Ok(false);
        };
        if let Err(e) = connection::disconnect(name, &*session.handle).await {
            tracing::warn!(device = %name, error = %e, "disconnect on undefine failed");
        }
        tracing::info!(device = %name, "undefined");
        Ok(true)
    }

    /// Remove a device definition entirely
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` while the device is initialized and
    /// `NotFound` if it is not defined
    pub async fn delete(&self, name: &str) -> Result<DeviceDefinition> {
        let (removed, snapshot) = {
            let mut registry = self.registry.lock().await;
            let removed = registry.remove(name)?;
            (removed, self.snapshot(&registry))
        };
        self.persist(snapshot).await;
        tracing::info!(device = %name, "deleted");
        Ok(removed)
    }

    /// Rename a device, live session included
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `old` is not defined and `InvariantViolation`
    /// if `new` is taken
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return self.registry.lock().await.rename(old, new);
        }
        let snapshot = {
            let mut registry = self.registry.lock().await;
            registry.rename(old, new)?;
            self.snapshot(&registry)
        };
        self.persist(snapshot).await;
        tracing::info!(from = %old, to = %new, "renamed");
        Ok(())
    }

    /// Connect a device once, without retrying
    ///
    /// Returns false if it was already connected.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` or `ConnectFailed` from the attempt, and
    /// `NotFound`/`InvariantViolation` if the device has no handle
    pub async fn connect(&self, name: &str) -> Result<bool> {
        let handle = self.live_handle(name).await?;
        if handle.is_connected() {
            return Ok(false);
        }
        connection::connect(name, &*handle).await.inspect_err(|e| {
            tracing::warn!(device = %name, error = %e, "connect failed");
        })?;
        Ok(true)
    }

    /// Read a property by index or name
    ///
    /// On a blind, `percentage` reads the computed position.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown devices or properties, `NotCalibrated`
    /// for an uncalibrated percentage and `Transport` on device failure
    pub async fn get(&self, name: &str, property: &str) -> Result<PropertyValue> {
        match self.target(name, property).await? {
            Target::Percentage => self.percentage(name).await.map(percentage_value),
            Target::Native { handle, index, .. } => handle.get(index).await.map_err(|e| {
                tracing::warn!(device = %name, property = index, error = %e, "read failed");
                Error::Transport(format!("reading property {index} of '{name}': {e}"))
            }),
        }
    }

    /// Write a property by index or name
    ///
    /// On a blind, `percentage` moves the blind to the given position.
    /// Returns the value the device reports afterwards.
    ///
    /// # Errors
    ///
    /// Returns `CommandRejected` if the device reports a different value,
    /// `InvalidArgument` for a toggle of a non-boolean, and the errors of
    /// [`Self::get`] and [`Self::set_percentage`]
    pub async fn set(&self, name: &str, property: &str, value: SetValue) -> Result<PropertyValue> {
        match self.target(name, property).await? {
            Target::Percentage => {
                let SetValue::Value(value) = value else {
                    return Err(Error::InvalidArgument(format!(
                        "'{PERCENTAGE}' of '{name}' cannot be toggled"
                    )));
                };
                let target = value.to_string().parse::<f64>().map_err(|_| {
                    Error::InvalidArgument(format!("'{value}' is not a percentage"))
                })?;
                self.set_percentage(name, target).await?;
                Ok(value)
            }
            Target::Native {
                kind,
                handle,
                index,
            } => {
                let value = match value {
                    SetValue::Value(value) => value,
                    SetValue::Toggle => {
                        let current = handle.get(index).await.map_err(|e| {
                            Error::Transport(format!("reading property {index} of '{name}': {e}"))
                        })?;
                        let current = current.as_bool().ok_or_else(|| {
                            Error::InvalidArgument(format!(
                                "cannot toggle property {index} of '{name}': {current} is not a boolean"
                            ))
                        })?;
                        PropertyValue::Bool(!current)
                    }
                };
                checked_set(name, &kind, &*handle, index, value).await
            }
        }
    }

    /// Start calibrating a blind by opening it
    ///
    /// # Errors
    ///
    /// Returns `CalibrationBusy` if another device is being calibrated,
    /// `InvalidArgument` if the device is not a blind, and the error of the
    /// open command, in which case the calibration is abandoned
    pub async fn begin_calibration(&self, name: &str) -> Result<()> {
        let (id, handle) = {
            let registry = self.registry.lock().await;
            let definition = registry
                .definition(name)
                .ok_or_else(|| Error::NotFound(format!("device '{name}'")))?;
            if !definition.kind.is_blind() {
                return Err(Error::InvalidArgument(format!(
                    "'{name}' is a {}, only blinds can be calibrated",
                    definition.kind
                )));
            }
            let session = registry.session(name).ok_or_else(|| not_initialized(name))?;
            self.calibration.lock().await.begin(session.id, name)?;
            (session.id, Arc::clone(&session.handle))
        };
        tracing::info!(device = %name, "calibration started");

        let opened = checked_set(
            name,
            &DeviceKind::Blind,
            &*handle,
            DEFAULT_PROPERTY,
            PropertyValue::from(blind::OPEN),
        )
        .await;
        if let Err(e) = opened {
            self.calibration.lock().await.cancel(id);
            tracing::warn!(device = %name, error = %e, "calibration aborted: could not open");
            return Err(e);
        }
        Ok(())
    }

    /// Move a calibrated blind to a target percentage
    ///
    /// Drives the blind in the needed direction for the computed time, then
    /// stops it. The stored percentage follows through the event pipeline.
    /// Returns the movement made, or `None` if already at the target.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` outside 0..=100, `NotCalibrated` without a
    /// calibration and the error of either write
    pub async fn set_percentage(&self, name: &str, target: f64) -> Result<Option<PercentageMove>> {
        if !(0.0..=100.0).contains(&target) {
            return Err(Error::InvalidArgument(format!(
                "percentage must be between 0 and 100, got {target}"
            )));
        }
        let (handle, planned) = {
            let registry = self.registry.lock().await;
            let definition = registry
                .definition(name)
                .ok_or_else(|| Error::NotFound(format!("device '{name}'")))?;
            if !definition.kind.is_blind() {
                return Err(Error::InvalidArgument(format!("'{name}' is not a blind")));
            }
            let (Some(percentage), Some(travel)) =
                (definition.blind.percentage, definition.blind.travel)
            else {
                return Err(not_calibrated(name));
            };
            let session = registry.session(name).ok_or_else(|| not_initialized(name))?;
            (
                Arc::clone(&session.handle),
                blind::plan_move(percentage, target, travel),
            )
        };

        let Some(planned) = planned else {
            tracing::debug!(device = %name, target, "already at target percentage");
            return Ok(None);
        };
        tracing::info!(
            device = %name,
            target,
            direction = planned.direction,
            duration_ms = u64::try_from(planned.duration.as_millis()).unwrap_or(u64::MAX),
            "moving to percentage"
        );

        checked_set(
            name,
            &DeviceKind::Blind,
            &*handle,
            DEFAULT_PROPERTY,
            PropertyValue::from(planned.direction),
        )
        .await?;
        tokio::time::sleep(planned.duration).await;
        checked_set(
            name,
            &DeviceKind::Blind,
            &*handle,
            DEFAULT_PROPERTY,
            PropertyValue::from(blind::STOP),
        )
        .await?;
        Ok(Some(planned))
    }

    /// Status of every defined device
    pub async fn list(&self) -> Vec<DeviceStatus> {
        let registry = self.registry.lock().await;
        let calibration = self.calibration.lock().await;
        registry
            .definitions()
            .iter()
            .map(|definition| {
                let session = registry.session(&definition.name);
                DeviceStatus {
                    name: definition.name.clone(),
                    kind: definition.kind.to_string(),
                    address: definition.address.to_string(),
                    state: ConnectionState::of(session),
                    travel: definition.blind.travel,
                    percentage: definition.blind.percentage,
                    calibrating: session.is_some_and(|s| calibration.is_target(s.id)),
                }
            })
            .collect()
    }

    /// Device totals
    pub async fn counts(&self) -> DeviceCounts {
        let registry = self.registry.lock().await;
        let live = registry.live_names();
        DeviceCounts {
            defined: registry.len(),
            initialized: live.len(),
            connected: live
                .iter()
                .filter_map(|name| registry.session(name))
                .filter(|s| s.handle.is_connected())
                .count(),
        }
    }

    /// Copy of a device definition
    pub async fn definition(&self, name: &str) -> Option<DeviceDefinition> {
        self.registry.lock().await.definition(name).cloned()
    }

    /// Current session of an initialized device
    pub async fn session_id(&self, name: &str) -> Option<SessionId> {
        self.registry.lock().await.session(name).map(|s| s.id)
    }

    /// Undefine every initialized device
    pub async fn shutdown(&self) {
        let names = self.registry.lock().await.live_names();
        for name in names {
            if let Err(e) = self.undefine(&name).await {
                tracing::warn!(device = %name, error = %e, "undefine on shutdown failed");
            }
        }
    }

    /// Run one transport event of a session through the lifecycle callbacks
    /// and the property pipeline
    ///
    /// Returns false once the session no longer exists.
    pub async fn handle_event(self: &Arc<Self>, session: SessionId, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connected => self.on_connected(session).await,
            TransportEvent::Disconnected => self.on_disconnected(session).await,
            TransportEvent::Error(message) => self.on_error(session, message).await,
            TransportEvent::Data(snapshot) => self.on_data(session, snapshot).await,
        }
    }

    async fn on_connected(&self, session: SessionId) -> bool {
        let Some(name) = self.current_name(session).await else {
            tracing::debug!(%session, "connected event for undefined device ignored");
            return false;
        };
        self.notifier.notify(&name, NotifyEvent::Connected);
        true
    }

    async fn on_disconnected(self: &Arc<Self>, session: SessionId) -> bool {
        let Some((name, handle, guard)) = self.live_session(session).await else {
            tracing::debug!(%session, "disconnected event for undefined device ignored");
            return false;
        };
        tracing::info!(device = %name, "link lost");
        self.notifier.notify(&name, NotifyEvent::Disconnected);
        self.start_reconnect(session, handle, &guard);
        true
    }

    async fn on_error(self: &Arc<Self>, session: SessionId, message: String) -> bool {
        let Some((name, handle, guard)) = self.live_session(session).await else {
            tracing::info!(%session, error = %message, "error from undefined device ignored");
            return false;
        };
        tracing::warn!(device = %name, error = %message, "device error");
        if !handle.is_connected() {
            self.start_reconnect(session, handle, &guard);
        }
        self.notifier.notify(&name, NotifyEvent::Error(message));
        true
    }

    async fn on_data(&self, session: SessionId, snapshot: PropertySnapshot) -> bool {
        let received_ms = chrono::Utc::now().timestamp_millis();
        let mut registry = self.registry.lock().await;
        let Some((definition, device_session)) = registry.entry_mut(session) else {
            return false;
        };
        let count = snapshot.values.len();
        let Some(change) = PropertyChange::from_snapshot(snapshot, received_ms) else {
            tracing::trace!(device = %definition.name, count, "snapshot discarded");
            return true;
        };

        let mut calibration = self.calibration.lock().await;
        let persist = events::process_change(
            definition,
            device_session,
            &mut calibration,
            &change,
            &*self.notifier,
        );
        drop(calibration);
        let snapshot = if persist {
            self.snapshot(&registry)
        } else {
            None
        };
        drop(registry);
        self.persist(snapshot).await;
        true
    }

    fn spawn_pump(self: &Arc<Self>, session: SessionId, mut events: EventStream) {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.handle_event(session, event).await {
                    break;
                }
            }
            tracing::trace!(%session, "event pump stopped");
        });
    }

    fn start_reconnect(
        self: &Arc<Self>,
        session: SessionId,
        handle: Arc<dyn DeviceTransport>,
        guard: &Arc<AtomicBool>,
    ) {
        let Some(permit) = ReconnectPermit::acquire(guard) else {
            tracing::debug!(%session, "reconnect already in progress");
            return;
        };
        let manager = Arc::downgrade(self);
        tokio::spawn(connection::reconnect_loop(
            handle,
            self.retry_interval,
            permit,
            move || {
                let manager = Weak::clone(&manager);
                async move { manager.upgrade()?.current_name(session).await }
            },
        ));
    }

    fn start_session(self: &Arc<Self>, pending: PendingSession) {
        self.spawn_pump(pending.id, pending.events);
        self.start_reconnect(pending.id, pending.handle, &pending.guard);
    }

    fn open_session(&self, registry: &mut DeviceRegistry, name: &str) -> Result<PendingSession> {
        let definition = registry
            .definition(name)
            .ok_or_else(|| Error::NotFound(format!("device '{name}'")))?;
        let (handle, events) = self.transports.open(definition)?;
        let session = DeviceSession::new(Arc::clone(&handle), definition.properties.clone());
        let pending = PendingSession {
            id: session.id,
            handle,
            events,
            guard: Arc::clone(&session.reconnecting),
        };
        registry.attach(name, session)?;
        Ok(pending)
    }

    async fn cancel_calibration(&self, session: SessionId, name: &str) {
        if self.calibration.lock().await.cancel(session) {
            tracing::info!(device = %name, "calibration cancelled");
            self.notifier
                .notify(name, NotifyEvent::Message("calibration cancelled".to_string()));
        }
    }

    async fn current_name(&self, session: SessionId) -> Option<String> {
        self.registry
            .lock()
            .await
            .name_of(session)
            .map(str::to_string)
    }

    async fn live_session(
        &self,
        session: SessionId,
    ) -> Option<(String, Arc<dyn DeviceTransport>, Arc<AtomicBool>)> {
        let registry = self.registry.lock().await;
        let name = registry.name_of(session)?;
        let live = registry.session(name)?;
        Some((
            name.to_string(),
            Arc::clone(&live.handle),
            Arc::clone(&live.reconnecting),
        ))
    }

    async fn live_handle(&self, name: &str) -> Result<Arc<dyn DeviceTransport>> {
        let registry = self.registry.lock().await;
        if registry.definition(name).is_none() {
            return Err(Error::NotFound(format!("device '{name}'")));
        }
        registry
            .session(name)
            .map(|s| Arc::clone(&s.handle))
            .ok_or_else(|| not_initialized(name))
    }

    async fn target(&self, name: &str, property: &str) -> Result<Target> {
        let registry = self.registry.lock().await;
        let definition = registry
            .definition(name)
            .ok_or_else(|| Error::NotFound(format!("device '{name}'")))?;
        if definition.kind.is_blind() && property == PERCENTAGE {
            return Ok(Target::Percentage);
        }
        let session = registry.session(name).ok_or_else(|| not_initialized(name))?;
        let index = session
            .resolve_property(property)
            .ok_or_else(|| Error::NotFound(format!("property '{property}' of '{name}'")))?;
        Ok(Target::Native {
            kind: definition.kind.clone(),
            handle: Arc::clone(&session.handle),
            index,
        })
    }

    async fn percentage(&self, name: &str) -> Result<f64> {
        self.registry
            .lock()
            .await
            .definition(name)
            .ok_or_else(|| Error::NotFound(format!("device '{name}'")))?
            .blind
            .percentage
            .ok_or_else(|| not_calibrated(name))
    }

    /// Capture the definitions for a later [`Self::persist`]; call under
    /// the registry lock so generations follow registry order
    fn snapshot(&self, registry: &DeviceRegistry) -> Option<StoreSnapshot> {
        self.store.as_ref()?;
        Some(StoreSnapshot {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            definitions: registry.definitions().to_vec(),
        })
    }

    /// Write a snapshot unless a newer one was already written
    async fn persist(&self, snapshot: Option<StoreSnapshot>) {
        let (Some(store), Some(snapshot)) = (&self.store, snapshot) else {
            return;
        };
        let mut saved = self.saved.lock().await;
        if snapshot.generation <= *saved {
            tracing::trace!(generation = snapshot.generation, "skipping stale store snapshot");
            return;
        }
        let path = store.path().display().to_string();
        let store = store.clone();
        let definitions = snapshot.definitions;
        match tokio::task::spawn_blocking(move || store.save(&definitions)).await {
            Ok(Ok(())) => *saved = snapshot.generation,
            Ok(Err(e)) => tracing::warn!(path = %path, error = %e, "failed to save device store"),
            Err(e) => tracing::warn!(path = %path, error = %e, "device store writer failed"),
        }
    }
}

/// Write a property and verify the device took the value
///
/// A blind reversing direction may report `stop` on its way; that counts
/// as success.
async fn checked_set(
    name: &str,
    kind: &DeviceKind,
    handle: &dyn DeviceTransport,
    index: u8,
    value: PropertyValue,
) -> Result<PropertyValue> {
    let current = handle.set(index, value.clone()).await.map_err(|e| {
        tracing::warn!(device = %name, property = index, value = %value, error = %e, "write failed");
        Error::Transport(format!("setting property {index} of '{name}' to {value}: {e}"))
    })?;
    if current == value {
        return Ok(current);
    }
    let reversing = kind.is_blind()
        && index == DEFAULT_PROPERTY
        && current.is(blind::STOP)
        && (value.is(blind::OPEN) || value.is(blind::CLOSE));
    if reversing {
        tracing::debug!(device = %name, requested = %value, "blind stopped before reversing");
        return Ok(current);
    }
    tracing::warn!(device = %name, property = index, requested = %value, reported = %current, "write rejected");
    Err(Error::CommandRejected(format!(
        "'{name}' reported {current} after setting property {index} to {value}"
    )))
}

#[allow(clippy::cast_possible_truncation)]
fn percentage_value(percentage: f64) -> PropertyValue {
    PropertyValue::Int(percentage.round() as i64)
}

fn not_initialized(name: &str) -> Error {
    Error::InvariantViolation(format!("'{name}' is not initialized; define it first"))
}

fn not_calibrated(name: &str) -> Error {
    Error::NotCalibrated(format!("'{name}' has not been calibrated"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::devices::simulated::SimulatedFactory;
    use crate::devices::types::Address;
    use crate::notify::LogNotifier;

    fn manager() -> (Arc<DeviceManager>, Arc<SimulatedFactory>) {
        let factory = Arc::new(SimulatedFactory::new(false));
        let manager = DeviceManager::new(factory.clone(), Arc::new(LogNotifier));
        (Arc::new(manager), factory)
    }

    fn switch(name: &str) -> DeviceSpec {
        DeviceSpec {
            name: name.to_string(),
            kind: DeviceKind::from("switch"),
            address: Address::Id(format!("{name}-id")),
            local_key: "key".to_string(),
            properties: BTreeMap::from([(1, "power".to_string())]),
        }
    }

    #[test]
    fn set_value_parsing() {
        assert_eq!(SetValue::parse("Toggle"), SetValue::Toggle);
        assert_eq!(
            SetValue::parse("open"),
            SetValue::Value(PropertyValue::from("open"))
        );
    }

    #[tokio::test]
    async fn define_twice_is_unchanged() {
        let (manager, _) = manager();
        assert_eq!(manager.define(switch("s")).await.unwrap(), DefineOutcome::Created);
        let first = manager.session_id("s").await.unwrap();
        assert_eq!(manager.define(switch("s")).await.unwrap(), DefineOutcome::Unchanged);
        assert_eq!(manager.session_id("s").await, Some(first));
    }

    #[tokio::test]
    async fn percentage_of_uncalibrated_blind() {
        let (manager, _) = manager();
        let mut spec = switch("b");
        spec.kind = DeviceKind::Blind;
        manager.define(spec).await.unwrap();
        assert!(matches!(
            manager.get("b", PERCENTAGE).await,
            Err(Error::NotCalibrated(_))
        ));
        assert!(matches!(
            manager.set_percentage("b", 150.0).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn calibration_requires_a_blind() {
        let (manager, _) = manager();
        manager.define(switch("s")).await.unwrap();
        assert!(matches!(
            manager.begin_calibration("s").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.begin_calibration("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_property_is_not_found() {
        let (manager, _) = manager();
        manager.define(switch("s")).await.unwrap();
        assert!(matches!(
            manager.get("s", "brightness").await,
            Err(Error::NotFound(_))
        ));
    }
}
