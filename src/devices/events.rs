//! Property event pipeline
//!
//! Turns raw device snapshots into single-property changes, forwards them
//! upstream and feeds default-property changes to type-specific handlers.

use super::blind::{self, CalibrationCoordinator};
use super::transport::PropertySnapshot;
use super::types::{DeviceDefinition, DeviceSession, PropertyValue};
use crate::notify::{Notifier, NotifyEvent};

/// Index of the property carrying a device's primary state
pub const DEFAULT_PROPERTY: u8 = 1;

/// One property changing value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub index: u8,
    pub value: PropertyValue,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
}

impl PropertyChange {
    /// Extract the single change a snapshot represents
    ///
    /// Snapshots holding several properties are echoes of locally initiated
    /// writes rather than external changes, and yield `None`. So do empty
    /// ones. Snapshots without a device timestamp take `received_ms`.
    #[must_use]
    pub fn from_snapshot(snapshot: PropertySnapshot, received_ms: i64) -> Option<Self> {
        if snapshot.values.len() != 1 {
            return None;
        }
        let (index, value) = snapshot.values.into_iter().next()?;
        Some(Self {
            index,
            value,
            timestamp_ms: snapshot.timestamp_ms.unwrap_or(received_ms),
        })
    }

    /// Whether this is a change of the default property
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.index == DEFAULT_PROPERTY
    }
}

/// Last observed value of the default property and when it changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultPropertyState {
    pub last_value: Option<PropertyValue>,
    pub last_change_ms: Option<i64>,
}

impl DefaultPropertyState {
    /// Record an observation; only a differing value moves the change time
    ///
    /// Returns whether the state changed.
    pub fn record(&mut self, value: &PropertyValue, at_ms: i64) -> bool {
        if self.last_value.as_ref() == Some(value) {
            return false;
        }
        self.last_value = Some(value.clone());
        self.last_change_ms = Some(at_ms);
        true
    }
}

/// Run one change through the pipeline
///
/// Returns true when the device definition changed and should be persisted.
pub fn process_change(
    device: &mut DeviceDefinition,
    session: &mut DeviceSession,
    calibration: &mut CalibrationCoordinator,
    change: &PropertyChange,
    notifier: &dyn Notifier,
) -> bool {
    let property = session.property_name(change.index);
    tracing::debug!(
        device = %device.name,
        property = %property,
        value = %change.value,
        "property changed"
    );
    notifier.notify(
        &device.name,
        NotifyEvent::PropChanged {
            property,
            value: change.value.clone(),
        },
    );

    if !change.is_default() {
        return false;
    }

    // Type-specific handlers see the state from before this change
    let persist = if device.kind.is_blind() {
        blind::on_default_changed(
            device,
            session.id,
            &session.default_state,
            calibration,
            change,
            notifier,
        )
    } else {
        false
    };

    session.default_state.record(&change.value, change.timestamp_ms);
    persist
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn multi_property_snapshots_are_discarded() {
        let snapshot = PropertySnapshot {
            values: BTreeMap::from([
                (1, PropertyValue::from("open")),
                (2, PropertyValue::Int(10)),
            ]),
            timestamp_ms: Some(5),
        };
        assert_eq!(PropertyChange::from_snapshot(snapshot, 0), None);
        assert_eq!(PropertyChange::from_snapshot(PropertySnapshot::default(), 0), None);
    }

    #[test]
    fn missing_timestamp_falls_back_to_receive_time() {
        let snapshot = PropertySnapshot::single(1, PropertyValue::from("stop"), None);
        let change = PropertyChange::from_snapshot(snapshot, 1234).unwrap();
        assert_eq!(change.timestamp_ms, 1234);
        assert!(change.is_default());
    }

    #[test]
    fn repeated_value_keeps_first_change_time() {
        let mut state = DefaultPropertyState::default();
        assert!(state.record(&PropertyValue::from("open"), 100));
        assert!(!state.record(&PropertyValue::from("open"), 200));
        assert_eq!(state.last_change_ms, Some(100));
        assert!(state.record(&PropertyValue::from("stop"), 300));
        assert_eq!(state.last_change_ms, Some(300));
    }
}
