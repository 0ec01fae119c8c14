//! Networked actuator devices
//!
//! Definitions and live sessions, the connection lifecycle, the property
//! event pipeline and the blind calibration engine

pub mod blind;
pub mod connection;
pub mod events;
pub mod manager;
pub mod registry;
pub mod simulated;
pub mod store;
pub mod transport;
pub mod types;

pub use blind::{CalibrationCoordinator, CalibrationStep, PERCENTAGE};
pub use connection::ConnectionState;
pub use events::{DEFAULT_PROPERTY, PropertyChange};
pub use manager::{DefineOutcome, DeviceCounts, DeviceManager, DeviceStatus, SetValue};
pub use registry::DeviceRegistry;
pub use simulated::{SimulatedFactory, SimulatedTransport};
pub use store::DeviceStore;
pub use transport::{DeviceTransport, EventStream, PropertySnapshot, TransportEvent, TransportFactory};
pub use types::{
    Address, BlindState, DeviceDefinition, DeviceKind, DeviceSession, DeviceSpec, PropertyValue,
    SessionId, TravelTimes,
};
