//! Actuator Bridge - control daemon for networked actuator devices
//!
//! Bridges a home-automation controller to stateful, network-attached
//! devices exposing indexed properties:
//! - Connection lifecycle with retrying reconnects
//! - Property change pipeline forwarding events upstream
//! - Blind calibration and a derived position percentage
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Controller (HTTP commands, notifications)   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   API  │  Dispatcher  │  Notifier                    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Device manager: registry │ connections │ events    │
//! │                   blind calibration │ store          │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Device transport (per device)           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod notify;

pub use config::Config;
pub use daemon::Daemon;
pub use devices::DeviceManager;
pub use error::{Error, Result};
