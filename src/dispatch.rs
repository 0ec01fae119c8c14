//! Command dispatcher
//!
//! Maps inbound commands onto device operations and formats the plain-text
//! response returned to the controller.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde::Deserialize;

use crate::config::REDACTED;
use crate::devices::{
    Address, DefineOutcome, DeviceKind, DeviceManager, DeviceSpec, DeviceStatus, SetValue,
};
use crate::{Error, Result};

/// Define request as received over HTTP or declared in the config file
#[derive(Clone, Deserialize)]
pub struct DefineRequest {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    pub key: String,
    /// Property names keyed by index, written as strings
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl fmt::Debug for DefineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefineRequest")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("ip", &self.ip)
            .field("id", &self.id)
            .field("key", &REDACTED)
            .field("properties", &self.properties)
            .finish()
    }
}

impl DefineRequest {
    /// Validate into a device spec
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty name, a bad address or a
    /// property index that is not a small integer
    pub fn into_spec(self) -> Result<DeviceSpec> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidArgument("device name is empty".to_string()));
        }
        let address = Address::from_parts(self.ip.as_deref(), self.id.as_deref())?;
        let properties = self
            .properties
            .into_iter()
            .map(|(index, property)| {
                index
                    .trim()
                    .parse::<u8>()
                    .map(|index| (index, property))
                    .map_err(|_| {
                        Error::InvalidArgument(format!("property index '{index}' is not a number"))
                    })
            })
            .collect::<Result<_>>()?;
        Ok(DeviceSpec {
            name,
            kind: DeviceKind::from(self.kind.as_str()),
            address,
            local_key: self.key,
            properties,
        })
    }
}

/// An operation requested by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Define(DeviceSpec),
    Undefine { name: String },
    Delete { name: String },
    Rename { name: String, new_name: String },
    Connect { name: String },
    Get { name: String, property: String },
    Set {
        name: String,
        property: String,
        value: SetValue,
    },
    Calibrate { name: String },
    SetPercentage { name: String, percentage: f64 },
    List,
}

impl Command {
    /// Operation name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Define(_) => "define",
            Self::Undefine { .. } => "undefine",
            Self::Delete { .. } => "delete",
            Self::Rename { .. } => "rename",
            Self::Connect { .. } => "connect",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Calibrate { .. } => "calibrate",
            Self::SetPercentage { .. } => "setPercentage",
            Self::List => "list",
        }
    }
}

/// Run a command and format its response
///
/// # Errors
///
/// Returns the operation's error; it is logged here
pub async fn execute(manager: &Arc<DeviceManager>, command: Command) -> Result<String> {
    let operation = command.name();
    tracing::debug!(operation, "executing command");
    let result = run(manager, command).await;
    if let Err(e) = &result {
        tracing::warn!(operation, error = %e, "command failed");
    }
    result
}

async fn run(manager: &Arc<DeviceManager>, command: Command) -> Result<String> {
    match command {
        Command::Define(spec) => {
            let name = spec.name.clone();
            Ok(match manager.define(spec).await? {
                DefineOutcome::Created => format!("defined '{name}'"),
                DefineOutcome::Unchanged => format!("'{name}' is already defined"),
                DefineOutcome::Updated => format!("updated '{name}'"),
                DefineOutcome::Renamed { from } => format!("renamed '{from}' to '{name}'"),
            })
        }
        Command::Undefine { name } => Ok(if manager.undefine(&name).await? {
            format!("undefined '{name}'")
        } else {
            format!("'{name}' was not initialized")
        }),
        Command::Delete { name } => {
            manager.delete(&name).await?;
            Ok(format!("deleted '{name}'"))
        }
        Command::Rename { name, new_name } => {
            manager.rename(&name, &new_name).await?;
            Ok(format!("renamed '{name}' to '{new_name}'"))
        }
        Command::Connect { name } => Ok(if manager.connect(&name).await? {
            format!("connected '{name}'")
        } else {
            format!("'{name}' is already connected")
        }),
        Command::Get { name, property } => Ok(manager.get(&name, &property).await?.to_string()),
        Command::Set {
            name,
            property,
            value,
        } => Ok(manager.set(&name, &property, value).await?.to_string()),
        Command::Calibrate { name } => {
            manager.begin_calibration(&name).await?;
            Ok(format!(
                "calibrating '{name}': stop the blind once it is fully open"
            ))
        }
        Command::SetPercentage { name, percentage } => {
            Ok(match manager.set_percentage(&name, percentage).await? {
                Some(planned) => format!(
                    "moved '{name}' to {percentage}% ({} for {:.1}s)",
                    planned.direction,
                    planned.duration.as_secs_f64()
                ),
                None => format!("'{name}' is already at {percentage}%"),
            })
        }
        Command::List => Ok(format_list(&manager.list().await)),
    }
}

/// One line per device
#[must_use]
pub fn format_list(devices: &[DeviceStatus]) -> String {
    if devices.is_empty() {
        return "no devices defined".to_string();
    }
    let mut out = String::new();
    for device in devices {
        let _ = write!(
            out,
            "{} {} ({}) {:?}",
            device.name, device.kind, device.address, device.state
        );
        if let Some(percentage) = device.percentage {
            let _ = write!(out, " {percentage:.0}%");
        }
        if device.calibrating {
            out.push_str(" calibrating");
        }
        out.push('\n');
    }
    out
}
