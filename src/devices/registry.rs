//! Registry of known devices and their live sessions
//!
//! Definitions persist until deleted. A definition is initialized while a
//! session (and therefore a transport handle) is attached under its name.

use std::collections::HashMap;

use super::types::{DeviceDefinition, DeviceSession, DeviceSpec, SessionId};
use crate::{Error, Result};

/// What `upsert` did with a define request
#[derive(Debug)]
pub enum Upsert {
    /// A definition with this name and identity already existed
    Unchanged,
    /// A new definition was created
    Created,
    /// The named definition differed and was updated in place
    ///
    /// Carries the session detached because its handle was opened with the
    /// old parameters.
    Updated { detached: Option<DeviceSession> },
    /// The same device was known under another name and was renamed
    Renamed { from: String },
}

/// Registry of device definitions and live sessions
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    definitions: Vec<DeviceDefinition>,
    sessions: HashMap<String, DeviceSession>,
}

impl DeviceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All definitions in definition order
    #[must_use]
    pub fn definitions(&self) -> &[DeviceDefinition] {
        &self.definitions
    }

    /// Get a definition by name
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<&DeviceDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Get a live session by device name
    #[must_use]
    pub fn session(&self, name: &str) -> Option<&DeviceSession> {
        self.sessions.get(name)
    }

    /// Whether the device has a live handle
    #[must_use]
    pub fn is_live(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Name of the device a session belongs to
    #[must_use]
    pub fn name_of(&self, id: SessionId) -> Option<&str> {
        self.sessions
            .iter()
            .find(|(_, s)| s.id == id)
            .map(|(name, _)| name.as_str())
    }

    /// Definition and session for a session ID
    pub fn entry_mut(&mut self, id: SessionId) -> Option<(&mut DeviceDefinition, &mut DeviceSession)> {
        let (name, session) = self.sessions.iter_mut().find(|(_, s)| s.id == id)?;
        let definition = self.definitions.iter_mut().find(|d| d.name == *name)?;
        Some((definition, session))
    }

    /// Create, update or rename a definition to match a define request
    ///
    /// Never attaches a session; the caller does that once a handle is open.
    pub fn upsert(&mut self, spec: &DeviceSpec) -> Upsert {
        let outcome = if let Some(existing) = self.definitions.iter_mut().find(|d| d.name == spec.name) {
            if existing.same_identity(spec) {
                if existing.properties != spec.properties {
                    tracing::info!(device = %spec.name, "property names updated");
                    existing.properties.clone_from(&spec.properties);
                    self.refresh_session_properties(spec);
                }
                Upsert::Unchanged
            } else {
                if existing.kind != spec.kind {
                    tracing::info!(device = %spec.name, from = %existing.kind, to = %spec.kind, "type changed");
                    existing.kind = spec.kind.clone();
                    existing.blind = super::types::BlindState::default();
                }
                if existing.address != spec.address {
                    tracing::info!(device = %spec.name, from = %existing.address, to = %spec.address, "address changed");
                    existing.address = spec.address.clone();
                }
                if existing.local_key != spec.local_key {
                    tracing::info!(device = %spec.name, "local key changed");
                    existing.local_key.clone_from(&spec.local_key);
                }
                if existing.properties != spec.properties {
                    tracing::info!(device = %spec.name, "property names updated");
                    existing.properties.clone_from(&spec.properties);
                }
                Upsert::Updated {
                    detached: self.sessions.remove(&spec.name),
                }
            }
        } else if let Some(existing) = self.definitions.iter().find(|d| d.same_identity(spec)) {
            let from = existing.name.clone();
            self.rename_unchecked(&from, &spec.name);
            if let Some(renamed) = self.definitions.iter_mut().find(|d| d.name == spec.name) {
                renamed.properties.clone_from(&spec.properties);
            }
            self.refresh_session_properties(spec);
            tracing::info!(from = %from, to = %spec.name, "known device defined under a new name");
            Upsert::Renamed { from }
        } else {
            self.definitions.push(DeviceDefinition::from(spec.clone()));
            tracing::info!(device = %spec.name, kind = %spec.kind, address = %spec.address, "device defined");
            Upsert::Created
        };
        debug_assert!(self.is_consistent());
        outcome
    }

    /// Restore a persisted definition without going through define semantics
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the name is already taken
    pub fn restore(&mut self, definition: DeviceDefinition) -> Result<()> {
        if self.definition(&definition.name).is_some() {
            return Err(Error::InvariantViolation(format!(
                "device '{}' is already defined",
                definition.name
            )));
        }
        self.definitions.push(definition);
        Ok(())
    }

    /// Attach a live session to a defined device
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the device is not defined and
    /// `InvariantViolation` if it already has a session
    pub fn attach(&mut self, name: &str, session: DeviceSession) -> Result<()> {
        if self.definition(name).is_none() {
            return Err(Error::NotFound(format!("device '{name}'")));
        }
        if self.sessions.contains_key(name) {
            return Err(Error::InvariantViolation(format!(
                "device '{name}' is already initialized"
            )));
        }
        self.sessions.insert(name.to_string(), session);
        debug_assert!(self.is_consistent());
        Ok(())
    }

    /// Detach the live session of a device, keeping its definition
    ///
    /// Returns `None` if the device was defined but not initialized.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the device is not defined
    pub fn detach(&mut self, name: &str) -> Result<Option<DeviceSession>> {
        if self.definition(name).is_none() {
            return Err(Error::NotFound(format!("device '{name}'")));
        }
        let session = self.sessions.remove(name);
        debug_assert!(self.is_consistent());
        Ok(session)
    }

    /// Remove a definition entirely
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` while the device still has a handle and
    /// `NotFound` if it is not defined
    pub fn remove(&mut self, name: &str) -> Result<DeviceDefinition> {
        if self.sessions.contains_key(name) {
            return Err(Error::InvariantViolation(format!(
                "device '{name}' is still initialized; undefine it first"
            )));
        }
        let index = self
            .definitions
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| Error::NotFound(format!("device '{name}'")))?;
        let removed = self.definitions.remove(index);
        debug_assert!(self.is_consistent());
        Ok(removed)
    }

    /// Rename a device, moving its live session along with it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `old` is not defined and `InvariantViolation`
    /// if `new` is already taken
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if self.definition(old).is_none() {
            return Err(Error::NotFound(format!("device '{old}'")));
        }
        if old == new {
            return Ok(());
        }
        if self.definition(new).is_some() {
            return Err(Error::InvariantViolation(format!(
                "device '{new}' already exists"
            )));
        }
        self.rename_unchecked(old, new);
        debug_assert!(self.is_consistent());
        Ok(())
    }

    fn rename_unchecked(&mut self, old: &str, new: &str) {
        if let Some(definition) = self.definitions.iter_mut().find(|d| d.name == old) {
            definition.name = new.to_string();
        }
        if let Some(session) = self.sessions.remove(old) {
            self.sessions.insert(new.to_string(), session);
        }
    }

    /// Live sessions resolve names from their own copy of the property map
    fn refresh_session_properties(&mut self, spec: &DeviceSpec) {
        if let Some(session) = self.sessions.get_mut(&spec.name) {
            session.properties.clone_from(&spec.properties);
        }
    }

    /// Every session belongs to a definition and names are unique
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let unique = self
            .definitions
            .iter()
            .enumerate()
            .all(|(i, d)| self.definitions[..i].iter().all(|other| other.name != d.name));
        unique && self.sessions.keys().all(|name| self.definition(name).is_some())
    }

    /// Names of all initialized devices
    #[must_use]
    pub fn live_names(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Number of defined devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no device is defined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
