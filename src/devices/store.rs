//! Persistence of device definitions
//!
//! Definitions (including blind calibration) are kept in a JSON file so
//! device identity survives restarts.

use std::path::{Path, PathBuf};

use super::types::DeviceDefinition;
use crate::Result;

/// File name of the store inside the data directory
pub const STORE_FILE: &str = "devices.json";

/// JSON file holding the definition list
#[derive(Debug, Clone)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    /// Store at an explicit path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store inside a data directory
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(STORE_FILE))
    }

    /// Location of the store file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all stored definitions; a missing file is an empty list
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<Vec<DeviceDefinition>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let definitions: Vec<DeviceDefinition> = serde_json::from_str(&content)?;
        tracing::info!(path = %self.path.display(), count = definitions.len(), "loaded device store");
        Ok(definitions)
    }

    /// Replace the stored definitions
    ///
    /// Writes to a sibling temp file first so a crash never leaves a
    /// truncated store behind.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, definitions: &[DeviceDefinition]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(definitions)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = definitions.len(), "saved device store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::devices::types::{Address, BlindState, DeviceKind, TravelTimes};

    fn blind() -> DeviceDefinition {
        DeviceDefinition {
            name: "blind1".to_string(),
            kind: DeviceKind::Blind,
            address: Address::Ip("192.168.1.40".parse().unwrap()),
            local_key: "0123456789abcdef".to_string(),
            properties: BTreeMap::from([(1, "control".to_string())]),
            blind: BlindState {
                travel: Some(TravelTimes {
                    close_ms: 21_000,
                    open_ms: 20_500,
                }),
                percentage: Some(35.0),
            },
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::in_dir(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_keeps_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::in_dir(&dir.path().join("nested"));
        store.save(&[blind()]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![blind()]);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::in_dir(dir.path());
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_err());
    }
}
