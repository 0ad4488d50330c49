//! JSON-file persistence for joyhub.
//!
//! Two small registries live in the data directory:
//!
//! - `devices.json`: consoles a controller has paired with, keyed by device
//!   identity, so later controllers can reconnect to them.
//! - `macros.json`: named macro scripts saved from the web client.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use joyhub_types::{KnownDevice, SavedMacro};
use tracing::info;

pub mod error;
mod file;

pub use error::StoreError;

use crate::file::JsonMap;

/// Name given to a device reported without one.
pub const DEFAULT_DEVICE_NAME: &str = "Unnamed device";

/// Device registry and macro library rooted at one directory.
pub struct Store {
    dir: PathBuf,
    devices: JsonMap<KnownDevice>,
    macros: JsonMap<SavedMacro>,
}

impl Store {
    /// Open a store in `dir`. Nothing is read or created until first use.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            devices: JsonMap::new(dir.join("devices.json")),
            macros: JsonMap::new(dir.join("macros.json")),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn devices_path(&self) -> &Path {
        self.devices.path()
    }

    pub fn macros_path(&self) -> &Path {
        self.macros.path()
    }

    // -----------------------------------------------------------------------
    // Known devices
    // -----------------------------------------------------------------------

    pub async fn known_devices(&self) -> Result<BTreeMap<String, KnownDevice>, StoreError> {
        self.devices.load().await
    }

    /// Record a successful connection to `device_id`.
    ///
    /// New devices get `name` (or [`DEFAULT_DEVICE_NAME`]); known devices only
    /// have their `last_seen` refreshed.
    pub async fn record_device(
        &self,
        device_id: &str,
        name: Option<&str>,
    ) -> Result<BTreeMap<String, KnownDevice>, StoreError> {
        let now = Utc::now();
        let updated = self
            .devices
            .update(|devices| {
                devices
                    .entry(device_id.to_string())
                    .and_modify(|device| device.last_seen = now)
                    .or_insert_with(|| KnownDevice {
                        name: name.unwrap_or(DEFAULT_DEVICE_NAME).to_string(),
                        first_seen: now,
                        last_seen: now,
                    });
                true
            })
            .await?;
        info!(device = %device_id, "device recorded");
        Ok(updated.unwrap_or_default())
    }

    /// Forget a device. Returns `None` if it was not known.
    pub async fn delete_device(
        &self,
        device_id: &str,
    ) -> Result<Option<BTreeMap<String, KnownDevice>>, StoreError> {
        self.devices
            .update(|devices| devices.remove(device_id).is_some())
            .await
    }

    /// Rename a device. Returns `None` if it was not known.
    pub async fn rename_device(
        &self,
        device_id: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, KnownDevice>>, StoreError> {
        self.devices
            .update(|devices| match devices.get_mut(device_id) {
                Some(device) => {
                    device.name = name.to_string();
                    true
                }
                None => false,
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Macro library
    // -----------------------------------------------------------------------

    pub async fn macros(&self) -> Result<BTreeMap<String, SavedMacro>, StoreError> {
        self.macros.load().await
    }

    /// Save a macro, replacing any macro with the same name.
    pub async fn save_macro(
        &self,
        name: &str,
        content: &str,
    ) -> Result<BTreeMap<String, SavedMacro>, StoreError> {
        let now = Utc::now();
        let updated = self
            .macros
            .update(|macros| {
                macros.insert(
                    name.to_string(),
                    SavedMacro {
                        content: content.to_string(),
                        created: now,
                        modified: now,
                    },
                );
                true
            })
            .await?;
        Ok(updated.unwrap_or_default())
    }

    /// Delete a macro. Returns `None` if it did not exist.
    pub async fn delete_macro(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, SavedMacro>>, StoreError> {
        self.macros
            .update(|macros| macros.remove(name).is_some())
            .await
    }

    /// Rewrite a macro, possibly under a new name, keeping its creation time.
    ///
    /// Returns `None` if `old_name` did not exist.
    pub async fn update_macro(
        &self,
        old_name: &str,
        new_name: &str,
        content: &str,
    ) -> Result<Option<BTreeMap<String, SavedMacro>>, StoreError> {
        let now = Utc::now();
        self.macros
            .update(|macros| {
                let Some(previous) = macros.remove(old_name) else {
                    return false;
                };
                macros.insert(
                    new_name.to_string(),
                    SavedMacro {
                        content: content.to_string(),
                        created: previous.created,
                        modified: now,
                    },
                );
                true
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> Store {
        let dir = std::env::temp_dir().join(format!("joyhub-store-{}", uuid::Uuid::new_v4()));
        Store::open(dir)
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let store = scratch_store();
        assert!(store.known_devices().await.unwrap().is_empty());
        assert!(store.macros().await.unwrap().is_empty());
        assert!(!store.dir().exists());
    }

    #[tokio::test]
    async fn record_device_keeps_first_name_and_first_seen() {
        let store = scratch_store();
        let first = store
            .record_device("7C:BB:8A:00:11:22", Some("Living room"))
            .await
            .unwrap();
        let first_seen = first["7C:BB:8A:00:11:22"].first_seen;

        let second = store
            .record_device("7C:BB:8A:00:11:22", Some("Ignored"))
            .await
            .unwrap();
        let device = &second["7C:BB:8A:00:11:22"];
        assert_eq!(device.name, "Living room");
        assert_eq!(device.first_seen, first_seen);
        assert!(device.last_seen >= first_seen);

        let reopened = Store::open(store.dir().to_path_buf());
        assert_eq!(reopened.known_devices().await.unwrap(), second);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn unnamed_device_gets_default_name() {
        let store = scratch_store();
        let devices = store.record_device("AA", None).await.unwrap();
        assert_eq!(devices["AA"].name, DEFAULT_DEVICE_NAME);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn rename_and_delete_only_touch_known_devices() {
        let store = scratch_store();
        assert!(store.rename_device("AA", "Desk").await.unwrap().is_none());
        assert!(store.delete_device("AA").await.unwrap().is_none());

        store.record_device("AA", None).await.unwrap();
        let renamed = store.rename_device("AA", "Desk").await.unwrap().unwrap();
        assert_eq!(renamed["AA"].name, "Desk");

        let remaining = store.delete_device("AA").await.unwrap().unwrap();
        assert!(remaining.is_empty());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn update_macro_renames_and_preserves_created() {
        let store = scratch_store();
        let saved = store.save_macro("spin", "L_STICK@+000+100 0.5s").await.unwrap();
        let created = saved["spin"].created;

        let updated = store
            .update_macro("spin", "spin-fast", "L_STICK@+000+100 0.2s")
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.contains_key("spin"));
        let spin = &updated["spin-fast"];
        assert_eq!(spin.created, created);
        assert_eq!(spin.content, "L_STICK@+000+100 0.2s");

        assert!(store
            .update_macro("missing", "x", "A 0.1s")
            .await
            .unwrap()
            .is_none());
        assert!(store.delete_macro("spin-fast").await.unwrap().is_some());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let store = scratch_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.macros_path(), "{not json").unwrap();
        assert!(matches!(
            store.macros().await,
            Err(StoreError::Parse { .. })
        ));
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
