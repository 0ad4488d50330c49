//! A JSON object on disk, keyed by string.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;

pub(crate) type Records<T> = BTreeMap<String, T>;

/// A `{ key: record }` JSON file with serialized read-modify-write updates.
pub(crate) struct JsonMap<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonMap<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            _records: PhantomData,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. A missing file reads as empty.
    pub(crate) async fn load(&self) -> Result<Records<T>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Records::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Records::new());
        }
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Apply `change` to the records and persist them if it returns `true`.
    ///
    /// Returns the new records when something was written.
    pub(crate) async fn update<F>(&self, change: F) -> Result<Option<Records<T>>, StoreError>
    where
        F: FnOnce(&mut Records<T>) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        if !change(&mut records) {
            return Ok(None);
        }
        self.save(&records).await?;
        Ok(Some(records))
    }

    async fn save(&self, records: &Records<T>) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        debug!(path = %self.path.display(), count = records.len(), "records saved");
        Ok(())
    }
}
