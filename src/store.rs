//! Key/value persistence for delivered parameters
//!
//! The core never persists anything itself. Hosts that want the classic
//! "remember the invite code" behaviour register a [`PersistingListener`]
//! backed by any [`ParamStore`].

use crate::models::{ReconciledParams, CHANNEL_ID, INVITE_CODE, USER_ID};
use crate::notifier::ParamsListener;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Minimal get/set store (shared preferences, user defaults, a file...).
pub trait ParamStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryParamStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryParamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParamStore for MemoryParamStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store persisted as a JSON object in a single file.
///
/// Writes go to a sibling `<name>.tmp` file which is then renamed over the
/// target. The in-memory view only changes once the file write succeeded.
#[derive(Debug)]
pub struct JsonFileParamStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl JsonFileParamStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn flush(&self, values: &HashMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(values).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.tmp_path();
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl ParamStore for JsonFileParamStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next)?;
        *values = next;
        Ok(())
    }
}

/// Listener that remembers selected parameters in a [`ParamStore`].
pub struct PersistingListener<S: ParamStore> {
    store: Arc<S>,
    keys: Vec<String>,
}

impl<S: ParamStore> PersistingListener<S> {
    /// Persists `inviteCode`, `channelId` and `userId`.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_keys(store, [INVITE_CODE, CHANNEL_ID, USER_ID])
    }

    pub fn with_keys<I, K>(store: Arc<S>, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            store,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: ParamStore> ParamsListener for PersistingListener<S> {
    fn on_params(&self, event: &ReconciledParams) -> anyhow::Result<()> {
        for key in &self.keys {
            if let Some(value) = event.params.get(key) {
                self.store.set(key, value)?;
                debug!(key = %key, kind = %event.kind, "Persisted param");
            }
        }
        Ok(())
    }
}
