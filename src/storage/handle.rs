//! Lazily opened, shareable handle to the local store.
//!
//! The database is opened on first use and the same connection is reused for
//! the rest of the process. Clones share the connection, so the recorder,
//! the synchronizer, and the task service can each hold a handle while all
//! of them go through one store.

use crate::storage::LocalStore;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct StoreHandle {
    root: PathBuf,
    inner: Arc<Mutex<Option<LocalStore>>>,
}

impl StoreHandle {
    /// A handle that will open the store under `root` on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Wrap an already opened store.
    pub fn from_store(store: LocalStore) -> Self {
        Self {
            root: store.root.clone(),
            inner: Arc::new(Mutex::new(Some(store))),
        }
    }

    /// Directory the store lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the store has been opened yet.
    pub fn is_open(&self) -> bool {
        self.inner.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Run `f` against the store, opening it first if needed.
    ///
    /// The store stays locked for the duration of `f`, so each call is one
    /// indivisible step with respect to other holders of the handle.
    pub fn with<T>(&self, f: impl FnOnce(&mut LocalStore) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Other("local store lock poisoned".to_string()))?;

        if guard.is_none() {
            *guard = Some(LocalStore::open(&self.root)?);
        }

        match guard.as_mut() {
            Some(store) => f(store),
            None => Err(Error::Other("local store failed to open".to_string())),
        }
    }
}
