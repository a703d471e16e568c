//! Browser style key-value storage providers
//!
//! - [`LocalStoragePersistence`]: durable, kept in a single JSON object file
//! - [`SessionStoragePersistence`]: lives as long as the process
//!
//! Both commit writes immediately. Values are stored under the id the
//!  bucket hands over, prefix included.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use common::prelude::*;
use futures::future;
use futures::stream::{self, StreamExt};
use futures::FutureExt;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file is not a JSON object of strings: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The `getItem` / `setItem` surface shared by both storage areas
pub trait WebStorage {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// present, non-empty ids only, in request order
fn lookup(storage: &impl WebStorage, ids: Vec<String>) -> SignalStream {
    let found: Vec<Result<SerializedSignal, ProviderError>> = ids
        .into_iter()
        .filter_map(|id| {
            let serialized_value = storage.get_item(&id).filter(|value| !value.is_empty())?;
            Some(Ok(SerializedSignal { id, serialized_value }))
        })
        .collect();
    stream::iter(found).boxed_local()
}

fn store(storage: &impl WebStorage, entry: SerializedSignal) -> WriteAck {
    match storage.set_item(&entry.id, &entry.serialized_value) {
        Ok(()) => WriteAck::Immediate,
        Err(e) => {
            let failed: Result<String, ProviderError> = Err(e.into());
            WriteAck::Deferred(future::ready(failed).boxed_local())
        }
    }
}

/// Durable storage backed by a JSON file.
///
/// The whole file is read on [`open`](Self::open) and rewritten on every
///  change; a failed rewrite leaves the in-memory view untouched.
#[derive(Debug)]
pub struct LocalStoragePersistence {
    path: PathBuf,
    items: RefCell<BTreeMap<String, String>>,
}

impl LocalStoragePersistence {
    /// Open the storage file at `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let items: BTreeMap<String, String> = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("opened local storage {} with {} items", path.display(), items.len());
        Ok(Self {
            path,
            items: RefCell::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_with(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let mut next = self.items.borrow().clone();
        change(&mut next);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&next)?)?;
        *self.items.borrow_mut() = next;
        Ok(())
    }
}

impl WebStorage for LocalStoragePersistence {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write_with(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.write_with(|items| {
            items.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.write_with(BTreeMap::clear)
    }

    fn keys(&self) -> Vec<String> {
        self.items.borrow().keys().cloned().collect()
    }
}

impl PersistenceProvider for LocalStoragePersistence {
    fn initialize(&self, ids: Vec<String>) -> SignalStream {
        lookup(self, ids)
    }

    fn persist_value(&self, entry: SerializedSignal) -> WriteAck {
        store(self, entry)
    }
}

/// Storage that is gone once the process exits
#[derive(Debug, Default)]
pub struct SessionStoragePersistence {
    items: RefCell<BTreeMap<String, String>>,
}

impl SessionStoragePersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WebStorage for SessionStoragePersistence {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.items.borrow_mut().clear();
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.items.borrow().keys().cloned().collect()
    }
}

impl PersistenceProvider for SessionStoragePersistence {
    fn initialize(&self, ids: Vec<String>) -> SignalStream {
        lookup(self, ids)
    }

    fn persist_value(&self, entry: SerializedSignal) -> WriteAck {
        store(self, entry)
    }
}
