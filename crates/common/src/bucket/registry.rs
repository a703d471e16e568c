use std::collections::HashMap;
use std::rc::Rc;

use crate::codec::{self, CodecError};
use crate::error::BucketError;
use crate::persisted::SignalValue;
use crate::provider::PersistenceProvider;
use crate::resolver::{ProviderKey, ProviderResolver};
use crate::signal::Signal;

/// A provider in use by a bucket, along with
///  every signal id routed to it
pub(super) struct ProviderEntry {
    pub key: ProviderKey,
    pub instance: Rc<dyn PersistenceProvider>,
    // grows as signals are declared, never shrinks
    pub signal_ids: Vec<String>,
}

/// Per-bucket mapping from provider key to a live provider.
///  Providers are resolved on first use and cached for the
///  lifetime of the bucket.
pub(super) struct ProviderRegistry {
    resolver: Rc<dyn ProviderResolver>,
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new(resolver: Rc<dyn ProviderResolver>) -> Self {
        Self {
            resolver,
            entries: Vec::new(),
        }
    }

    pub fn get(&mut self, key: ProviderKey) -> Result<&mut ProviderEntry, BucketError> {
        let index = match self.entries.iter().position(|entry| entry.key == key) {
            Some(index) => index,
            None => {
                let instance = self.resolver.resolve(key)?;
                tracing::debug!("bucket now routes signals to {}", key);
                self.entries.push(ProviderEntry {
                    key,
                    instance,
                    signal_ids: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        Ok(&mut self.entries[index])
    }

    pub fn find(&self, key: ProviderKey) -> Option<&ProviderEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }
}

/// Type-erased write access to a signal's cell, used to apply
///  values arriving from providers rather than from `set`
pub(super) trait SignalNode {
    fn apply_serialized(&self, serialized: &str) -> Result<bool, CodecError>;
}

impl<T: SignalValue> SignalNode for Signal<T> {
    fn apply_serialized(&self, serialized: &str) -> Result<bool, CodecError> {
        let value = codec::deserialize::<T>(serialized)?;
        Ok(self.set(value))
    }
}

/// Signal id -> cell, across all providers
pub(super) type NodeStore = HashMap<String, Rc<dyn SignalNode>>;
