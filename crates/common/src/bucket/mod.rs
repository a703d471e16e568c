//! Signal buckets
//!
//! A [`SignalBucket`] owns a group of persisted signals and routes each of
//! them to a persistence provider:
//!
//! - **Provider registry**: provider key -> live provider + the ids routed to it
//! - **Node store**: signal id -> the cell behind it, so values arriving from a
//!   provider reach the right signal without going through `set`
//! - **Factory**: [`SignalBucket::persisted_signal`] declares a signal
//! - **Orchestrator**: [`SignalBucket::initialize`] hydrates every signal once
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use common::prelude::*;
//! use common::testkit::MemoryProvider;
//! use futures::executor::LocalPool;
//!
//! # fn main() -> Result<(), BucketError> {
//! let pool = LocalPool::new();
//! let storage = Rc::new(MemoryProvider::new());
//! storage.seed("theme", "\"dark\"");
//!
//! let container = ProviderContainer::new();
//! container.insert(storage);
//!
//! let bucket = SignalBucket::new(
//!     BucketConfig::new(ProviderKey::of::<MemoryProvider>()),
//!     Rc::new(container),
//!     Rc::new(pool.spawner()),
//! );
//! let theme = bucket.persisted_signal("light".to_string(), "theme")?;
//! assert_eq!(theme.get(), "light");
//!
//! bucket.initialize_then(|| {})?;
//! assert_eq!(theme.get(), "dark");
//!
//! theme.set("solarized".to_string())?;
//! assert_eq!(theme.get(), "solarized");
//! # Ok(())
//! # }
//! ```

mod initialize;
mod registry;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::future::{self, AbortHandle, FutureExt};
use futures::StreamExt;

pub use initialize::{InitObserver, Initialization};
use registry::{NodeStore, ProviderRegistry};

use crate::codec;
use crate::error::BucketError;
use crate::persisted::{PersistedSignal, SignalValue};
use crate::provider::{PersistenceProvider, ReceiveStream, SerializedSignal};
use crate::resolver::{ProviderKey, ProviderResolver};
use crate::signal::Signal;
use crate::spawn::{spawn_eager, Spawner};

/// How a bucket picks providers and names its values in storage
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Provider for signals that name none and have no route
    pub default_provider: ProviderKey,
    /// Prepended to every id crossing a provider boundary
    pub prefix: String,
    /// Per-id provider overrides, consulted before the default
    pub routes: HashMap<String, ProviderKey>,
}

impl BucketConfig {
    pub fn new(default_provider: ProviderKey) -> Self {
        Self {
            default_provider,
            prefix: String::new(),
            routes: HashMap::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_route(mut self, id: impl Into<String>, provider: ProviderKey) -> Self {
        self.routes.insert(id.into(), provider);
        self
    }
}

/// Id and optional provider of a persisted signal
#[derive(Debug, Clone)]
pub struct SignalOptions {
    pub id: String,
    pub provider: Option<ProviderKey>,
}

impl SignalOptions {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: None,
        }
    }

    pub fn provider(mut self, provider: ProviderKey) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn provider_of<P: PersistenceProvider>(self) -> Self {
        self.provider(ProviderKey::of::<P>())
    }
}

impl From<&str> for SignalOptions {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SignalOptions {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

pub(crate) struct BucketInner {
    config: BucketConfig,
    spawner: Spawner,
    providers: RefCell<ProviderRegistry>,
    nodes: RefCell<NodeStore>,
    initialized: Cell<bool>,
    // set once the owning bucket is dropped
    torn_down: Cell<bool>,
    subscriptions: RefCell<Vec<AbortHandle>>,
}

impl BucketInner {
    fn storage_key(&self, id: &str) -> String {
        format!("{}{}", self.config.prefix, id)
    }

    fn local_id<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key.strip_prefix(self.config.prefix.as_str())
    }

    /// Write a provider supplied value straight into its node,
    ///  bypassing the persistence pipeline
    fn apply(&self, entry: &SerializedSignal) {
        let Some(id) = self.local_id(&entry.id) else {
            tracing::trace!("ignoring value for {} outside bucket prefix", entry.id);
            return;
        };
        let node = self.nodes.borrow().get(id).cloned();
        let Some(node) = node else {
            tracing::trace!("ignoring value for unknown signal id {}", id);
            return;
        };
        if let Err(e) = node.apply_serialized(&entry.serialized_value) {
            tracing::warn!("skipping undecodable value for signal {}: {}", id, e);
        }
    }

    /// Keep applying `updates` until the bucket is dropped
    fn attach(self: &Rc<Self>, updates: ReceiveStream) {
        if self.torn_down.get() {
            tracing::debug!("bucket already dropped, not following remote updates");
            return;
        }
        let bucket = Rc::downgrade(self);
        let (forward, handle) = future::abortable(updates.for_each(move |entry| {
            if let Some(bucket) = bucket.upgrade() {
                bucket.apply(&entry);
            }
            future::ready(())
        }));
        self.subscriptions.borrow_mut().push(handle);
        spawn_eager(self.spawner.as_ref(), async move {
            let _ = forward.await;
        });
    }
}

/// Contains multiple persisted signals that are synchronized with
///  persistence providers as key-value pairs.
///
/// Declare every signal right after construction, then call one of the
///  `initialize` methods once. Dropping the bucket releases its remote
///  update subscriptions; signal handles stay readable.
pub struct SignalBucket {
    inner: Rc<BucketInner>,
}

impl SignalBucket {
    pub fn new(config: BucketConfig, resolver: Rc<dyn ProviderResolver>, spawner: Spawner) -> Self {
        Self {
            inner: Rc::new(BucketInner {
                config,
                spawner,
                providers: RefCell::new(ProviderRegistry::new(resolver)),
                nodes: RefCell::new(NodeStore::new()),
                initialized: Cell::new(false),
                torn_down: Cell::new(false),
                subscriptions: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a persisted signal.
    ///
    /// The signal uses the provider named in `options`, else the one routed
    ///  to its id in the [`BucketConfig`], else the bucket default. Ids must
    ///  be unique within the bucket across all providers.
    ///
    /// If the provider offers a remote update stream, the signal follows it
    ///  from the moment it is created.
    pub fn persisted_signal<T: SignalValue>(
        &self,
        initial: T,
        options: impl Into<SignalOptions>,
    ) -> Result<PersistedSignal<T>, BucketError> {
        let SignalOptions { id, provider } = options.into();
        if self.inner.nodes.borrow().contains_key(&id) {
            return Err(BucketError::DuplicateSignalId(id));
        }

        let key = provider
            .or_else(|| self.inner.config.routes.get(&id).copied())
            .unwrap_or(self.inner.config.default_provider);
        let instance = self.inner.providers.borrow_mut().get(key)?.instance.clone();
        let storage_key = self.inner.storage_key(&id);

        let node = match instance.receive_signal() {
            Some(updates) => {
                let watched = storage_key.clone();
                let values = updates.filter_map(move |entry| {
                    let value = if entry.id == watched {
                        codec::deserialize::<T>(&entry.serialized_value)
                            .map_err(|e| {
                                tracing::warn!("skipping undecodable update for {}: {}", watched, e)
                            })
                            .ok()
                    } else {
                        None
                    };
                    future::ready(value)
                });
                let (node, handle) = Signal::project(initial, values, self.inner.spawner.as_ref());
                self.inner.subscriptions.borrow_mut().push(handle);
                node
            }
            None => Signal::new(initial),
        };

        self.inner
            .providers
            .borrow_mut()
            .get(key)?
            .signal_ids
            .push(id.clone());
        self.inner
            .nodes
            .borrow_mut()
            .insert(id.clone(), Rc::new(node.clone()));
        tracing::debug!("declared persisted signal {} on {}", id, key);

        Ok(PersistedSignal::new(
            &id,
            storage_key,
            node,
            instance,
            self.inner.spawner.clone(),
        ))
    }

    /// Hydrate every declared signal from its provider.
    ///
    /// Returns a cold [`Initialization`]; nothing is fetched until it is
    ///  polled. Fails if the bucket was already initialized.
    pub fn initialize(&self) -> Result<Initialization, BucketError> {
        if self.inner.initialized.replace(true) {
            return Err(BucketError::AlreadyInitialized);
        }
        Ok(self.inner.clone().hydrate().boxed_local())
    }

    /// Start hydrating right away, reporting the outcome to `observer`.
    ///
    /// Values from providers that answer synchronously are visible as soon
    ///  as this returns.
    pub fn initialize_with(&self, observer: InitObserver) -> Result<(), BucketError> {
        let initialization = self.initialize()?;
        spawn_eager(self.inner.spawner.as_ref(), async move {
            observer.notify(initialization.await);
        });
        Ok(())
    }

    /// Shorthand for [`initialize_with`](Self::initialize_with) with only a completion callback
    pub fn initialize_then(&self, complete: impl FnOnce() + 'static) -> Result<(), BucketError> {
        self.initialize_with(InitObserver::new().on_complete(complete))
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.get()
    }

    /// Ids of every declared signal
    pub fn signal_ids(&self) -> Vec<String> {
        self.inner.nodes.borrow().keys().cloned().collect()
    }

    /// Ids routed to `provider`, in declaration order
    pub fn routed_ids(&self, provider: ProviderKey) -> Option<Vec<String>> {
        self.inner
            .providers
            .borrow()
            .find(provider)
            .map(|entry| entry.signal_ids.clone())
    }

    /// Number of distinct providers in use
    pub fn provider_count(&self) -> usize {
        self.inner.providers.borrow().entries().len()
    }
}

impl fmt::Debug for SignalBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBucket")
            .field("config", &self.inner.config)
            .field("signals", &self.inner.nodes.borrow().len())
            .field("initialized", &self.inner.initialized.get())
            .finish()
    }
}

impl Drop for SignalBucket {
    fn drop(&mut self) {
        self.inner.torn_down.set(true);
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.borrow_mut());
        tracing::debug!("releasing {} remote update subscriptions", subscriptions.len());
        for handle in subscriptions {
            handle.abort();
        }
    }
}
