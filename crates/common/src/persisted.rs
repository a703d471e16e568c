use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::error::BucketError;
use crate::provider::{PersistenceProvider, SerializedSignal, WriteAck};
use crate::signal::{Signal, Subscription};
use crate::spawn::{spawn_eager, Spawner};

/// Anything a persisted signal can hold
pub trait SignalValue: Serialize + DeserializeOwned + Clone + PartialEq + 'static {}

impl<T> SignalValue for T where T: Serialize + DeserializeOwned + Clone + PartialEq + 'static {}

/// Produce a new value by applying `recipe` to a draft.
///
/// The draft is owned by the caller, so whatever it was cloned
///  from is never touched.
pub fn produce<T>(mut draft: T, recipe: impl FnOnce(&mut T)) -> T {
    recipe(&mut draft);
    draft
}

/// Orders the writes issued through one signal.
///  An acknowledgment only commits if no later write
///  has committed before it arrived.
#[derive(Debug, Default)]
struct WriteSequence {
    issued: Cell<u64>,
    committed: Cell<u64>,
}

impl WriteSequence {
    fn issue(&self) -> u64 {
        let seq = self.issued.get() + 1;
        self.issued.set(seq);
        seq
    }

    fn commit(&self, seq: u64) -> bool {
        if seq <= self.committed.get() {
            return false;
        }
        self.committed.set(seq);
        true
    }
}

/// Handle onto a signal whose writes are routed through a persistence provider.
///
/// Reads are transparent. `set` and `update` serialize the new value and hand
///  it to the provider; the value becomes visible according to the
///  provider's [`WriteAck`]:
/// - `Immediate`: right away
/// - `Deferred`: when the acknowledgment resolves, using the value it carries
/// - `Unsupported`: never, only an external echo can change it
pub struct PersistedSignal<T> {
    id: Rc<str>,
    storage_key: Rc<str>,
    node: Signal<T>,
    provider: Rc<dyn PersistenceProvider>,
    spawner: Spawner,
    writes: Rc<WriteSequence>,
}

impl<T> Clone for PersistedSignal<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            storage_key: self.storage_key.clone(),
            node: self.node.clone(),
            provider: self.provider.clone(),
            spawner: self.spawner.clone(),
            writes: self.writes.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistedSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSignal")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("provider", &self.provider)
            .finish()
    }
}

impl<T: SignalValue> PersistedSignal<T> {
    pub(crate) fn new(
        id: &str,
        storage_key: String,
        node: Signal<T>,
        provider: Rc<dyn PersistenceProvider>,
        spawner: Spawner,
    ) -> Self {
        Self {
            id: Rc::from(id),
            storage_key: Rc::from(storage_key),
            node,
            provider,
            spawner,
            writes: Rc::new(WriteSequence::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self) -> T {
        self.node.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.node.with(f)
    }

    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        self.node.subscribe(f)
    }

    /// Route `value` through the provider
    pub fn set(&self, value: T) -> Result<(), BucketError> {
        self.persist(value)
    }

    /// Mutate a draft of the current value and route the result through the provider.
    ///
    /// The current value itself is not modified; with a deferred provider it
    ///  stays visible until the write is acknowledged.
    pub fn update(&self, recipe: impl FnOnce(&mut T)) -> Result<(), BucketError> {
        let next = produce(self.node.get(), recipe);
        self.persist(next)
    }

    fn persist(&self, value: T) -> Result<(), BucketError> {
        let serialized_value = codec::serialize(&value)?;
        let entry = SerializedSignal::new(self.storage_key.as_ref(), serialized_value);

        match self.provider.persist_value(entry.clone()) {
            WriteAck::Immediate => {
                let seq = self.writes.issue();
                self.writes.commit(seq);
                self.node.set(value);
            }
            WriteAck::Deferred(ack) => {
                let seq = self.writes.issue();
                let id = self.id.clone();
                let node = self.node.clone();
                let writes = self.writes.clone();
                spawn_eager(self.spawner.as_ref(), async move {
                    let serialized = match ack.await {
                        Ok(serialized) => serialized,
                        Err(e) => {
                            tracing::warn!("write {} of signal {} was rejected: {}", seq, id, e);
                            return;
                        }
                    };
                    match codec::deserialize::<T>(&serialized) {
                        Ok(committed) if writes.commit(seq) => {
                            node.set(committed);
                        }
                        Ok(_) => {
                            tracing::debug!("discarding stale acknowledgment {} of signal {}", seq, id);
                        }
                        Err(e) => {
                            tracing::warn!("undecodable acknowledgment for signal {}: {}", id, e);
                        }
                    }
                });
            }
            WriteAck::Unsupported => {
                tracing::trace!("provider does not persist writes, signal {} unchanged", self.id);
            }
        }

        self.provider.send_signal(entry);
        Ok(())
    }
}
