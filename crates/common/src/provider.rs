use std::fmt::Debug;
use std::sync::Arc;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Failure surfaced by a provider, passed through to callers untouched
pub type ProviderError = anyhow::Error;

/// Finite sequence of persisted values returned by [`PersistenceProvider::initialize`]
pub type SignalStream = LocalBoxStream<'static, Result<SerializedSignal, ProviderError>>;

/// Unbounded sequence of values pushed from an external source
pub type ReceiveStream = LocalBoxStream<'static, SerializedSignal>;

/// Eventual acknowledgment of a write, resolving to the committed serialized value
pub type AckFuture = LocalBoxFuture<'static, Result<String, ProviderError>>;

/// The unit exchanged with providers: a signal id and its encoded value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedSignal {
    pub id: String,
    pub serialized_value: String,
}

impl SerializedSignal {
    pub fn new(id: impl Into<String>, serialized_value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serialized_value: serialized_value.into(),
        }
    }
}

/// How a provider handled a call to [`PersistenceProvider::persist_value`]
pub enum WriteAck {
    /// The provider does not persist writes; local state is left untouched
    Unsupported,
    /// The write is done, the signal commits the new value right away
    Immediate,
    /// The signal commits only once the acknowledgment resolves,
    ///  using the serialized value it resolves to
    Deferred(AckFuture),
}

impl Debug for WriteAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteAck::Unsupported => write!(f, "Unsupported"),
            WriteAck::Immediate => write!(f, "Immediate"),
            WriteAck::Deferred(_) => write!(f, "Deferred(..)"),
        }
    }
}

/// Trait for a key-value backend that persisted signals synchronize with.
///  Think of this as the storage side of a bucket, e.g.
///  - web style local / session storage
///  - an HTTP endpoint
///  - a websocket
///
/// Every value crossing this boundary is already serialized; providers
///  never see the signal's Rust type.
pub trait PersistenceProvider: Debug + 'static {
    /// Called once per bucket with every id routed to this provider.
    ///
    /// Should yield only the ids that have a persisted value, and must
    ///  terminate for the bucket's initialization to complete.
    fn initialize(&self, ids: Vec<String>) -> SignalStream;

    /// Persist a locally mutated value.
    ///
    /// Called on every `set` / `update` of an associated signal.
    fn persist_value(&self, _entry: SerializedSignal) -> WriteAck {
        WriteAck::Unsupported
    }

    /// Subscribe to values arriving from an external source (e.g. a websocket).
    ///
    /// Each call returns a new, independent subscription.
    fn receive_signal(&self) -> Option<ReceiveStream> {
        None
    }

    /// Forward a locally mutated value to an external destination.
    ///  Fire-and-forget, this never changes the signal itself.
    fn send_signal(&self, _entry: SerializedSignal) {}
}

/// Fan-out of [`SerializedSignal`]s to any number of receive streams.
///
/// Cloning yields another handle onto the same set of subscribers, so
///  a background connection task can publish while the provider hands
///  out subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SignalHub {
    subscribers: Arc<Mutex<Vec<UnboundedSender<SerializedSignal>>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> ReceiveStream {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx.boxed_local()
    }

    /// Deliver `entry` to every live subscriber, dropping closed ones
    pub fn publish(&self, entry: SerializedSignal) {
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(entry.clone()).is_ok());
    }

    /// Number of subscribers still registered.
    ///
    /// Closed subscribers are only pruned on the next publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn test_serialized_signal_wire_format() {
        let entry = SerializedSignal::new("theme", "\"dark\"");
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"id":"theme","serializedValue":"\"dark\""}"#);
    }

    #[test]
    fn test_hub_fans_out_and_prunes() {
        let hub = SignalHub::new();
        let mut first = hub.subscribe();
        let second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(second);
        hub.publish(SerializedSignal::new("a", "1"));
        assert_eq!(hub.subscriber_count(), 1);

        let received = block_on(first.next()).unwrap();
        assert_eq!(received, SerializedSignal::new("a", "1"));
    }
}
