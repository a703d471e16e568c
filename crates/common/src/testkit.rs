//! In-memory providers for exercising buckets
//!
//! - [`MemoryProvider`] answers `initialize` synchronously, can persist
//!   writes immediately, behind manual acknowledgments, or not at all, and
//!   can expose a remote update stream fed by [`MemoryProvider::push`]
//! - [`GatedProvider`] holds its `initialize` answer back until released,
//!   standing in for a slow backend
//!
//! Both record what the bucket asked of them.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};

use anyhow::anyhow;
use futures::channel::oneshot;
use futures::stream::{self, StreamExt};
use futures::FutureExt;

use crate::provider::{
    PersistenceProvider, ProviderError, ReceiveStream, SerializedSignal, SignalHub, SignalStream,
    WriteAck,
};

/// How a [`MemoryProvider`] answers `persist_value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Immediate,
    /// Writes wait for [`MemoryProvider::ack_next`] / [`MemoryProvider::reject_next`]
    Deferred,
    Unsupported,
}

type PendingAck = (SerializedSignal, oneshot::Sender<Result<String, ProviderError>>);

#[derive(Debug, Default)]
pub struct MemoryProvider {
    values: RefCell<BTreeMap<String, String>>,
    write_mode: Cell<WriteMode>,
    remote: Option<SignalHub>,
    initialize_calls: RefCell<Vec<Vec<String>>>,
    persist_calls: RefCell<Vec<SerializedSignal>>,
    sent: RefCell<Vec<SerializedSignal>>,
    pending: RefCell<VecDeque<PendingAck>>,
    initialize_error: RefCell<Option<String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that also exposes a remote update stream
    pub fn with_remote() -> Self {
        Self {
            remote: Some(SignalHub::new()),
            ..Self::default()
        }
    }

    pub fn with_write_mode(self, mode: WriteMode) -> Self {
        self.write_mode.set(mode);
        self
    }

    /// Make the next `initialize` fail with `message`
    pub fn fail_initialize(&self, message: &str) {
        *self.initialize_error.borrow_mut() = Some(message.to_string());
    }

    pub fn seed(&self, id: &str, serialized_value: &str) {
        self.values
            .borrow_mut()
            .insert(id.to_string(), serialized_value.to_string());
    }

    pub fn stored(&self, id: &str) -> Option<String> {
        self.values.borrow().get(id).cloned()
    }

    /// Publish an update on the remote stream as if it came from elsewhere
    pub fn push(&self, id: &str, serialized_value: &str) {
        match &self.remote {
            Some(hub) => hub.publish(SerializedSignal::new(id, serialized_value)),
            None => panic!("MemoryProvider::push requires MemoryProvider::with_remote"),
        }
    }

    pub fn remote_subscribers(&self) -> usize {
        self.remote.as_ref().map_or(0, SignalHub::subscriber_count)
    }

    pub fn initialize_calls(&self) -> Vec<Vec<String>> {
        self.initialize_calls.borrow().clone()
    }

    pub fn persist_calls(&self) -> Vec<SerializedSignal> {
        self.persist_calls.borrow().clone()
    }

    pub fn sent(&self) -> Vec<SerializedSignal> {
        self.sent.borrow().clone()
    }

    pub fn pending_acks(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Acknowledge the oldest pending write with the value it carried
    pub fn ack_next(&self) {
        let (entry, ack) = self.next_pending();
        self.seed(&entry.id, &entry.serialized_value);
        let _ = ack.send(Ok(entry.serialized_value));
    }

    /// Acknowledge the oldest pending write, committing `serialized_value` instead
    pub fn ack_next_with(&self, serialized_value: &str) {
        let (entry, ack) = self.next_pending();
        self.seed(&entry.id, serialized_value);
        let _ = ack.send(Ok(serialized_value.to_string()));
    }

    /// Acknowledge the newest pending write, leaving older ones waiting
    pub fn ack_latest(&self) {
        let (entry, ack) = self
            .pending
            .borrow_mut()
            .pop_back()
            .expect("no pending write to acknowledge");
        self.seed(&entry.id, &entry.serialized_value);
        let _ = ack.send(Ok(entry.serialized_value));
    }

    pub fn reject_next(&self, message: &str) {
        let (_, ack) = self.next_pending();
        let _ = ack.send(Err(anyhow!(message.to_string())));
    }

    fn next_pending(&self) -> PendingAck {
        self.pending
            .borrow_mut()
            .pop_front()
            .expect("no pending write to acknowledge")
    }
}

impl PersistenceProvider for MemoryProvider {
    fn initialize(&self, ids: Vec<String>) -> SignalStream {
        self.initialize_calls.borrow_mut().push(ids.clone());
        if let Some(message) = self.initialize_error.borrow_mut().take() {
            let failed: Vec<Result<SerializedSignal, ProviderError>> = vec![Err(anyhow!(message))];
            return stream::iter(failed).boxed_local();
        }

        let values = self.values.borrow();
        let found: Vec<_> = ids
            .into_iter()
            .filter_map(|id| {
                let serialized_value = values.get(&id)?.clone();
                Some(Ok(SerializedSignal { id, serialized_value }))
            })
            .collect();
        stream::iter(found).boxed_local()
    }

    fn persist_value(&self, entry: SerializedSignal) -> WriteAck {
        self.persist_calls.borrow_mut().push(entry.clone());
        match self.write_mode.get() {
            WriteMode::Immediate => {
                self.seed(&entry.id, &entry.serialized_value);
                WriteAck::Immediate
            }
            WriteMode::Deferred => {
                let (tx, rx) = oneshot::channel();
                self.pending.borrow_mut().push_back((entry, tx));
                WriteAck::Deferred(
                    rx.map(|ack| ack.unwrap_or_else(|_| Err(anyhow!("acknowledgment dropped"))))
                        .boxed_local(),
                )
            }
            WriteMode::Unsupported => WriteAck::Unsupported,
        }
    }

    fn receive_signal(&self) -> Option<ReceiveStream> {
        self.remote.as_ref().map(SignalHub::subscribe)
    }

    fn send_signal(&self, entry: SerializedSignal) {
        self.sent.borrow_mut().push(entry);
    }
}

/// Answers `initialize` only once released
#[derive(Debug, Default)]
pub struct GatedProvider {
    values: RefCell<BTreeMap<String, String>>,
    gates: RefCell<Vec<oneshot::Sender<Result<(), String>>>>,
    initialize_calls: Cell<usize>,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, id: &str, serialized_value: &str) {
        self.values
            .borrow_mut()
            .insert(id.to_string(), serialized_value.to_string());
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.get()
    }

    /// Let every waiting `initialize` stream deliver its values
    pub fn release(&self) {
        for gate in self.gates.borrow_mut().drain(..) {
            let _ = gate.send(Ok(()));
        }
    }

    /// Fail every waiting `initialize` stream with `message`
    pub fn release_with_error(&self, message: &str) {
        for gate in self.gates.borrow_mut().drain(..) {
            let _ = gate.send(Err(message.to_string()));
        }
    }
}

impl PersistenceProvider for GatedProvider {
    fn initialize(&self, ids: Vec<String>) -> SignalStream {
        self.initialize_calls.set(self.initialize_calls.get() + 1);
        let (tx, rx) = oneshot::channel();
        self.gates.borrow_mut().push(tx);

        let values = self.values.borrow();
        let found: Vec<SerializedSignal> = ids
            .into_iter()
            .filter_map(|id| {
                let serialized_value = values.get(&id)?.clone();
                Some(SerializedSignal { id, serialized_value })
            })
            .collect();

        rx.into_stream()
            .flat_map(move |gate| {
                let items: Vec<Result<SerializedSignal, ProviderError>> = match gate {
                    Ok(Ok(())) => found.clone().into_iter().map(Ok).collect(),
                    Ok(Err(message)) => vec![Err(anyhow!(message))],
                    Err(_) => vec![Err(anyhow!("gate dropped"))],
                };
                stream::iter(items)
            })
            .boxed_local()
    }

    fn persist_value(&self, entry: SerializedSignal) -> WriteAck {
        self.seed(&entry.id, &entry.serialized_value);
        WriteAck::Immediate
    }
}
