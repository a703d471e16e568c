//! Websocket persistence
//!
//! Every message is JSON. Server messages and the client's own value
//!  messages share an envelope:
//!
//! ```json
//! {"type": "persistedSignal", "content": {"id": "theme", "serializedValue": "\"dark\""}}
//! ```
//!
//! Client requests:
//! - `{"type": "authentication", "content": "<token>"}` once, right after connecting
//! - `{"call": "initializePersistedSignal", "ids": [..]}`, answered by the next
//!   `initializePersistedSignalResult` envelope carrying the found values
//! - `{"subscribe": "persistedSignal"}` / `{"unsubscribe": "persistedSignal"}`
//!   around every remote update subscription
//!
//! Writes are never persisted directly. A mutated value is sent as a
//!  `persistedSignal` envelope and only comes back into the bucket if the
//!  server echoes it.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::stream::{self, Stream, StreamExt};
use futures::{SinkExt, TryFutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use common::prelude::*;

const INITIALIZE_CALL: &str = "initializePersistedSignal";
const UPDATES_CHANNEL: &str = "persistedSignal";

#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Connection closed")]
    Closed,
}

/// `{"type", "content"}` messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum Envelope {
    Authentication(String),
    PersistedSignal(SerializedSignal),
    InitializePersistedSignalResult(Vec<SerializedSignal>),
}

/// Anything the client writes to the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Envelope(Envelope),
    Call { call: String, ids: Vec<String> },
    Subscribe { subscribe: String },
    Unsubscribe { unsubscribe: String },
}

impl Frame {
    pub fn initialize(ids: Vec<String>) -> Self {
        Frame::Call {
            call: INITIALIZE_CALL.to_string(),
            ids,
        }
    }

    pub fn subscribe() -> Self {
        Frame::Subscribe {
            subscribe: UPDATES_CHANNEL.to_string(),
        }
    }

    pub fn unsubscribe() -> Self {
        Frame::Unsubscribe {
            unsubscribe: UPDATES_CHANNEL.to_string(),
        }
    }
}

/// State shared with the connection's reader task
#[derive(Debug, Default)]
struct Connection {
    // initialize requests waiting for a result, oldest first
    pending: Mutex<VecDeque<oneshot::Sender<Vec<SerializedSignal>>>>,
    updates: SignalHub,
    closed: AtomicBool,
}

impl Connection {
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<Envelope>(text) {
            Ok(Envelope::InitializePersistedSignalResult(entries)) => {
                match self.pending.lock().pop_front() {
                    Some(waiter) => {
                        let _ = waiter.send(entries);
                    }
                    None => tracing::trace!("ignoring unrequested initialize result"),
                }
            }
            Ok(Envelope::PersistedSignal(entry)) => self.updates.publish(entry),
            Ok(Envelope::Authentication(_)) => {
                tracing::trace!("ignoring authentication message from server")
            }
            Err(e) => tracing::trace!("ignoring websocket message {}: {}", text, e),
        }
    }

    /// Send an initialize call and queue a waiter for its result.
    ///
    /// Nothing is queued when the connection is closed or the frame cannot be sent.
    fn request(
        &self,
        outgoing: &mpsc::UnboundedSender<Frame>,
        ids: Vec<String>,
    ) -> Option<oneshot::Receiver<Vec<SerializedSignal>>> {
        if self.is_closed() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        // held across the send so results cannot overtake the waiter
        let mut pending = self.pending.lock();
        outgoing.send(Frame::initialize(ids)).ok()?;
        pending.push_back(tx);
        Some(rx)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // waiting initialize streams fail with `Closed`
        self.pending.lock().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Remote update subscription that unsubscribes once dropped
struct Subscribed {
    updates: ReceiveStream,
    outgoing: mpsc::UnboundedSender<Frame>,
}

impl Stream for Subscribed {
    type Item = SerializedSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.updates.poll_next_unpin(cx)
    }
}

impl Drop for Subscribed {
    fn drop(&mut self) {
        let _ = self.outgoing.send(Frame::unsubscribe());
    }
}

/// Provider synchronizing values over a websocket connection.
///
/// Background tasks run on the tokio runtime the connection was made on;
///  the provider itself can be driven by any local executor.
#[derive(Debug)]
pub struct WebSocketPersistence {
    url: Url,
    outgoing: mpsc::UnboundedSender<Frame>,
    connection: Arc<Connection>,
    reader: JoinHandle<()>,
}

impl WebSocketPersistence {
    /// Connect to `url`, authenticating with `auth_token` if one is given
    pub async fn connect(url: Url, auth_token: Option<String>) -> Result<Self, WebSocketError> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::debug!("connected to {}", url);

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();
        if let Some(token) = auth_token {
            outgoing
                .send(Frame::Envelope(Envelope::Authentication(token)))
                .map_err(|_| WebSocketError::Closed)?;
        }

        // Spawn task to handle outgoing frames
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!("failed to encode websocket frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    tracing::warn!("websocket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Spawn task to handle incoming messages
        let connection = Arc::new(Connection::default());
        let reader = tokio::spawn({
            let connection = connection.clone();
            async move {
                while let Some(message) = read.next().await {
                    match message {
                        Ok(Message::Text(text)) => connection.dispatch(&text),
                        Ok(Message::Close(_)) => break,
                        Ok(Message::Ping(data)) => {
                            tracing::trace!("Received ping: {:?}", data);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("websocket read failed: {}", e);
                            break;
                        }
                    }
                }
                tracing::debug!("websocket connection closed");
                connection.close();
            }
        });

        Ok(Self {
            url,
            outgoing,
            connection,
            reader,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    fn closed_stream() -> SignalStream {
        let failed: Vec<Result<SerializedSignal, ProviderError>> =
            vec![Err(WebSocketError::Closed.into())];
        stream::iter(failed).boxed_local()
    }
}

impl PersistenceProvider for WebSocketPersistence {
    fn initialize(&self, ids: Vec<String>) -> SignalStream {
        let Some(rx) = self.connection.request(&self.outgoing, ids) else {
            return Self::closed_stream();
        };

        rx.map_err(|_| ProviderError::from(WebSocketError::Closed))
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, ProviderError>)))
            .try_flatten_stream()
            .boxed_local()
    }

    fn receive_signal(&self) -> Option<ReceiveStream> {
        let updates = self.connection.updates.subscribe();
        if self.outgoing.send(Frame::subscribe()).is_err() {
            tracing::warn!("websocket to {} is closed, no remote updates will arrive", self.url);
        }
        Some(
            Subscribed {
                updates,
                outgoing: self.outgoing.clone(),
            }
            .boxed_local(),
        )
    }

    fn send_signal(&self, entry: SerializedSignal) {
        let frame = Frame::Envelope(Envelope::PersistedSignal(entry));
        if self.outgoing.send(frame).is_err() {
            tracing::warn!("websocket to {} is closed, dropping outgoing value", self.url);
        }
    }
}

impl Drop for WebSocketPersistence {
    fn drop(&mut self) {
        self.connection.close();
        self.reader.abort();
    }
}
