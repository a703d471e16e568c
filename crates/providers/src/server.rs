use futures::stream::{self, StreamExt};
use futures::{FutureExt, TryFutureExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use common::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
}

/// Persists values on a remote HTTP server.
///
/// - `initialize` POSTs the requested ids as a JSON array to `fetch_url`
///   and expects a JSON array of `{"id", "serializedValue"}` back
/// - `persist_value` POSTs the entry to `persist_url` and commits the
///   serialized value the server answers with
///
/// Requests run on the tokio runtime, so buckets using this provider need a
///  tokio backed spawner.
#[derive(Debug, Clone)]
pub struct ServerPersistence {
    fetch_url: Url,
    persist_url: Url,
    client: Client,
}

impl ServerPersistence {
    pub fn new(fetch_url: Url, persist_url: Url) -> Result<Self, ServerError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder().default_headers(default_headers).build()?;

        Ok(Self {
            fetch_url,
            persist_url,
            client,
        })
    }

    pub fn fetch_url(&self) -> &Url {
        &self.fetch_url
    }

    pub fn persist_url(&self) -> &Url {
        &self.persist_url
    }

    async fn call<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ServerError> {
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(ServerError::HttpStatus(
                response.status(),
                response.text().await?,
            ))
        }
    }
}

impl PersistenceProvider for ServerPersistence {
    fn initialize(&self, ids: Vec<String>) -> SignalStream {
        tracing::debug!("fetching {} persisted values from {}", ids.len(), self.fetch_url);
        let request = self.client.post(self.fetch_url.clone()).json(&ids);

        Self::call::<Vec<SerializedSignal>>(request)
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, ProviderError>)))
            .map_err(ProviderError::from)
            .try_flatten_stream()
            .boxed_local()
    }

    fn persist_value(&self, entry: SerializedSignal) -> WriteAck {
        let request = self.client.post(self.persist_url.clone()).json(&entry);
        WriteAck::Deferred(
            Self::call::<String>(request)
                .map_err(ProviderError::from)
                .boxed_local(),
        )
    }
}
