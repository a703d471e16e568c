//! Initialization orchestrator
//!
//! Fans out one `initialize` call per provider in use, merges every
//!  fetched value into a single stream and applies it straight to the
//!  signal nodes. Remote update streams are attached first and funnel into
//!  the same apply path, they keep running after initialization completes.

use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::stream::{self, StreamExt};

use super::BucketInner;
use crate::provider::{PersistenceProvider, ProviderError};

/// A cold unit of work hydrating a bucket from its providers.
///
/// Nothing happens until it is polled, so initializations of several
///  buckets can be combined (e.g. with `futures::future::try_join_all`)
///  into one joint wait. Resolves once every provider's fetch completes.
pub type Initialization = LocalBoxFuture<'static, Result<(), ProviderError>>;

type CompleteFn = Box<dyn FnOnce()>;
type ErrorFn = Box<dyn FnOnce(ProviderError)>;

/// Partial observer for [`SignalBucket::initialize_with`](super::SignalBucket::initialize_with)
#[derive(Default)]
pub struct InitObserver {
    complete: Option<CompleteFn>,
    error: Option<ErrorFn>,
}

impl InitObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once every provider fetch has finished
    pub fn on_complete(mut self, complete: impl FnOnce() + 'static) -> Self {
        self.complete = Some(Box::new(complete));
        self
    }

    /// Called with the first error surfaced by a provider fetch
    pub fn on_error(mut self, error: impl FnOnce(ProviderError) + 'static) -> Self {
        self.error = Some(Box::new(error));
        self
    }

    pub(super) fn notify(self, result: Result<(), ProviderError>) {
        match result {
            Ok(()) => {
                if let Some(complete) = self.complete {
                    complete();
                }
            }
            Err(e) => match self.error {
                Some(error) => error(e),
                None => tracing::error!("signal bucket initialization failed: {:#}", e),
            },
        }
    }
}

impl fmt::Debug for InitObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitObserver")
            .field("complete", &self.complete.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl BucketInner {
    pub(super) async fn hydrate(self: Rc<Self>) -> Result<(), ProviderError> {
        let batches: Vec<(Rc<dyn PersistenceProvider>, Vec<String>)> = self
            .providers
            .borrow()
            .entries()
            .iter()
            .map(|entry| {
                let ids = entry
                    .signal_ids
                    .iter()
                    .map(|id| self.storage_key(id))
                    .collect();
                (entry.instance.clone(), ids)
            })
            .collect();
        tracing::debug!("initializing signal bucket from {} providers", batches.len());

        let mut fetches = Vec::with_capacity(batches.len());
        for (provider, ids) in batches {
            if let Some(updates) = provider.receive_signal() {
                self.attach(updates);
            }
            fetches.push(provider.initialize(ids));
        }

        // no ordering across providers, each provider's own order is kept
        let mut fetched = stream::select_all(fetches);
        while let Some(entry) = fetched.next().await {
            self.apply(&entry?);
        }

        tracing::debug!("signal bucket initialized");
        Ok(())
    }
}
