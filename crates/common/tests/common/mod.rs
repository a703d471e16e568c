//! Shared test utilities for signal bucket integration tests
#![allow(dead_code)]

use std::rc::Rc;

use ::common::prelude::*;
use ::common::testkit::MemoryProvider;
use futures::executor::LocalPool;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A local pool to drive provider work, a container with `storage`
///  registered as the default provider, and the storage itself
pub fn setup_test_env(storage: MemoryProvider) -> (LocalPool, Rc<ProviderContainer>, Rc<MemoryProvider>) {
    init_tracing();
    let storage = Rc::new(storage);
    let container = Rc::new(ProviderContainer::new());
    container.insert(storage.clone());
    (LocalPool::new(), container, storage)
}

/// A bucket defaulting to the [`MemoryProvider`] in `container`
pub fn new_bucket(pool: &LocalPool, container: &Rc<ProviderContainer>) -> SignalBucket {
    new_bucket_with(
        pool,
        container,
        BucketConfig::new(ProviderKey::of::<MemoryProvider>()),
    )
}

pub fn new_bucket_with(
    pool: &LocalPool,
    container: &Rc<ProviderContainer>,
    config: BucketConfig,
) -> SignalBucket {
    SignalBucket::new(config, container.clone(), Rc::new(pool.spawner()))
}
