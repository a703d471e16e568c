//! Integration tests for bucket initialization

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ::common::prelude::*;
use ::common::testkit::{GatedProvider, MemoryProvider};
use futures::executor::LocalPool;
use futures::future;

#[test]
fn test_second_initialize_fails() {
    let (pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    let bucket = common::new_bucket(&pool, &container);
    bucket.persisted_signal(0u32, "count").unwrap();

    bucket.initialize_then(|| {}).unwrap();
    let err = bucket.initialize_then(|| {}).unwrap_err();

    assert!(matches!(err, BucketError::AlreadyInitialized));
    assert!(matches!(
        bucket.initialize(),
        Err(BucketError::AlreadyInitialized)
    ));
    assert_eq!(storage.initialize_calls().len(), 1);
}

#[test]
fn test_missing_values_keep_initial() {
    let (pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    storage.seed("other", "1");
    let bucket = common::new_bucket(&pool, &container);
    let count = bucket.persisted_signal(7u32, "count").unwrap();

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    bucket.initialize_then(move || flag.set(true)).unwrap();

    assert!(done.get());
    assert_eq!(count.get(), 7);
}

#[test]
fn test_values_visible_in_completion() {
    let (pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    storage.seed("count", "42");
    storage.seed("names", "[\"ada\",\"grace\"]");
    let bucket = common::new_bucket(&pool, &container);
    let count = bucket.persisted_signal(0u32, "count").unwrap();
    let names = bucket.persisted_signal(Vec::<String>::new(), "names").unwrap();

    let seen = Rc::new(RefCell::new(None));
    let (slot, count_handle, names_handle) = (seen.clone(), count.clone(), names.clone());
    bucket
        .initialize_then(move || {
            *slot.borrow_mut() = Some((count_handle.get(), names_handle.get()));
        })
        .unwrap();

    assert_eq!(
        seen.borrow().clone(),
        Some((42, vec!["ada".to_string(), "grace".to_string()]))
    );
    assert!(bucket.is_initialized());
}

#[test]
fn test_sync_values_land_before_async_completion() {
    let (mut pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    let gated = Rc::new(GatedProvider::new());
    container.insert(gated.clone());
    storage.seed("local", "\"cached\"");
    gated.seed("remote", "\"fetched\"");

    let bucket = common::new_bucket(&pool, &container);
    let local = bucket.persisted_signal(String::new(), "local").unwrap();
    let remote = bucket
        .persisted_signal(
            String::new(),
            SignalOptions::new("remote").provider_of::<GatedProvider>(),
        )
        .unwrap();

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    bucket.initialize_then(move || flag.set(true)).unwrap();

    assert_eq!(local.get(), "cached");
    assert_eq!(remote.get(), "");
    assert!(!done.get());

    pool.run_until_stalled();
    assert!(!done.get());

    gated.release();
    pool.run_until_stalled();
    assert_eq!(remote.get(), "fetched");
    assert!(done.get());
    assert_eq!(gated.initialize_calls(), 1);
}

#[test]
fn test_fetch_error_reaches_observer_unmodified() {
    let (mut pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    storage.fail_initialize("storage unavailable");
    let bucket = common::new_bucket(&pool, &container);
    bucket.persisted_signal(0u32, "count").unwrap();

    let failure = Rc::new(RefCell::new(None));
    let completed = Rc::new(Cell::new(false));
    let (slot, flag) = (failure.clone(), completed.clone());
    bucket
        .initialize_with(
            InitObserver::new()
                .on_complete(move || flag.set(true))
                .on_error(move |e| *slot.borrow_mut() = Some(e.to_string())),
        )
        .unwrap();
    pool.run_until_stalled();

    assert_eq!(failure.borrow().as_deref(), Some("storage unavailable"));
    assert!(!completed.get());
}

#[test]
fn test_async_fetch_error_propagates() {
    let (mut pool, container, _storage) = common::setup_test_env(MemoryProvider::new());
    let gated = Rc::new(GatedProvider::new());
    container.insert(gated.clone());
    let bucket = common::new_bucket(&pool, &container);
    bucket
        .persisted_signal(0u32, SignalOptions::new("count").provider_of::<GatedProvider>())
        .unwrap();

    let mut initialization = bucket.initialize().unwrap();
    assert!(pool.run_until(future::poll_immediate(&mut initialization)).is_none());

    gated.release_with_error("backend offline");
    let err = pool.run_until(initialization).unwrap_err();
    assert_eq!(err.to_string(), "backend offline");
}

#[test]
fn test_initialization_is_cold() {
    let (mut pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    storage.seed("count", "3");
    let bucket = common::new_bucket(&pool, &container);
    let count = bucket.persisted_signal(0u32, "count").unwrap();

    let initialization = bucket.initialize().unwrap();
    assert!(bucket.is_initialized());
    assert!(storage.initialize_calls().is_empty());
    assert_eq!(count.get(), 0);

    pool.run_until(initialization).unwrap();
    assert_eq!(count.get(), 3);
}

#[test]
fn test_joint_initialization_of_buckets() {
    let (mut pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    let gated = Rc::new(GatedProvider::new());
    container.insert(gated.clone());
    storage.seed("settings", "true");
    gated.seed("profile", "\"ada\"");

    let settings_bucket = common::new_bucket(&pool, &container);
    let settings = settings_bucket.persisted_signal(false, "settings").unwrap();
    let profile_bucket = common::new_bucket_with(
        &pool,
        &container,
        BucketConfig::new(ProviderKey::of::<GatedProvider>()),
    );
    let profile = profile_bucket
        .persisted_signal(String::new(), "profile")
        .unwrap();

    let mut joint = future::try_join(
        settings_bucket.initialize().unwrap(),
        profile_bucket.initialize().unwrap(),
    );
    assert!(pool.run_until(future::poll_immediate(&mut joint)).is_none());
    assert!(settings.get());
    assert_eq!(profile.get(), "");

    gated.release();
    pool.run_until(joint).unwrap();
    assert_eq!(profile.get(), "ada");
}

#[test]
fn test_undecodable_value_is_skipped() {
    let (pool, container, storage) = common::setup_test_env(MemoryProvider::new());
    storage.seed("count", "\"not a number\"");
    storage.seed("label", "\"ok\"");
    let bucket = common::new_bucket(&pool, &container);
    let count = bucket.persisted_signal(1u32, "count").unwrap();
    let label = bucket.persisted_signal(String::new(), "label").unwrap();

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    bucket.initialize_then(move || flag.set(true)).unwrap();

    assert!(done.get());
    assert_eq!(count.get(), 1);
    assert_eq!(label.get(), "ok");
}

#[test]
fn test_remote_updates_flow_while_fetch_pending() {
    common::init_tracing();
    let mut pool = LocalPool::new();
    let container = Rc::new(ProviderContainer::new());
    let gated = Rc::new(GatedProvider::new());
    let remote = Rc::new(MemoryProvider::with_remote());
    container.insert(gated.clone());
    container.insert(remote.clone());

    let bucket = common::new_bucket_with(
        &pool,
        &container,
        BucketConfig::new(ProviderKey::of::<GatedProvider>()),
    );
    bucket.persisted_signal(0u32, "slow").unwrap();
    let live = bucket
        .persisted_signal(0u32, SignalOptions::new("live").provider_of::<MemoryProvider>())
        .unwrap();

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    bucket.initialize_then(move || flag.set(true)).unwrap();
    pool.run_until_stalled();

    remote.push("live", "9");
    pool.run_until_stalled();
    assert_eq!(live.get(), 9);
    assert!(!done.get());

    gated.release();
    pool.run_until_stalled();
    assert!(done.get());
}

#[test]
fn test_inbound_values_outside_prefix_are_ignored() {
    common::init_tracing();
    let mut pool = LocalPool::new();
    let remote = Rc::new(MemoryProvider::with_remote());
    let container = Rc::new(ProviderContainer::new());
    container.insert(remote.clone());
    let config =
        BucketConfig::new(ProviderKey::of::<MemoryProvider>()).with_prefix("app/");
    let bucket = common::new_bucket_with(&pool, &container, config);
    let count = bucket.persisted_signal(0u32, "count").unwrap();

    bucket.initialize_then(|| {}).unwrap();
    remote.push("count", "5");
    pool.run_until_stalled();
    assert_eq!(count.get(), 0);

    remote.push("app/count", "6");
    pool.run_until_stalled();
    assert_eq!(count.get(), 6);
}

mod tokio_runtime {
    use std::rc::Rc;
    use std::time::Duration;

    use ::common::prelude::*;
    use futures::stream::{self, StreamExt};
    use tokio::task::LocalSet;

    /// Answers every `initialize` after a timer fires
    #[derive(Debug)]
    struct DelayedProvider {
        delay: Duration,
        value: &'static str,
    }

    impl PersistenceProvider for DelayedProvider {
        fn initialize(&self, ids: Vec<String>) -> SignalStream {
            let (delay, value) = (self.delay, self.value);
            stream::once(async move {
                tokio::time::sleep(delay).await;
                ids
            })
            .flat_map(move |ids| {
                let entries: Vec<Result<SerializedSignal, ProviderError>> = ids
                    .into_iter()
                    .map(|id| Ok(SerializedSignal::new(id, value)))
                    .collect();
                stream::iter(entries)
            })
            .boxed_local()
        }

        fn persist_value(&self, _entry: SerializedSignal) -> WriteAck {
            WriteAck::Immediate
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_on_local_set() {
        super::common::init_tracing();
        let container = Rc::new(ProviderContainer::new());
        container.insert(Rc::new(DelayedProvider {
            delay: Duration::from_millis(250),
            value: "\"late\"",
        }));

        LocalSet::new()
            .run_until(async move {
                let bucket = SignalBucket::new(
                    BucketConfig::new(ProviderKey::of::<DelayedProvider>()),
                    container,
                    TokioLocalSpawner::shared(),
                );
                let status = bucket.persisted_signal("early".to_string(), "status").unwrap();

                let (tx, rx) = tokio::sync::oneshot::channel();
                bucket
                    .initialize_then(move || {
                        let _ = tx.send(());
                    })
                    .unwrap();
                assert_eq!(status.get(), "early");

                rx.await.unwrap();
                assert_eq!(status.get(), "late");
            })
            .await;
    }
}
