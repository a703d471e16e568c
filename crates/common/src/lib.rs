/**
 * The bucket engine: provider registry, signal node store,
 *  persisted signal factory and the initialization orchestrator.
 */
pub mod bucket;
/**
 * JSON codec applied at every provider boundary.
 * Providers only ever see serialized strings.
 */
pub mod codec;
pub mod error;
/**
 * Persisted signal handles and the write pipeline
 *  that routes local mutations through a provider.
 */
pub mod persisted;
/**
 * The persistence provider contract and a small
 *  broadcast hub for implementing remote update streams.
 */
pub mod provider;
/**
 * Provider keys and the container that resolves
 *  them to cached provider instances.
 */
pub mod resolver;
/**
 * The reactive cell underneath every signal.
 */
pub mod signal;
pub mod spawn;
/**
 * In-memory providers for exercising buckets
 *  without any real storage behind them.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::bucket::{BucketConfig, InitObserver, Initialization, SignalBucket, SignalOptions};
    pub use crate::codec::CodecError;
    pub use crate::error::BucketError;
    pub use crate::persisted::PersistedSignal;
    pub use crate::provider::{
        PersistenceProvider, ProviderError, ReceiveStream, SerializedSignal, SignalHub,
        SignalStream, WriteAck,
    };
    pub use crate::resolver::{ProviderContainer, ProviderKey, ProviderResolver};
    pub use crate::signal::{Signal, Subscription};
    pub use crate::spawn::{Spawner, TokioLocalSpawner};
}
