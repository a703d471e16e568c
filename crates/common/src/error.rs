//! Usage errors raised by a [`SignalBucket`](crate::bucket::SignalBucket).
//!
//! Provider failures are not part of this enum, they travel unmodified
//! as [`ProviderError`](crate::provider::ProviderError).

use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    /// A second signal was declared with an id that is
    ///  already present in the bucket, across all providers
    #[error("SignalBucket contains duplicate signal id: {0}")]
    DuplicateSignalId(String),
    /// `initialize` was called more than once on the same bucket
    #[error("SignalBucket is already initialized")]
    AlreadyInitialized,
    /// The resolver has no provider registered under this key
    #[error("no persistence provider registered for {0}")]
    UnknownProvider(&'static str),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
