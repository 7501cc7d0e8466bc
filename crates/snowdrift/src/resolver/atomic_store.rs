use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Deadline, Error, Result,
    resolver::{AtomicStore, SequenceResolver, SequenceStatus},
};

/// A resolver that delegates sequencing to a shared [`AtomicStore`].
///
/// Every bucket maps to the key `<prefix><bucket>`. An allocation increments
/// that key and uses `value - 1` as the sequence; the first increment also
/// sets the key to expire after the configured TTL so stale buckets clean
/// themselves up. Increments past the sequence space mean the bucket is full,
/// and the caller waits for the clock to move on.
///
/// ## Scope
/// - ✅ Every process talking to the same store with the same prefix and
///   epoch
/// - ❌ Clock rollbacks longer than the TTL: an expired bucket key restarts
///   at `0`
///
/// A store failure is reported as [`Error::ResolverUnavailable`]; the
/// resolver never falls back to a local counter.
#[derive(Debug, Clone)]
pub struct AtomicStoreResolver<S> {
    store: S,
    prefix: String,
    ttl: Duration,
}

impl<S: AtomicStore> AtomicStoreResolver<S> {
    pub const DEFAULT_PREFIX: &'static str = "snowflake:";

    /// Keys outlive their bucket by far, which also covers clock rollbacks of
    /// up to the same length.
    pub const DEFAULT_TTL: Duration = Duration::from_millis(1_000);

    pub fn new(store: S) -> Self {
        Self {
            store,
            prefix: Self::DEFAULT_PREFIX.to_owned(),
            ttl: Self::DEFAULT_TTL,
        }
    }

    /// Replaces the key prefix. Generators that must not share sequences
    /// (for example because they use different epochs) need distinct
    /// prefixes.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replaces the bucket key TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless `ttl` is longer than one
    /// bucket (1 ms).
    pub fn with_ttl(mut self, ttl: Duration) -> Result<Self> {
        if ttl <= Duration::from_millis(1) {
            return Err(Error::configuration(format!(
                "bucket key ttl must exceed one bucket, got {ttl:?}"
            )));
        }
        self.ttl = ttl;
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The store key used for `bucket`.
    pub fn key_for(&self, bucket: u64) -> String {
        format!("{}{}", self.prefix, bucket)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn allocate(&self, timestamp: u64, max_sequence: u64) -> Result<SequenceStatus> {
        let key = self.key_for(timestamp);
        let count = self
            .store
            .increment_and_get(&key)
            .map_err(|e| Error::unavailable_with(format!("failed to increment `{key}`"), e))?;

        if count == 1 {
            self.store
                .expire(&key, self.ttl)
                .map_err(|e| Error::unavailable_with(format!("failed to expire `{key}`"), e))?;
        }

        let sequence = count
            .checked_sub(1)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                Error::unavailable(format!(
                    "store returned non-positive counter {count} for `{key}`"
                ))
            })?;

        if sequence > max_sequence {
            #[cfg(feature = "tracing")]
            tracing::debug!(key = %key, count, "bucket exhausted in shared store");
            return Ok(SequenceStatus::Pending { yield_for: 1 });
        }

        Ok(SequenceStatus::Ready {
            sequence,
            timestamp,
        })
    }
}

impl<S: AtomicStore> SequenceResolver for AtomicStoreResolver<S> {
    fn try_next(
        &self,
        timestamp: u64,
        max_sequence: u64,
        _deadline: Deadline,
    ) -> Result<SequenceStatus> {
        self.allocate(timestamp, max_sequence)
    }
}
