use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    BitLayout, Components, Deadline, Error, GeneratorBuilder, InProcessResolver, Result,
    SequenceResolver, Sequenced, SnowflakeId, SystemClock, TimeSource,
};

/// A Snowflake ID generator bound to one instance identity, one epoch and one
/// [`SequenceResolver`].
///
/// Each call reads the clock, asks the resolver for the next sequence in the
/// current millisecond bucket and packs `bucket | datacenter id | worker id |
/// sequence` with the configured [`BitLayout`]. Uniqueness holds across every
/// caller sharing the resolver's scope, provided each instance identity is
/// used by a single deployment.
///
/// The generator holds no mutable state of its own: everything is fixed by
/// [`GeneratorBuilder::build`], and sharing it between threads (by reference
/// or through an `Arc`) is safe whenever the resolver and clock are.
///
/// # Example
///
/// ```
/// use snowdrift::{Generator, MemoryStore, AtomicStoreResolver};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new());
/// let generator = Generator::builder()
///     .datacenter_id(2)
///     .worker_id(9)
///     .sequence_resolver(AtomicStoreResolver::new(Arc::clone(&store)))
///     .build()
///     .unwrap();
///
/// let first = generator.next_id().unwrap();
/// let second = generator.next_id().unwrap();
/// assert!(first < second);
/// ```
#[derive(Debug)]
pub struct Generator<R = InProcessResolver, C = SystemClock> {
    pub(crate) datacenter_id: u64,
    pub(crate) worker_id: u64,
    pub(crate) epoch_millis: u64,
    pub(crate) layout: BitLayout,
    pub(crate) resolver: R,
    pub(crate) clock: C,
}

impl Generator {
    /// Creates a generator with the default layout, epoch, clock and an
    /// [`InProcessResolver`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if either id does not fit the default
    /// 5-bit fields.
    pub fn new(datacenter_id: u64, worker_id: u64) -> Result<Self> {
        Self::builder()
            .datacenter_id(datacenter_id)
            .worker_id(worker_id)
            .build()
    }

    pub fn builder() -> GeneratorBuilder {
        GeneratorBuilder::default()
    }
}

impl<R, C> Generator<R, C>
where
    R: SequenceResolver,
    C: TimeSource,
{
    /// Generates the next ID, waiting for the next bucket if the current one
    /// is exhausted.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockRollback`] if the clock reads earlier than the epoch or
    ///   the resolver refuses a backwards step.
    /// - [`Error::ResolverUnavailable`] if the coordination backend fails.
    /// - [`Error::Range`] once the clock has outrun the timestamp field.
    pub fn next_id(&self) -> Result<SnowflakeId> {
        self.next_id_until(Deadline::NONE)
    }

    /// Like [`Self::next_id`], but gives up with
    /// [`Error::ResolverUnavailable`] once `deadline` elapses.
    ///
    /// # Errors
    ///
    /// See [`Self::next_id`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next_id_until(&self, deadline: Deadline) -> Result<SnowflakeId> {
        let now = self.current_bucket()?;
        let Sequenced {
            sequence,
            timestamp,
        } = self.resolver.next(
            now,
            self.layout.max_sequence(),
            || self.current_bucket(),
            deadline,
        )?;
        self.layout
            .encode(timestamp, self.datacenter_id, self.worker_id, sequence)
    }

    /// The current millisecond bucket, relative to the epoch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClockRollback`] if the clock reads earlier than the
    /// epoch.
    pub fn current_bucket(&self) -> Result<u64> {
        let millis = self.clock.current_millis();
        millis
            .checked_sub(self.epoch_millis)
            .ok_or_else(|| Self::before_epoch(self.epoch_millis - millis))
    }

    #[cold]
    #[inline(never)]
    fn before_epoch(behind_ms: u64) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(behind_ms, "clock reads earlier than the generator epoch");
        Error::ClockRollback { behind_ms }
    }
}

impl<R, C> Generator<R, C> {
    /// Splits an ID minted with this generator's layout into its fields.
    pub fn decode(&self, id: SnowflakeId) -> Components {
        self.layout.decode(id)
    }

    /// Absolute Unix milliseconds at which `id` was minted, assuming it came
    /// from a generator sharing this epoch and layout.
    pub fn timestamp_millis(&self, id: SnowflakeId) -> u64 {
        self.decode(id).timestamp.saturating_add(self.epoch_millis)
    }

    pub fn datacenter_id(&self) -> u64 {
        self.datacenter_id
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// The epoch as an offset from the Unix epoch.
    pub fn epoch(&self) -> Duration {
        Duration::from_millis(self.epoch_millis)
    }

    pub fn layout(&self) -> BitLayout {
        self.layout
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
