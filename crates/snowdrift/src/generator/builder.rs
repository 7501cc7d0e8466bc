use std::time::Duration;

use crate::{
    BitLayout, DEFAULT_EPOCH, Error, Generator, InProcessResolver, Result, SequenceResolver,
    SystemClock, TimeSource,
};

/// Configures and validates a [`Generator`].
///
/// Every setting has a default: instance ids `0`, [`BitLayout::DEFAULT`],
/// [`DEFAULT_EPOCH`], an [`InProcessResolver`] and the [`SystemClock`].
/// Nothing can be changed once [`Self::build`] has produced a generator.
///
/// ```
/// use snowdrift::{BitLayout, Generator, TWITTER_EPOCH};
///
/// let generator = Generator::builder()
///     .layout(BitLayout::new(41, 3, 7, 12).unwrap())
///     .datacenter_id(5)
///     .worker_id(100)
///     .epoch(TWITTER_EPOCH)
///     .build()
///     .unwrap();
/// assert_eq!(generator.worker_id(), 100);
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct GeneratorBuilder<R = InProcessResolver, C = SystemClock> {
    datacenter_id: u64,
    worker_id: u64,
    epoch: Duration,
    layout: BitLayout,
    resolver: R,
    clock: C,
}

impl Default for GeneratorBuilder {
    fn default() -> Self {
        Self {
            datacenter_id: 0,
            worker_id: 0,
            epoch: DEFAULT_EPOCH,
            layout: BitLayout::DEFAULT,
            resolver: InProcessResolver::new(),
            clock: SystemClock,
        }
    }
}

impl<R, C> GeneratorBuilder<R, C> {
    pub fn datacenter_id(mut self, datacenter_id: u64) -> Self {
        self.datacenter_id = datacenter_id;
        self
    }

    pub fn worker_id(mut self, worker_id: u64) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn layout(mut self, layout: BitLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the epoch as an offset from the Unix epoch.
    pub fn epoch(mut self, epoch: Duration) -> Self {
        self.epoch = epoch;
        self
    }

    /// Sets the epoch in Unix milliseconds.
    pub fn start_timestamp(self, unix_millis: u64) -> Self {
        self.epoch(Duration::from_millis(unix_millis))
    }

    /// Replaces the resolver, and with it the scope of the uniqueness
    /// guarantee.
    pub fn sequence_resolver<R2>(self, resolver: R2) -> GeneratorBuilder<R2, C> {
        GeneratorBuilder {
            datacenter_id: self.datacenter_id,
            worker_id: self.worker_id,
            epoch: self.epoch,
            layout: self.layout,
            resolver,
            clock: self.clock,
        }
    }

    pub fn clock<C2>(self, clock: C2) -> GeneratorBuilder<R, C2> {
        GeneratorBuilder {
            datacenter_id: self.datacenter_id,
            worker_id: self.worker_id,
            epoch: self.epoch,
            layout: self.layout,
            resolver: self.resolver,
            clock,
        }
    }
}

impl<R, C> GeneratorBuilder<R, C>
where
    R: SequenceResolver,
    C: TimeSource,
{
    /// Validates the configuration and builds the generator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if:
    /// - the datacenter or worker id does not fit its bit field,
    /// - the epoch lies ahead of the clock,
    /// - the time elapsed since the epoch already overflows the timestamp
    ///   field.
    pub fn build(self) -> Result<Generator<R, C>> {
        let layout = self.layout;
        if self.datacenter_id > layout.max_datacenter_id() {
            return Err(Error::configuration(format!(
                "datacenter id {} exceeds {} ({} bits)",
                self.datacenter_id,
                layout.max_datacenter_id(),
                layout.datacenter_bits()
            )));
        }
        if self.worker_id > layout.max_worker_id() {
            return Err(Error::configuration(format!(
                "worker id {} exceeds {} ({} bits)",
                self.worker_id,
                layout.max_worker_id(),
                layout.worker_bits()
            )));
        }

        let epoch_millis = u64::try_from(self.epoch.as_millis())
            .map_err(|_| Error::configuration(format!("epoch {:?} is out of range", self.epoch)))?;
        let now = self.clock.current_millis();
        let Some(elapsed) = now.checked_sub(epoch_millis) else {
            return Err(Error::configuration(format!(
                "epoch {epoch_millis} lies in the future (clock reads {now})"
            )));
        };
        if elapsed > layout.max_timestamp() {
            return Err(Error::configuration(format!(
                "{elapsed}ms since epoch {epoch_millis} overflow the {}-bit timestamp field",
                layout.timestamp_bits()
            )));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            datacenter_id = self.datacenter_id,
            worker_id = self.worker_id,
            epoch_millis,
            ?layout,
            "generator configured"
        );

        Ok(Generator {
            datacenter_id: self.datacenter_id,
            worker_id: self.worker_id,
            epoch_millis,
            layout,
            resolver: self.resolver,
            clock: self.clock,
        })
    }
}
