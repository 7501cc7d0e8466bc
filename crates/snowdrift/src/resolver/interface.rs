use std::{sync::Arc, thread, time::Duration};

use crossbeam_utils::Backoff;

use crate::{Deadline, Error, Result};

/// Upper bound for a single sleep while waiting for a bucket to roll over.
const MAX_PARK: Duration = Duration::from_millis(50);

/// Outcome of a single allocation attempt.
///
/// - [`SequenceStatus::Ready`] carries a sequence that no other caller in the
///   resolver's scope received for that bucket.
/// - [`SequenceStatus::Pending`] means the bucket is exhausted (or the clock
///   is behind the last bucket) and the caller should retry with a fresh
///   timestamp after `yield_for` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    Ready {
        /// Sequence allocated within the bucket.
        sequence: u64,
        /// Bucket the sequence belongs to. Usually the requested timestamp,
        /// but a resolver masking a small clock rollback hands back its last
        /// good bucket instead.
        timestamp: u64,
    },
    Pending {
        /// Milliseconds until the bucket can change.
        yield_for: u64,
    },
}

/// A sequence allocated for a bucket, ready to be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sequenced {
    pub sequence: u64,
    pub timestamp: u64,
}

/// Allocates per-bucket sequence numbers.
///
/// Within a resolver's scope, calls landing in the same bucket receive
/// strictly increasing sequences starting at `0`, and a new bucket starts over
/// at `0`. The scope depends on the implementation: one process for
/// [`InProcessResolver`], every client of a shared store for
/// [`AtomicStoreResolver`], every process sharing a directory for
/// [`FileLockResolver`].
///
/// Implementors only provide [`Self::try_next`]; [`Self::next`] layers the
/// wait-for-next-bucket loop on top of it.
///
/// [`InProcessResolver`]: crate::InProcessResolver
/// [`AtomicStoreResolver`]: crate::AtomicStoreResolver
/// [`FileLockResolver`]: crate::FileLockResolver
pub trait SequenceResolver {
    /// Makes one attempt to allocate a sequence for the bucket `timestamp`.
    ///
    /// Sequences above `max_sequence` are never returned; the bucket is
    /// reported as [`SequenceStatus::Pending`] instead. Blocking work inside
    /// the attempt, such as waiting for a file lock, must give up once
    /// `deadline` elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockRollback`] if the resolver tracks time and `timestamp`
    ///   is behind its last bucket by more than its tolerance.
    /// - [`Error::ResolverUnavailable`] if the backing store or filesystem
    ///   fails, or the deadline elapses.
    fn try_next(&self, timestamp: u64, max_sequence: u64, deadline: Deadline)
    -> Result<SequenceStatus>;

    /// Like [`Self::try_next`], but reads the bucket through `now` only once
    /// the attempt is serialized with every other caller.
    ///
    /// A timestamp read before the attempt can be overtaken by a concurrent
    /// caller that read a later bucket. Resolvers that compare against their
    /// last bucket override this to read the clock under their lock, so that
    /// only a clock that actually moved backwards is reported as
    /// [`Error::ClockRollback`].
    ///
    /// # Errors
    ///
    /// See [`Self::try_next`]. Errors from `now` are returned unchanged.
    fn try_next_now(
        &self,
        now: &mut dyn FnMut() -> Result<u64>,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        let timestamp = now()?;
        self.try_next(timestamp, max_sequence, deadline)
    }

    /// Allocates a sequence, waiting for the next bucket when the current one
    /// is exhausted.
    ///
    /// `now` is called to re-read the clock (in bucket units) before every
    /// retry. Waiting starts with short spins and yields, then sleeps for the
    /// pending time, never past `deadline`.
    ///
    /// A rollback reported for the initial `timestamp` is confirmed with a
    /// fresh read through [`Self::try_next_now`] before it is returned.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::try_next`] or `now`, unchanged.
    /// [`Error::ResolverUnavailable`] if `deadline` elapses while waiting.
    fn next<F>(
        &self,
        timestamp: u64,
        max_sequence: u64,
        mut now: F,
        deadline: Deadline,
    ) -> Result<Sequenced>
    where
        F: FnMut() -> Result<u64>,
        Self: Sized,
    {
        let backoff = Backoff::new();
        let mut status = match self.try_next(timestamp, max_sequence, deadline) {
            // The initial read may have been overtaken by another caller.
            Err(Error::ClockRollback { .. }) => {
                self.try_next_now(&mut now, max_sequence, deadline)?
            }
            other => other?,
        };
        loop {
            match status {
                SequenceStatus::Ready {
                    sequence,
                    timestamp,
                } => return Ok(Sequenced { sequence, timestamp }),
                SequenceStatus::Pending { yield_for } => {
                    if deadline.has_elapsed() {
                        return Err(Error::unavailable(format!(
                            "deadline elapsed waiting for the bucket after {timestamp}"
                        )));
                    }
                    #[cfg(feature = "tracing")]
                    tracing::trace!(yield_for, "bucket exhausted, backing off");
                    park(&backoff, yield_for, deadline);
                    status = self.try_next_now(&mut now, max_sequence, deadline)?;
                }
            }
        }
    }
}

fn park(backoff: &Backoff, yield_for: u64, deadline: Deadline) {
    if backoff.is_completed() {
        let wait = Duration::from_millis(yield_for).min(MAX_PARK);
        thread::sleep(deadline.cap(wait));
    } else {
        backoff.snooze();
    }
}

impl<R: SequenceResolver + ?Sized> SequenceResolver for &R {
    fn try_next(
        &self,
        timestamp: u64,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        (**self).try_next(timestamp, max_sequence, deadline)
    }

    fn try_next_now(
        &self,
        now: &mut dyn FnMut() -> Result<u64>,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        (**self).try_next_now(now, max_sequence, deadline)
    }
}

impl<R: SequenceResolver + ?Sized> SequenceResolver for Arc<R> {
    fn try_next(
        &self,
        timestamp: u64,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        (**self).try_next(timestamp, max_sequence, deadline)
    }

    fn try_next_now(
        &self,
        now: &mut dyn FnMut() -> Result<u64>,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        (**self).try_next_now(now, max_sequence, deadline)
    }
}

impl<R: SequenceResolver + ?Sized> SequenceResolver for Box<R> {
    fn try_next(
        &self,
        timestamp: u64,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        (**self).try_next(timestamp, max_sequence, deadline)
    }

    fn try_next_now(
        &self,
        now: &mut dyn FnMut() -> Result<u64>,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        (**self).try_next_now(now, max_sequence, deadline)
    }
}
