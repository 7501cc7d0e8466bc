use core::cmp::Ordering;
use std::time::Duration;

use crossbeam_utils::CachePadded;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Deadline, Error, Result,
    mutex::{Mutex, MutexGuard},
    resolver::{SequenceResolver, SequenceStatus},
};

#[derive(Debug, Default)]
struct State {
    last: Option<(u64, u64)>,
}

/// A mutex-guarded sequence counter for one process.
///
/// The last `(bucket, sequence)` pair lives behind a single lock, and the
/// rollback check, the bucket comparison and the increment all happen while
/// holding it.
///
/// ## Scope
/// - ✅ Every thread sharing this resolver (directly, by reference or through
///   an `Arc`)
/// - ❌ Other processes or other resolver instances
///
/// ## Clock rollbacks
///
/// A timestamp behind the last bucket fails with [`Error::ClockRollback`].
/// With a rollback tolerance configured, rollbacks up to that many
/// milliseconds keep allocating from the last good bucket instead, and the
/// caller waits once that bucket is full.
#[derive(Debug, Default)]
pub struct InProcessResolver {
    state: CachePadded<Mutex<State>>,
    rollback_tolerance: u64,
}

impl InProcessResolver {
    /// Creates a resolver that rejects every clock rollback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver that masks rollbacks of up to `tolerance`.
    pub fn with_rollback_tolerance(tolerance: Duration) -> Self {
        Self {
            state: CachePadded::new(Mutex::new(State::default())),
            rollback_tolerance: u64::try_from(tolerance.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Seeds the resolver with a last allocation, as if `sequence` had just
    /// been handed out for `timestamp`.
    ///
    /// Useful to resume after a restart, or to start right at the end of a
    /// bucket.
    pub fn from_components(timestamp: u64, sequence: u64) -> Self {
        Self {
            state: CachePadded::new(Mutex::new(State {
                last: Some((timestamp, sequence)),
            })),
            rollback_tolerance: 0,
        }
    }

    pub fn rollback_tolerance(&self) -> Duration {
        Duration::from_millis(self.rollback_tolerance)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        #[cfg(feature = "parking-lot")]
        {
            Ok(self.state.lock())
        }
        #[cfg(not(feature = "parking-lot"))]
        {
            self.state.lock().map_err(Error::from)
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, state)))]
    fn allocate(&self, state: &mut State, now: u64, max_sequence: u64) -> Result<SequenceStatus> {
        let Some((last_ts, last_seq)) = state.last else {
            state.last = Some((now, 0));
            return Ok(SequenceStatus::Ready {
                sequence: 0,
                timestamp: now,
            });
        };

        match now.cmp(&last_ts) {
            Ordering::Greater => {
                state.last = Some((now, 0));
                Ok(SequenceStatus::Ready {
                    sequence: 0,
                    timestamp: now,
                })
            }
            Ordering::Equal => {
                if last_seq < max_sequence {
                    state.last = Some((last_ts, last_seq + 1));
                    Ok(SequenceStatus::Ready {
                        sequence: last_seq + 1,
                        timestamp: last_ts,
                    })
                } else {
                    Ok(SequenceStatus::Pending { yield_for: 1 })
                }
            }
            Ordering::Less => {
                let behind = last_ts - now;
                if behind > self.rollback_tolerance {
                    return Err(Self::cold_rollback(behind));
                }
                if last_seq < max_sequence {
                    state.last = Some((last_ts, last_seq + 1));
                    Ok(SequenceStatus::Ready {
                        sequence: last_seq + 1,
                        timestamp: last_ts,
                    })
                } else {
                    Ok(SequenceStatus::Pending {
                        yield_for: behind + 1,
                    })
                }
            }
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_rollback(behind_ms: u64) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(behind_ms, "clock moved backwards, refusing to allocate");
        Error::ClockRollback { behind_ms }
    }
}

impl SequenceResolver for InProcessResolver {
    fn try_next(
        &self,
        timestamp: u64,
        max_sequence: u64,
        _deadline: Deadline,
    ) -> Result<SequenceStatus> {
        let mut state = self.lock()?;
        self.allocate(&mut state, timestamp, max_sequence)
    }

    fn try_next_now(
        &self,
        now: &mut dyn FnMut() -> Result<u64>,
        max_sequence: u64,
        _deadline: Deadline,
    ) -> Result<SequenceStatus> {
        let mut state = self.lock()?;
        let timestamp = now()?;
        self.allocate(&mut state, timestamp, max_sequence)
    }
}
