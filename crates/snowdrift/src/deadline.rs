use std::time::{Duration, Instant};

/// An optional point in time after which blocking resolver work gives up.
///
/// Passing [`Deadline::NONE`] blocks until a sequence is allocated, which is
/// the behavior of a plain distributed counter. A bounded deadline turns lock
/// contention or an exhausted bucket that never rolls over into
/// [`Error::ResolverUnavailable`].
///
/// [`Error::ResolverUnavailable`]: crate::Error::ResolverUnavailable
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; blocking operations wait indefinitely.
    pub const NONE: Self = Self(None);

    /// A deadline at a fixed instant.
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// A deadline `timeout` from now. Saturates to [`Deadline::NONE`] if the
    /// instant cannot be represented.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub const fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub const fn is_bounded(&self) -> bool {
        self.0.is_some()
    }

    pub fn has_elapsed(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Caps `wait` so that sleeping never overshoots the deadline.
    pub(crate) fn cap(&self, wait: Duration) -> Duration {
        self.remaining().map_or(wait, |left| wait.min(left))
    }
}
