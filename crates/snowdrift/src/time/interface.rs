use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Default generator epoch: Thursday, August 8, 2019 00:00:00 UTC
pub const DEFAULT_EPOCH: Duration = Duration::from_millis(1_565_222_400_000);

/// Twitter epoch: Thursday, November 4, 2010 1:42:54.657 UTC
pub const TWITTER_EPOCH: Duration = Duration::from_millis(1_288_834_974_657);

/// A source of wall-clock time in milliseconds since the Unix epoch.
///
/// The generator subtracts its own epoch, so implementations always report
/// absolute Unix milliseconds. Rollback detection only compares successive
/// readings, so a clock is not required to be monotonic; [`MonotonicClock`]
/// is available when it should be.
///
/// # Example
///
/// ```
/// use snowdrift::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1_700_000_000_000
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1_700_000_000_000);
/// ```
///
/// [`MonotonicClock`]: crate::MonotonicClock
pub trait TimeSource {
    /// Returns the current time in milliseconds since 1970-01-01 UTC.
    fn current_millis(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// The operating system wall clock.
///
/// Readings follow NTP steps and manual adjustments, which is exactly what
/// [`InProcessResolver`] watches for when it reports clock rollbacks.
///
/// [`InProcessResolver`]: crate::InProcessResolver
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        u64::try_from(since_unix.as_millis()).unwrap_or(u64::MAX)
    }
}
