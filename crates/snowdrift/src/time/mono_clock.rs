use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{SystemClock, TimeSource};

/// Shared ticker thread that updates every millisecond.
#[derive(Debug)]
struct SharedTickerInner {
    current: AtomicU64,
    _handle: OnceLock<JoinHandle<()>>,
}

/// A wall-clock aligned time source that never goes backwards.
///
/// The clock reads the system time once at construction and from then on
/// advances with a monotonic timer (`Instant`), so NTP steps or manual clock
/// changes after startup are invisible to it. Each clone shares the same
/// ticker thread, which stops once the last clone is dropped.
///
/// With this clock an [`InProcessResolver`] never observes a rollback within
/// one process. Processes started at different times may still disagree by
/// however far their system clocks drifted apart.
///
/// [`InProcessResolver`]: crate::InProcessResolver
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    inner: Arc<SharedTickerInner>,
    anchor_millis: u64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Starts a clock anchored at the current system time.
    ///
    /// Spawns a background thread that stores the milliseconds elapsed since
    /// construction into a shared atomic once per millisecond, keeping
    /// syscalls off the hot path.
    pub fn new() -> Self {
        Self::with_anchor(SystemClock.current_millis())
    }

    /// Starts a clock whose first reading is `anchor_millis` (Unix ms).
    pub fn with_anchor(anchor_millis: u64) -> Self {
        let inner = Arc::new(SharedTickerInner {
            current: AtomicU64::new(0),
            _handle: OnceLock::new(),
        });

        let weak_inner = Arc::downgrade(&inner);
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let mut tick = 0;

            loop {
                let Some(inner_ref) = weak_inner.upgrade() else {
                    break;
                };

                // Absolute target of the next tick
                let target = start + Duration::from_millis(tick);

                let now = Instant::now();
                if now < target {
                    thread::sleep(target - now);
                }

                let now_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                inner_ref.current.store(now_ms, Ordering::Release);

                // Align to the next tick after the actual time
                tick = now_ms + 1;
            }
        });

        let _ = inner._handle.set(handle);

        Self {
            inner,
            anchor_millis,
        }
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.anchor_millis + self.inner.current.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_anchor_and_advances() {
        let clock = MonotonicClock::with_anchor(1_000);
        let first = clock.current_millis();
        assert!(first >= 1_000);

        thread::sleep(Duration::from_millis(20));
        let later = clock.current_millis();
        assert!(later > first, "clock did not advance: {first} -> {later}");
    }

    #[test]
    fn never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut last = clock.current_millis();
        for _ in 0..10_000 {
            let now = clock.current_millis();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn clones_share_the_ticker() {
        let clock = MonotonicClock::with_anchor(0);
        let clone = clock.clone();
        thread::sleep(Duration::from_millis(5));
        let a = clock.current_millis();
        let b = clone.current_millis();
        assert!(a.abs_diff(b) <= 1);
    }
}
