use core::fmt;

/// Boxed error carried as the source of [`Error::ResolverUnavailable`].
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// A result type defaulting to the crate [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The bit field an out-of-range value was destined for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Timestamp,
    DatacenterId,
    WorkerId,
    Sequence,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timestamp => "timestamp",
            Self::DatacenterId => "datacenter id",
            Self::WorkerId => "worker id",
            Self::Sequence => "sequence",
        };
        f.write_str(name)
    }
}

/// All error variants that `snowdrift` can emit.
///
/// Resolver errors travel through the [`Generator`] untouched, so callers can
/// match on the variant to decide between retrying, aborting or switching to a
/// different coordination scope. Sequence exhaustion is never reported here:
/// resolvers absorb it by waiting for the next bucket.
///
/// [`Generator`]: crate::Generator
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An instance id, bit layout, epoch or resolver setting is out of range.
    ///
    /// Raised while building a generator or resolver; the value being built
    /// is unusable.
    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    /// A value handed to the codec does not fit its bit field.
    #[error("{field} {value} does not fit its bit field (max {max})")]
    Range { field: Field, value: u64, max: u64 },

    /// The clock was observed moving backwards further than the configured
    /// tolerance, or reading earlier than the generator epoch.
    #[error("clock moved backwards by {behind_ms}ms")]
    ClockRollback { behind_ms: u64 },

    /// The coordination backend (atomic store or lock directory) failed, or
    /// the caller's deadline elapsed before a sequence could be allocated.
    #[error("sequence resolver unavailable: {context}")]
    ResolverUnavailable {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The in-process state lock was poisoned by a panicking thread.
    ///
    /// `parking_lot` mutexes do not poison, so this variant does not exist
    /// with the `parking-lot` feature.
    #[cfg_attr(docsrs, doc(cfg(not(feature = "parking-lot"))))]
    #[cfg(not(feature = "parking-lot"))]
    #[error("sequence state lock poisoned")]
    LockPoisoned,
}

impl Error {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(context: impl Into<String>) -> Self {
        Self::ResolverUnavailable {
            context: context.into(),
            source: None,
        }
    }

    pub(crate) fn unavailable_with<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::ResolverUnavailable {
            context: context.into(),
            source: Some(source.into()),
        }
    }
}

#[cfg(not(feature = "parking-lot"))]
use crate::mutex::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
