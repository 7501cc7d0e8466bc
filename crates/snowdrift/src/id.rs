use core::fmt;

/// A packed 64-bit Snowflake ID.
///
/// The bit positions of each field depend on the [`BitLayout`] that produced
/// the ID, so decoding goes through the layout (or the [`Generator`] that
/// minted it). Under any layout the top bit is zero and IDs compare in the
/// order they were minted within one resolver scope.
///
/// ```text
///  Bit Index:  63           63 62          22 21          17 16      12 11             0
///              +--------------+--------------+--------------+----------+---------------+
///  Field:      | reserved (1) | timestamp(41)| datacenter(5)| worker(5)| sequence (12) |
///              +--------------+--------------+--------------+----------+---------------+
///              |<----------- MSB ------------ 64 bits ------------- LSB --------------->|
/// ```
///
/// [`BitLayout`]: crate::BitLayout
/// [`Generator`]: crate::Generator
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnowflakeId {
    id: u64,
}

impl SnowflakeId {
    /// Wraps a raw integer without validating it against any layout.
    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    /// Returns the raw integer.
    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Returns the ID as a zero-padded 20-digit string, which sorts
    /// lexicographically in the same order as the integers.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }
}

impl From<SnowflakeId> for u64 {
    fn from(id: SnowflakeId) -> Self {
        id.id
    }
}

impl From<u64> for SnowflakeId {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SnowflakeId")
            .field(&format_args!("{:#018x}", self.id))
            .finish()
    }
}

/// The decoded fields of a [`SnowflakeId`].
///
/// `timestamp` is relative to the epoch of the generator that minted the ID;
/// see [`Generator::timestamp_millis`] for the absolute value.
///
/// [`Generator::timestamp_millis`]: crate::Generator::timestamp_millis
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Components {
    pub timestamp: u64,
    pub datacenter_id: u64,
    pub worker_id: u64,
    pub sequence: u64,
}
