use crate::{Components, Error, Field, Result, SnowflakeId};

/// Bit widths of the four Snowflake fields.
///
/// Fields are packed most significant first as `timestamp | datacenter id |
/// worker id | sequence`. The widths may sum to at most 63 so the top bit of
/// every ID stays zero and the value survives a round trip through a signed
/// 64-bit integer.
///
/// # Example
///
/// ```
/// use snowdrift::BitLayout;
///
/// let layout = BitLayout::DEFAULT;
/// let id = layout.encode(1_000, 3, 17, 42).unwrap();
/// let parts = layout.decode(id);
/// assert_eq!(
///     (parts.timestamp, parts.datacenter_id, parts.worker_id, parts.sequence),
///     (1_000, 3, 17, 42)
/// );
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitLayout {
    timestamp_bits: u8,
    datacenter_bits: u8,
    worker_bits: u8,
    sequence_bits: u8,
}

impl Default for BitLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitLayout {
    /// Classic layout: 41-bit timestamp, 5-bit datacenter id, 5-bit worker
    /// id, 12-bit sequence.
    pub const DEFAULT: Self = Self {
        timestamp_bits: 41,
        datacenter_bits: 5,
        worker_bits: 5,
        sequence_bits: 12,
    };

    /// Total number of usable bits; the sign bit is reserved.
    pub const MAX_BITS: u32 = 63;

    /// Creates a layout from explicit field widths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the widths sum to more than
    /// [`Self::MAX_BITS`], or if the timestamp or sequence field is empty.
    /// Datacenter and worker fields may be zero bits wide.
    pub fn new(
        timestamp_bits: u8,
        datacenter_bits: u8,
        worker_bits: u8,
        sequence_bits: u8,
    ) -> Result<Self> {
        if timestamp_bits == 0 {
            return Err(Error::configuration("timestamp field needs at least one bit"));
        }
        if sequence_bits == 0 {
            return Err(Error::configuration("sequence field needs at least one bit"));
        }
        let total = u32::from(timestamp_bits)
            + u32::from(datacenter_bits)
            + u32::from(worker_bits)
            + u32::from(sequence_bits);
        if total > Self::MAX_BITS {
            return Err(Error::configuration(format!(
                "bit widths sum to {total}, at most {} are available",
                Self::MAX_BITS
            )));
        }
        Ok(Self {
            timestamp_bits,
            datacenter_bits,
            worker_bits,
            sequence_bits,
        })
    }

    pub const fn timestamp_bits(&self) -> u8 {
        self.timestamp_bits
    }

    pub const fn datacenter_bits(&self) -> u8 {
        self.datacenter_bits
    }

    pub const fn worker_bits(&self) -> u8 {
        self.worker_bits
    }

    pub const fn sequence_bits(&self) -> u8 {
        self.sequence_bits
    }

    pub const fn max_timestamp(&self) -> u64 {
        mask(self.timestamp_bits)
    }

    pub const fn max_datacenter_id(&self) -> u64 {
        mask(self.datacenter_bits)
    }

    pub const fn max_worker_id(&self) -> u64 {
        mask(self.worker_bits)
    }

    pub const fn max_sequence(&self) -> u64 {
        mask(self.sequence_bits)
    }

    const fn worker_shift(&self) -> u8 {
        self.sequence_bits
    }

    const fn datacenter_shift(&self) -> u8 {
        self.sequence_bits + self.worker_bits
    }

    const fn timestamp_shift(&self) -> u8 {
        self.sequence_bits + self.worker_bits + self.datacenter_bits
    }

    /// Packs the four fields into an ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] naming the first field whose value exceeds its
    /// bit width.
    pub fn encode(
        &self,
        timestamp: u64,
        datacenter_id: u64,
        worker_id: u64,
        sequence: u64,
    ) -> Result<SnowflakeId> {
        check(Field::Timestamp, timestamp, self.max_timestamp())?;
        check(Field::DatacenterId, datacenter_id, self.max_datacenter_id())?;
        check(Field::WorkerId, worker_id, self.max_worker_id())?;
        check(Field::Sequence, sequence, self.max_sequence())?;

        let raw = (timestamp << self.timestamp_shift())
            | (datacenter_id << self.datacenter_shift())
            | (worker_id << self.worker_shift())
            | sequence;
        Ok(SnowflakeId::from_raw(raw))
    }

    /// Unpacks an ID into its fields. Bits outside the layout are ignored.
    pub const fn decode(&self, id: SnowflakeId) -> Components {
        let raw = id.to_raw();
        Components {
            timestamp: (raw >> self.timestamp_shift()) & self.max_timestamp(),
            datacenter_id: (raw >> self.datacenter_shift()) & self.max_datacenter_id(),
            worker_id: (raw >> self.worker_shift()) & self.max_worker_id(),
            sequence: raw & self.max_sequence(),
        }
    }
}

const fn mask(bits: u8) -> u64 {
    if bits == 0 { 0 } else { u64::MAX >> (64 - bits as u32) }
}

fn check(field: Field, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(Error::Range { field, value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_limits() {
        let layout = BitLayout::DEFAULT;
        assert_eq!(layout.max_timestamp(), (1 << 41) - 1);
        assert_eq!(layout.max_datacenter_id(), 31);
        assert_eq!(layout.max_worker_id(), 31);
        assert_eq!(layout.max_sequence(), 4095);
        assert_eq!(BitLayout::default(), layout);
    }

    #[test]
    fn encode_places_fields() {
        let id = BitLayout::DEFAULT.encode(1, 1, 1, 1).unwrap();
        assert_eq!(id.to_raw(), (1 << 22) | (1 << 17) | (1 << 12) | 1);
    }

    #[test]
    fn round_trips_boundaries() {
        let layouts = [
            BitLayout::DEFAULT,
            BitLayout::new(39, 0, 10, 14).unwrap(),
            BitLayout::new(1, 31, 30, 1).unwrap(),
        ];
        for layout in layouts {
            let cases = [
                (0, 0, 0, 0),
                (
                    layout.max_timestamp(),
                    layout.max_datacenter_id(),
                    layout.max_worker_id(),
                    layout.max_sequence(),
                ),
                (layout.max_timestamp() / 3, 0, layout.max_worker_id(), 1),
            ];
            for (t, d, w, s) in cases {
                let id = layout.encode(t, d, w, s).unwrap();
                assert_eq!(id.to_raw() >> 63, 0, "sign bit set for {layout:?}");
                assert_eq!(
                    layout.decode(id),
                    Components {
                        timestamp: t,
                        datacenter_id: d,
                        worker_id: w,
                        sequence: s,
                    }
                );
            }
        }
    }

    #[test]
    fn ids_order_by_timestamp_then_sequence() {
        let layout = BitLayout::DEFAULT;
        let a = layout.encode(10, 31, 31, 4095).unwrap();
        let b = layout.encode(11, 0, 0, 0).unwrap();
        let c = layout.encode(11, 0, 0, 1).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn encode_rejects_out_of_range_fields() {
        let layout = BitLayout::DEFAULT;
        let err = layout.encode(1 << 41, 0, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Range { field: Field::Timestamp, value, max }
                if value == 1 << 41 && max == (1 << 41) - 1
        ));
        assert!(matches!(
            layout.encode(0, 32, 0, 0),
            Err(Error::Range { field: Field::DatacenterId, .. })
        ));
        assert!(matches!(
            layout.encode(0, 0, 32, 0),
            Err(Error::Range { field: Field::WorkerId, .. })
        ));
        assert!(matches!(
            layout.encode(0, 0, 0, 4096),
            Err(Error::Range { field: Field::Sequence, max: 4095, .. })
        ));
    }

    #[test]
    fn zero_width_fields_only_accept_zero() {
        let layout = BitLayout::new(41, 0, 10, 12).unwrap();
        assert_eq!(layout.max_datacenter_id(), 0);
        assert!(layout.encode(5, 0, 3, 2).is_ok());
        assert!(matches!(
            layout.encode(5, 1, 3, 2),
            Err(Error::Range { field: Field::DatacenterId, max: 0, .. })
        ));
    }

    #[test]
    fn rejects_invalid_widths() {
        assert!(matches!(
            BitLayout::new(42, 5, 5, 12),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            BitLayout::new(0, 5, 5, 12),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            BitLayout::new(41, 5, 5, 0),
            Err(Error::Configuration { .. })
        ));
        assert!(BitLayout::new(41, 5, 5, 12).is_ok());
    }
}
