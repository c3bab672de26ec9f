//! Log addresses.
//!
//! Every log record is addressed by a [`LogInstant`]: the log file number
//! and the byte offset of the record within that file, packed into a single
//! `u64`. Because file numbers only grow and offsets only grow within a
//! file, the numeric order of instants is exactly the order in which
//! records were written.

use std::fmt;

/// Packed address of a log record: `(file_number << 32) | position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogInstant(u64);

impl LogInstant {
    /// The invalid instant. Sorts before every valid instant.
    pub const INVALID: LogInstant = LogInstant(0);

    /// Largest legal log file number.
    pub const MAX_FILE_NUMBER: u64 = 0x7FFF_FFFF;

    /// Largest legal byte offset within a log file.
    ///
    /// The position half of the packed word is 32 bits but only 28 are
    /// usable; the top bits are reserved so an instant can never look
    /// negative to a signed reader and so future format revisions have
    /// somewhere to put flags.
    pub const MAX_FILE_SIZE: u64 = 0x0FFF_FFFF;

    const FILE_NUMBER_SHIFT: u32 = 32;
    const POSITION_MASK: u64 = 0x7FFF_FFFF;

    /// Packs a file number and position into an instant.
    ///
    /// Callers are responsible for staying within [`Self::MAX_FILE_NUMBER`]
    /// and [`Self::MAX_FILE_SIZE`]; the engine checks both before
    /// allocating addresses.
    #[must_use]
    pub const fn make(file_number: u64, position: u64) -> Self {
        debug_assert!(file_number <= Self::MAX_FILE_NUMBER);
        debug_assert!(position <= Self::MAX_FILE_SIZE);
        Self((file_number << Self::FILE_NUMBER_SHIFT) | position)
    }

    /// Reconstructs an instant from its packed representation.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the packed representation.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the log file number half of the address.
    #[must_use]
    pub const fn file_number(self) -> u64 {
        self.0 >> Self::FILE_NUMBER_SHIFT
    }

    /// Returns the byte offset half of the address.
    #[must_use]
    pub const fn position(self) -> u64 {
        self.0 & Self::POSITION_MASK
    }

    /// Returns `true` if this is a valid log address.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns `true` if this is the invalid sentinel.
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LogInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "(invalid)")
        } else {
            write!(f, "({},{})", self.file_number(), self.position())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pack_unpack() {
        let i = LogInstant::make(7, 1234);
        assert_eq!(i.file_number(), 7);
        assert_eq!(i.position(), 1234);
        assert!(i.is_valid());
    }

    #[test]
    fn invalid_sorts_first() {
        assert!(LogInstant::INVALID < LogInstant::make(1, 0));
        assert!(LogInstant::INVALID.is_invalid());
    }

    #[test]
    fn extremes() {
        let i = LogInstant::make(LogInstant::MAX_FILE_NUMBER, LogInstant::MAX_FILE_SIZE);
        assert_eq!(i.file_number(), LogInstant::MAX_FILE_NUMBER);
        assert_eq!(i.position(), LogInstant::MAX_FILE_SIZE);
    }

    #[test]
    fn display() {
        assert_eq!(LogInstant::make(3, 24).to_string(), "(3,24)");
        assert_eq!(LogInstant::INVALID.to_string(), "(invalid)");
    }

    proptest! {
        #[test]
        fn order_matches_write_order(
            f1 in 1u64..=LogInstant::MAX_FILE_NUMBER,
            p1 in 0u64..=LogInstant::MAX_FILE_SIZE,
            f2 in 1u64..=LogInstant::MAX_FILE_NUMBER,
            p2 in 0u64..=LogInstant::MAX_FILE_SIZE,
        ) {
            let a = LogInstant::make(f1, p1);
            let b = LogInstant::make(f2, p2);
            prop_assert_eq!(a.cmp(&b), (f1, p1).cmp(&(f2, p2)));
        }

        #[test]
        fn roundtrip_via_u64(
            f in 0u64..=LogInstant::MAX_FILE_NUMBER,
            p in 0u64..=LogInstant::MAX_FILE_SIZE,
        ) {
            let i = LogInstant::make(f, p);
            let back = LogInstant::from_u64(i.as_u64());
            prop_assert_eq!(back.file_number(), f);
            prop_assert_eq!(back.position(), p);
        }
    }
}
