use std::fmt::Display;

use thiserror::Error;
use wamp_peer_values::{
    ConversionError,
    FromVariant,
    IntoVariant,
    Variant,
};

/// An integer ID, used for identification of sessions, resources, and requests.
///
/// WAMP IDs are drawn from `[1, 2^53]` so that they survive a round trip through JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Id(u64);

impl Id {
    /// The minimum allowable value of an ID.
    pub const MIN: Id = Id(1);

    /// The maximum allowable value of an ID.
    pub const MAX: Id = Id(1 << 53);

    /// The raw integer value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::MIN
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Error for an ID being out of range.
#[derive(Debug, Error)]
#[error("{value} is out of range for IDs")]
pub struct IdOutOfRange {
    value: u64,
}

impl TryFrom<u64> for Id {
    type Error = IdOutOfRange;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < Self::MIN.0 || value > Self::MAX.0 {
            Err(IdOutOfRange { value })
        } else {
            Ok(Id(value))
        }
    }
}

impl TryFrom<&Variant> for Id {
    type Error = ConversionError;
    fn try_from(value: &Variant) -> Result<Self, Self::Error> {
        match value.as_u64() {
            Some(raw) => Id::try_from(raw).map_err(|err| ConversionError::new(err.to_string())),
            None => Err(ConversionError::type_mismatch("id", value.kind())),
        }
    }
}

impl From<Id> for Variant {
    fn from(value: Id) -> Self {
        Variant::UInt(value.0)
    }
}

impl IntoVariant for Id {
    fn into_variant(self) -> Result<Variant, ConversionError> {
        Ok(self.into())
    }
}

impl FromVariant for Id {
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        Id::try_from(&value)
    }
}

/// Allocates request IDs for a single session.
///
/// IDs increase strictly until the counter wraps modulo `2^53`, at which point allocation resumes
/// at 1. Zero is never produced, and an ID that is still pending is skipped.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    last: u64,
}

const REQUEST_ID_MODULUS: u64 = 1 << 53;

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates the next request ID, skipping any ID for which `is_pending` returns true.
    pub fn next<F>(&mut self, is_pending: F) -> Id
    where
        F: Fn(Id) -> bool,
    {
        loop {
            self.last = (self.last + 1) % REQUEST_ID_MODULUS;
            if self.last == 0 {
                self.last = 1;
            }
            let id = Id(self.last);
            if !is_pending(id) {
                return id;
            }
        }
    }

    /// Resets the allocator to its initial state.
    pub fn reset(&mut self) {
        self.last = 0;
    }
}

#[cfg(test)]
mod id_test {
    use wamp_peer_values::Variant;

    use crate::core::id::{
        Id,
        RequestIdAllocator,
    };

    #[test]
    fn rejects_out_of_range_ids() {
        assert_matches::assert_matches!(Id::try_from(0u64), Err(_));
        assert_matches::assert_matches!(Id::try_from((1u64 << 53) + 1), Err(_));
        assert_matches::assert_matches!(Id::try_from(1u64 << 53), Ok(_));
        assert_matches::assert_matches!(Id::try_from(&Variant::Int(-5)), Err(_));
        assert_matches::assert_matches!(Id::try_from(&Variant::from("5")), Err(_));
        assert_matches::assert_matches!(Id::try_from(&Variant::Int(5)), Ok(id) => {
            assert_eq!(id.value(), 5);
        });
    }

    #[test]
    fn allocates_increasing_ids() {
        let mut allocator = RequestIdAllocator::new();
        let ids = (0..4)
            .map(|_| allocator.next(|_| false).value())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn wraps_to_one_and_skips_pending() {
        let mut allocator = RequestIdAllocator {
            last: (1 << 53) - 2,
        };
        assert_eq!(allocator.next(|_| false).value(), (1 << 53) - 1);
        assert_eq!(allocator.next(|id| id.value() == 1).value(), 2);
        assert_eq!(allocator.next(|id| id.value() == 3).value(), 4);
    }
}
