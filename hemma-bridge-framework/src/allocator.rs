//! Bridge-local correlation identifiers.
//!
//! Requests are forwarded under an identifier issued here instead of the one
//! the requester chose, so that requests from different transports can never
//! collide while in flight.
//!
//! Identifiers are 20 bits wide and wrap around. The allocator does not track
//! which identifiers are still in use: uniqueness holds only as long as fewer
//! than 2^20 requests are pending at once.

use std::fmt;
use std::sync::Mutex;

/// Number of distinct correlation identifiers.
pub const CORRELATION_ID_MODULUS: u32 = 1 << 20;

/// A bridge-local correlation identifier in `[0, 2^20)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u32);

impl CorrelationId {
    /// Returns `None` when `value` is outside the identifier range.
    pub fn new(value: u32) -> Option<Self> {
        (value < CORRELATION_ID_MODULUS).then_some(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CorrelationId> for u64 {
    fn from(id: CorrelationId) -> Self {
        u64::from(id.0)
    }
}

impl TryFrom<u64> for CorrelationId {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(value)
    }
}

/// Issues correlation identifiers.
///
/// All callers share one counter behind a single lock.
#[derive(Debug, Default)]
pub struct CommandIdAllocator {
    current: Mutex<u32>,
}

impl CommandIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator whose next identifier follows `last`.
    pub fn starting_after(last: CorrelationId) -> Self {
        Self {
            current: Mutex::new(last.0),
        }
    }

    /// Advance the counter and return the new identifier.
    pub fn next(&self) -> CorrelationId {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = (*current + 1) % CORRELATION_ID_MODULUS;
        CorrelationId(*current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_first_id_is_one() {
        let allocator = CommandIdAllocator::new();
        assert_eq!(allocator.next().value(), 1);
        assert_eq!(allocator.next().value(), 2);
    }

    #[test]
    fn test_wraps_at_modulus() {
        let last = CorrelationId::new(CORRELATION_ID_MODULUS - 2).unwrap();
        let allocator = CommandIdAllocator::starting_after(last);

        assert_eq!(allocator.next().value(), CORRELATION_ID_MODULUS - 1);
        assert_eq!(allocator.next().value(), 0);
        assert_eq!(allocator.next().value(), 1);
    }

    #[test]
    fn test_covers_full_range_before_repeating() {
        let allocator = CommandIdAllocator::new();
        let first = allocator.next();
        let mut previous = first;

        for _ in 1..CORRELATION_ID_MODULUS {
            let id = allocator.next();
            assert_ne!(id, first);
            assert_eq!(id.value(), (previous.value() + 1) % CORRELATION_ID_MODULUS);
            previous = id;
        }

        assert_eq!(allocator.next(), first);
    }

    #[test]
    fn test_concurrent_callers_get_distinct_ids() {
        let allocator = Arc::new(CommandIdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || (0..1000).map(|_| allocator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_id_range_conversions() {
        assert!(CorrelationId::new(CORRELATION_ID_MODULUS).is_none());
        assert_eq!(CorrelationId::try_from(5u64).unwrap().value(), 5);
        assert_eq!(
            CorrelationId::try_from(u64::from(CORRELATION_ID_MODULUS)),
            Err(u64::from(CORRELATION_ID_MODULUS))
        );
        assert_eq!(u64::from(CorrelationId::new(42).unwrap()), 42);
    }
}
