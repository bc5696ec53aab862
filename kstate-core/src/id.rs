// Dispenses monotonically increasing, never-zero ids. Zero is reserved to
// mean "not subscribed" / "not active", so the counter skips it on wrap.

use std::sync::atomic::{AtomicU32, Ordering};

pub struct IdAllocator(AtomicU32);

impl IdAllocator {
    pub const fn new() -> Self {
        IdAllocator(AtomicU32::new(1))
    }

    /// Return the next id and advance the counter, wrapping past zero back
    /// to one.
    pub fn next(&self) -> u32 {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.wrapping_add(1).max(1))
            })
            .unwrap()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn ids_increase_and_are_nonzero() {
        let alloc = IdAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn wraps_past_zero_to_one() {
        let alloc = IdAllocator(AtomicU32::new(u32::MAX));
        assert_eq!(alloc.next(), u32::MAX);
        assert_eq!(alloc.next(), 1);
    }
}
