use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// One `u32` counter living in memory shared with the kernel.
///
/// Only acquire loads and release stores are offered; a relaxed or plain
/// access to a ring counter is always a bug.
pub(crate) struct RingCounter {
    cell: NonNull<AtomicU32>,
}

impl RingCounter {
    /// # Safety
    /// `ptr` must be 4-byte aligned and stay valid for reads and writes for
    /// the whole life of the counter, and every other access to it from this
    /// process must be atomic.
    pub(crate) unsafe fn from_ptr(ptr: NonNull<u32>) -> Self {
        Self { cell: ptr.cast() }
    }

    #[inline]
    pub(crate) fn load_acquire(&self) -> u32 {
        // SAFETY: validity and alignment guaranteed by `from_ptr`.
        unsafe { self.cell.as_ref() }.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn store_release(&self, value: u32) {
        // SAFETY: validity and alignment guaranteed by `from_ptr`.
        unsafe { self.cell.as_ref() }.store(value, Ordering::Release)
    }
}

/// Number of entries between `head` and `tail` on a free-running `u32` ring.
#[inline]
pub fn ring_distance(head: u32, tail: u32) -> u32 {
    tail.wrapping_sub(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counter_over(cell: &AtomicU32) -> RingCounter {
        let ptr = NonNull::from(cell).cast::<u32>();
        // SAFETY: the atomic outlives every use inside the test.
        unsafe { RingCounter::from_ptr(ptr) }
    }

    #[test]
    fn repeated_loads_are_stable_without_store() {
        let cell = AtomicU32::new(7);
        let counter = counter_over(&cell);
        assert_eq!(counter.load_acquire(), 7);
        assert_eq!(counter.load_acquire(), 7);

        counter.store_release(8);
        assert_eq!(counter.load_acquire(), 8);
        assert_eq!(cell.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn distance_survives_wraparound() {
        assert_eq!(ring_distance(u32::MAX - 1, 2), 4);
        assert_eq!(ring_distance(5, 5), 0);
    }

    proptest! {
        #[test]
        fn distance_counts_advances(head in any::<u32>(), n in 0u32..4096) {
            let tail = head.wrapping_add(n);
            prop_assert_eq!(ring_distance(head, tail), n);
        }

        #[test]
        fn masked_slots_are_distinct_within_capacity(head in any::<u32>(), shift in 0u32..12) {
            let capacity = 1u32 << shift;
            let mask = capacity - 1;
            let mut seen = vec![false; capacity as usize];
            for i in 0..capacity {
                let slot = (head.wrapping_add(i) & mask) as usize;
                prop_assert!(!seen[slot]);
                seen[slot] = true;
            }
        }
    }
}
