use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::sys::{CompletionEntry, SubmissionEntry};

/// A typed window onto one of the arrays inside the shared mappings.
///
/// Indices are reduced with the ring mask, so both a raw counter and a
/// pre-masked slot address the same entry. All accesses are volatile copies:
/// the kernel may touch the memory at any time, so no Rust reference into it
/// is ever handed out.
pub struct RingArray<'ring, T> {
    base: NonNull<T>,
    mask: u32,
    _ring: PhantomData<&'ring T>,
}

impl<'ring, T: Copy> RingArray<'ring, T> {
    /// # Safety
    /// `base` must point at `mask + 1` valid, aligned `T`s that stay mapped
    /// for `'ring`, and `mask + 1` must be a power of two.
    pub(crate) unsafe fn new(base: NonNull<T>, mask: u32) -> Self {
        Self { base, mask, _ring: PhantomData }
    }

    pub fn len(&self) -> usize {
        self.mask as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    fn slot(&self, index: u32) -> *mut T {
        // SAFETY: the masked index is below `len`, the array's length.
        unsafe { self.base.as_ptr().add((index & self.mask) as usize) }
    }

    /// Copies out the entry at `index & mask`.
    #[inline]
    pub fn get(&self, index: u32) -> T {
        // SAFETY: `slot` is in bounds and aligned for the array's lifetime.
        unsafe { self.slot(index).read_volatile() }
    }
}

impl RingArray<'_, SubmissionEntry> {
    /// Writes a descriptor into slot `index & mask`.
    ///
    /// Must happen before the SQ tail store that publishes the slot.
    #[inline]
    pub fn set(&self, index: u32, entry: SubmissionEntry) {
        // SAFETY: in bounds; the kernel only reads SQEs the tail has published.
        unsafe { self.slot(index).write_volatile(entry) }
    }

    /// Rewrites only the user tag of slot `index & mask`.
    pub fn set_user_data(&self, index: u32, user_data: u64) {
        let mut entry = self.get(index);
        entry.user_data = user_data;
        self.set(index, entry);
    }
}

impl RingArray<'_, u32> {
    /// Points SQ ring slot `index & mask` at SQE number `sqe`.
    ///
    /// `sqe` is stored unmasked; a value at or above the capacity is counted
    /// by the kernel as a dropped submission.
    #[inline]
    pub fn set(&self, index: u32, sqe: u32) {
        // SAFETY: in bounds; only published slots are read by the kernel.
        unsafe { self.slot(index).write_volatile(sqe) }
    }
}

impl RingArray<'_, CompletionEntry> {
    /// Copies out every entry in `[head, tail)`.
    pub fn range(&self, head: u32, tail: u32) -> Vec<CompletionEntry> {
        let count = tail.wrapping_sub(head).min(self.len() as u32);
        (0..count).map(|i| self.get(head.wrapping_add(i))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_wrap_with_the_mask() {
        let mut backing = [0u32; 4];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        // SAFETY: `backing` holds four u32s and outlives the view.
        let view = unsafe { RingArray::new(base, 3) };

        view.set(6, 60);
        assert_eq!(view.get(2), 60);
        assert_eq!(view.get(u32::MAX - 1), 60);
        assert_eq!(view.len(), 4);
        drop(view);
        assert_eq!(backing[2], 60);
    }

    #[test]
    fn user_tag_update_keeps_the_descriptor() {
        let mut backing = [SubmissionEntry::default(); 2];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        // SAFETY: `backing` holds two entries and outlives the view.
        let view = unsafe { RingArray::new(base, 1) };

        view.set(1, SubmissionEntry::nop().with_user_data(1));
        view.set_user_data(3, 99);
        assert_eq!(view.get(1).user_data, 99);
        assert_eq!(view.get(1).opcode, crate::sys::IORING_OP_NOP);
    }

    #[test]
    fn completion_range_follows_counters_across_wrap() {
        let mut backing = [CompletionEntry::default(); 4];
        for (i, cqe) in backing.iter_mut().enumerate() {
            cqe.user_data = i as u64;
        }
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        // SAFETY: `backing` holds four entries and outlives the view.
        let view = unsafe { RingArray::new(base, 3) };

        let tags: Vec<u64> = view.range(u32::MAX - 1, 1).iter().map(|c| c.user_data).collect();
        assert_eq!(tags, vec![2, 3, 0]);
    }
}
