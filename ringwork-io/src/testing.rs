use std::fs;
use std::ops::Deref;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::fixture::ring_if_supported;
use crate::ring::{RingAccessor, RingConfig};

/// Held shared by every test that keeps a ring mapped, and exclusively by
/// tests that count io_uring mappings in `/proc/self/maps`.
static RING_MAPPINGS: RwLock<()> = RwLock::new(());

/// A live ring plus the shared mapping guard, dropped after the ring.
pub(crate) struct TestRing {
    pub(crate) ring: RingAccessor,
    _guard: RwLockReadGuard<'static, ()>,
}

impl Deref for TestRing {
    type Target = RingAccessor;

    fn deref(&self) -> &RingAccessor {
        &self.ring
    }
}

/// A live ring, or `None` (test skipped) where io_uring is unavailable.
pub(crate) fn test_ring(entries: u32) -> Option<TestRing> {
    test_ring_with(&RingConfig::new(entries))
}

pub(crate) fn test_ring_with(config: &RingConfig) -> Option<TestRing> {
    let guard = RING_MAPPINGS.read().unwrap_or_else(PoisonError::into_inner);
    let ring = ring_if_supported(config).expect("io_uring setup failed");
    if ring.is_none() {
        eprintln!("skipping: io_uring unavailable");
    }
    ring.map(|ring| TestRing { ring, _guard: guard })
}

/// Excludes every other ring-holding test while held.
pub(crate) fn exclusive_mappings() -> RwLockWriteGuard<'static, ()> {
    RING_MAPPINGS.write().unwrap_or_else(PoisonError::into_inner)
}

/// io_uring mappings currently in this process's address space.
pub(crate) fn io_uring_mappings() -> usize {
    fs::read_to_string("/proc/self/maps")
        .expect("read /proc/self/maps")
        .lines()
        .filter(|line| line.contains("io_uring"))
        .count()
}
