use std::mem::{align_of, size_of};
use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::ptr::NonNull;
use nix::errno::Errno;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use log::{trace, warn};

use crate::error::{RegionKind, RingError};

/// One shared mapping of the ring handle.
///
/// Mapped `MAP_SHARED | MAP_POPULATE` so the kernel and the process see the
/// same bytes and no page is faulted in lazily. Released exactly once:
/// [`release`](Self::release) is idempotent and `Drop` calls it.
#[derive(Debug)]
pub struct MappedRegion {
    base: Option<NonNull<u8>>,
    len: usize,
    kind: RegionKind,
}

// SAFETY: the region is plain shared memory owned by this value; moving the
// owner to another thread does not invalidate it.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes of `fd` at the kernel-defined `offset`.
    pub fn map(fd: BorrowedFd<'_>, kind: RegionKind, offset: libc::off_t, len: usize) -> Result<Self, RingError> {
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| RingError::GeometryMismatch(format!("{} has zero length", kind)))?;

        // SAFETY: the kernel picks the address, so no existing Rust memory is
        // aliased; the mapping is owned by the returned value.
        let addr = unsafe {
            mman::mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_POPULATE,
                Some(fd),
                offset,
            )
        }
        .map_err(|source| RingError::Mapping { region: kind, source })?;

        let base = NonNull::new(addr.cast::<u8>())
            .ok_or(RingError::Mapping { region: kind, source: Errno::EFAULT })?;

        trace!("Mapped {} ({} bytes at {:p}, offset 0x{:x})", kind, len, base, offset);
        Ok(Self { base: Some(base), len, kind })
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_mapped(&self) -> bool {
        self.base.is_some()
    }

    /// Typed pointer to one `T` at byte `offset`, bounds and alignment checked.
    pub fn field<T>(&self, offset: usize) -> Result<NonNull<T>, RingError> {
        self.array::<T>(offset, 1)
    }

    /// Typed pointer to `count` consecutive `T`s starting at byte `offset`.
    pub fn array<T>(&self, offset: usize, count: usize) -> Result<NonNull<T>, RingError> {
        let base = self.base.ok_or_else(|| {
            RingError::GeometryMismatch(format!("{} is no longer mapped", self.kind))
        })?;

        let end = count
            .checked_mul(size_of::<T>())
            .and_then(|bytes| bytes.checked_add(offset));
        match end {
            Some(end) if end <= self.len => {}
            _ => {
                return Err(RingError::GeometryMismatch(format!(
                    "{} x {} bytes at offset {} exceeds the {}-byte {}",
                    count,
                    size_of::<T>(),
                    offset,
                    self.len,
                    self.kind
                )))
            }
        }

        // SAFETY: `offset` is within the mapping, checked above.
        let ptr = unsafe { base.as_ptr().add(offset) };
        if ptr as usize % align_of::<T>() != 0 {
            return Err(RingError::GeometryMismatch(format!(
                "offset {} in {} is misaligned for a {}-byte type",
                offset,
                self.kind,
                align_of::<T>()
            )));
        }

        // SAFETY: derived from a non-null base plus an in-bounds offset.
        Ok(unsafe { NonNull::new_unchecked(ptr.cast::<T>()) })
    }

    /// Volatile read of a `u32` the kernel wrote once at setup (masks, sizes).
    pub fn read_u32(&self, offset: usize) -> Result<u32, RingError> {
        let ptr = self.field::<u32>(offset)?;
        // SAFETY: in bounds and aligned, checked by `field`.
        Ok(unsafe { ptr.as_ptr().read_volatile() })
    }

    /// Unmaps the region. Later calls are no-ops.
    pub fn release(&mut self) -> Result<(), RingError> {
        let Some(base) = self.base.take() else {
            return Ok(());
        };

        // SAFETY: `base`/`len` describe a live mapping created by `map`, and
        // taking `base` out guarantees it is unmapped only once.
        unsafe { mman::munmap(base.as_ptr().cast(), self.len) }
            .map_err(|source| RingError::Release { region: self.kind, source })?;

        trace!("Unmapped {} ({} bytes)", self.kind, self.len);
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Leaking {} mapping: {}", self.kind, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_file(len: u64) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(len).unwrap();
        file
    }

    #[test]
    fn maps_and_bounds_checks_fields() {
        let file = scratch_file(4096);
        let region = MappedRegion::map(file.as_file().as_fd(), RegionKind::SubmissionRing, 0, 4096).unwrap();

        assert!(region.is_mapped());
        assert_eq!(region.len(), 4096);
        assert!(region.field::<u32>(4092).is_ok());
        assert!(region.field::<u32>(4093).is_err());
        assert!(region.field::<u32>(4096).is_err());
        assert!(region.array::<u64>(0, 512).is_ok());
        assert!(region.array::<u64>(8, 512).is_err());
    }

    #[test]
    fn writes_are_visible_through_the_shared_file() {
        let file = scratch_file(4096);
        let region = MappedRegion::map(file.as_file().as_fd(), RegionKind::CompletionRing, 0, 4096).unwrap();

        let cell = region.field::<AtomicU32>(16).unwrap();
        // SAFETY: aligned, in bounds, mapping alive for the test.
        unsafe { cell.as_ref() }.store(0xfeed, Ordering::Release);
        assert_eq!(region.read_u32(16).unwrap(), 0xfeed);

        let second = MappedRegion::map(file.as_file().as_fd(), RegionKind::CompletionRing, 0, 4096).unwrap();
        assert_eq!(second.read_u32(16).unwrap(), 0xfeed);
    }

    #[test]
    fn release_is_idempotent() {
        let file = scratch_file(4096);
        let mut region = MappedRegion::map(file.as_file().as_fd(), RegionKind::SubmissionEntries, 0, 4096).unwrap();

        region.release().unwrap();
        assert!(!region.is_mapped());
        region.release().unwrap();
        assert!(region.field::<u32>(0).is_err());
        drop(region);
    }

    #[test]
    fn zero_length_is_rejected_before_mapping() {
        let file = scratch_file(4096);
        let err = MappedRegion::map(file.as_file().as_fd(), RegionKind::SubmissionRing, 0, 0).unwrap_err();
        assert!(matches!(err, RingError::GeometryMismatch(_)));
    }
}
