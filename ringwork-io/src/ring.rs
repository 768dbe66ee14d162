use std::cell::Cell;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::ptr::NonNull;
use nix::sys::signal::SigSet;
use log::{debug, info, warn};

use crate::counter::{ring_distance, RingCounter};
use crate::error::{EnterError, RegionKind, RingError};
use crate::flags::{EnterFlags, SetupFlags, SqRingFlags};
use crate::geometry::RingGeometry;
use crate::region::MappedRegion;
use crate::sys::{self, CompletionEntry, IoUringParams, SubmissionEntry};
use crate::view::RingArray;

/// Parameters for creating a ring context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Submission queue capacity (rounded up to a power of two by the kernel).
    pub entries: u32,
    /// Completion queue capacity; the kernel defaults to `2 * entries`.
    pub cq_entries: Option<u32>,
    pub flags: SetupFlags,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { entries: 8, cq_entries: None, flags: SetupFlags::empty() }
    }
}

impl RingConfig {
    pub fn new(entries: u32) -> Self {
        Self { entries, ..Default::default() }
    }

    /// Requests an explicit completion queue size (`IORING_SETUP_CQSIZE`).
    pub fn cq_entries(mut self, cq_entries: u32) -> Self {
        self.cq_entries = Some(cq_entries);
        self.flags |= SetupFlags::CQSIZE;
        self
    }

    /// Lets the kernel clamp oversized capacities (`IORING_SETUP_CLAMP`).
    pub fn clamp(mut self) -> Self {
        self.flags |= SetupFlags::CLAMP;
        self
    }

    fn to_params(self) -> IoUringParams {
        IoUringParams {
            flags: self.flags.bits(),
            cq_entries: self.cq_entries.unwrap_or(0),
            ..Default::default()
        }
    }
}

/// Where a ring is in its submit/complete cycle.
///
/// A drained ring (CQ head caught up with the CQ tail, nothing outstanding)
/// is indistinguishable from a fresh one and reports [`RingPhase::Idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingPhase {
    /// Nothing published, nothing outstanding, nothing to reap.
    Idle,
    /// SQ tail advanced past entries the kernel has not consumed yet.
    Submitted,
    /// The kernel accepted requests whose completions are not posted yet.
    InFlight,
    /// Completions are waiting between CQ head and CQ tail.
    Completable,
}

/// Exclusive owner of one io_uring context and its three shared mappings.
///
/// Every counter access goes through an acquire load or a release store; the
/// entry arrays are reachable only through [`RingArray`] views that borrow
/// the accessor, so no pointer into the mappings outlives it.
///
/// # Thread Safety
/// `Send` but not `Sync`: the protocol assumes a single submitter and a
/// single reaper, which one thread at a time guarantees.
pub struct RingAccessor {
    geometry: RingGeometry,
    sq_head: RingCounter,
    sq_tail: RingCounter,
    sq_flags: RingCounter,
    sq_dropped: RingCounter,
    cq_head: RingCounter,
    cq_tail: RingCounter,
    cq_overflow: RingCounter,
    sq_mask: u32,
    cq_mask: u32,
    sq_array: NonNull<u32>,
    sqes: NonNull<SubmissionEntry>,
    cqes: NonNull<CompletionEntry>,
    /// Requests accepted by `enter` whose completions have not been consumed.
    outstanding: Cell<u32>,
    // Field order is drop order: mappings go before the handle closes.
    sq_region: MappedRegion,
    cq_region: MappedRegion,
    sqe_region: MappedRegion,
    fd: OwnedFd,
}

// SAFETY: all raw pointers target mappings owned by this value, which are
// released only when it is dropped or shut down.
unsafe impl Send for RingAccessor {}

impl RingAccessor {
    /// Creates a ring with `entries` submission slots and default settings.
    pub fn new(entries: u32) -> Result<Self, RingError> {
        Self::with_config(&RingConfig::new(entries))
    }

    pub fn with_config(config: &RingConfig) -> Result<Self, RingError> {
        let mut params = config.to_params();
        let fd = sys::io_uring_setup(config.entries, &mut params).map_err(RingError::Setup)?;
        Self::from_handle(fd, &params)
    }

    /// Maps the rings of an already configured context.
    ///
    /// `params` must be the structure `io_uring_setup` filled in for `fd`. If
    /// any step fails, mappings made so far are released before returning.
    pub fn from_handle(fd: OwnedFd, params: &IoUringParams) -> Result<Self, RingError> {
        let geometry = RingGeometry::from_params(params)?;

        let sq_region = map_region(fd.as_fd(), &geometry, RegionKind::SubmissionRing, sys::IORING_OFF_SQ_RING)?;
        let cq_region = map_region(fd.as_fd(), &geometry, RegionKind::CompletionRing, sys::IORING_OFF_CQ_RING)?;
        let sqe_region = map_region(fd.as_fd(), &geometry, RegionKind::SubmissionEntries, sys::IORING_OFF_SQES)?;

        let sq = &geometry.sq_off;
        let cq = &geometry.cq_off;

        let sq_mask = sq_region.read_u32(sq.ring_mask as usize)?;
        let sq_entries = sq_region.read_u32(sq.ring_entries as usize)?;
        let cq_mask = cq_region.read_u32(cq.ring_mask as usize)?;
        let cq_entries = cq_region.read_u32(cq.ring_entries as usize)?;
        if sq_mask != geometry.sq_mask() || sq_entries != geometry.sq_entries {
            return Err(RingError::GeometryMismatch(format!(
                "SQ ring reports mask {} / {} entries, expected {} / {}",
                sq_mask, sq_entries, geometry.sq_mask(), geometry.sq_entries
            )));
        }
        if cq_mask != geometry.cq_mask() || cq_entries != geometry.cq_entries {
            return Err(RingError::GeometryMismatch(format!(
                "CQ ring reports mask {} / {} entries, expected {} / {}",
                cq_mask, cq_entries, geometry.cq_mask(), geometry.cq_entries
            )));
        }

        // SAFETY (all counters): `field` checked bounds and alignment, the
        // mappings are owned by the accessor being built, and the counters
        // are only ever accessed atomically.
        let (sq_head, sq_tail, sq_flags, sq_dropped, cq_head, cq_tail, cq_overflow) = unsafe {
            (
                RingCounter::from_ptr(sq_region.field(sq.head as usize)?),
                RingCounter::from_ptr(sq_region.field(sq.tail as usize)?),
                RingCounter::from_ptr(sq_region.field(sq.flags as usize)?),
                RingCounter::from_ptr(sq_region.field(sq.dropped as usize)?),
                RingCounter::from_ptr(cq_region.field(cq.head as usize)?),
                RingCounter::from_ptr(cq_region.field(cq.tail as usize)?),
                RingCounter::from_ptr(cq_region.field(cq.overflow as usize)?),
            )
        };

        let sq_array = sq_region.array::<u32>(sq.array as usize, geometry.sq_entries as usize)?;
        let cqes = cq_region.array::<CompletionEntry>(cq.cqes as usize, geometry.cq_entries as usize)?;
        let sqes = sqe_region.array::<SubmissionEntry>(0, geometry.sq_entries as usize)?;

        info!(
            "Ring ready: sq={} cq={} (fd: {}, features: 0x{:x})",
            geometry.sq_entries,
            geometry.cq_entries,
            fd.as_raw_fd(),
            params.features
        );

        Ok(Self {
            geometry,
            sq_head,
            sq_tail,
            sq_flags,
            sq_dropped,
            cq_head,
            cq_tail,
            cq_overflow,
            sq_mask,
            cq_mask,
            sq_array,
            sqes,
            cqes,
            outstanding: Cell::new(0),
            sq_region,
            cq_region,
            sqe_region,
            fd,
        })
    }

    pub fn geometry(&self) -> &RingGeometry {
        &self.geometry
    }

    pub fn submission_capacity(&self) -> u32 {
        self.geometry.sq_entries
    }

    pub fn completion_capacity(&self) -> u32 {
        self.geometry.cq_entries
    }

    pub fn load_completion_head(&self) -> u32 {
        self.cq_head.load_acquire()
    }

    pub fn load_completion_tail(&self) -> u32 {
        self.cq_tail.load_acquire()
    }

    pub fn load_submission_head(&self) -> u32 {
        self.sq_head.load_acquire()
    }

    pub fn load_submission_tail(&self) -> u32 {
        self.sq_tail.load_acquire()
    }

    /// Completions the kernel could not post because the CQ was full.
    pub fn load_completion_overflow(&self) -> u32 {
        self.cq_overflow.load_acquire()
    }

    /// Submissions the kernel discarded because their index was invalid.
    pub fn load_submission_dropped(&self) -> u32 {
        self.sq_dropped.load_acquire()
    }

    pub fn load_submission_flags(&self) -> SqRingFlags {
        SqRingFlags::from_bits_retain(self.sq_flags.load_acquire())
    }

    /// Hands completion slots up to `head` back to the kernel.
    ///
    /// Every read of those entries must already have happened; the release
    /// store keeps them ordered before the kernel can reuse the slots.
    pub fn store_completion_head(&self, head: u32) {
        let consumed = ring_distance(self.cq_head.load_acquire(), head);
        self.cq_head.store_release(head);
        self.outstanding.set(self.outstanding.get().saturating_sub(consumed));
    }

    /// Free SQ slots: capacity minus published entries the kernel has not
    /// consumed yet.
    pub fn submission_space(&self) -> u32 {
        self.submission_capacity().saturating_sub(self.pending_submissions())
    }

    /// Checks that publishing up to `tail` keeps `tail - head` within the
    /// SQ capacity.
    ///
    /// Call before writing descriptors past the current tail: a slot beyond
    /// the capacity aliases one the kernel has not consumed yet.
    pub fn check_submission_tail(&self, tail: u32) -> Result<(), RingError> {
        let pending = ring_distance(self.load_submission_head(), tail);
        let capacity = self.submission_capacity();
        if pending > capacity {
            return Err(RingError::SubmissionOverrun { pending, capacity });
        }
        Ok(())
    }

    /// Publishes submission slots up to `tail` to the kernel.
    ///
    /// A tail more than the capacity ahead of the SQ head is refused with
    /// [`RingError::SubmissionOverrun`] and nothing is published.
    ///
    /// # Safety
    /// Every SQE and index-array slot in `[old tail, tail)` must be fully
    /// written, and every buffer or iovec they point at must remain valid,
    /// and unaliased where the kernel writes, until the matching completion
    /// is reaped.
    pub unsafe fn store_submission_tail(&self, tail: u32) -> Result<(), RingError> {
        self.check_submission_tail(tail)?;
        self.sq_tail.store_release(tail);
        Ok(())
    }

    pub fn submission_mask(&self) -> u32 {
        self.sq_mask
    }

    pub fn completion_mask(&self) -> u32 {
        self.cq_mask
    }

    pub fn submission_entries(&self) -> RingArray<'_, SubmissionEntry> {
        // SAFETY: `sqes` spans `sq_entries` entries of the SQE mapping, which
        // lives as long as `self`.
        unsafe { RingArray::new(self.sqes, self.sq_mask) }
    }

    pub fn submission_index_array(&self) -> RingArray<'_, u32> {
        // SAFETY: `sq_array` spans `sq_entries` slots of the SQ mapping.
        unsafe { RingArray::new(self.sq_array, self.sq_mask) }
    }

    pub fn completion_entries(&self) -> RingArray<'_, CompletionEntry> {
        // SAFETY: `cqes` spans `cq_entries` entries of the CQ mapping.
        unsafe { RingArray::new(self.cqes, self.cq_mask) }
    }

    /// Published submissions the kernel has not consumed.
    pub fn pending_submissions(&self) -> u32 {
        ring_distance(self.load_submission_head(), self.load_submission_tail())
    }

    /// Completions posted by the kernel and not yet consumed.
    pub fn ready_completions(&self) -> u32 {
        ring_distance(self.load_completion_head(), self.load_completion_tail())
    }

    /// Moves every ready completion into `out` and returns how many it took.
    pub fn reap(&self, out: &mut Vec<CompletionEntry>) -> usize {
        let head = self.load_completion_head();
        let tail = self.load_completion_tail();
        let ready = self.completion_entries().range(head, tail);
        let taken = ready.len();
        out.extend(ready);
        self.store_completion_head(head.wrapping_add(taken as u32));
        taken
    }

    pub fn phase(&self) -> RingPhase {
        if self.pending_submissions() != 0 {
            RingPhase::Submitted
        } else if self.ready_completions() != 0 {
            RingPhase::Completable
        } else if self.outstanding.get() != 0 {
            RingPhase::InFlight
        } else {
            RingPhase::Idle
        }
    }

    /// One `io_uring_enter` call.
    ///
    /// The caller must have written and published (via
    /// [`store_submission_tail`](Self::store_submission_tail)) `to_submit`
    /// entries beforehand. With [`EnterFlags::GETEVENTS`] and a non-zero
    /// `min_complete` this blocks until that many completions are ready or a
    /// signal not blocked by `sig` arrives.
    ///
    /// Returns how many submissions the kernel consumed, which can be fewer
    /// than `to_submit`. Failures, including `EINTR`, are returned as-is;
    /// retrying is the caller's decision.
    pub fn enter(
        &self,
        to_submit: u32,
        min_complete: u32,
        flags: EnterFlags,
        sig: Option<&SigSet>,
    ) -> Result<u32, EnterError> {
        debug!(
            "io_uring_enter(fd: {}, submit: {}, wait: {}, flags: {:?})",
            self.fd.as_raw_fd(),
            to_submit,
            min_complete,
            flags
        );

        match sys::io_uring_enter(self.fd.as_fd(), to_submit, min_complete, flags.bits(), sig) {
            Ok(accepted) => {
                self.outstanding.set(self.outstanding.get().wrapping_add(accepted));
                if accepted < to_submit {
                    debug!("Kernel accepted {}/{} submissions", accepted, to_submit);
                }
                Ok(accepted)
            }
            Err(errno) => {
                debug!("io_uring_enter failed: {}", errno);
                Err(EnterError::from(errno))
            }
        }
    }

    /// Releases the three mappings now, reporting the first `munmap` failure.
    ///
    /// Every region is attempted even if an earlier one fails; the handle is
    /// closed when `self` goes out of scope.
    pub fn shutdown(mut self) -> Result<(), RingError> {
        self.warn_if_outstanding();
        self.outstanding.set(0);

        let results = [
            self.sq_region.release(),
            self.cq_region.release(),
            self.sqe_region.release(),
        ];
        results.into_iter().collect()
    }

    fn warn_if_outstanding(&self) {
        let outstanding = self.outstanding.get();
        if outstanding > 0 {
            warn!(
                "Tearing down ring (fd: {}) with {} request(s) not yet reaped",
                self.fd.as_raw_fd(),
                outstanding
            );
        }
    }
}

impl AsFd for RingAccessor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for RingAccessor {
    fn drop(&mut self) {
        // Only the private tally is consulted: after `shutdown` the counters
        // point into memory that is no longer mapped.
        self.warn_if_outstanding();
    }
}

fn map_region(
    fd: BorrowedFd<'_>,
    geometry: &RingGeometry,
    kind: RegionKind,
    offset: libc::off_t,
) -> Result<MappedRegion, RingError> {
    MappedRegion::map(fd, kind, offset, geometry.region_size(kind))
}
