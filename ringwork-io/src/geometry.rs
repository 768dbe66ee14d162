use std::mem::{align_of, size_of};

use crate::error::{RegionKind, RingError};
use crate::sys::{CompletionEntry, CqRingOffsets, IoUringParams, SqRingOffsets, SubmissionEntry};

/// Ring layout reported by `io_uring_setup`, validated once.
///
/// Every offset handed out after construction is known to lie inside its
/// mapping and to be aligned for the type stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub sq_off: SqRingOffsets,
    pub cq_off: CqRingOffsets,
    /// `sq_off.array + sq_entries * 4`
    pub sq_ring_size: usize,
    /// `cq_off.cqes + cq_entries * 16`
    pub cq_ring_size: usize,
    /// `sq_entries * 64`
    pub sqes_size: usize,
}

impl RingGeometry {
    pub fn from_params(params: &IoUringParams) -> Result<Self, RingError> {
        check_capacity("sq_entries", params.sq_entries)?;
        check_capacity("cq_entries", params.cq_entries)?;

        let sq_ring_size = region_len(params.sq_off.array, params.sq_entries, size_of::<u32>())?;
        let cq_ring_size = region_len(params.cq_off.cqes, params.cq_entries, size_of::<CompletionEntry>())?;
        let sqes_size = region_len(0, params.sq_entries, size_of::<SubmissionEntry>())?;

        let sq = &params.sq_off;
        for (name, offset) in [
            ("sq head", sq.head),
            ("sq tail", sq.tail),
            ("sq ring_mask", sq.ring_mask),
            ("sq ring_entries", sq.ring_entries),
            ("sq flags", sq.flags),
            ("sq dropped", sq.dropped),
        ] {
            check_field(RegionKind::SubmissionRing, name, offset, size_of::<u32>(), sq_ring_size)?;
        }
        check_aligned(RegionKind::SubmissionRing, "sq array", sq.array, align_of::<u32>())?;

        let cq = &params.cq_off;
        for (name, offset) in [
            ("cq head", cq.head),
            ("cq tail", cq.tail),
            ("cq ring_mask", cq.ring_mask),
            ("cq ring_entries", cq.ring_entries),
            ("cq overflow", cq.overflow),
        ] {
            check_field(RegionKind::CompletionRing, name, offset, size_of::<u32>(), cq_ring_size)?;
        }
        check_aligned(RegionKind::CompletionRing, "cq cqes", cq.cqes, align_of::<CompletionEntry>())?;

        Ok(Self {
            sq_entries: params.sq_entries,
            cq_entries: params.cq_entries,
            sq_off: params.sq_off,
            cq_off: params.cq_off,
            sq_ring_size,
            cq_ring_size,
            sqes_size,
        })
    }

    pub fn sq_mask(&self) -> u32 {
        self.sq_entries - 1
    }

    pub fn cq_mask(&self) -> u32 {
        self.cq_entries - 1
    }

    /// Byte length of `region`.
    pub fn region_size(&self, region: RegionKind) -> usize {
        match region {
            RegionKind::SubmissionRing => self.sq_ring_size,
            RegionKind::CompletionRing => self.cq_ring_size,
            RegionKind::SubmissionEntries => self.sqes_size,
        }
    }
}

fn check_capacity(name: &str, entries: u32) -> Result<(), RingError> {
    if entries == 0 || !entries.is_power_of_two() {
        return Err(RingError::GeometryMismatch(format!(
            "{} = {} is not a non-zero power of two",
            name, entries
        )));
    }
    Ok(())
}

fn region_len(base: u32, entries: u32, entry_size: usize) -> Result<usize, RingError> {
    (entries as usize)
        .checked_mul(entry_size)
        .and_then(|array| array.checked_add(base as usize))
        .ok_or_else(|| RingError::GeometryMismatch(format!(
            "{} entries of {} bytes at offset {} overflow usize",
            entries, entry_size, base
        )))
}

fn check_aligned(region: RegionKind, name: &str, offset: u32, align: usize) -> Result<(), RingError> {
    if offset as usize % align != 0 {
        return Err(RingError::GeometryMismatch(format!(
            "{} offset {} in {} is not {}-byte aligned",
            name, offset, region, align
        )));
    }
    Ok(())
}

fn check_field(region: RegionKind, name: &str, offset: u32, size: usize, limit: usize) -> Result<(), RingError> {
    check_aligned(region, name, offset, size)?;
    if offset as usize + size > limit {
        return Err(RingError::GeometryMismatch(format!(
            "{} offset {} lies outside the {}-byte {}",
            name, offset, limit, region
        )));
    }
    Ok(())
}
