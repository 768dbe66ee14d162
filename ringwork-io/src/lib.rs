//! ringwork I/O: direct access to the Linux io_uring rings.
//!
//! The crate maps the submission and completion rings a kernel io_uring
//! context exposes and offers ordering-correct access to their counters and
//! entry arrays. It deliberately stops there: no scheduler, no SQ polling,
//! no registered buffers. One process, one submitter, one reaper.

pub mod counter;
pub mod entry;
pub mod error;
pub mod fixture;
pub mod flags;
pub mod geometry;
pub mod region;
pub mod ring;
pub mod sys;
pub mod view;

#[cfg(test)]
mod testing;

// Re-exports for callers driving a ring directly
pub use counter::ring_distance;
pub use error::{EnterError, RegionKind, RingError};
pub use flags::{EnterFlags, SetupFlags, SqRingFlags};
pub use geometry::RingGeometry;
pub use ring::{RingAccessor, RingConfig, RingPhase};
pub use sys::{CompletionEntry, IoUringParams, SubmissionEntry};
pub use view::RingArray;
