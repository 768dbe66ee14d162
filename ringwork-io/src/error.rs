use std::fmt;
use nix::errno::Errno;
use thiserror::Error;

/// Which of the three shared mappings an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    SubmissionRing,
    CompletionRing,
    SubmissionEntries,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionKind::SubmissionRing => "SQ ring",
            RegionKind::CompletionRing => "CQ ring",
            RegionKind::SubmissionEntries => "SQE array",
        };
        f.write_str(name)
    }
}

/// Failures of a [`RingAccessor`](crate::RingAccessor): construction,
/// publishing past the SQ capacity, and teardown.
#[derive(Error, Debug)]
pub enum RingError {
    #[error("io_uring_setup failed: {0}")]
    Setup(#[source] Errno),
    #[error("Failed to map {region}: {source}")]
    Mapping {
        region: RegionKind,
        #[source]
        source: Errno,
    },
    #[error("Kernel ring geometry mismatch: {0}")]
    GeometryMismatch(String),
    #[error("Publishing would leave {pending} submissions pending in a {capacity}-entry SQ")]
    SubmissionOverrun { pending: u32, capacity: u32 },
    #[error("Failed to unmap {region}: {source}")]
    Release {
        region: RegionKind,
        #[source]
        source: Errno,
    },
}

/// A failed `io_uring_enter` call.
///
/// Returned as a value and never retried internally: one call to
/// [`RingAccessor::enter`](crate::RingAccessor::enter) is one syscall.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterError {
    #[error("io_uring_enter interrupted by a signal")]
    Interrupted,
    #[error("io_uring_enter rejected its arguments")]
    InvalidArgument,
    #[error("io_uring_enter busy: completion queue overflow pending")]
    Busy,
    #[error("io_uring_enter could not allocate request resources")]
    WouldBlock,
    #[error("io_uring_enter was handed an invalid address")]
    Fault,
    #[error("io_uring_enter failed: {0}")]
    Other(Errno),
}

impl EnterError {
    /// The errno the kernel reported.
    pub fn errno(&self) -> Errno {
        match self {
            EnterError::Interrupted => Errno::EINTR,
            EnterError::InvalidArgument => Errno::EINVAL,
            EnterError::Busy => Errno::EBUSY,
            EnterError::WouldBlock => Errno::EAGAIN,
            EnterError::Fault => Errno::EFAULT,
            EnterError::Other(errno) => *errno,
        }
    }

    /// Whether repeating the same call may succeed without changing state.
    pub fn is_transient(&self) -> bool {
        matches!(self, EnterError::Interrupted | EnterError::WouldBlock | EnterError::Busy)
    }
}

impl From<Errno> for EnterError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EINTR => EnterError::Interrupted,
            Errno::EINVAL => EnterError::InvalidArgument,
            Errno::EBUSY => EnterError::Busy,
            Errno::EAGAIN => EnterError::WouldBlock,
            Errno::EFAULT => EnterError::Fault,
            other => EnterError::Other(other),
        }
    }
}
