use bitflags::bitflags;

use crate::sys;

bitflags! {
    /// `IORING_SETUP_*` flags accepted by [`RingConfig`](crate::RingConfig).
    ///
    /// Polling and SQ-thread modes are deliberately absent.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SetupFlags: u32 {
        /// Size the completion queue from `RingConfig::cq_entries`.
        const CQSIZE = sys::IORING_SETUP_CQSIZE;
        /// Clamp oversized entry counts instead of failing with `EINVAL`.
        const CLAMP = sys::IORING_SETUP_CLAMP;
    }
}

bitflags! {
    /// `IORING_ENTER_*` flags for [`RingAccessor::enter`](crate::RingAccessor::enter).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnterFlags: u32 {
        /// Wait for `min_complete` completions before returning.
        const GETEVENTS = sys::IORING_ENTER_GETEVENTS;
    }
}

bitflags! {
    /// `IORING_SQ_*` bits the kernel publishes in the SQ flags word.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SqRingFlags: u32 {
        const NEED_WAKEUP = sys::IORING_SQ_NEED_WAKEUP;
        /// Completions were held back because the CQ was full.
        const CQ_OVERFLOW = sys::IORING_SQ_CQ_OVERFLOW;
        const TASKRUN = sys::IORING_SQ_TASKRUN;
    }
}
