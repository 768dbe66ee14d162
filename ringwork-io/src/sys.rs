//! Kernel ABI for `io_uring`.
//!
//! Mirrors the structures of `<linux/io_uring.h>` that the ring needs and
//! issues the two io_uring syscalls through `libc::syscall`, since libc
//! exposes the syscall numbers but no wrappers.

use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, AsRawFd, RawFd};
use std::ptr;
use nix::errno::Errno;
use nix::sys::signal::SigSet;

/// mmap offset of the submission queue ring (head, tail, mask, index array).
pub const IORING_OFF_SQ_RING: libc::off_t = 0;
/// mmap offset of the completion queue ring (head, tail, mask, CQE array).
pub const IORING_OFF_CQ_RING: libc::off_t = 0x0800_0000;
/// mmap offset of the SQE array.
pub const IORING_OFF_SQES: libc::off_t = 0x1000_0000;

pub const IORING_SETUP_CQSIZE: u32 = 1 << 3;
pub const IORING_SETUP_CLAMP: u32 = 1 << 4;

pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;

pub const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;
pub const IORING_SQ_CQ_OVERFLOW: u32 = 1 << 1;
pub const IORING_SQ_TASKRUN: u32 = 1 << 2;

pub const IORING_OP_NOP: u8 = 0;
pub const IORING_OP_READV: u8 = 1;
pub const IORING_OP_WRITEV: u8 = 2;
pub const IORING_OP_READ: u8 = 22;
pub const IORING_OP_WRITE: u8 = 23;

/// Size of the kernel's `sigset_t` (`_NSIG / 8`). glibc's `sigset_t` is 128
/// bytes and is rejected by `io_uring_enter` with `EINVAL`.
const KERNEL_SIGSET_SIZE: usize = 8;

/// `io_sqring_offsets`: byte offsets of the SQ fields inside the SQ mapping.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

/// `io_cqring_offsets`: byte offsets of the CQ fields inside the CQ mapping.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

/// `io_uring_params`: filled in partly by the caller (flags, `cq_entries`
/// with `IORING_SETUP_CQSIZE`) and completed by `io_uring_setup`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoUringParams {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: SqRingOffsets,
    pub cq_off: CqRingOffsets,
}

/// `io_uring_sqe`: one request descriptor in the SQE array.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionEntry {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub op_flags: u32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub pad: [u64; 2],
}

/// `io_uring_cqe`: one result record in the CQE array.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEntry {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

const _: () = assert!(std::mem::size_of::<SqRingOffsets>() == 40);
const _: () = assert!(std::mem::size_of::<CqRingOffsets>() == 40);
const _: () = assert!(std::mem::size_of::<IoUringParams>() == 120);
const _: () = assert!(std::mem::size_of::<SubmissionEntry>() == 64);
const _: () = assert!(std::mem::size_of::<CompletionEntry>() == 16);

/// Creates an io_uring context with `entries` submission slots.
///
/// On success the kernel has written the ring geometry into `params`.
pub fn io_uring_setup(entries: u32, params: &mut IoUringParams) -> Result<OwnedFd, Errno> {
    // SAFETY: `params` is an exclusively borrowed, correctly laid out
    // io_uring_params that outlives the call.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_setup,
            entries as libc::c_uint,
            params as *mut IoUringParams,
        )
    };

    if ret < 0 {
        return Err(Errno::last());
    }

    // SAFETY: a non-negative return is a fresh descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(ret as RawFd) })
}

/// Issues exactly one `io_uring_enter` call.
///
/// `sig`, when present, replaces the thread's signal mask for the duration
/// of the wait.
pub fn io_uring_enter(
    fd: BorrowedFd<'_>,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
    sig: Option<&SigSet>,
) -> Result<u32, Errno> {
    let (argp, argsz) = match sig {
        Some(set) => {
            let raw: &libc::sigset_t = set.as_ref();
            (raw as *const libc::sigset_t as *const libc::c_void, KERNEL_SIGSET_SIZE)
        }
        None => (ptr::null(), 0),
    };

    // SAFETY: `argp` is null or points at a live sigset for the whole call;
    // the kernel reads at most `argsz` bytes from it.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_enter,
            fd.as_raw_fd() as libc::c_uint,
            to_submit as libc::c_uint,
            min_complete as libc::c_uint,
            flags as libc::c_uint,
            argp,
            argsz as libc::size_t,
        )
    };

    if ret < 0 {
        return Err(Errno::last());
    }

    Ok(ret as u32)
}
