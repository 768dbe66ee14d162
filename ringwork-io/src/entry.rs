//! Builders for the fixed-size request descriptors and accessors for results.
//!
//! Building a descriptor is safe; handing it to the kernel is not. The
//! buffers named here must stay valid until the matching completion has been
//! reaped (see [`RingAccessor::store_submission_tail`](crate::RingAccessor::store_submission_tail)).

use std::os::fd::RawFd;
use nix::errno::Errno;

use crate::sys::{self, CompletionEntry, SubmissionEntry};

impl SubmissionEntry {
    pub fn nop() -> Self {
        Self { opcode: sys::IORING_OP_NOP, ..Default::default() }
    }

    pub fn read(fd: RawFd, buf: *mut u8, len: u32, offset: u64) -> Self {
        Self::rw(sys::IORING_OP_READ, fd, buf as u64, len, offset)
    }

    pub fn write(fd: RawFd, buf: *const u8, len: u32, offset: u64) -> Self {
        Self::rw(sys::IORING_OP_WRITE, fd, buf as u64, len, offset)
    }

    /// Scatter read into `count` iovecs starting at `iovecs`.
    pub fn readv(fd: RawFd, iovecs: *const libc::iovec, count: u32, offset: u64) -> Self {
        Self::rw(sys::IORING_OP_READV, fd, iovecs as u64, count, offset)
    }

    /// Gather write from `count` iovecs starting at `iovecs`.
    pub fn writev(fd: RawFd, iovecs: *const libc::iovec, count: u32, offset: u64) -> Self {
        Self::rw(sys::IORING_OP_WRITEV, fd, iovecs as u64, count, offset)
    }

    fn rw(opcode: u8, fd: RawFd, addr: u64, len: u32, offset: u64) -> Self {
        Self { opcode, fd, addr, len, off: offset, ..Default::default() }
    }

    /// Tag echoed back in the completion for this request.
    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }
}

impl CompletionEntry {
    /// The operation's result: a byte count or similar on success, the
    /// kernel's errno on failure.
    pub fn result(&self) -> Result<u32, Errno> {
        if self.res < 0 {
            Err(Errno::from_i32(-self.res))
        } else {
            Ok(self.res as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_descriptor_carries_buffer_and_offset() {
        let data = b"hello world";
        let sqe = SubmissionEntry::write(5, data.as_ptr(), data.len() as u32, 512).with_user_data(7);

        assert_eq!(sqe.opcode, sys::IORING_OP_WRITE);
        assert_eq!(sqe.fd, 5);
        assert_eq!(sqe.addr, data.as_ptr() as u64);
        assert_eq!(sqe.len, 11);
        assert_eq!(sqe.off, 512);
        assert_eq!(sqe.user_data, 7);
        assert_eq!(sqe.flags, 0);
    }

    #[test]
    fn vectored_length_counts_iovecs() {
        let iovecs = [libc::iovec { iov_base: std::ptr::null_mut(), iov_len: 0 }; 3];
        let sqe = SubmissionEntry::readv(3, iovecs.as_ptr(), 3, 0);
        assert_eq!(sqe.opcode, sys::IORING_OP_READV);
        assert_eq!(sqe.len, 3);
    }

    #[test]
    fn negative_result_decodes_to_errno() {
        let cqe = CompletionEntry { user_data: 1, res: -libc::EINVAL, flags: 0 };
        assert_eq!(cqe.result(), Err(Errno::EINVAL));

        let cqe = CompletionEntry { user_data: 1, res: 11, flags: 0 };
        assert_eq!(cqe.result(), Ok(11));
    }
}
