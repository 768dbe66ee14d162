//! File-backed fixture for driving the ring with real read/write requests.
//!
//! A [`TestFile`] is a scratch file plus a set of block-aligned buffers
//! covering its current size. The buffers are described by `iovec`s that can
//! be handed straight to a vectored request; they are owned by the fixture
//! and stay allocated until it is dropped or rebuilt.

use std::alloc::{alloc_zeroed, dealloc, Layout, LayoutError};
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::ptr::NonNull;
use nix::errno::Errno;
use tempfile::NamedTempFile;
use thiserror::Error;
use log::{debug, info, warn};

use crate::error::RingError;
use crate::ring::{RingAccessor, RingConfig};

/// Size and alignment of every fixture buffer.
pub const BLOCK_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Fixture I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid block layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("Failed to allocate a {0}-byte aligned block")]
    AllocationFailed(usize),
}

/// One zeroed, `BLOCK_SIZE`-aligned heap buffer.
pub struct AlignedBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBlock {
    pub fn new() -> Result<Self, FixtureError> {
        let layout = Layout::from_size_align(BLOCK_SIZE, BLOCK_SIZE)?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(FixtureError::AllocationFailed(layout.size()))?;

        Ok(Self { ptr, layout })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Describes the first `len` bytes of the block.
    pub fn as_iovec(&self, len: usize) -> libc::iovec {
        libc::iovec {
            iov_base: self.ptr.as_ptr().cast(),
            iov_len: len.min(self.layout.size()),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block owns `layout.size()` initialised (zeroed) bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Aligned buffers covering `file_size` bytes, one `iovec` per block.
pub struct FileBlocks {
    blocks: Vec<AlignedBlock>,
    iovecs: Vec<libc::iovec>,
    file_size: u64,
}

impl FileBlocks {
    pub fn for_size(file_size: u64) -> Result<Self, FixtureError> {
        let mut remaining = file_size as usize;
        let count = remaining.div_ceil(BLOCK_SIZE);
        let mut blocks = Vec::with_capacity(count);
        let mut iovecs = Vec::with_capacity(count);

        while remaining > 0 {
            let len = remaining.min(BLOCK_SIZE);
            let block = AlignedBlock::new()?;
            iovecs.push(block.as_iovec(len));
            blocks.push(block);
            remaining -= len;
        }

        Ok(Self { blocks, iovecs, file_size })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iovecs(&self) -> &[libc::iovec] {
        &self.iovecs
    }

    /// Concatenated bytes the iovecs describe.
    pub fn contents(&self) -> Vec<u8> {
        self.blocks
            .iter()
            .zip(&self.iovecs)
            .flat_map(|(block, iov)| block.as_slice()[..iov.iov_len].iter().copied())
            .collect()
    }
}

/// Scratch file removed on drop, plus the blocks describing its contents.
pub struct TestFile {
    file: NamedTempFile,
    write_offset: u64,
    blocks: Option<FileBlocks>,
}

impl TestFile {
    /// Creates an empty scratch file.
    pub fn empty() -> Result<Self, FixtureError> {
        let file = NamedTempFile::new()?;
        info!("Fixture file created at {} (fd: {})", file.path().display(), file.as_file().as_raw_fd());
        Ok(Self { file, write_offset: 0, blocks: None })
    }

    /// Creates a scratch file holding `text`.
    pub fn with_contents(text: &[u8]) -> Result<Self, FixtureError> {
        let mut file = Self::empty()?;
        file.append(text)?;
        Ok(file)
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_file().as_raw_fd()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Appends `text` at the current write offset and rebuilds the blocks.
    ///
    /// The previous blocks are freed, so no request may still reference them.
    pub fn append(&mut self, text: &[u8]) -> Result<(), FixtureError> {
        self.file.as_file().write_all_at(text, self.write_offset)?;
        self.write_offset += text.len() as u64;
        self.blocks = Some(FileBlocks::for_size(self.file_size()?)?);
        debug!("Fixture now {} bytes", self.write_offset);
        Ok(())
    }

    pub fn file_size(&self) -> Result<u64, FixtureError> {
        Ok(self.file.as_file().metadata()?.len())
    }

    /// Blocks covering the file, built on first use.
    pub fn blocks(&mut self) -> Result<&FileBlocks, FixtureError> {
        let blocks = match self.blocks.take() {
            Some(blocks) => blocks,
            None => FileBlocks::for_size(self.file_size()?)?,
        };
        Ok(self.blocks.insert(blocks))
    }

    /// Reads the whole file back with ordinary I/O.
    pub fn read_back(&self) -> Result<Vec<u8>, FixtureError> {
        Ok(fs::read(self.file.path())?)
    }
}

/// Opens a ring, or `Ok(None)` when io_uring is unavailable to this process
/// (kernel without io_uring, sysctl `io_uring_disabled`, seccomp filters).
pub fn ring_if_supported(config: &RingConfig) -> Result<Option<RingAccessor>, RingError> {
    match RingAccessor::with_config(config) {
        Ok(ring) => Ok(Some(ring)),
        Err(RingError::Setup(errno @ (Errno::ENOSYS | Errno::EPERM | Errno::EACCES))) => {
            warn!("io_uring unavailable: {}", errno);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
