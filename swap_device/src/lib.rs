//! # Swap Device
//!
//! The byte-addressed backing store under a memfile.
//!
//! ## Philosophy
//!
//! **The block store never touches the filesystem directly.**
//!
//! All persistence goes through the [`SwapDevice`] trait, so the store can run
//! against a real swap file, an in-memory device, or a device that fails on
//! purpose. Offsets are absolute byte positions; the caller owns the page
//! arithmetic.
//!
//! ## Implementations
//!
//! - [`FileSwap`]: a swap file created exclusively, never through a symlink
//! - [`RamSwap`]: shared in-memory bytes, survives "reopen" within a process
//! - [`FailingSwap`]: wraps any device and injects failures per [`FailurePolicy`]

pub mod failing;
#[cfg(unix)]
pub mod file;
pub mod ram;

pub use failing::{FailingSwap, FailureControl, FailurePolicy};
#[cfg(unix)]
pub use file::FileSwap;
pub use ram::RamSwap;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by a swap device
#[derive(Debug, Error)]
pub enum SwapError {
    /// The device holds fewer bytes than the read asked for
    #[error("short read at offset {offset}: wanted {wanted} bytes, {available} available")]
    ShortRead {
        offset: u64,
        wanted: usize,
        available: u64,
    },

    /// Creation target already exists (possibly a planted symlink)
    #[error("swap file already exists: {path}")]
    AlreadyExists { path: PathBuf, symlink: bool },

    /// Refused to open a path that is a symbolic link
    #[error("refusing to open symlink: {0}")]
    Symlink(PathBuf),

    /// Offset arithmetic overflowed
    #[error("offset overflow: offset={offset} len={len}")]
    OffsetOverflow { offset: u64, len: usize },

    /// Failure injected by [`FailingSwap`]
    #[error("injected failure at offset {offset}")]
    Injected { offset: u64 },

    /// Underlying OS error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How hard a flush should try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush file data and metadata (fsync)
    Full,
    /// Flush file data only (fdatasync)
    Data,
}

/// Byte-addressed backing store for swapped-out blocks.
///
/// Reads must fill the whole buffer or fail. Writes past the current end
/// extend the device.
pub trait SwapDevice {
    /// Current length in bytes
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes starting at `offset`
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SwapError>;

    /// Write all of `buf` starting at `offset`
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), SwapError>;

    /// Flush pending writes to stable storage
    fn flush(&mut self, _mode: FlushMode) -> Result<(), SwapError> {
        Ok(())
    }

    /// Block size reported by the underlying filesystem, if any
    fn preferred_page_size(&self) -> Option<u32> {
        None
    }

    /// Path of the backing file, if the device has one
    fn path(&self) -> Option<&Path> {
        None
    }
}

impl<D: SwapDevice + ?Sized> SwapDevice for Box<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SwapError> {
        (**self).read_exact_at(offset, buf)
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), SwapError> {
        (**self).write_all_at(offset, buf)
    }

    fn flush(&mut self, mode: FlushMode) -> Result<(), SwapError> {
        (**self).flush(mode)
    }

    fn preferred_page_size(&self) -> Option<u32> {
        (**self).preferred_page_size()
    }

    fn path(&self) -> Option<&Path> {
        (**self).path()
    }
}

/// End offset of an access, or an error if it does not fit in `u64`
pub(crate) fn end_offset(offset: u64, len: usize) -> Result<u64, SwapError> {
    u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .ok_or(SwapError::OffsetOverflow { offset, len })
}
