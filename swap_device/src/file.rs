//! File-backed swap device.
//!
//! Creation is exclusive: if anything already exists at the target path
//! (a stale swap file, or a symlink planted to redirect our writes) the
//! create is refused before `open` is ever called. Existing swap files are
//! opened for recovery without following symlinks.

use crate::{end_offset, FlushMode, SwapDevice, SwapError};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

/// Swap file permissions: owner read/write only
const SWAP_FILE_MODE: u32 = 0o600;

/// Swap device on a regular file, using positional (`pread`/`pwrite`) I/O
#[derive(Debug)]
pub struct FileSwap {
    file: File,
    path: PathBuf,
    len: u64,
    writable: bool,
}

impl FileSwap {
    /// Creates a brand-new swap file at `path`.
    ///
    /// Fails with [`SwapError::AlreadyExists`] if any directory entry exists
    /// at `path`, including a dangling symlink.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SwapError> {
        let path = path.as_ref();
        if let Ok(meta) = std::fs::symlink_metadata(path) {
            return Err(SwapError::AlreadyExists {
                path: path.to_path_buf(),
                symlink: meta.file_type().is_symlink(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(SWAP_FILE_MODE)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path)?;
        tracing::debug!(path = %path.display(), "created swap file");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len: 0,
            writable: true,
        })
    }

    /// Opens an existing swap file, read-write if possible, read-only otherwise.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, SwapError> {
        let path = path.as_ref();
        if std::fs::symlink_metadata(path)?.file_type().is_symlink() {
            return Err(SwapError::Symlink(path.to_path_buf()));
        }

        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path)
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NOFOLLOW)
                    .open(path)
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            writable,
        })
    }

    /// Whether writes are permitted
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl SwapDevice for FileSwap {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SwapError> {
        let end = end_offset(offset, buf.len())?;
        if end > self.len {
            return Err(SwapError::ShortRead {
                offset,
                wanted: buf.len(),
                available: self.len.saturating_sub(offset),
            });
        }
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), SwapError> {
        if !self.writable {
            return Err(SwapError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )));
        }
        let end = end_offset(offset, buf.len())?;
        self.file.write_all_at(buf, offset)?;
        self.len = self.len.max(end);
        Ok(())
    }

    fn flush(&mut self, mode: FlushMode) -> Result<(), SwapError> {
        match mode {
            FlushMode::Full => self.file.sync_all()?,
            FlushMode::Data => self.file.sync_data()?,
        }
        Ok(())
    }

    fn preferred_page_size(&self) -> Option<u32> {
        let blksize = self.file.metadata().ok()?.blksize();
        u32::try_from(blksize).ok()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
