//! Memfile error types

use crate::block::BlockNr;
use crate::crypt::CryptError;
use std::path::PathBuf;
use swap_device::SwapError;
use thiserror::Error;

/// Result alias for memfile operations
pub type Result<T> = std::result::Result<T, MemfileError>;

/// Errors that can occur when operating on a memfile
#[derive(Debug, Error)]
pub enum MemfileError {
    /// Block number outside `(blocknr_min, blocknr_max)`
    #[error("block {0} is out of range")]
    OutOfRange(BlockNr),

    /// Block is neither resident nor inside the swap file
    #[error("block {0} is not resident and not in the swap file")]
    NotInFile(BlockNr),

    /// Operation needs a swap file and there is none
    #[error("no swap file")]
    NoSwapFile,

    /// Read from the swap file failed
    #[error("read error in swap file (block {nr}): {source}")]
    Read {
        nr: BlockNr,
        #[source]
        source: SwapError,
    },

    /// Write to the swap file failed
    #[error("write error in swap file (block {nr}): {source}")]
    Write {
        nr: BlockNr,
        #[source]
        source: SwapError,
    },

    /// fsync of the swap file failed
    #[error("error flushing swap file: {0}")]
    Flush(#[source] SwapError),

    /// Swap file creation target already exists
    #[error("swap file already exists (symlink attack?): {0}")]
    SwapExists(PathBuf),

    /// Swap file could not be opened
    #[error("cannot open swap file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: SwapError,
    },

    /// Allocation of a payload, header or record failed
    #[error("out of memory")]
    OutOfMemory,

    /// A block must span at least one page
    #[error("invalid page count: {0}")]
    InvalidPageCount(u32),

    /// Page size of zero
    #[error("invalid page size: {0}")]
    InvalidPageSize(u32),

    /// Encryption hook failed
    #[error("encryption error: {0}")]
    Crypt(#[from] CryptError),

    /// Block handle refers to a block that is no longer resident
    #[error("stale block handle")]
    StaleHandle,
}

impl MemfileError {
    /// Whether the error came from the swap device
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            MemfileError::Read { .. }
                | MemfileError::Write { .. }
                | MemfileError::Flush(_)
                | MemfileError::Open { .. }
        )
    }
}
