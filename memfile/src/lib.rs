//! # Memfile
//!
//! A paged block store: virtual memory over a swap file.
//!
//! ## Philosophy
//!
//! - **Never lose an edit**: a write failure keeps the block dirty and
//!   resident; the memory budget yields before data does
//! - **No holes**: the swap file only ever grows contiguously
//! - **Explicit shared state**: memory accounting lives in a [`MemContext`]
//!   handed to every memfile, not in globals
//! - **Handles, not pointers**: callers hold [`BlockId`]s between
//!   `get`/`new` and `put`/`free`
//!
//! ## Block numbers
//!
//! Non-negative numbers are page positions in the swap file. Negative
//! numbers name memory-only blocks; they receive a file position the first
//! time they must be written, and the old number can be resolved once with
//! [`Memfile::consume_translation`].
//!
//! ## Example
//!
//! ```ignore
//! use memfile::{MemContext, Memfile, OpenMode, SyncFlags, NoInput};
//! use swap_device::RamSwap;
//!
//! let ctx = MemContext::with_defaults();
//! let mut mf = Memfile::open_device(ctx, Box::new(RamSwap::new()), OpenMode::Create);
//!
//! let id = mf.new_block(false, 1)?;
//! mf.data_mut(id).unwrap()[..5].copy_from_slice(b"hello");
//! mf.put_block(id, true, true);
//! mf.sync(SyncFlags::ALL, &mut NoInput)?;
//! ```

pub mod block;
pub mod context;
pub mod crypt;
pub mod error;
pub mod free_list;
pub mod hashtab;
mod io;
#[allow(clippy::module_inception)]
pub mod memfile;
pub mod options;
pub mod pool;
pub mod release;
pub mod sync;
pub mod translate;

pub use block::{Block, BlockFlags, BlockNr};
pub use context::MemContext;
pub use crypt::{BlockCrypt, CryptError, KeystreamCrypt};
pub use error::{MemfileError, Result};
pub use free_list::FreeRange;
pub use hashtab::BucketTable;
pub use memfile::{
    Memfile, MemfileStats, OpenMode, SwapProvider, SwapTarget, MAX_SWAP_PAGE_SIZE,
    MEMFILE_PAGE_SIZE, MIN_SWAP_PAGE_SIZE,
};
pub use options::{MemOptions, OptionsError, SwapSync};
pub use pool::BlockId;
pub use release::release_all;
pub use sync::{InputCheck, NoInput, SyncFlags, SyncStats};
