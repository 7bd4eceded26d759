//! Block numbers, block flags and the resident block itself.

use crate::error::{MemfileError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block number inside a memfile.
///
/// Non-negative numbers are page positions in the swap file
/// (`offset = nr * page_size`). Negative numbers name blocks that live in
/// memory only and have no file position yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNr(pub i64);

impl BlockNr {
    /// Returns true for a memory-only (negative) number
    pub fn is_transient(self) -> bool {
        self.0 < 0
    }

    /// Returns true for a number with a file position
    pub fn is_durable(self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this block in a file with `page_size` pages
    pub fn offset(self, page_size: u32) -> Option<u64> {
        u64::try_from(self.0)
            .ok()?
            .checked_mul(u64::from(page_size))
    }
}

impl fmt::Display for BlockNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BlockNr {
    fn from(nr: i64) -> Self {
        Self(nr)
    }
}

bitflags! {
    /// State of a resident block
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// Contents differ from what is in the swap file
        const DIRTY = 1;
        /// Checked out by a caller; never evicted or recycled
        const LOCKED = 2;
    }
}

/// A block header plus its payload.
///
/// The payload is always `page_size * page_count` bytes.
#[derive(Debug)]
pub struct Block {
    nr: BlockNr,
    page_count: u32,
    flags: BlockFlags,
    data: Vec<u8>,
}

fn payload_len(page_size: u32, page_count: u32) -> Result<usize> {
    if page_count == 0 {
        return Err(MemfileError::InvalidPageCount(page_count));
    }
    usize::try_from(u64::from(page_size) * u64::from(page_count))
        .map_err(|_| MemfileError::OutOfMemory)
}

fn alloc_payload(len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| MemfileError::OutOfMemory)?;
    data.resize(len, 0);
    Ok(data)
}

impl Block {
    /// Allocates a header and a zeroed payload for `page_count` pages
    pub(crate) fn alloc(page_size: u32, page_count: u32) -> Result<Self> {
        let data = alloc_payload(payload_len(page_size, page_count)?)?;
        Ok(Self {
            nr: BlockNr(0),
            page_count,
            flags: BlockFlags::empty(),
            data,
        })
    }

    /// Reallocates the payload for a different page count, keeping the header
    pub(crate) fn realloc(&mut self, page_size: u32, page_count: u32) -> Result<()> {
        let len = payload_len(page_size, page_count)?;
        // Drop the old buffer before allocating the new one.
        self.data = Vec::new();
        self.data = alloc_payload(len)?;
        self.page_count = page_count;
        Ok(())
    }

    /// Resizes the payload in place after a page size correction
    pub(crate) fn resize_pages(&mut self, page_size: u32) -> Result<()> {
        let len = payload_len(page_size, self.page_count)?;
        if len > self.data.len() {
            self.data
                .try_reserve_exact(len - self.data.len())
                .map_err(|_| MemfileError::OutOfMemory)?;
        }
        self.data.resize(len, 0);
        Ok(())
    }

    /// Block number
    pub fn nr(&self) -> BlockNr {
        self.nr
    }

    /// Size in pages
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Current flags
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Whether the block is checked out
    pub fn is_locked(&self) -> bool {
        self.flags.contains(BlockFlags::LOCKED)
    }

    /// Whether the block must still be written
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(BlockFlags::DIRTY)
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload bytes; remember to `put_block` with `dirty = true`
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn set_nr(&mut self, nr: BlockNr) {
        self.nr = nr;
    }

    pub(crate) fn set_flags(&mut self, flags: BlockFlags) {
        self.flags = flags;
    }

    pub(crate) fn insert_flags(&mut self, flags: BlockFlags) {
        self.flags.insert(flags);
    }

    pub(crate) fn remove_flags(&mut self, flags: BlockFlags) {
        self.flags.remove(flags);
    }

    pub(crate) fn zero(&mut self) {
        self.data.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_nr_kinds() {
        assert!(BlockNr(-1).is_transient());
        assert!(!BlockNr(-1).is_durable());
        assert!(BlockNr(0).is_durable());
        assert_eq!(BlockNr(3).offset(1024), Some(3072));
        assert_eq!(BlockNr(-3).offset(1024), None);
    }

    #[test]
    fn test_alloc_is_zeroed() {
        let block = Block::alloc(1024, 3).expect("alloc");
        assert_eq!(block.data().len(), 3072);
        assert!(block.data().iter().all(|b| *b == 0));
        assert_eq!(block.page_count(), 3);
        assert!(block.flags().is_empty());
    }

    #[test]
    fn test_alloc_rejects_zero_pages() {
        assert!(matches!(
            Block::alloc(1024, 0),
            Err(MemfileError::InvalidPageCount(0))
        ));
    }

    #[test]
    fn test_realloc_changes_size() {
        let mut block = Block::alloc(1024, 1).expect("alloc");
        block.data_mut().fill(0xaa);
        block.realloc(1024, 2).expect("realloc");
        assert_eq!(block.page_count(), 2);
        assert_eq!(block.data().len(), 2048);
    }

    #[test]
    fn test_resize_pages_keeps_prefix() {
        let mut block = Block::alloc(1024, 2).expect("alloc");
        block.data_mut()[0] = 7;
        block.resize_pages(2048).expect("grow");
        assert_eq!(block.data().len(), 4096);
        assert_eq!(block.data()[0], 7);
        block.resize_pages(512).expect("shrink");
        assert_eq!(block.data().len(), 1024);
    }

    #[test]
    fn test_flags() {
        let mut block = Block::alloc(1024, 1).expect("alloc");
        block.set_flags(BlockFlags::LOCKED | BlockFlags::DIRTY);
        assert!(block.is_locked());
        assert!(block.is_dirty());
        block.remove_flags(BlockFlags::LOCKED);
        assert!(!block.is_locked());
        block.insert_flags(BlockFlags::LOCKED);
        assert!(block.is_locked());
    }
}
