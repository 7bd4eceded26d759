//! Transient to durable block number translation.
//!
//! A transient (negative) block gets a durable number the first time it
//! must be in the file. The old number is remembered until the owner of
//! the reference resolves it once with [`Memfile::consume_translation`].

use crate::block::{Block, BlockNr};
use crate::error::{MemfileError, Result};
use crate::hashtab::BucketTable;
use crate::memfile::Memfile;
use crate::pool::BlockId;

/// Old number to new number records, keyed by the old number
#[derive(Debug, Default)]
pub(crate) struct Translations {
    table: BucketTable<BlockNr>,
}

impl Translations {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    fn add(&mut self, old: BlockNr, new: BlockNr) {
        self.table.add(old.0, new);
    }

    fn take(&mut self, old: BlockNr) -> Option<BlockNr> {
        let entry = self.table.find(old.0)?;
        self.table.remove(entry)
    }
}

impl Memfile {
    /// Gives a transient block a durable number and records the mapping.
    ///
    /// Does nothing for a block that already has a durable number.
    pub fn add_translation(&mut self, id: BlockId) -> Result<()> {
        let (old, page_count) = self
            .pool
            .get(id)
            .map(|b: &Block| (b.nr(), b.page_count()))
            .ok_or(MemfileError::StaleHandle)?;
        if old.is_durable() {
            return Ok(());
        }

        let new = match self.free.take(page_count) {
            Some(nr) => nr,
            None => {
                let nr = BlockNr(self.blocknr_max);
                self.blocknr_max += i64::from(page_count);
                nr
            }
        };

        self.rem_hash(id);
        if let Some(block) = self.pool.get_mut(id) {
            block.set_nr(new);
        }
        self.ins_hash(id);
        self.trans.add(old, new);
        tracing::debug!(%old, %new, "block number translated");
        Ok(())
    }

    /// Resolves a transient number once.
    ///
    /// Returns the durable number and forgets the mapping, or `old` unchanged
    /// if there is no mapping.
    pub fn consume_translation(&mut self, old: BlockNr) -> BlockNr {
        match self.trans.take(old) {
            Some(new) => {
                self.neg_count = self.neg_count.saturating_sub(1);
                new
            }
            None => old,
        }
    }

    /// True if there is a swap file and transient references are outstanding
    pub fn has_pending_translations(&self) -> bool {
        self.device.is_some() && self.neg_count > 0
    }
}
