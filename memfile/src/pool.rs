//! Block arena and the used list.
//!
//! Resident blocks live in slots of a slab. The used list is threaded
//! through the slots by index, most recently used first. Handles carry a
//! generation so a handle to a block that has since been evicted or freed
//! no longer resolves.

use crate::block::Block;
use crate::hashtab::EntryId;
use serde::{Deserialize, Serialize};

/// Handle to a resident block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    index: usize,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    prev: Option<usize>,
    next: Option<usize>,
    hash: Option<EntryId>,
    block: Option<Block>,
}

/// Slab of resident blocks plus the MRU-first used list
#[derive(Debug, Default)]
pub(crate) struct BlockPool {
    slots: Vec<Slot>,
    vacant: Vec<usize>,
    first: Option<usize>,
    last: Option<usize>,
    used_pages: u64,
    len: usize,
}

impl BlockPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pages held by blocks on the used list
    pub(crate) fn used_pages(&self) -> u64 {
        self.used_pages
    }

    /// Number of resident blocks
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn slot(&self, id: BlockId) -> Option<&Slot> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation && s.block.is_some())
    }

    fn slot_mut(&mut self, id: BlockId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation && s.block.is_some())
    }

    fn handle(&self, index: usize) -> BlockId {
        BlockId {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Whether `id` still names a resident block
    pub(crate) fn contains(&self, id: BlockId) -> bool {
        self.slot(id).is_some()
    }

    pub(crate) fn get(&self, id: BlockId) -> Option<&Block> {
        self.slot(id)?.block.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.slot_mut(id)?.block.as_mut()
    }

    pub(crate) fn hash_entry(&self, id: BlockId) -> Option<EntryId> {
        self.slot(id)?.hash
    }

    pub(crate) fn set_hash_entry(&mut self, id: BlockId, entry: Option<EntryId>) {
        if let Some(slot) = self.slot_mut(id) {
            slot.hash = entry;
        }
    }

    /// Stores `block` and links it at the front of the used list
    pub(crate) fn insert_front(&mut self, block: Block) -> BlockId {
        let pages = u64::from(block.page_count());
        let index = match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.block = Some(block);
                slot.hash = None;
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    prev: None,
                    next: None,
                    hash: None,
                    block: Some(block),
                });
                self.slots.len() - 1
            }
        };
        self.link_front(index);
        self.used_pages += pages;
        self.len += 1;
        self.handle(index)
    }

    /// Unlinks the block from the used list and hands it back
    pub(crate) fn take(&mut self, id: BlockId) -> Option<Block> {
        self.slot(id)?;
        self.unlink(id.index);
        let slot = &mut self.slots[id.index];
        let block = slot.block.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.hash = None;
        self.vacant.push(id.index);
        self.used_pages -= u64::from(block.page_count());
        self.len -= 1;
        Some(block)
    }

    /// Moves the block to the front of the used list
    pub(crate) fn move_to_front(&mut self, id: BlockId) {
        if self.slot(id).is_none() || self.first == Some(id.index) {
            return;
        }
        self.unlink(id.index);
        self.link_front(id.index);
    }

    /// Most recently used block
    pub(crate) fn first(&self) -> Option<BlockId> {
        self.first.map(|i| self.handle(i))
    }

    /// Least recently used block
    pub(crate) fn last(&self) -> Option<BlockId> {
        self.last.map(|i| self.handle(i))
    }

    /// Next more recently used block
    pub(crate) fn prev(&self, id: BlockId) -> Option<BlockId> {
        self.slot(id)?.prev.map(|i| self.handle(i))
    }

    /// Next less recently used block
    pub(crate) fn next(&self, id: BlockId) -> Option<BlockId> {
        self.slot(id)?.next.map(|i| self.handle(i))
    }

    /// Handles from most to least recently used
    pub(crate) fn iter_mru(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.first(), move |id| self.next(*id))
    }

    /// Handles from least to most recently used
    pub(crate) fn iter_lru(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.last(), move |id| self.prev(*id))
    }

    fn link_front(&mut self, index: usize) {
        let old_first = self.first;
        {
            let slot = &mut self.slots[index];
            slot.prev = None;
            slot.next = old_first;
        }
        match old_first {
            Some(f) => self.slots[f].prev = Some(index),
            None => self.last = Some(index),
        }
        self.first = Some(index);
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = &self.slots[index];
            (slot.prev, slot.next)
        };
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.last = prev,
        }
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.first = next,
        }
        let slot = &mut self.slots[index];
        slot.prev = None;
        slot.next = None;
    }
}
