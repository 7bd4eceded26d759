//! Eviction.
//!
//! A memfile evicts when a new block would push its own resident pages past
//! its budget or the process total reaches the ceiling. Without a swap file there is nowhere
//! to spill, so the budget is advisory: eviction silently does nothing and
//! callers allocate anyway.

use crate::block::Block;
use crate::memfile::{Memfile, SwapTarget};
use message_log::LogEntry;

impl Memfile {
    fn over_budget(&self, page_count: u32) -> bool {
        self.pool.used_pages() + u64::from(page_count) > self.used_count_max
    }

    fn need_release(&self, page_count: u32) -> bool {
        self.over_budget(page_count) || self.ctx.over_ceiling()
    }

    /// Writes back and unlinks the least recently used unlocked block
    fn evict_lru(&mut self) -> Option<Block> {
        let victim = self
            .pool
            .iter_lru()
            .find(|id| self.pool.get(*id).is_some_and(|b| !b.is_locked()))?;
        let dirty = self.pool.get(victim).is_some_and(Block::is_dirty);
        // A block whose write failed stays resident.
        if dirty && self.write(victim).is_err() {
            return None;
        }
        self.rem_hash(victim);
        let block = self.rem_used(victim)?;
        tracing::debug!(nr = %block.nr(), "evicted block");
        Some(block)
    }

    /// Makes room for a block of `page_count` pages.
    ///
    /// Evicts least recently used unlocked blocks until the new block fits
    /// the per-file budget, or one block if only the process ceiling is
    /// reached. The first evicted block comes back resized to `page_count`
    /// pages so the caller can reuse it.
    pub(crate) fn release(&mut self, page_count: u32) -> Option<Block> {
        if self.ctx.dont_release() {
            return None;
        }
        let need = self.need_release(page_count);

        if self.device.is_none() && need && self.ctx.options().updatecount > 0 {
            self.open_swap_lazily();
        }
        if self.device.is_none() || !need {
            return None;
        }

        let mut block = self.evict_lru()?;
        while self.over_budget(page_count) {
            if self.evict_lru().is_none() {
                break;
            }
        }
        if block.page_count() != page_count && block.realloc(self.page_size, page_count).is_err() {
            return None;
        }
        Some(block)
    }

    /// Asks the swap provider for a swap file. Tried at most once.
    pub(crate) fn open_swap_lazily(&mut self) {
        if !self.may_swap {
            return;
        }
        let target = self.swap_provider.as_mut().and_then(|p| p.swap_target());
        self.may_swap = false;

        let opened = match target {
            Some(SwapTarget::Path(path)) => self.open_file(path).is_ok(),
            Some(SwapTarget::Device(device)) => {
                self.attach_device(device);
                true
            }
            None => false,
        };
        if opened {
            tracing::debug!(fname = ?self.fname, "created swap file under memory pressure");
            self.set_dirty();
        } else {
            self.ctx.record(
                LogEntry::error("E303: Unable to open swap file, recovery impossible")
                    .with_source(self.id),
            );
        }
    }

    /// Evicts every unlocked block that can be written.
    ///
    /// Returns true if anything was evicted.
    pub fn release_unlocked(&mut self) -> bool {
        if self.device.is_none() && self.may_swap {
            self.open_swap_lazily();
        }
        if self.device.is_none() {
            return false;
        }

        let mut released = false;
        let mut cursor = self.pool.last();
        while let Some(id) = cursor {
            let Some((locked, dirty)) = self.pool.get(id).map(|b| (b.is_locked(), b.is_dirty())) else {
                break;
            };
            let evict = !locked && (!dirty || self.write(id).is_ok());
            if evict {
                self.rem_hash(id);
                self.rem_used(id);
                released = true;
                // The list changed; start over from the end.
                cursor = self.pool.last();
            } else {
                cursor = self.pool.prev(id);
            }
        }
        released
    }
}

/// Releases as much memory as possible across `files`.
///
/// Used after an allocation failure; returns true if anything was freed so
/// the caller can retry.
pub fn release_all<'a>(files: impl IntoIterator<Item = &'a mut Memfile>) -> bool {
    let mut released = false;
    for mf in files {
        released |= mf.release_unlocked();
    }
    released
}
