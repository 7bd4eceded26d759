//! Writing dirty blocks back to the swap file.

use crate::block::{Block, BlockFlags};
use crate::error::{MemfileError, Result};
use crate::memfile::Memfile;
use crate::options::SwapSync;
use bitflags::bitflags;
use message_log::LogEntry;
use serde::{Deserialize, Serialize};
use swap_device::FlushMode;

bitflags! {
    /// Selects what a sync writes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SyncFlags: u8 {
        /// Include transient blocks; otherwise only durable ones are written
        const ALL = 1;
        /// Stop once input is pending, after at least one write
        const STOP = 2;
        /// Force the swap file to disk afterwards
        const FLUSH = 4;
        /// Only write block 0
        const ZERO = 8;
    }
}

/// Source of user input polled between block writes
pub trait InputCheck {
    /// Whether a typed character is waiting
    fn char_avail(&mut self) -> bool;

    /// Whether the user asked to interrupt
    fn interrupted(&mut self) -> bool;
}

/// Input source that never has anything pending
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl InputCheck for NoInput {
    fn char_avail(&mut self) -> bool {
        false
    }

    fn interrupted(&mut self) -> bool {
        false
    }
}

/// Outcome of a successful sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Blocks written
    pub written: usize,
    /// Whether the whole used list was walked
    pub complete: bool,
}

impl Memfile {
    /// Writes dirty blocks, least recently used first.
    ///
    /// After a write error only blocks already inside the file are tried; a
    /// second error ends the pass. The first error is returned after the
    /// walk. The memfile counts as clean once the walk completes or fails.
    pub fn sync(&mut self, flags: SyncFlags, input: &mut dyn InputCheck) -> Result<SyncStats> {
        if self.device.is_none() {
            self.dirty = false;
            return Err(MemfileError::NoSwapFile);
        }

        let mut first_error: Option<MemfileError> = None;
        let mut stats = SyncStats::default();
        let mut cursor = self.pool.last();

        while let Some(id) = cursor {
            let Some((nr, dirty)) = self.pool.get(id).map(|b: &Block| (b.nr(), b.is_dirty())) else {
                break;
            };
            let eligible = (flags.contains(SyncFlags::ALL) || nr.is_durable())
                && dirty
                && (first_error.is_none() || (nr.is_durable() && nr.0 < self.infile_count));
            let skip = flags.contains(SyncFlags::ZERO) && nr.0 != 0;

            if eligible && !skip {
                match self.write(id) {
                    Ok(()) => stats.written += 1,
                    Err(err) => {
                        if first_error.is_some() {
                            tracing::debug!(%nr, "second write error, giving up sync");
                            break;
                        }
                        first_error = Some(err);
                    }
                }
                let stop = flags.contains(SyncFlags::STOP) && input.char_avail();
                if stop || input.interrupted() {
                    break;
                }
            }
            cursor = self.pool.prev(id);
        }

        stats.complete = cursor.is_none();
        if stats.complete || first_error.is_some() {
            self.dirty = false;
        }

        if flags.contains(SyncFlags::FLUSH) {
            let mode = match self.ctx.options().swapsync {
                SwapSync::None => None,
                SwapSync::Fsync => Some(FlushMode::Full),
                SwapSync::Sync => Some(FlushMode::Data),
            };
            if let (Some(mode), Some(device)) = (mode, self.device.as_deref_mut()) {
                if let Err(source) = device.flush(mode) {
                    self.ctx.record(
                        LogEntry::warn("Error flushing swap file")
                            .with_source(self.id)
                            .with_field("error", &source),
                    );
                    first_error.get_or_insert(MemfileError::Flush(source));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    /// Marks every resident durable block dirty, e.g. for a new swap file
    pub fn set_dirty(&mut self) {
        let ids: Vec<_> = self.pool.iter_lru().collect();
        for id in ids {
            if let Some(block) = self.pool.get_mut(id) {
                if block.nr().is_durable() {
                    block.insert_flags(BlockFlags::DIRTY);
                }
            }
        }
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockNr;
    use crate::context::MemContext;
    use crate::memfile::OpenMode;
    use crate::options::MemOptions;
    use std::rc::Rc;
    use swap_device::{FailingSwap, FailurePolicy, RamSwap};

    /// Reports a pending character after a given number of polls
    struct KeyAfter {
        polls: usize,
    }

    impl InputCheck for KeyAfter {
        fn char_avail(&mut self) -> bool {
            if self.polls == 0 {
                return true;
            }
            self.polls -= 1;
            false
        }

        fn interrupted(&mut self) -> bool {
            false
        }
    }

    struct Interrupt;

    impl InputCheck for Interrupt {
        fn char_avail(&mut self) -> bool {
            false
        }

        fn interrupted(&mut self) -> bool {
            true
        }
    }

    fn memfile(ram: &RamSwap) -> Memfile {
        let ctx = MemContext::with_defaults();
        let mut mf = Memfile::open_device(ctx, Box::new(ram.clone()), OpenMode::Create);
        mf.set_new_page_size(1024).expect("page size");
        mf
    }

    fn fill(mf: &mut Memfile, durable: usize, transient: usize) {
        for _ in 0..durable {
            let id = mf.new_block(false, 1).expect("new");
            mf.put_block(id, true, false);
        }
        for _ in 0..transient {
            let id = mf.new_block(true, 1).expect("new");
            mf.put_block(id, true, false);
        }
    }

    #[test]
    fn test_sync_without_device() {
        let ctx = MemContext::with_defaults();
        let mut mf = Memfile::open_memory(ctx);
        fill(&mut mf, 1, 0);
        assert!(matches!(
            mf.sync(SyncFlags::ALL, &mut NoInput),
            Err(MemfileError::NoSwapFile)
        ));
        assert!(!mf.is_dirty());
    }

    #[test]
    fn test_sync_skips_transient_without_all() {
        let ram = RamSwap::new();
        let mut mf = memfile(&ram);
        fill(&mut mf, 2, 1);

        let stats = mf.sync(SyncFlags::empty(), &mut NoInput).expect("sync");
        assert_eq!(stats.written, 2);
        assert!(stats.complete);
        assert!(!mf.is_dirty());
        assert!(mf.has_pending_translations());

        let stats = mf.sync(SyncFlags::ALL, &mut NoInput).expect("sync");
        assert_eq!(stats.written, 1);
        assert_eq!(ram.len(), 3 * 1024);
        assert!(mf.has_pending_translations());
    }

    #[test]
    fn test_sync_zero_writes_only_block_zero() {
        let ram = RamSwap::new();
        let mut mf = memfile(&ram);
        fill(&mut mf, 3, 0);
        let stats = mf.sync(SyncFlags::ZERO, &mut NoInput).expect("sync");
        assert_eq!(stats.written, 1);
        assert_eq!(ram.len(), 1024);
        assert_eq!(mf.infile_count(), 1);
    }

    #[test]
    fn test_sync_stop_writes_at_least_one() {
        let ram = RamSwap::new();
        let mut mf = memfile(&ram);
        fill(&mut mf, 4, 0);

        let stats = mf
            .sync(SyncFlags::STOP, &mut KeyAfter { polls: 0 })
            .expect("sync");
        assert_eq!(stats.written, 1);
        assert!(!stats.complete);
        assert!(mf.is_dirty());

        let stats = mf
            .sync(SyncFlags::STOP, &mut KeyAfter { polls: 1 })
            .expect("sync");
        assert_eq!(stats.written, 2);

        let stats = mf.sync(SyncFlags::empty(), &mut NoInput).expect("sync");
        assert_eq!(stats.written, 1);
        assert!(stats.complete);
    }

    #[test]
    fn test_sync_interrupt_stops_after_first_write() {
        let ram = RamSwap::new();
        let mut mf = memfile(&ram);
        fill(&mut mf, 3, 0);
        let stats = mf.sync(SyncFlags::empty(), &mut Interrupt).expect("sync");
        assert_eq!(stats.written, 1);
        assert!(!stats.complete);
    }

    #[test]
    fn test_sync_after_error_only_writes_inside_file() {
        let failing = FailingSwap::new(RamSwap::new(), FailurePolicy::Never);
        let control = failing.control();
        let ctx = MemContext::with_defaults();
        let mut mf = Memfile::open_device(Rc::clone(&ctx), Box::new(failing), OpenMode::Create);
        fill(&mut mf, 3, 0);
        mf.sync(SyncFlags::empty(), &mut NoInput).expect("sync");
        assert_eq!(mf.infile_count(), 3);

        // Block 0 is in the file, blocks 3 and 4 are not.
        let id = mf.get_block(BlockNr(0), 1).expect("get");
        mf.put_block(id, true, false);
        fill(&mut mf, 2, 0);
        // Dirty blocks from the LRU end: 0, 3, 4. The file cannot grow.
        control.set_policy(FailurePolicy::OnOffsets(vec![3 * 4096]));

        let err = mf.sync(SyncFlags::empty(), &mut NoInput);
        assert!(matches!(err, Err(MemfileError::Write { .. })));
        assert_eq!(ctx.log().count_prefixed("E297"), 1);
        assert!(!mf.is_dirty());

        let is_dirty = |mf: &Memfile, nr: i64| {
            let id = mf.find_hash(BlockNr(nr)).expect("resident");
            mf.block(id).expect("block").is_dirty()
        };
        assert!(!is_dirty(&mf, 0));
        assert!(is_dirty(&mf, 3));
        // Beyond the file end after an error: never tried.
        assert!(is_dirty(&mf, 4));
        assert_eq!(mf.infile_count(), 3);
        assert_eq!(control.failed_writes(), 1);
    }

    #[test]
    fn test_sync_double_error_stops() {
        let failing = FailingSwap::new(RamSwap::new(), FailurePolicy::Never);
        let control = failing.control();
        let ctx = MemContext::with_defaults();
        let mut mf = Memfile::open_device(Rc::clone(&ctx), Box::new(failing), OpenMode::Create);
        fill(&mut mf, 3, 0);
        mf.sync(SyncFlags::empty(), &mut NoInput).expect("sync");
        mf.set_dirty();

        control.set_policy(FailurePolicy::AllWrites);
        assert!(mf.sync(SyncFlags::empty(), &mut NoInput).is_err());
        assert_eq!(control.failed_writes(), 2);
        assert_eq!(ctx.log().count_prefixed("E297"), 1);
    }

    #[test]
    fn test_sync_flush_follows_swapsync() {
        let failing = FailingSwap::new(RamSwap::new(), FailurePolicy::AllWrites);
        let ctx = MemContext::new(MemOptions {
            swapsync: SwapSync::None,
            ..MemOptions::default()
        });
        let mut mf = Memfile::open_device(Rc::clone(&ctx), Box::new(failing), OpenMode::Create);
        // Nothing dirty, so only the flush could fail.
        assert!(mf.sync(SyncFlags::FLUSH, &mut NoInput).is_ok());

        ctx.set_options(MemOptions::default());
        assert!(matches!(
            mf.sync(SyncFlags::FLUSH, &mut NoInput),
            Err(MemfileError::Flush(_))
        ));
        assert_eq!(ctx.log().count_prefixed("Error flushing swap file"), 1);
    }

    #[test]
    fn test_set_dirty_marks_durable_only() {
        let ram = RamSwap::new();
        let mut mf = memfile(&ram);
        fill(&mut mf, 2, 1);
        mf.sync(SyncFlags::empty(), &mut NoInput).expect("sync");
        mf.set_dirty();
        let dirty: Vec<_> = mf
            .mru_order()
            .into_iter()
            .filter(|nr| {
                let id = mf.find_hash(*nr).expect("resident");
                mf.block(id).expect("block").is_dirty()
            })
            .collect();
        // The transient block was never cleaned.
        assert_eq!(dirty, vec![BlockNr(-1), BlockNr(1), BlockNr(0)]);
        assert!(mf.is_dirty());

        let stats = mf.sync(SyncFlags::empty(), &mut NoInput).expect("sync");
        assert_eq!(stats.written, 2);
    }
}
