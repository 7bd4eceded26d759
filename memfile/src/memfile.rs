//! The memfile facade: open, close, and the block allocation contract.

use crate::block::{Block, BlockFlags, BlockNr};
use crate::context::MemContext;
use crate::crypt::BlockCrypt;
use crate::error::{MemfileError, Result};
use crate::free_list::{FreeList, FreeRange};
use crate::hashtab::BucketTable;
use crate::pool::{BlockId, BlockPool};
use crate::translate::Translations;
use message_log::{LogEntry, SourceId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use swap_device::{SwapDevice, SwapError};

/// Default page size
pub const MEMFILE_PAGE_SIZE: u32 = 4096;
/// Smallest filesystem block size adopted as page size
pub const MIN_SWAP_PAGE_SIZE: u32 = 1048;
/// Largest filesystem block size adopted as page size
pub const MAX_SWAP_PAGE_SIZE: u32 = 50000;

/// How to open a swap file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new file; fail if anything exists at the path
    Create,
    /// Open an existing file for recovery
    Recover,
}

/// Where a lazily created swap file should go
pub enum SwapTarget {
    /// Create a swap file at this path
    Path(PathBuf),
    /// Use this device
    Device(Box<dyn SwapDevice>),
}

impl std::fmt::Debug for SwapTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapTarget::Path(p) => f.debug_tuple("Path").field(p).finish(),
            SwapTarget::Device(_) => f.write_str("Device(..)"),
        }
    }
}

/// Supplies a swap file when memory pressure calls for one
pub trait SwapProvider {
    /// Target for a new swap file, or `None` if none can be offered
    fn swap_target(&mut self) -> Option<SwapTarget>;
}

impl<F> SwapProvider for F
where
    F: FnMut() -> Option<SwapTarget>,
{
    fn swap_target(&mut self) -> Option<SwapTarget> {
        self()
    }
}

/// Snapshot of a memfile's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemfileStats {
    pub page_size: u32,
    pub blocknr_min: i64,
    pub blocknr_max: i64,
    pub infile_count: i64,
    pub neg_count: u64,
    pub resident_blocks: usize,
    pub used_pages: u64,
    pub used_count_max: u64,
    pub free_ranges: Vec<FreeRange>,
    pub pending_translations: usize,
    pub hash_buckets: usize,
    pub dirty: bool,
    pub has_swap: bool,
}

/// A paged block store, optionally backed by a swap file.
///
/// Blocks are handed out as [`BlockId`] handles between `new_block` /
/// `get_block` and the matching `put_block` / `free_block`.
pub struct Memfile {
    pub(crate) id: SourceId,
    pub(crate) ctx: Rc<MemContext>,
    pub(crate) device: Option<Box<dyn SwapDevice>>,
    pub(crate) fname: Option<PathBuf>,
    pub(crate) ffname: Option<PathBuf>,
    pub(crate) pool: BlockPool,
    pub(crate) hash: BucketTable<BlockId>,
    pub(crate) free: FreeList,
    pub(crate) trans: Translations,
    pub(crate) blocknr_min: i64,
    pub(crate) blocknr_max: i64,
    pub(crate) infile_count: i64,
    pub(crate) neg_count: u64,
    pub(crate) page_size: u32,
    pub(crate) used_count_max: u64,
    pub(crate) dirty: bool,
    pub(crate) crypt: Option<Box<dyn BlockCrypt>>,
    pub(crate) swap_provider: Option<Box<dyn SwapProvider>>,
    pub(crate) may_swap: bool,
}

impl std::fmt::Debug for Memfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memfile")
            .field("id", &self.id)
            .field("fname", &self.fname)
            .field("page_size", &self.page_size)
            .field("blocknr_min", &self.blocknr_min)
            .field("blocknr_max", &self.blocknr_max)
            .field("infile_count", &self.infile_count)
            .field("resident", &self.pool.len())
            .field("has_swap", &self.device.is_some())
            .finish()
    }
}

#[cfg(unix)]
fn open_swap_file(path: &Path, mode: OpenMode) -> std::result::Result<Box<dyn SwapDevice>, SwapError> {
    let device = match mode {
        OpenMode::Create => swap_device::FileSwap::create(path)?,
        OpenMode::Recover => swap_device::FileSwap::open_existing(path)?,
    };
    Ok(Box::new(device))
}

#[cfg(not(unix))]
fn open_swap_file(_path: &Path, _mode: OpenMode) -> std::result::Result<Box<dyn SwapDevice>, SwapError> {
    Err(SwapError::Io(std::io::Error::from(
        std::io::ErrorKind::Unsupported,
    )))
}

impl Memfile {
    fn new(ctx: Rc<MemContext>) -> Self {
        Self {
            id: SourceId::new(),
            ctx,
            device: None,
            fname: None,
            ffname: None,
            pool: BlockPool::new(),
            hash: BucketTable::new(),
            free: FreeList::new(),
            trans: Translations::new(),
            blocknr_min: -1,
            blocknr_max: 0,
            infile_count: 0,
            neg_count: 0,
            page_size: MEMFILE_PAGE_SIZE,
            used_count_max: 0,
            dirty: false,
            crypt: None,
            swap_provider: None,
            may_swap: false,
        }
    }

    /// Opens a memory-only memfile
    pub fn open_memory(ctx: Rc<MemContext>) -> Self {
        let mut mf = Self::new(ctx);
        mf.setup(OpenMode::Create);
        mf
    }

    /// Opens a memfile on a swap file at `fname`, or memory-only for `None`.
    ///
    /// With [`OpenMode::Create`] anything already present at the path,
    /// including a symlink, is refused.
    pub fn open(ctx: Rc<MemContext>, fname: Option<PathBuf>, mode: OpenMode) -> Result<Self> {
        let Some(path) = fname else {
            return Ok(Self::open_memory(ctx));
        };
        let mut mf = Self::new(ctx);
        mf.do_open(path, mode)?;
        mf.setup(mode);
        Ok(mf)
    }

    /// Opens a memfile on an already opened device
    pub fn open_device(ctx: Rc<MemContext>, device: Box<dyn SwapDevice>, mode: OpenMode) -> Self {
        let mut mf = Self::new(ctx);
        mf.fname = device.path().map(Path::to_path_buf);
        mf.ffname = mf.fname.as_deref().and_then(|p| std::path::absolute(p).ok());
        mf.device = Some(device);
        mf.setup(mode);
        mf
    }

    fn do_open(&mut self, path: PathBuf, mode: OpenMode) -> Result<()> {
        let ffname = std::path::absolute(&path).ok();
        match open_swap_file(&path, mode) {
            Ok(device) => {
                tracing::debug!(path = %path.display(), ?mode, "opened swap file");
                self.device = Some(device);
                self.fname = Some(path);
                self.ffname = ffname;
                Ok(())
            }
            Err(SwapError::AlreadyExists { path, symlink }) => {
                self.free_fnames();
                self.ctx.record(
                    LogEntry::error("E300: Swap file already exists (symlink attack?)")
                        .with_source(self.id)
                        .with_field("path", path.display())
                        .with_field("symlink", symlink),
                );
                Err(MemfileError::SwapExists(path))
            }
            Err(source) => {
                self.free_fnames();
                self.ctx.record(
                    LogEntry::error("Cannot open swap file")
                        .with_source(self.id)
                        .with_field("path", path.display())
                        .with_field("error", &source),
                );
                Err(MemfileError::Open { path, source })
            }
        }
    }

    /// Page size and block number ranges after a (re)open
    fn setup(&mut self, mode: OpenMode) {
        if let Some(device) = &self.device {
            if let Some(size) = device.preferred_page_size() {
                if (MIN_SWAP_PAGE_SIZE..=MAX_SWAP_PAGE_SIZE).contains(&size) {
                    self.page_size = size;
                }
            }
        }

        // The page size may still be corrected from block 0, so round up.
        self.blocknr_max = match (&self.device, mode) {
            (Some(device), OpenMode::Recover) if device.len_bytes() > 0 => {
                let page = u64::from(self.page_size);
                i64::try_from(device.len_bytes().div_ceil(page)).unwrap_or(i64::MAX)
            }
            _ => 0,
        };
        self.blocknr_min = -1;
        self.neg_count = 0;
        self.infile_count = self.blocknr_max;
        self.used_count_max = self.ctx.options().used_count_max(self.page_size);
    }

    /// Attaches a newly created swap file to a memory-only memfile.
    ///
    /// The file must not exist yet.
    pub fn open_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        self.do_open(path.into(), OpenMode::Create)?;
        self.infile_count = 0;
        self.dirty = true;
        Ok(())
    }

    /// Attaches a device to a memory-only memfile
    pub fn attach_device(&mut self, device: Box<dyn SwapDevice>) {
        if self.device.is_some() {
            return;
        }
        self.fname = device.path().map(Path::to_path_buf);
        self.ffname = self.fname.as_deref().and_then(|p| std::path::absolute(p).ok());
        self.device = Some(device);
        self.infile_count = 0;
        self.dirty = true;
    }

    /// Closes the memfile, deleting the swap file if `delete_file` is set
    pub fn close(mut self, delete_file: bool) {
        self.device = None;
        if delete_file {
            if let Some(path) = self.fname.take() {
                remove_swap_file(&path);
            }
        }
        // Drop settles the memory accounting.
    }

    /// Closes and deletes the swap file; the memfile continues memory-only
    pub fn close_file(&mut self) {
        if self.device.is_none() {
            return;
        }
        self.device = None;
        if let Some(path) = self.fname.take() {
            remove_swap_file(&path);
        }
        self.ffname = None;
    }

    /// Like [`close_file`](Self::close_file), but first runs `load_all` with
    /// eviction disabled so the caller can bring every block into memory.
    pub fn close_file_after(&mut self, load_all: impl FnOnce(&mut Memfile)) {
        if self.device.is_none() {
            return;
        }
        let ctx = Rc::clone(&self.ctx);
        ctx.without_release(|| load_all(self));
        self.close_file();
    }

    /// Corrects the page size, e.g. after block 0 showed the real value.
    ///
    /// Resident payloads are resized and the process total adjusted.
    pub fn set_new_page_size(&mut self, new_size: u32) -> Result<()> {
        if new_size == 0 {
            return Err(MemfileError::InvalidPageSize(new_size));
        }
        let ids: Vec<BlockId> = self.pool.iter_mru().collect();
        for id in ids {
            if let Some(block) = self.pool.get_mut(id) {
                block.resize_pages(new_size)?;
            }
        }
        let pages = self.pool.used_pages();
        self.ctx.sub_mem(pages * u64::from(self.page_size));
        self.ctx.add_mem(pages * u64::from(new_size));
        tracing::debug!(old = self.page_size, new = new_size, "page size corrected");
        self.page_size = new_size;
        self.used_count_max = self.ctx.options().used_count_max(new_size);
        Ok(())
    }

    /// Recounts the file's whole pages after a page size correction during
    /// recovery. Only meaningful before any block has been allocated.
    pub fn recount_file_pages(&mut self) {
        let pages = self
            .device
            .as_ref()
            .map_or(0, |d| d.len_bytes() / u64::from(self.page_size));
        self.blocknr_max = i64::try_from(pages).unwrap_or(i64::MAX);
        self.infile_count = self.blocknr_max;
    }

    /// Allocates a new block, locked and dirty, with a zeroed payload.
    ///
    /// A transient block gets the next negative number; a durable one takes
    /// the front free range if it is large enough, else the end of the file.
    pub fn new_block(&mut self, negative: bool, page_count: u32) -> Result<BlockId> {
        if page_count == 0 {
            return Err(MemfileError::InvalidPageCount(page_count));
        }
        let mut block = match self.release(page_count) {
            Some(block) => block,
            None => Block::alloc(self.page_size, page_count)?,
        };

        let from_free = if negative {
            None
        } else {
            self.free.take(page_count)
        };
        let nr = match from_free {
            Some(nr) => nr,
            None if negative => {
                let nr = BlockNr(self.blocknr_min);
                self.blocknr_min -= 1;
                self.neg_count += 1;
                nr
            }
            None => {
                let nr = BlockNr(self.blocknr_max);
                self.blocknr_max += i64::from(page_count);
                nr
            }
        };

        block.set_nr(nr);
        block.set_flags(BlockFlags::LOCKED | BlockFlags::DIRTY);
        block.zero();
        self.dirty = true;
        let id = self.ins_used(block);
        self.ins_hash(id);
        Ok(id)
    }

    /// Locks block `nr`, reading it from the swap file if not resident.
    ///
    /// Transient numbers must be resolved with
    /// [`consume_translation`](Self::consume_translation) first.
    pub fn get_block(&mut self, nr: BlockNr, page_count: u32) -> Result<BlockId> {
        if nr.0 >= self.blocknr_max || nr.0 <= self.blocknr_min {
            return Err(MemfileError::OutOfRange(nr));
        }

        if let Some(id) = self.find_hash(nr) {
            self.rem_hash(id);
            self.pool.move_to_front(id);
            if let Some(block) = self.pool.get_mut(id) {
                block.insert_flags(BlockFlags::LOCKED);
            }
            self.ins_hash(id);
            return Ok(id);
        }

        if nr.is_transient() || nr.0 >= self.infile_count {
            return Err(MemfileError::NotInFile(nr));
        }
        if page_count == 0 {
            return Err(MemfileError::InvalidPageCount(page_count));
        }

        let mut block = match self.release(page_count) {
            Some(block) => block,
            None => Block::alloc(self.page_size, page_count)?,
        };
        block.set_nr(nr);
        block.set_flags(BlockFlags::empty());
        // On failure the block is dropped; nothing was linked yet.
        self.read(&mut block)?;

        block.insert_flags(BlockFlags::LOCKED);
        let id = self.ins_used(block);
        self.ins_hash(id);
        Ok(id)
    }

    /// Unlocks a block.
    ///
    /// `dirty` schedules it for write-back; `infile` gives a transient
    /// block a durable number now so it can be written later.
    pub fn put_block(&mut self, id: BlockId, dirty: bool, infile: bool) {
        let Some(block) = self.pool.get_mut(id) else {
            self.ctx.record(
                LogEntry::warn("put_block on a block that is not resident").with_source(self.id),
            );
            return;
        };
        let was_locked = block.is_locked();
        let nr = block.nr();
        block.remove_flags(BlockFlags::LOCKED);
        if dirty {
            block.insert_flags(BlockFlags::DIRTY);
            self.dirty = true;
        }
        if !was_locked {
            self.ctx.record(
                LogEntry::error("E293: block was not locked")
                    .with_source(self.id)
                    .with_field("block", nr),
            );
        }
        if infile {
            if let Err(err) = self.add_translation(id) {
                self.ctx.record(
                    LogEntry::warn("could not assign a file block number")
                        .with_source(self.id)
                        .with_field("block", nr)
                        .with_field("error", err),
                );
            }
        }
    }

    /// Removes a block from memory.
    ///
    /// A durable block's file range goes to the free list for reuse.
    pub fn free_block(&mut self, id: BlockId) -> Result<()> {
        if !self.pool.contains(id) {
            return Err(MemfileError::StaleHandle);
        }
        self.rem_hash(id);
        let block = self.rem_used(id).ok_or(MemfileError::StaleHandle)?;
        if block.nr().is_transient() {
            self.neg_count = self.neg_count.saturating_sub(1);
        } else {
            self.free.push(FreeRange {
                nr: block.nr(),
                page_count: block.page_count(),
            });
        }
        Ok(())
    }

    /// Resident block behind `id`
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.pool.get(id)
    }

    /// Mutable resident block behind `id`
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.pool.get_mut(id)
    }

    /// Payload of the block behind `id`
    pub fn data(&self, id: BlockId) -> Option<&[u8]> {
        self.pool.get(id).map(Block::data)
    }

    /// Mutable payload of the block behind `id`
    pub fn data_mut(&mut self, id: BlockId) -> Option<&mut [u8]> {
        self.pool.get_mut(id).map(Block::data_mut)
    }

    /// Switches to the full path captured at creation, before a directory change
    pub fn fullname(&mut self) {
        if self.fname.is_some() {
            if let Some(full) = self.ffname.take() {
                self.fname = Some(full);
            }
        }
    }

    /// Records a new swap file name, e.g. after the caller renamed it
    pub fn set_fnames(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.ffname = std::path::absolute(&path).ok();
        self.fname = Some(path);
    }

    /// Forgets the swap file names
    pub fn free_fnames(&mut self) {
        self.fname = None;
        self.ffname = None;
    }

    /// Swap file name, if any
    pub fn fname(&self) -> Option<&Path> {
        self.fname.as_deref()
    }

    /// Full swap file path captured at creation, if still held
    pub fn ffname(&self) -> Option<&Path> {
        self.ffname.as_deref()
    }

    /// Installs an encryption hook for all swap I/O
    pub fn set_crypt(&mut self, crypt: Option<Box<dyn BlockCrypt>>) {
        self.crypt = crypt;
    }

    /// Installs the swap file provider used under memory pressure
    pub fn set_swap_provider(&mut self, provider: Option<Box<dyn SwapProvider>>) {
        self.may_swap = provider.is_some();
        self.swap_provider = provider;
    }

    /// Whether a swap file may still be created lazily
    pub fn may_swap(&self) -> bool {
        self.may_swap
    }

    /// Allows or forbids lazy swap file creation
    pub fn set_may_swap(&mut self, may_swap: bool) {
        self.may_swap = may_swap;
    }

    /// Log source stamped on this memfile's messages
    pub fn source_id(&self) -> SourceId {
        self.id
    }

    /// Shared context
    pub fn context(&self) -> &Rc<MemContext> {
        &self.ctx
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn blocknr_min(&self) -> i64 {
        self.blocknr_min
    }

    pub fn blocknr_max(&self) -> i64 {
        self.blocknr_max
    }

    /// Pages known to be present in the swap file
    pub fn infile_count(&self) -> i64 {
        self.infile_count
    }

    /// Pages held by resident blocks
    pub fn used_pages(&self) -> u64 {
        self.pool.used_pages()
    }

    /// Resident page budget
    pub fn used_count_max(&self) -> u64 {
        self.used_count_max
    }

    /// Whether anything changed since the last complete sync
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a swap device is attached
    pub fn has_swap(&self) -> bool {
        self.device.is_some()
    }

    /// Resident block numbers, most recently used first
    pub fn mru_order(&self) -> Vec<BlockNr> {
        self.pool
            .iter_mru()
            .filter_map(|id| self.pool.get(id).map(Block::nr))
            .collect()
    }

    /// Bookkeeping snapshot
    pub fn stats(&self) -> MemfileStats {
        MemfileStats {
            page_size: self.page_size,
            blocknr_min: self.blocknr_min,
            blocknr_max: self.blocknr_max,
            infile_count: self.infile_count,
            neg_count: self.neg_count,
            resident_blocks: self.pool.len(),
            used_pages: self.pool.used_pages(),
            used_count_max: self.used_count_max,
            free_ranges: self.free.iter().copied().collect(),
            pending_translations: self.trans.len(),
            hash_buckets: self.hash.bucket_count(),
            dirty: self.dirty,
            has_swap: self.device.is_some(),
        }
    }

    pub(crate) fn ins_used(&mut self, block: Block) -> BlockId {
        self.ctx
            .add_mem(u64::from(block.page_count()) * u64::from(self.page_size));
        self.pool.insert_front(block)
    }

    pub(crate) fn rem_used(&mut self, id: BlockId) -> Option<Block> {
        let block = self.pool.take(id)?;
        self.ctx
            .sub_mem(u64::from(block.page_count()) * u64::from(self.page_size));
        Some(block)
    }

    pub(crate) fn ins_hash(&mut self, id: BlockId) {
        if let Some(nr) = self.pool.get(id).map(Block::nr) {
            let entry = self.hash.add(nr.0, id);
            self.pool.set_hash_entry(id, Some(entry));
        }
    }

    pub(crate) fn rem_hash(&mut self, id: BlockId) {
        if let Some(entry) = self.pool.hash_entry(id) {
            self.hash.remove(entry);
            self.pool.set_hash_entry(id, None);
        }
    }

    pub(crate) fn find_hash(&self, nr: BlockNr) -> Option<BlockId> {
        let entry = self.hash.find(nr.0)?;
        self.hash.get(entry).copied()
    }
}

fn remove_swap_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), %err, "could not remove swap file");
    }
}

impl Drop for Memfile {
    fn drop(&mut self) {
        self.ctx
            .sub_mem(self.pool.used_pages() * u64::from(self.page_size));
    }
}
