//! Memfile Test Utilities
//!
//! Shared helpers for the memfile integration tests.
//!
//! ## Test Philosophy
//!
//! - **Data survives pressure**: whatever is evicted reads back unchanged
//! - **Deterministic failures**: device faults come from a [`FailurePolicy`]
//! - **Observable**: every user-facing message lands in the context log

use memfile::{BlockId, BlockNr, MemContext, MemOptions, Memfile, MemfileError, OpenMode};
use std::rc::Rc;
use swap_device::{FailingSwap, FailureControl, FailurePolicy, RamSwap};

/// Smallest page size a swap file may use; keeps test devices small
pub const TEST_PAGE_SIZE: u32 = 1024;

/// Context with a per-file budget at its floor of 10 pages
pub fn tight_context() -> Rc<MemContext> {
    MemContext::new(MemOptions {
        maxmem_kb: 1,
        ..MemOptions::default()
    })
}

/// Memfile on a fresh RAM device with [`TEST_PAGE_SIZE`] pages.
///
/// The returned device shares its bytes with the memfile's.
pub fn ram_memfile(ctx: &Rc<MemContext>) -> (RamSwap, Memfile) {
    let ram = RamSwap::new();
    let mut mf = Memfile::open_device(Rc::clone(ctx), Box::new(ram.clone()), OpenMode::Create);
    mf.set_new_page_size(TEST_PAGE_SIZE).expect("page size");
    (ram, mf)
}

/// Memfile on a RAM device that fails according to `policy`
pub fn failing_memfile(
    ctx: &Rc<MemContext>,
    policy: FailurePolicy,
) -> (RamSwap, FailureControl, Memfile) {
    let ram = RamSwap::new();
    let failing = FailingSwap::new(ram.clone(), policy);
    let control = failing.control();
    let mut mf = Memfile::open_device(Rc::clone(ctx), Box::new(failing), OpenMode::Create);
    mf.set_new_page_size(TEST_PAGE_SIZE).expect("page size");
    (ram, control, mf)
}

/// Reopens the bytes of `ram` for recovery
pub fn recover(ctx: &Rc<MemContext>, ram: &RamSwap) -> Memfile {
    let copy = RamSwap::from_bytes(ram.snapshot());
    let mut mf = Memfile::open_device(Rc::clone(ctx), Box::new(copy), OpenMode::Recover);
    mf.set_new_page_size(TEST_PAGE_SIZE).expect("page size");
    mf.recount_file_pages();
    mf
}

/// Byte pattern identifying block `tag`
pub fn pattern(tag: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| tag.wrapping_add(i as u8)).collect()
}

/// Fills the block behind `id` with [`pattern`]`(tag)`
pub fn fill(mf: &mut Memfile, id: BlockId, tag: u8) {
    if let Some(data) = mf.data_mut(id) {
        let bytes = pattern(tag, data.len());
        data.copy_from_slice(&bytes);
    }
}

/// Creates a durable block filled with `tag` and puts it dirty
pub fn new_filled(mf: &mut Memfile, page_count: u32, tag: u8) -> memfile::Result<BlockNr> {
    let id = mf.new_block(false, page_count)?;
    fill(mf, id, tag);
    let nr = mf.block(id).map(|b| b.nr()).ok_or(MemfileError::StaleHandle)?;
    mf.put_block(id, true, false);
    Ok(nr)
}

/// Whether block `nr` reads back as [`pattern`]`(tag)`
pub fn holds_pattern(mf: &mut Memfile, nr: BlockNr, page_count: u32, tag: u8) -> bool {
    let Ok(id) = mf.get_block(nr, page_count) else {
        return false;
    };
    let ok = mf
        .data(id)
        .is_some_and(|data| data == pattern(tag, data.len()).as_slice());
    mf.put_block(id, false, false);
    ok
}
