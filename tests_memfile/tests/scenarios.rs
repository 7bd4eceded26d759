//! Scenario Tests
//!
//! End-to-end walks through the block allocation contract: numbering on an
//! empty file, write-back before eviction, and lookups outside any valid
//! range.

use memfile::{BlockNr, MemContext, MemOptions, Memfile, MemfileError, NoInput, SyncFlags};
use tests_memfile::{holds_pattern, new_filled, ram_memfile};

/// Test: First block on an empty file is block 0 and fills one page
#[test]
fn test_first_block_fills_one_page() {
    let ctx = MemContext::with_defaults();
    let (ram, mut mf) = ram_memfile(&ctx);
    assert_eq!(mf.page_size(), 1024);

    let id = mf.new_block(false, 1).expect("new");
    assert_eq!(mf.block(id).map(|b| b.nr()), Some(BlockNr(0)));
    mf.put_block(id, true, true);
    mf.sync(SyncFlags::ALL, &mut NoInput).expect("sync");
    assert_eq!(ram.len(), 1024);
}

/// Test: A dirty block is written before it is evicted
///
/// Blocks 0 and 2 are pinned; pressure evicts block 1, which forces block 0
/// into the file first so no gap appears.
#[test]
fn test_dirty_block_written_before_eviction() {
    let ctx = MemContext::with_defaults();
    let (ram, mut mf) = ram_memfile(&ctx);
    for tag in 0..3 {
        new_filled(&mut mf, 1, tag).expect("new block");
    }
    let zero = mf.get_block(BlockNr(0), 1).expect("get 0");
    let two = mf.get_block(BlockNr(2), 1).expect("get 2");
    assert_eq!(mf.infile_count(), 0);

    // Any allocation now has to evict.
    ctx.set_options(MemOptions {
        maxmemtot_kb: 0,
        ..MemOptions::default()
    });
    let fresh = mf.new_block(false, 1).expect("new");

    assert_eq!(mf.block(fresh).map(|b| b.nr()), Some(BlockNr(3)));
    assert!(mf.infile_count() >= 2);
    assert_eq!(ram.len(), 2 * 1024);
    assert_eq!(mf.mru_order(), vec![BlockNr(3), BlockNr(2), BlockNr(0)]);
    assert!(mf.block(zero).is_some_and(|b| !b.is_dirty()));
    assert!(mf.block(two).is_some_and(|b| b.is_dirty()));

    assert!(holds_pattern(&mut mf, BlockNr(1), 1, 1));
}

/// Test: A lookup past the end of an empty memfile fails
#[test]
fn test_lookup_past_end_is_out_of_range() {
    let ctx = MemContext::with_defaults();
    let mut mf = Memfile::open_memory(ctx);
    assert!(matches!(
        mf.get_block(BlockNr(5), 1),
        Err(MemfileError::OutOfRange(BlockNr(5)))
    ));
    assert_eq!(mf.stats().resident_blocks, 0);
}

/// Test: Unlocking an unlocked block is reported
#[test]
fn test_double_put_is_reported() {
    let ctx = MemContext::with_defaults();
    let mut mf = Memfile::open_memory(std::rc::Rc::clone(&ctx));
    let id = mf.new_block(false, 1).expect("new");
    mf.put_block(id, false, false);
    mf.put_block(id, false, false);
    assert_eq!(ctx.log().count_prefixed("E293"), 1);
}
