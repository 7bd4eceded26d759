//! Translation Tests
//!
//! Validates that transient (negative) block numbers receive durable
//! numbers when they must be written, and that each mapping can be
//! resolved exactly once.

use memfile::{BlockNr, MemContext, Memfile, MemfileError, NoInput, SyncFlags};
use tests_memfile::{fill, holds_pattern, ram_memfile};

/// Test: A transient block is numbered on write and resolved once
#[test]
fn test_translation_is_consumed_once() {
    let ctx = MemContext::with_defaults();
    let (_ram, mut mf) = ram_memfile(&ctx);

    let id = mf.new_block(true, 1).expect("new");
    assert_eq!(mf.block(id).map(|b| b.nr()), Some(BlockNr(-1)));
    fill(&mut mf, id, 7);
    mf.put_block(id, true, false);
    assert!(mf.has_pending_translations());

    mf.sync(SyncFlags::ALL, &mut NoInput).expect("sync");
    assert_eq!(mf.block(id).map(|b| b.nr()), Some(BlockNr(0)));

    assert_eq!(mf.consume_translation(BlockNr(-1)), BlockNr(0));
    assert_eq!(mf.consume_translation(BlockNr(-1)), BlockNr(-1));
    assert!(!mf.has_pending_translations());
    assert!(holds_pattern(&mut mf, BlockNr(0), 1, 7));
}

/// Test: Without ALL, sync leaves transient blocks alone
#[test]
fn test_sync_without_all_skips_transient() {
    let ctx = MemContext::with_defaults();
    let (ram, mut mf) = ram_memfile(&ctx);
    let id = mf.new_block(true, 2).expect("new");
    mf.put_block(id, true, false);

    let stats = mf.sync(SyncFlags::empty(), &mut NoInput).expect("sync");
    assert_eq!(stats.written, 0);
    assert!(ram.is_empty());
    assert_eq!(mf.block(id).map(|b| b.nr()), Some(BlockNr(-1)));
}

/// Test: `put_block` with `infile` numbers the block immediately
#[test]
fn test_put_block_infile_assigns_number() {
    let ctx = MemContext::with_defaults();
    let (_ram, mut mf) = ram_memfile(&ctx);
    let first = mf.new_block(true, 2).expect("new");
    let second = mf.new_block(true, 1).expect("new");

    mf.put_block(second, true, true);
    mf.put_block(first, true, true);
    assert_eq!(mf.block(second).map(|b| b.nr()), Some(BlockNr(0)));
    assert_eq!(mf.block(first).map(|b| b.nr()), Some(BlockNr(1)));
    assert_eq!(mf.blocknr_max(), 3);

    // Numbering an already durable block changes nothing.
    mf.add_translation(first).expect("translate");
    assert_eq!(mf.blocknr_max(), 3);

    assert_eq!(mf.consume_translation(BlockNr(-1)), BlockNr(1));
    assert_eq!(mf.consume_translation(BlockNr(-2)), BlockNr(0));
    assert_eq!(mf.stats().pending_translations, 0);
}

/// Test: Freed durable ranges are reused for translated blocks
#[test]
fn test_translation_reuses_free_range() {
    let ctx = MemContext::with_defaults();
    let mut mf = Memfile::open_memory(ctx);
    let durable = mf.new_block(false, 2).expect("new");
    mf.free_block(durable).expect("free");

    let transient = mf.new_block(true, 1).expect("new");
    mf.put_block(transient, true, true);
    assert_eq!(mf.block(transient).map(|b| b.nr()), Some(BlockNr(0)));
    assert_eq!(mf.stats().free_ranges.len(), 1);
    assert_eq!(mf.stats().free_ranges[0].nr, BlockNr(1));
}

/// Test: Transient numbers are opaque to lookups once not resident
///
/// A freed transient block cannot be fetched by its old number, and a
/// number below every issued one is out of range.
#[test]
fn test_transient_lookup_fails_without_block() {
    let ctx = MemContext::with_defaults();
    let mut mf = Memfile::open_memory(ctx);
    let id = mf.new_block(true, 1).expect("new");
    mf.free_block(id).expect("free");

    assert!(matches!(
        mf.get_block(BlockNr(-1), 1),
        Err(MemfileError::NotInFile(BlockNr(-1)))
    ));
    assert!(matches!(
        mf.get_block(BlockNr(-2), 1),
        Err(MemfileError::OutOfRange(BlockNr(-2)))
    ));
    assert!(matches!(mf.free_block(id), Err(MemfileError::StaleHandle)));
}
