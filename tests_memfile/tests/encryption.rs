//! Encryption Tests
//!
//! Validates that the crypt hook sees every swap write and read, so the
//! file never holds plaintext while the memfile always does.

use memfile::{BlockCrypt, BlockNr, CryptError, KeystreamCrypt, MemContext, NoInput, SyncFlags};
use tests_memfile::{holds_pattern, new_filled, pattern, ram_memfile, recover, TEST_PAGE_SIZE};

fn crypt(key: &str) -> Box<dyn BlockCrypt> {
    Box::new(KeystreamCrypt::new(key).expect("key"))
}

/// Test: Swap contents are encrypted and decrypt on read
#[test]
fn test_encrypted_round_trip() {
    let ctx = MemContext::with_defaults();
    let (ram, mut mf) = ram_memfile(&ctx);
    mf.set_crypt(Some(crypt("correct horse")));

    let nr = new_filled(&mut mf, 2, 42).expect("new block");
    mf.sync(SyncFlags::ALL, &mut NoInput).expect("sync");
    let raw = ram.snapshot();
    assert_eq!(raw.len(), 2 * TEST_PAGE_SIZE as usize);
    assert_ne!(raw, pattern(42, raw.len()));

    assert!(mf.release_unlocked());
    assert!(holds_pattern(&mut mf, nr, 2, 42));
    mf.close(false);

    let mut right = recover(&ctx, &ram);
    right.set_crypt(Some(crypt("correct horse")));
    assert!(holds_pattern(&mut right, BlockNr(0), 2, 42));

    let mut wrong = recover(&ctx, &ram);
    wrong.set_crypt(Some(crypt("battery staple")));
    assert!(!holds_pattern(&mut wrong, BlockNr(0), 2, 42));
}

/// Test: Identical blocks encrypt differently at different offsets
#[test]
fn test_keystream_depends_on_offset() {
    let ctx = MemContext::with_defaults();
    let (ram, mut mf) = ram_memfile(&ctx);
    mf.set_crypt(Some(crypt("key")));
    new_filled(&mut mf, 1, 5).expect("new block");
    new_filled(&mut mf, 1, 5).expect("new block");
    mf.sync(SyncFlags::ALL, &mut NoInput).expect("sync");

    let raw = ram.snapshot();
    let (first, second) = raw.split_at(TEST_PAGE_SIZE as usize);
    assert_ne!(first, second);
}

/// Test: An empty key is rejected
#[test]
fn test_empty_key_rejected() {
    assert!(matches!(KeystreamCrypt::new(""), Err(CryptError::EmptyKey)));
    let a = KeystreamCrypt::new("abc").expect("key");
    let b = KeystreamCrypt::new("abc").expect("key");
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(a.fingerprint().len(), 8);
}
