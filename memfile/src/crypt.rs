//! Block encryption hook.
//!
//! The write path encrypts a copy and leaves the resident block in plain
//! text; the read path decrypts freshly read bytes in place. Both are keyed
//! by the block's byte offset so equal plaintext at different positions
//! encrypts differently.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from an encryption hook
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptError {
    /// Key is empty
    #[error("empty encryption key")]
    EmptyKey,

    /// Hook-specific failure
    #[error("crypt failed: {0}")]
    Failed(String),
}

/// Encrypts blocks on their way to the swap file and decrypts them back
pub trait BlockCrypt {
    /// Returns an encrypted copy of `data`, which sits at `offset`
    fn encrypt(&self, offset: u64, data: &[u8]) -> Result<Vec<u8>, CryptError>;

    /// Decrypts `data`, read from `offset`, in place
    fn decrypt_in_place(&self, offset: u64, data: &mut [u8]) -> Result<(), CryptError>;
}

/// XOR stream cipher with a SHA-256 counter keystream.
///
/// Keystream chunk `i` for a block at `offset` is
/// `SHA-256(key || offset_le || i_le)`.
#[derive(Clone)]
pub struct KeystreamCrypt {
    key: Vec<u8>,
}

impl std::fmt::Debug for KeystreamCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystreamCrypt")
            .field("key", &self.fingerprint())
            .finish()
    }
}

impl KeystreamCrypt {
    const CHUNK: usize = 32;

    /// Creates a cipher for `key`
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, CryptError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(CryptError::EmptyKey);
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Short hex fingerprint of the key, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.key);
        hex::encode(&digest[..4])
    }

    fn apply(&self, offset: u64, data: &mut [u8]) {
        for (index, chunk) in data.chunks_mut(Self::CHUNK).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(&self.key);
            hasher.update(offset.to_le_bytes());
            hasher.update((index as u64).to_le_bytes());
            let pad = hasher.finalize();
            for (byte, k) in chunk.iter_mut().zip(pad.iter()) {
                *byte ^= k;
            }
        }
    }
}

impl BlockCrypt for KeystreamCrypt {
    fn encrypt(&self, offset: u64, data: &[u8]) -> Result<Vec<u8>, CryptError> {
        let mut out = data.to_vec();
        self.apply(offset, &mut out);
        Ok(out)
    }

    fn decrypt_in_place(&self, offset: u64, data: &mut [u8]) -> Result<(), CryptError> {
        self.apply(offset, data);
        Ok(())
    }
}
