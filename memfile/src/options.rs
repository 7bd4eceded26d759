//! Memory budget options.
//!
//! These are read by every memfile at decision time, so changing them on a
//! [`MemContext`](crate::MemContext) takes effect at the next eviction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a `FLUSH` sync forces data to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapSync {
    /// Do not force anything
    None,
    /// fsync the swap file
    #[default]
    Fsync,
    /// Flush file data only
    Sync,
}

/// Memory budget and swap behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemOptions {
    /// Per-memfile resident budget in KiB
    pub maxmem_kb: u64,
    /// Process-wide resident ceiling in KiB
    pub maxmemtot_kb: u64,
    /// Zero disables creating swap files on memory pressure
    pub updatecount: u32,
    /// Flush behavior for `SyncFlags::FLUSH`
    pub swapsync: SwapSync,
}

impl MemOptions {
    /// Default per-file budget (KiB)
    pub const DEFAULT_MAXMEM_KB: u64 = 5 * 1024;
    /// Default process ceiling (KiB)
    pub const DEFAULT_MAXMEMTOT_KB: u64 = 10 * 1024;
    /// Default update count
    pub const DEFAULT_UPDATECOUNT: u32 = 200;

    /// Loads options from JSON, filling missing fields with defaults
    pub fn from_json(bytes: &[u8]) -> Result<Self, OptionsError> {
        let data: OptionsData = serde_json::from_slice(bytes)
            .map_err(|e| OptionsError::DeserializationFailed(e.to_string()))?;
        if data.version != OptionsData::CURRENT_VERSION {
            return Err(OptionsError::UnsupportedVersion(data.version));
        }
        Ok(data.options)
    }

    /// Serializes options to pretty JSON
    pub fn to_json(&self) -> Result<Vec<u8>, OptionsError> {
        let data = OptionsData {
            version: OptionsData::CURRENT_VERSION,
            options: self.clone(),
        };
        serde_json::to_vec_pretty(&data)
            .map_err(|e| OptionsError::SerializationFailed(e.to_string()))
    }

    /// Per-file budget in pages of `page_size` bytes, never below 10
    pub fn used_count_max(&self, page_size: u32) -> u64 {
        const MIN_BLOCKS: u64 = 10;
        // Strip factors of two before scaling KiB to bytes to keep the
        // product small.
        let mut shift = 10u32;
        let mut size = u64::from(page_size.max(1));
        while shift > 0 && size & 1 == 0 {
            size >>= 1;
            shift -= 1;
        }
        let pages = self.maxmem_kb.saturating_mul(1 << shift) / size;
        pages.max(MIN_BLOCKS)
    }
}

impl Default for MemOptions {
    fn default() -> Self {
        Self {
            maxmem_kb: Self::DEFAULT_MAXMEM_KB,
            maxmemtot_kb: Self::DEFAULT_MAXMEMTOT_KB,
            updatecount: Self::DEFAULT_UPDATECOUNT,
            swapsync: SwapSync::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OptionsData {
    version: u32,
    #[serde(default)]
    options: MemOptions,
}

impl OptionsData {
    const CURRENT_VERSION: u32 = 1;
}

/// Errors loading or saving options
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    /// Failed to serialize options
    #[error("Failed to serialize options: {0}")]
    SerializationFailed(String),
    /// Failed to deserialize options
    #[error("Failed to deserialize options: {0}")]
    DeserializationFailed(String),
    /// Unsupported options version
    #[error("Unsupported options version: {0}")]
    UnsupportedVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = MemOptions::default();
        assert_eq!(opts.maxmem_kb, 5120);
        assert_eq!(opts.maxmemtot_kb, 10240);
        assert_eq!(opts.updatecount, 200);
        assert_eq!(opts.swapsync, SwapSync::Fsync);
    }

    #[test]
    fn test_used_count_max() {
        let opts = MemOptions::default();
        // 5 MiB of 4 KiB pages
        assert_eq!(opts.used_count_max(4096), 1280);
        assert_eq!(opts.used_count_max(1024), 5120);

        let tiny = MemOptions {
            maxmem_kb: 1,
            ..MemOptions::default()
        };
        assert_eq!(tiny.used_count_max(4096), 10);
    }

    #[test]
    fn test_used_count_max_odd_page_size() {
        let opts = MemOptions {
            maxmem_kb: 3,
            ..MemOptions::default()
        };
        // 3072 / 1000 = 3, floored to the minimum
        assert_eq!(opts.used_count_max(1000), 10);
        let big = MemOptions {
            maxmem_kb: 100,
            ..MemOptions::default()
        };
        assert_eq!(big.used_count_max(1000), 102);
    }

    #[test]
    fn test_json_round_trip() {
        let opts = MemOptions {
            maxmem_kb: 64,
            maxmemtot_kb: 128,
            updatecount: 0,
            swapsync: SwapSync::None,
        };
        let bytes = opts.to_json().expect("serialize");
        let text = String::from_utf8(bytes.clone()).expect("utf8");
        assert!(text.contains("\"swapsync\": \"none\""));
        assert_eq!(MemOptions::from_json(&bytes).expect("deserialize"), opts);
    }

    #[test]
    fn test_json_missing_fields_use_defaults() {
        let opts = MemOptions::from_json(br#"{"version":1,"options":{"maxmem_kb":7}}"#)
            .expect("deserialize");
        assert_eq!(opts.maxmem_kb, 7);
        assert_eq!(opts.maxmemtot_kb, MemOptions::DEFAULT_MAXMEMTOT_KB);
    }

    #[test]
    fn test_json_rejects_unknown_version() {
        assert_eq!(
            MemOptions::from_json(br#"{"version":9}"#),
            Err(OptionsError::UnsupportedVersion(9))
        );
        assert!(matches!(
            MemOptions::from_json(b"not json"),
            Err(OptionsError::DeserializationFailed(_))
        ));
    }
}
