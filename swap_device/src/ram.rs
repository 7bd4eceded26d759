//! In-memory swap device.
//!
//! Clones share the same bytes, so a test can hand one clone to a memfile,
//! close the memfile, and open a new one on another clone to simulate
//! recovery from an existing swap file.

use crate::{end_offset, SwapDevice, SwapError};
use std::cell::RefCell;
use std::rc::Rc;

/// RAM-backed swap device with shared storage
#[derive(Debug, Clone, Default)]
pub struct RamSwap {
    bytes: Rc<RefCell<Vec<u8>>>,
    page_hint: Option<u32>,
}

impl RamSwap {
    /// Creates an empty device
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device that reports `page_size` as its filesystem block size
    pub fn with_page_hint(page_size: u32) -> Self {
        Self {
            bytes: Rc::default(),
            page_hint: Some(page_size),
        }
    }

    /// Creates a device preloaded with `bytes`
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(bytes)),
            page_hint: None,
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    /// Current length in bytes
    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    /// Returns true if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.bytes.borrow().is_empty()
    }
}

impl SwapDevice for RamSwap {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SwapError> {
        let end = end_offset(offset, buf.len())?;
        let bytes = self.bytes.borrow();
        let available = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if end > available {
            return Err(SwapError::ShortRead {
                offset,
                wanted: buf.len(),
                available: available.saturating_sub(offset),
            });
        }
        // Both bounds fit: `end <= bytes.len()`.
        let start = offset as usize;
        buf.copy_from_slice(&bytes[start..end as usize]);
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), SwapError> {
        let end = end_offset(offset, buf.len())?;
        let end = usize::try_from(end).map_err(|_| SwapError::OffsetOverflow {
            offset,
            len: buf.len(),
        })?;
        let mut bytes = self.bytes.borrow_mut();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        let start = end - buf.len();
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn preferred_page_size(&self) -> Option<u32> {
        self.page_hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_swap_creation() {
        let dev = RamSwap::new();
        assert!(dev.is_empty());
        assert_eq!(dev.len_bytes(), 0);
        assert_eq!(dev.preferred_page_size(), None);
        assert_eq!(RamSwap::with_page_hint(2048).preferred_page_size(), Some(2048));
    }

    #[test]
    fn test_ram_swap_read_write() {
        let mut dev = RamSwap::new();
        let data = [0x42u8; 1024];
        dev.write_all_at(1024, &data).expect("write");

        // Writing past the end zero-extends the gap.
        assert_eq!(dev.len(), 2048);
        let mut head = [0xffu8; 1024];
        dev.read_exact_at(0, &mut head).expect("read head");
        assert_eq!(head, [0u8; 1024]);

        let mut tail = [0u8; 1024];
        dev.read_exact_at(1024, &mut tail).expect("read tail");
        assert_eq!(tail, data);
    }

    #[test]
    fn test_ram_swap_short_read() {
        let mut dev = RamSwap::from_bytes(vec![7u8; 100]);
        let mut buf = [0u8; 64];
        let err = dev.read_exact_at(64, &mut buf).expect_err("short read");
        match err {
            SwapError::ShortRead {
                offset,
                wanted,
                available,
            } => {
                assert_eq!(offset, 64);
                assert_eq!(wanted, 64);
                assert_eq!(available, 36);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ram_swap_clones_share_storage() {
        let mut writer = RamSwap::new();
        let mut reader = writer.clone();

        writer.write_all_at(0, b"swap").expect("write");
        let mut buf = [0u8; 4];
        reader.read_exact_at(0, &mut buf).expect("read");
        assert_eq!(&buf, b"swap");
        assert_eq!(reader.snapshot(), b"swap".to_vec());
    }
}
