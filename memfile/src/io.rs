//! Swap file reads and writes.
//!
//! Writes never leave a hole in the file: a block beyond the current end is
//! preceded by whatever occupies each missing page, or a zero page if
//! nothing does.

use crate::block::{Block, BlockFlags, BlockNr};
use crate::crypt::BlockCrypt;
use crate::error::{MemfileError, Result};
use crate::memfile::Memfile;
use crate::pool::BlockId;
use message_log::LogEntry;
use swap_device::SwapDevice;

/// Writes `data` at `offset`, encrypting a copy when a hook is set
fn write_block(
    device: &mut dyn SwapDevice,
    crypt: Option<&dyn BlockCrypt>,
    nr: BlockNr,
    offset: u64,
    data: &[u8],
) -> Result<()> {
    let result = match crypt {
        Some(crypt) => {
            let encrypted = crypt.encrypt(offset, data)?;
            device.write_all_at(offset, &encrypted)
        }
        None => device.write_all_at(offset, data),
    };
    result.map_err(|source| MemfileError::Write { nr, source })
}

impl Memfile {
    /// Fills `block` from the swap file at its number
    pub(crate) fn read(&mut self, block: &mut Block) -> Result<()> {
        let nr = block.nr();
        let device = self.device.as_deref_mut().ok_or(MemfileError::NoSwapFile)?;
        let offset = nr
            .offset(self.page_size)
            .ok_or(MemfileError::OutOfRange(nr))?;

        if let Err(source) = device.read_exact_at(offset, block.data_mut()) {
            self.ctx.record(
                LogEntry::error("E295: Read error in swap file")
                    .with_source(self.id)
                    .with_field("block", nr)
                    .with_field("error", &source),
            );
            return Err(MemfileError::Read { nr, source });
        }

        if let Some(crypt) = self.crypt.as_deref() {
            crypt.decrypt_in_place(offset, block.data_mut())?;
        }
        Ok(())
    }

    /// Writes a resident block, extending the file without gaps.
    ///
    /// A transient block is translated first. The requested block's DIRTY
    /// flag is cleared on success, as is that of any resident block written
    /// to fill a gap.
    pub(crate) fn write(&mut self, id: BlockId) -> Result<()> {
        if self.device.is_none() {
            return Err(MemfileError::NoSwapFile);
        }
        let target = self
            .pool
            .get(id)
            .map(Block::nr)
            .ok_or(MemfileError::StaleHandle)?;
        if target.is_transient() {
            self.add_translation(id)?;
        }
        let target = self
            .pool
            .get(id)
            .map(Block::nr)
            .ok_or(MemfileError::StaleHandle)?;

        loop {
            let (nr, occupant) = if target.0 > self.infile_count {
                let nr = BlockNr(self.infile_count);
                (nr, self.find_hash(nr))
            } else {
                (target, Some(id))
            };
            let offset = nr
                .offset(self.page_size)
                .ok_or(MemfileError::OutOfRange(nr))?;

            let device = self.device.as_deref_mut().ok_or(MemfileError::NoSwapFile)?;
            let crypt = self.crypt.as_deref();
            let (page_count, result) = match occupant.and_then(|o| self.pool.get(o)) {
                Some(block) => (
                    block.page_count(),
                    write_block(device, crypt, nr, offset, block.data()),
                ),
                None => {
                    tracing::debug!(%nr, "filling gap in swap file");
                    let filler = vec![0u8; self.page_size as usize];
                    (1, write_block(device, crypt, nr, offset, &filler))
                }
            };

            if let Err(err) = result {
                if !self.ctx.did_swapwrite_msg() {
                    self.ctx.record(
                        LogEntry::error("E297: Write error in swap file")
                            .with_source(self.id)
                            .with_field("block", nr)
                            .with_field("error", &err),
                    );
                }
                self.ctx.set_did_swapwrite_msg(true);
                return Err(err);
            }
            self.ctx.set_did_swapwrite_msg(false);

            if let Some(block) = occupant.and_then(|o| self.pool.get_mut(o)) {
                block.remove_flags(BlockFlags::DIRTY);
            }
            let end = nr.0 + i64::from(page_count);
            if end > self.infile_count {
                self.infile_count = end;
            }
            if nr == target {
                return Ok(());
            }
        }
    }
}
