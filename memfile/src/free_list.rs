//! Reserved-but-unused ranges of file block numbers.

use crate::block::BlockNr;
use serde::{Deserialize, Serialize};

/// A run of `page_count` file pages starting at `nr`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeRange {
    pub nr: BlockNr,
    pub page_count: u32,
}

/// LIFO list of freed file ranges.
///
/// Only the most recently freed range is considered for reuse.
#[derive(Debug, Default, Clone)]
pub(crate) struct FreeList {
    // Last element is the front.
    ranges: Vec<FreeRange>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Puts a range at the front
    pub(crate) fn push(&mut self, range: FreeRange) {
        self.ranges.push(range);
    }

    /// Takes `page_count` pages from the front range if it is large enough.
    ///
    /// A larger range is split and keeps its tail; an exact fit is removed.
    pub(crate) fn take(&mut self, page_count: u32) -> Option<BlockNr> {
        let front = self.ranges.last_mut()?;
        if front.page_count < page_count {
            return None;
        }
        let nr = front.nr;
        if front.page_count > page_count {
            front.nr = BlockNr(front.nr.0 + i64::from(page_count));
            front.page_count -= page_count;
        } else {
            self.ranges.pop();
        }
        Some(nr)
    }

    /// Ranges front to back
    pub(crate) fn iter(&self) -> impl Iterator<Item = &FreeRange> {
        self.ranges.iter().rev()
    }
}
