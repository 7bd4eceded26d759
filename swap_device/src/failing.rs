//! # Failing Swap Device
//!
//! A [`SwapDevice`] wrapper that simulates failures, for exercising the
//! write-failure and read-failure paths of the block store (full disk,
//! unreadable swap file) without real hardware trouble.
//!
//! The policy lives behind a shared [`FailureControl`] handle so a test can
//! change it after the device has been handed over to its owner.

use crate::{FlushMode, SwapDevice, SwapError};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Policy for when failures should occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Never fail (passthrough)
    Never,
    /// Every write fails (disk full)
    AllWrites,
    /// Fail after N successful writes
    AfterWrites(usize),
    /// Fail writes that start at one of these byte offsets
    OnOffsets(Vec<u64>),
    /// Every read fails
    AllReads,
}

#[derive(Debug)]
struct FailureState {
    policy: FailurePolicy,
    write_count: usize,
    failed_writes: usize,
}

impl FailureState {
    fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            write_count: 0,
            failed_writes: 0,
        }
    }

    fn write_should_fail(&self, offset: u64) -> bool {
        match &self.policy {
            FailurePolicy::Never | FailurePolicy::AllReads => false,
            FailurePolicy::AllWrites => true,
            FailurePolicy::AfterWrites(n) => self.write_count >= *n,
            FailurePolicy::OnOffsets(offsets) => offsets.contains(&offset),
        }
    }
}

/// Shared handle for inspecting and changing a [`FailingSwap`]'s policy
#[derive(Debug, Clone)]
pub struct FailureControl {
    state: Rc<RefCell<FailureState>>,
}

impl FailureControl {
    /// Replace the policy and reset the counters
    pub fn set_policy(&self, policy: FailurePolicy) {
        *self.state.borrow_mut() = FailureState::new(policy);
    }

    /// Number of writes that reached the inner device
    pub fn write_count(&self) -> usize {
        self.state.borrow().write_count
    }

    /// Number of writes rejected by the policy
    pub fn failed_writes(&self) -> usize {
        self.state.borrow().failed_writes
    }
}

/// Wrapper around a [`SwapDevice`] that can simulate failures
#[derive(Debug)]
pub struct FailingSwap<D: SwapDevice> {
    inner: D,
    state: Rc<RefCell<FailureState>>,
}

impl<D: SwapDevice> FailingSwap<D> {
    /// Create a new failing device with the given policy
    pub fn new(inner: D, policy: FailurePolicy) -> Self {
        Self {
            inner,
            state: Rc::new(RefCell::new(FailureState::new(policy))),
        }
    }

    /// Handle sharing this device's policy and counters
    pub fn control(&self) -> FailureControl {
        FailureControl {
            state: Rc::clone(&self.state),
        }
    }
}

impl<D: SwapDevice> SwapDevice for FailingSwap<D> {
    fn len_bytes(&self) -> u64 {
        self.inner.len_bytes()
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SwapError> {
        if self.state.borrow().policy == FailurePolicy::AllReads {
            return Err(SwapError::Injected { offset });
        }
        self.inner.read_exact_at(offset, buf)
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), SwapError> {
        {
            let mut state = self.state.borrow_mut();
            if state.write_should_fail(offset) {
                state.failed_writes += 1;
                return Err(SwapError::Injected { offset });
            }
            state.write_count += 1;
        }
        self.inner.write_all_at(offset, buf)
    }

    fn flush(&mut self, mode: FlushMode) -> Result<(), SwapError> {
        // Flush failures follow write failures.
        let fail = {
            let state = self.state.borrow();
            match state.policy {
                FailurePolicy::AllWrites => true,
                FailurePolicy::AfterWrites(n) => state.write_count >= n,
                _ => false,
            }
        };
        if fail {
            return Err(SwapError::Injected { offset: 0 });
        }
        self.inner.flush(mode)
    }

    fn preferred_page_size(&self) -> Option<u32> {
        self.inner.preferred_page_size()
    }

    fn path(&self) -> Option<&Path> {
        self.inner.path()
    }
}
