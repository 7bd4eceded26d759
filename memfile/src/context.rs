//! Process-wide state shared by every memfile.
//!
//! One `MemContext` is created by whoever owns the buffer list and handed to
//! each memfile at open. It carries the only cross-memfile mutable state:
//! the resident byte total, the "don't release" switch, and the swap write
//! message rate limit.

use crate::options::MemOptions;
use message_log::{LogEntry, MessageLog};
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

/// Shared memory accounting, options and message sink
#[derive(Debug, Default)]
pub struct MemContext {
    options: RefCell<MemOptions>,
    total_mem_used: Cell<u64>,
    dont_release: Cell<bool>,
    did_swapwrite_msg: Cell<bool>,
    log: RefCell<MessageLog>,
}

impl MemContext {
    /// Creates a context with the given options
    pub fn new(options: MemOptions) -> Rc<Self> {
        Rc::new(Self {
            options: RefCell::new(options),
            ..Self::default()
        })
    }

    /// Creates a context with default options
    pub fn with_defaults() -> Rc<Self> {
        Self::new(MemOptions::default())
    }

    /// Current options
    pub fn options(&self) -> MemOptions {
        self.options.borrow().clone()
    }

    /// Replaces the options; budgets already computed at open are kept
    pub fn set_options(&self, options: MemOptions) {
        *self.options.borrow_mut() = options;
    }

    /// Bytes resident across all memfiles
    pub fn total_mem_used(&self) -> u64 {
        self.total_mem_used.get()
    }

    pub(crate) fn add_mem(&self, bytes: u64) {
        self.total_mem_used
            .set(self.total_mem_used.get().saturating_add(bytes));
    }

    pub(crate) fn sub_mem(&self, bytes: u64) {
        self.total_mem_used
            .set(self.total_mem_used.get().saturating_sub(bytes));
    }

    /// True once total resident memory reaches the process ceiling
    pub(crate) fn over_ceiling(&self) -> bool {
        (self.total_mem_used.get() >> 10) >= self.options.borrow().maxmemtot_kb
    }

    /// Whether eviction is currently disabled
    pub fn dont_release(&self) -> bool {
        self.dont_release.get()
    }

    /// Enables or disables eviction for every memfile
    pub fn set_dont_release(&self, value: bool) {
        self.dont_release.set(value);
    }

    /// Runs `f` with eviction disabled, restoring the previous setting after
    pub fn without_release<R>(&self, f: impl FnOnce() -> R) -> R {
        let saved = self.dont_release.replace(true);
        let result = f();
        self.dont_release.set(saved);
        result
    }

    /// Whether a swap write error has been reported since the last good write
    pub fn did_swapwrite_msg(&self) -> bool {
        self.did_swapwrite_msg.get()
    }

    pub(crate) fn set_did_swapwrite_msg(&self, value: bool) {
        self.did_swapwrite_msg.set(value);
    }

    /// Records a message
    pub fn record(&self, entry: LogEntry) {
        self.log.borrow_mut().record(entry);
    }

    /// Read access to recorded messages
    pub fn log(&self) -> Ref<'_, MessageLog> {
        self.log.borrow()
    }

    /// Takes all recorded messages
    pub fn drain_log(&self) -> Vec<LogEntry> {
        self.log.borrow_mut().drain()
    }
}
