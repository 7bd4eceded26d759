//! Chained hash table keyed by block number.
//!
//! Buckets are selected with `key & mask` on the two's-complement bit
//! pattern of the key, so negative block numbers spread over the same
//! buckets as positive ones. New entries go to the front of their chain.
//! The bucket array starts inline and doubles when the average chain grows
//! past `2^LOG_LOAD_FACTOR`; a rehash keeps the relative order of entries
//! that land in the same new bucket. The table never shrinks.
//!
//! Entries live in a slab and are linked through indices, which keeps
//! removal O(1) given the [`EntryId`] returned by [`BucketTable::add`].

/// Initial number of buckets (held inline)
pub const INIT_SIZE: usize = 64;

/// Grow when `count >> LOG_LOAD_FACTOR` exceeds the mask
pub const LOG_LOAD_FACTOR: u32 = 6;

/// Bucket multiplier on growth; must be a power of two
pub const GROWTH_FACTOR: usize = 2;

/// Handle to an entry in a [`BucketTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

#[derive(Debug)]
struct Entry<T> {
    key: i64,
    value: T,
    prev: Option<EntryId>,
    next: Option<EntryId>,
}

#[derive(Debug)]
enum Buckets {
    Inline([Option<EntryId>; INIT_SIZE]),
    Heap(Vec<Option<EntryId>>),
}

impl Buckets {
    fn as_slice(&self) -> &[Option<EntryId>] {
        match self {
            Buckets::Inline(b) => b,
            Buckets::Heap(b) => b,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [Option<EntryId>] {
        match self {
            Buckets::Inline(b) => b,
            Buckets::Heap(b) => b,
        }
    }
}

/// Growable chained hash table from `i64` keys to `T`
#[derive(Debug)]
pub struct BucketTable<T> {
    buckets: Buckets,
    mask: u64,
    count: usize,
    /// Set after a failed growth; the table stays at its current size
    fixed: bool,
    entries: Vec<Option<Entry<T>>>,
    vacant: Vec<usize>,
}

impl<T> Default for BucketTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BucketTable<T> {
    /// Creates an empty table with the inline bucket array
    pub fn new() -> Self {
        Self {
            buckets: Buckets::Inline([None; INIT_SIZE]),
            mask: INIT_SIZE as u64 - 1,
            count: 0,
            fixed: false,
            entries: Vec::new(),
            vacant: Vec::new(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.as_slice().len()
    }

    /// Whether growth has been disabled by an allocation failure
    #[cfg(test)]
    pub(crate) fn is_fixed(&self) -> bool {
        self.fixed
    }

    fn bucket_of(&self, key: i64) -> usize {
        // Mask is below the bucket count, which is a usize.
        ((key as u64) & self.mask) as usize
    }

    fn entry(&self, id: EntryId) -> Option<&Entry<T>> {
        self.entries.get(id.0)?.as_ref()
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry<T>> {
        self.entries.get_mut(id.0)?.as_mut()
    }

    /// Finds the first entry with `key` in its chain
    pub fn find(&self, key: i64) -> Option<EntryId> {
        let mut cursor = self.buckets.as_slice()[self.bucket_of(key)];
        while let Some(id) = cursor {
            let entry = self.entry(id)?;
            if entry.key == key {
                return Some(id);
            }
            cursor = entry.next;
        }
        None
    }

    /// Value stored under `id`
    pub fn get(&self, id: EntryId) -> Option<&T> {
        self.entry(id).map(|e| &e.value)
    }

    /// Key stored under `id`
    pub fn key(&self, id: EntryId) -> Option<i64> {
        self.entry(id).map(|e| e.key)
    }

    /// Adds an entry at the front of its chain.
    ///
    /// The key must not already be present. Never fails: if the bucket array
    /// cannot grow, the table keeps its size and lookups get slower.
    pub fn add(&mut self, key: i64, value: T) -> EntryId {
        let bucket = self.bucket_of(key);
        let head = self.buckets.as_slice()[bucket];
        let entry = Entry {
            key,
            value,
            prev: None,
            next: head,
        };
        let id = match self.vacant.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                EntryId(slot)
            }
            None => {
                let slot = self.entries.len();
                self.entries.push(Some(entry));
                EntryId(slot)
            }
        };
        if let Some(head) = head {
            if let Some(e) = self.entry_mut(head) {
                e.prev = Some(id);
            }
        }
        self.buckets.as_mut_slice()[bucket] = Some(id);
        self.count += 1;

        if !self.fixed && (self.count as u64 >> LOG_LOAD_FACTOR) > self.mask {
            if self.grow().is_err() {
                tracing::debug!(buckets = self.bucket_count(), "hash table growth failed, fixing size");
                self.fixed = true;
            }
        }
        id
    }

    /// Unlinks the entry and returns its value
    pub fn remove(&mut self, id: EntryId) -> Option<T> {
        let entry = self.entries.get_mut(id.0)?.take()?;
        match entry.prev {
            None => {
                let bucket = self.bucket_of(entry.key);
                self.buckets.as_mut_slice()[bucket] = entry.next;
            }
            Some(prev) => {
                if let Some(p) = self.entry_mut(prev) {
                    p.next = entry.next;
                }
            }
        }
        if let Some(next) = entry.next {
            if let Some(n) = self.entry_mut(next) {
                n.prev = entry.prev;
            }
        }
        self.vacant.push(id.0);
        self.count -= 1;
        Some(entry.value)
    }

    /// Multiplies the bucket count by [`GROWTH_FACTOR`] and rehashes.
    ///
    /// Each old bucket splits into `GROWTH_FACTOR` new buckets selected by
    /// the next key bits; entries keep their relative order.
    pub(crate) fn grow(&mut self) -> Result<(), std::collections::TryReserveError> {
        let old_len = self.bucket_count();
        let new_len = old_len * GROWTH_FACTOR;
        let mut buckets: Vec<Option<EntryId>> = Vec::new();
        buckets.try_reserve_exact(new_len)?;
        buckets.resize(new_len, None);

        let mut shift = 0u32;
        while (self.mask >> shift) != 0 {
            shift += 1;
        }

        for i in 0..old_len {
            let mut tails: [Option<EntryId>; GROWTH_FACTOR] = [None; GROWTH_FACTOR];
            let mut cursor = self.buckets.as_slice()[i];
            while let Some(id) = cursor {
                let (key, next) = match self.entry(id) {
                    Some(e) => (e.key, e.next),
                    None => break,
                };
                let j = (((key as u64) >> shift) as usize) & (GROWTH_FACTOR - 1);
                match tails[j] {
                    None => {
                        buckets[i + (j << shift)] = Some(id);
                        if let Some(e) = self.entry_mut(id) {
                            e.prev = None;
                        }
                    }
                    Some(tail) => {
                        if let Some(t) = self.entry_mut(tail) {
                            t.next = Some(id);
                        }
                        if let Some(e) = self.entry_mut(id) {
                            e.prev = Some(tail);
                        }
                    }
                }
                tails[j] = Some(id);
                cursor = next;
            }
            for tail in tails.into_iter().flatten() {
                if let Some(t) = self.entry_mut(tail) {
                    t.next = None;
                }
            }
        }

        self.buckets = Buckets::Heap(buckets);
        self.mask = new_len as u64 - 1;
        tracing::debug!(buckets = new_len, entries = self.count, "hash table grown");
        Ok(())
    }

    /// Keys in the chain of `bucket`, front to back
    #[cfg(test)]
    pub(crate) fn chain(&self, bucket: usize) -> Vec<i64> {
        let mut keys = Vec::new();
        let mut cursor = self.buckets.as_slice().get(bucket).copied().flatten();
        while let Some(id) = cursor {
            match self.entry(id) {
                Some(e) => {
                    keys.push(e.key);
                    cursor = e.next;
                }
                None => break,
            }
        }
        keys
    }
}
