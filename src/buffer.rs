//! Byte-budgeted chunk buffer.
//!
//! Payload bytes of every buffered record are concatenated into a single arena. The index keeps one
//! `(key, offset, len)` entry per record; sorting moves index entries only, the arena is never
//! reordered.

use crate::pool::SortPool;

/// Bytes appended after each payload in the arena.
const TERMINATOR: &[u8] = b"\n";

/// Default memory budget: 8 GiB.
pub const DEFAULT_BUDGET: u64 = 8 * 1024 * 1024 * 1024;

/// Index entry pointing into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: u64,
    pub offset: usize,
    pub len: usize,
}

impl IndexEntry {
    /// Sort key. Offsets grow in insertion order so equal keys keep their input order.
    pub fn sort_key(&self) -> (u64, usize) {
        (self.key, self.offset)
    }
}

/// A buffered record borrowed from the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    pub key: u64,
    pub payload: &'a [u8],
}

/// Arena builder.
pub struct ArenaBuilder {
    budget: usize,
    preallocate: bool,
}

impl ArenaBuilder {
    pub fn new(budget: u64, preallocate: bool) -> Self {
        ArenaBuilder {
            budget: usize::try_from(budget).unwrap_or(usize::MAX),
            preallocate,
        }
    }

    /// Creates a new arena.
    pub fn build(&self) -> Arena {
        if self.preallocate {
            Arena::with_capacity(self.budget)
        } else {
            Arena::new(self.budget)
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}

impl Default for ArenaBuilder {
    fn default() -> Self {
        ArenaBuilder::new(DEFAULT_BUDGET, false)
    }
}

/// Record buffer limited by the number of payload bytes it holds.
///
/// A record of serialized size `s` (payload plus terminator) fits while `len + s < budget`,
/// so the buffered byte count always stays below the budget.
pub struct Arena {
    budget: usize,
    bytes: Vec<u8>,
    index: Vec<IndexEntry>,
}

impl Arena {
    /// Creates an arena that grows on demand up to `budget` bytes.
    pub fn new(budget: usize) -> Self {
        Arena {
            budget,
            bytes: Vec::new(),
            index: Vec::new(),
        }
    }

    /// Creates an arena with the whole budget reserved up front.
    pub fn with_capacity(budget: usize) -> Self {
        Arena {
            budget,
            bytes: Vec::with_capacity(budget),
            index: Vec::new(),
        }
    }

    /// Size a payload occupies in the arena.
    pub fn serialized_size(payload: &[u8]) -> usize {
        payload.len().saturating_add(TERMINATOR.len())
    }

    /// Checks whether a payload could be buffered at all, even into an empty arena.
    pub fn admits(&self, payload: &[u8]) -> bool {
        Self::serialized_size(payload) < self.budget
    }

    /// Checks whether a payload fits next to the records already buffered.
    pub fn fits(&self, payload: &[u8]) -> bool {
        self.bytes
            .len()
            .checked_add(Self::serialized_size(payload))
            .map_or(false, |end| end < self.budget)
    }

    /// Buffers a record. The caller must check [`Arena::fits`] first.
    ///
    /// The arena doubles its allocation as it grows but never reserves more than the budget.
    pub fn push(&mut self, key: u64, payload: &[u8]) {
        debug_assert!(self.fits(payload));

        let offset = self.bytes.len();
        let end = offset + Self::serialized_size(payload);
        if end > self.bytes.capacity() {
            let capacity = self.bytes.capacity().saturating_mul(2).max(end).min(self.budget);
            self.bytes.reserve_exact(capacity - offset);
        }
        self.bytes.extend_from_slice(payload);
        self.bytes.extend_from_slice(TERMINATOR);
        self.index.push(IndexEntry {
            key,
            offset,
            len: payload.len(),
        });
    }

    /// Sorts the index by key on the given pool.
    pub fn sort(&mut self, pool: &impl SortPool) {
        pool.sort_index(&mut self.index);
    }

    /// Iterates over buffered records in index order.
    pub fn records(&self) -> impl Iterator<Item = RecordRef<'_>> + '_ {
        self.index.iter().map(move |entry| RecordRef {
            key: entry.key,
            payload: &self.bytes[entry.offset..entry.offset + entry.len],
        })
    }

    /// Drops buffered records keeping the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.index.clear();
    }

    /// Returns buffered records count.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns buffered bytes count.
    pub fn mem_size(&self) -> usize {
        self.bytes.len()
    }

    /// Returns bytes allocated for the arena.
    pub fn mem_capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}
