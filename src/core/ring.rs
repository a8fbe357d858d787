//! Purpose: Fixed-capacity ring of whole records with overwrite-oldest eviction.
//! Exports: `SlottedLog`, `EntryRef`, `DEFAULT_CAPACITY`.
//! Role: Pure in-memory index used by the slot medium; performs no I/O and no locking.
//! Invariants: `write_index, read_index < capacity`; `full` implies `write_index == read_index`.
//! Invariants: Live records are the circular range `[read_index, write_index)`, or every slot when full.
//! Invariants: Eviction is whole-record and happens in the same call as the insert that causes it.
use bytes::Bytes;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_CAPACITY: usize = 10;

/// A live record located by a logical byte offset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntryRef<'a> {
    /// Position of the record counted from the oldest live record.
    pub index: usize,
    /// Byte offset inside `record`.
    pub offset: usize,
    pub record: &'a [u8],
}

/// Bounded log of variable-length records addressed as one flat byte space.
///
/// Callers serialize access themselves so several operations can share one
/// critical section.
#[derive(Debug)]
pub struct SlottedLog {
    slots: Box<[Bytes]>,
    write_index: usize,
    read_index: usize,
    full: bool,
}

impl SlottedLog {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("log capacity must be greater than zero"));
        }
        Ok(Self::with_slots(capacity))
    }

    fn with_slots(capacity: usize) -> Self {
        Self {
            slots: vec![Bytes::new(); capacity].into_boxed_slice(),
            write_index: 0,
            read_index: 0,
            full: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Stores `record` in the next slot.
    ///
    /// When the ring is already full the oldest record is evicted and handed
    /// back to the caller; it is unreachable by any lookup once this returns.
    pub fn insert(&mut self, record: Bytes) -> Option<Bytes> {
        debug_assert!(self.write_index < self.capacity());
        debug_assert!(self.read_index < self.capacity());
        debug_assert!(!self.full || self.write_index == self.read_index);

        let evicted = std::mem::replace(&mut self.slots[self.write_index], record);
        self.write_index = self.advance(self.write_index);

        if self.full {
            self.read_index = self.write_index;
            Some(evicted)
        } else {
            if self.write_index == self.read_index {
                self.full = true;
            }
            None
        }
    }

    pub fn live_count(&self) -> usize {
        if self.full {
            self.capacity()
        } else if self.write_index >= self.read_index {
            self.write_index - self.read_index
        } else {
            self.write_index + self.capacity() - self.read_index
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.iter().map(|record| record.len()).sum()
    }

    /// Live records from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> + '_ {
        (0..self.live_count()).map(move |i| &self.slots[self.physical(i)])
    }

    /// Finds the record owning byte `offset` of the concatenated live records.
    pub fn find_by_byte_offset(&self, offset: usize) -> Option<EntryRef<'_>> {
        let mut start = 0usize;
        for (index, record) in self.iter().enumerate() {
            let end = start + record.len();
            if offset < end {
                return Some(EntryRef {
                    index,
                    offset: offset - start,
                    record: record.as_ref(),
                });
            }
            start = end;
        }
        None
    }

    /// Translates `(index, offset)` into a logical byte offset.
    ///
    /// `index` counts live records from the oldest one.
    pub fn find_by_record_offset(&self, index: usize, offset: usize) -> Option<usize> {
        if index >= self.live_count() {
            return None;
        }
        let mut global = 0usize;
        for (i, record) in self.iter().enumerate() {
            if i == index {
                return (offset < record.len()).then_some(global + offset);
            }
            global += record.len();
        }
        None
    }

    /// Concatenation of the live records starting at logical byte `offset`.
    pub fn copy_from(&self, offset: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes().saturating_sub(offset));
        let mut start = 0usize;
        for record in self.iter() {
            let end = start + record.len();
            if end > offset {
                let skip = offset.saturating_sub(start);
                out.extend_from_slice(&record[skip..]);
            }
            start = end;
        }
        out
    }

    fn physical(&self, logical: usize) -> usize {
        (self.read_index + logical) % self.capacity()
    }

    fn advance(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity() { 0 } else { next }
    }
}

impl Default for SlottedLog {
    fn default() -> Self {
        Self::with_slots(DEFAULT_CAPACITY)
    }
}
