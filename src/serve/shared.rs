//! Purpose: Process-wide coordinator guarding the one backing medium.
//! Exports: `SharedLog`.
//! Role: Every session and the timestamp injector reach the medium only through here.
//! Invariants: Appends and seeks hold the write lock for exactly one medium call.
//! Invariants: Reads hold the read lock for one copy; no caller does network I/O under a guard.
use parking_lot::RwLock;

use crate::core::command::SeekTo;
use crate::core::error::Error;
use crate::core::medium::Medium;

pub struct SharedLog {
    medium: RwLock<Box<dyn Medium>>,
    kind: &'static str,
}

impl SharedLog {
    pub fn new(medium: impl Medium + 'static) -> Self {
        Self::from_boxed(Box::new(medium))
    }

    pub fn from_boxed(medium: Box<dyn Medium>) -> Self {
        let kind = medium.kind();
        Self {
            medium: RwLock::new(medium),
            kind,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn append(&self, record: &[u8]) -> Result<(), Error> {
        self.medium.write().append(record)
    }

    /// Resolves a seek command to a logical byte offset.
    ///
    /// Taken under the write lock so the position cannot shift between the
    /// lookup and a concurrent append.
    pub fn seek(&self, seek: SeekTo) -> Result<u64, Error> {
        let medium = self.medium.write();
        medium.locate(seek.record, seek.offset)
    }

    pub fn read_from(&self, offset: u64) -> Result<Vec<u8>, Error> {
        self.medium.read().read_from(offset)
    }

    pub fn read_all(&self) -> Result<Vec<u8>, Error> {
        self.read_from(0)
    }

    pub fn close(&self) -> Result<(), Error> {
        self.medium.write().close()
    }
}
