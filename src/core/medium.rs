//! Purpose: Storage backends holding the log's record bytes.
//! Exports: `Medium`, `SlotMedium`, `FileMedium`.
//! Role: The only state shared between sessions; callers provide all in-process locking.
//! Invariants: An append either stores the whole record or leaves the medium unchanged.
//! Invariants: Reads return records oldest-to-newest exactly as they were appended.
//! Invariants: Only `SlotMedium` is record-indexed; `FileMedium::locate` fails with `Unsupported`.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};
use crate::core::ring::SlottedLog;

pub trait Medium: Send + Sync {
    /// Stores `record` as one unit.
    fn append(&mut self, record: &[u8]) -> Result<(), Error>;

    /// Live content from logical byte `offset` to the end.
    fn read_from(&self, offset: u64) -> Result<Vec<u8>, Error>;

    /// Translates a record-indexed position into a logical byte offset.
    fn locate(&self, record: u32, offset: u32) -> Result<u64, Error>;

    fn kind(&self) -> &'static str;

    fn read_all(&self) -> Result<Vec<u8>, Error> {
        self.read_from(0)
    }

    /// Releases whatever the medium holds outside the process.
    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Fixed-slot in-memory medium with device-style seek support.
#[derive(Debug, Default)]
pub struct SlotMedium {
    log: SlottedLog,
}

impl SlotMedium {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            log: SlottedLog::new(capacity)?,
        })
    }

    pub fn log(&self) -> &SlottedLog {
        &self.log
    }
}

impl Medium for SlotMedium {
    fn append(&mut self, record: &[u8]) -> Result<(), Error> {
        if let Some(evicted) = self.log.insert(Bytes::copy_from_slice(record)) {
            tracing::debug!(bytes = evicted.len(), "evicted oldest record");
        }
        Ok(())
    }

    fn read_from(&self, offset: u64) -> Result<Vec<u8>, Error> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(self.log.copy_from(offset))
    }

    fn locate(&self, record: u32, offset: u32) -> Result<u64, Error> {
        self.log
            .find_by_record_offset(record as usize, offset as usize)
            .map(|global| global as u64)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound).with_message(format!(
                    "no byte {offset} in record {record} ({} live records)",
                    self.log.live_count()
                ))
            })
    }

    fn kind(&self) -> &'static str {
        "slots"
    }
}

/// Append-only file reopened for every operation.
#[derive(Clone, Debug)]
pub struct FileMedium {
    path: PathBuf,
}

impl FileMedium {
    /// Creates a medium at `path`, discarding whatever a previous run left there.
    ///
    /// A relative `path` is resolved against the current directory now, so
    /// later changes of directory (daemonizing) keep addressing the same file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to resolve data file path")
                .with_path(path)
                .with_source(err)
        })?;
        let medium = Self { path: absolute };
        medium.remove()?;
        Ok(medium)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error("failed to remove data file", err)),
        }
    }

    fn io_error(&self, message: &str, err: io::Error) -> Error {
        Error::new(ErrorKind::Io)
            .with_message(message)
            .with_path(&self.path)
            .with_source(err)
    }

    fn lock_error(&self, err: io::Error) -> Error {
        Error::new(lock_error_kind(&err))
            .with_message("failed to lock data file")
            .with_path(&self.path)
            .with_source(err)
    }
}

impl Medium for FileMedium {
    fn append(&mut self, record: &[u8]) -> Result<(), Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.io_error("failed to open data file for append", err))?;
        FileExt::lock_exclusive(&file).map_err(|err| self.lock_error(err))?;
        let _lock = FileLock { file: &file };

        let before = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| self.io_error("failed to stat data file", err))?;

        let mut writer = &file;
        let written = writer.write_all(record).and_then(|()| writer.flush());
        if let Err(err) = written {
            if let Err(truncate_err) = file.set_len(before) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "failed to roll back partial append"
                );
            }
            return Err(self
                .io_error("failed to append record", err)
                .with_offset(before));
        }
        Ok(())
    }

    fn read_from(&self, offset: u64) -> Result<Vec<u8>, Error> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.io_error("failed to open data file for read", err)),
        };
        FileExt::lock_shared(&file).map_err(|err| self.lock_error(err))?;
        let _lock = FileLock { file: &file };

        let mut reader = &file;
        let mut buf = Vec::new();
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|err| self.io_error("failed to seek data file", err).with_offset(offset))?;
        reader
            .read_to_end(&mut buf)
            .map_err(|err| self.io_error("failed to read data file", err))?;
        Ok(buf)
    }

    fn locate(&self, _record: u32, _offset: u32) -> Result<u64, Error> {
        Err(Error::new(ErrorKind::Unsupported)
            .with_message("seek is not supported by the file medium")
            .with_path(&self.path)
            .with_hint("Run with --medium slots to enable record seeks."))
    }

    fn kind(&self) -> &'static str {
        "file"
    }

    fn close(&mut self) -> Result<(), Error> {
        self.remove()
    }
}

struct FileLock<'a> {
    file: &'a File,
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}
