// Newline framing over arbitrary-sized stream reads.
use bstr::ByteSlice;
use bytes::{Bytes, BytesMut};

use crate::core::error::{Error, ErrorKind};

pub const FRAME_DELIMITER: u8 = b'\n';
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AssemblerState {
    Idle,
    Accumulating,
}

/// Result of one [`FrameAssembler::feed`] call.
#[derive(Debug)]
pub struct Feed {
    pub frames: Vec<Bytes>,
    pub overflow: Option<Error>,
}

/// Accumulates one connection's inbound bytes and cuts them into frames.
///
/// Each chunk is copied once into the pending buffer. Emitted frames are
/// split off without copying, so their storage is released as soon as the
/// caller drops them; only the undelimited tail stays pending.
#[derive(Debug)]
pub struct FrameAssembler {
    pending: BytesMut,
    scanned: usize,
    max_frame_bytes: usize,
}

impl FrameAssembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            scanned: 0,
            max_frame_bytes,
        }
    }

    pub fn state(&self) -> AssemblerState {
        if self.pending.is_empty() {
            AssemblerState::Idle
        } else {
            AssemblerState::Accumulating
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Adds `chunk` and returns every frame it completes, delimiter included.
    ///
    /// Frames completed by `chunk` are always returned. When the undelimited
    /// tail then exceeds the frame limit it is dropped and `overflow` carries a
    /// `Usage` error whose offset is the number of bytes dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Feed {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending[self.scanned..].find_byte(FRAME_DELIMITER) {
            let end = self.scanned + pos + 1;
            frames.push(self.pending.split_to(end).freeze());
            self.scanned = 0;
        }
        self.scanned = self.pending.len();

        let overflow = (self.pending.len() > self.max_frame_bytes).then(|| {
            let len = self.discard();
            Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "frame exceeds {} bytes without a delimiter",
                    self.max_frame_bytes
                ))
                .with_offset(len as u64)
        });
        Feed { frames, overflow }
    }

    /// Drops any partial frame and returns how many bytes were dropped.
    pub fn discard(&mut self) -> usize {
        let len = self.pending.len();
        self.pending = BytesMut::new();
        self.scanned = 0;
        len
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}
