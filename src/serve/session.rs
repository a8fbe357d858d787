//! Purpose: Drive one client connection from first byte to close.
//! Exports: `Session`, `SessionReport`, `RECV_BUFFER_BYTES`.
//! Role: Runs on its own thread; owns the stream and the partial frame buffer.
//! Invariants: Each complete frame is either one append or one seek, followed by one echo.
//! Invariants: Partial frames are never appended; they are dropped when the session ends.
//! Invariants: The stream is dropped exactly once, before the report is returned.
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;

use crate::core::command::parse_seek;
use crate::core::frame::FrameAssembler;
use crate::serve::shared::SharedLog;
use crate::serve::shutdown::Shutdown;

pub const RECV_BUFFER_BYTES: usize = 4096;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionReport {
    pub frames: u64,
    pub appended: u64,
    pub seeks: u64,
    pub failed_ops: u64,
    pub discarded_bytes: u64,
}

pub struct Session<S> {
    id: u64,
    stream: S,
    log: Arc<SharedLog>,
    shutdown: Shutdown,
    assembler: FrameAssembler,
    report: SessionReport,
}

enum Flow {
    Continue,
    Close,
}

impl<S: Read + Write> Session<S> {
    pub fn new(
        id: u64,
        stream: S,
        log: Arc<SharedLog>,
        shutdown: Shutdown,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            id,
            stream,
            log,
            shutdown,
            assembler: FrameAssembler::new(max_frame_bytes),
            report: SessionReport::default(),
        }
    }

    pub fn run(mut self) -> SessionReport {
        tracing::debug!(session = self.id, "session started");
        let mut buf = [0u8; RECV_BUFFER_BYTES];

        while !self.shutdown.is_requested() {
            let read = match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    if !self.shutdown.is_requested() {
                        tracing::error!(session = self.id, error = %err, "receive failed");
                    }
                    break;
                }
            };

            let feed = self.assembler.feed(&buf[..read]);

            let mut flow = Flow::Continue;
            for frame in feed.frames {
                if let Flow::Close = self.handle_frame(frame) {
                    flow = Flow::Close;
                    break;
                }
            }
            if let Some(err) = feed.overflow {
                self.report.discarded_bytes += err.offset().unwrap_or_default();
                tracing::warn!(session = self.id, error = %err, "closing session");
                flow = Flow::Close;
            }
            if let Flow::Close = flow {
                break;
            }
        }

        let discarded = self.assembler.discard();
        if discarded > 0 {
            tracing::debug!(session = self.id, bytes = discarded, "dropped partial frame");
        }
        self.report.discarded_bytes += discarded as u64;

        let Self { id, stream, report, .. } = self;
        drop(stream);
        tracing::debug!(session = id, frames = report.frames, "session finished");
        report
    }

    fn handle_frame(&mut self, frame: Bytes) -> Flow {
        self.report.frames += 1;

        let cursor = match parse_seek(&frame) {
            Some(seek) => match self.log.seek(seek) {
                Ok(offset) => {
                    self.report.seeks += 1;
                    offset
                }
                Err(err) => {
                    self.report.failed_ops += 1;
                    tracing::warn!(
                        session = self.id,
                        record = seek.record,
                        offset = seek.offset,
                        error = %err,
                        "seek rejected"
                    );
                    0
                }
            },
            None => {
                match self.log.append(&frame) {
                    Ok(()) => self.report.appended += 1,
                    Err(err) => {
                        self.report.failed_ops += 1;
                        tracing::error!(session = self.id, error = %err, "append failed");
                    }
                }
                0
            }
        };

        self.reply(cursor)
    }

    fn reply(&mut self, cursor: u64) -> Flow {
        let content = match self.log.read_from(cursor) {
            Ok(content) => content,
            Err(err) => {
                self.report.failed_ops += 1;
                tracing::error!(session = self.id, error = %err, "read failed");
                return Flow::Continue;
            }
        };

        match self.stream.write_all(&content).and_then(|()| self.stream.flush()) {
            Ok(()) => Flow::Continue,
            Err(err) => {
                if !self.shutdown.is_requested() {
                    tracing::error!(session = self.id, error = %err, "send failed");
                }
                Flow::Close
            }
        }
    }
}
