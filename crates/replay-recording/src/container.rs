// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Container writer.
//!
//! Wraps one destination and drives it through the container lifecycle:
//!
//! ```text
//! Empty --open()--> FrameEntryOpen --finalize(meta)--> MetadataWritten --> Closed
//!                        |
//!                 append_frame_bytes()
//! ```
//!
//! Any I/O failure while opening or finalizing leaves the writer `Closed`;
//! the partially written destination must be treated as corrupt.

use crate::error::{RecordingError, Result};
use crate::format::zip::{DosDateTime, ZipStreamWriter};
use crate::format::{FRAMES_ENTRY, METADATA_ENTRY};
use crate::metadata::MetadataSnapshot;
use std::io::{self, Write};

/// Default deflate level for container entries.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Observable container lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Empty,
    FrameEntryOpen,
    MetadataWritten,
    Closed,
}

enum Inner<W: Write> {
    Empty(W),
    Open(ZipStreamWriter<W>),
    Closed,
}

/// Writes a two-entry replay container to a single destination.
pub struct ContainerWriter<W: Write> {
    inner: Inner<W>,
    state: ContainerState,
    compression_level: u32,
    modified: DosDateTime,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(destination: W) -> Self {
        Self::with_compression(destination, DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn with_compression(destination: W, level: u32) -> Self {
        Self {
            inner: Inner::Empty(destination),
            state: ContainerState::Empty,
            compression_level: level,
            modified: DosDateTime::now(),
        }
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Start the archive and open the frames entry.
    pub fn open(&mut self) -> Result<()> {
        let destination = match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Empty(w) => w,
            other => {
                self.inner = other;
                return Err(self.wrong_state("open"));
            }
        };

        self.state = ContainerState::Closed;
        let mut zip = ZipStreamWriter::new(destination, self.compression_level, self.modified);
        zip.start_entry(FRAMES_ENTRY)?;
        self.inner = Inner::Open(zip);
        self.state = ContainerState::FrameEntryOpen;
        Ok(())
    }

    /// Stream pre-encoded frame bytes into the frames entry.
    pub fn append_frame_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::Open(zip) if self.state == ContainerState::FrameEntryOpen => {
                zip.write_entry(bytes)?;
                Ok(())
            }
            _ => Err(self.wrong_state("append frame bytes")),
        }
    }

    /// Close the frames entry, write `metadata`, and close the archive.
    ///
    /// Returns the destination after it has been flushed.
    pub fn finalize(&mut self, metadata: &MetadataSnapshot) -> Result<W> {
        let mut zip = match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Open(zip) if self.state == ContainerState::FrameEntryOpen => zip,
            other => {
                self.inner = other;
                return Err(self.wrong_state("finalize"));
            }
        };
        self.state = ContainerState::Closed;

        let json = metadata.to_json()?;
        zip.finish_entry()?;
        zip.start_entry(METADATA_ENTRY)?;
        zip.write_entry(&json)?;
        zip.finish_entry()?;
        self.state = ContainerState::MetadataWritten;

        let destination = zip.finish()?;
        self.state = ContainerState::Closed;
        Ok(destination)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Inner::Empty(w) => w.flush(),
            Inner::Open(zip) => zip.flush(),
            Inner::Closed => Ok(()),
        }
    }

    fn wrong_state(&self, op: &str) -> RecordingError {
        RecordingError::invalid_state(format!("cannot {op} in state {:?}", self.state))
    }
}

/// Frames written through `Write` land in the frames entry.
impl<W: Write> Write for ContainerWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append_frame_bytes(buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        ContainerWriter::flush(self)
    }
}

fn into_io(e: RecordingError) -> io::Error {
    match e {
        RecordingError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ContainerReader;
    use crate::frame::{encode_frame, Direction};

    fn open_writer() -> ContainerWriter<Vec<u8>> {
        let mut writer = ContainerWriter::new(Vec::new());
        assert_eq!(writer.state(), ContainerState::Empty);
        writer.open().expect("open");
        assert_eq!(writer.state(), ContainerState::FrameEntryOpen);
        writer
    }

    #[test]
    fn test_append_before_open_fails() {
        let mut writer = ContainerWriter::new(Vec::new());
        let err = writer.append_frame_bytes(b"x").expect_err("not open");
        assert!(matches!(err, RecordingError::InvalidState(_)));
        assert!(matches!(
            writer.finalize(&MetadataSnapshot::new()),
            Err(RecordingError::InvalidState(_))
        ));
    }

    #[test]
    fn test_open_twice_fails() {
        let mut writer = open_writer();
        assert!(matches!(writer.open(), Err(RecordingError::InvalidState(_))));
        assert_eq!(writer.state(), ContainerState::FrameEntryOpen);
    }

    #[test]
    fn test_finalize_writes_two_entries() {
        let mut writer = open_writer();
        let frame = encode_frame(3, Direction::Outbound, b"payload").expect("encode");
        writer.append_frame_bytes(&frame).expect("append");
        writer.write_all(&frame).expect("write");

        let meta = MetadataSnapshot::new().with("duration", 3i32);
        let bytes = writer.finalize(&meta).expect("finalize");
        assert_eq!(writer.state(), ContainerState::Closed);

        let reader = ContainerReader::from_bytes(&bytes).expect("parse");
        assert_eq!(reader.entry_names().len(), 2);
        assert_eq!(reader.read_all_frames().expect("frames").len(), 2);
        assert_eq!(reader.metadata(), &meta);
    }

    #[test]
    fn test_finalize_twice_and_append_after_close_fail() {
        let mut writer = open_writer();
        writer.finalize(&MetadataSnapshot::new()).expect("finalize");

        assert!(matches!(
            writer.finalize(&MetadataSnapshot::new()),
            Err(RecordingError::InvalidState(_))
        ));
        assert!(matches!(
            writer.append_frame_bytes(b"late"),
            Err(RecordingError::InvalidState(_))
        ));
        assert!(writer.write(b"late").is_err());
    }
}
