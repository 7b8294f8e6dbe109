// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replay container format.
//!
//! A container is a ZIP archive with exactly two entries:
//!
//! | Entry | Content |
//! |-------|---------|
//! | `recording.frames` | concatenated frames, see [`crate::frame`] |
//! | `metaData` | [`MetadataSnapshot`] as a flat JSON object |
//!
//! The frames entry comes first so it can be streamed while recording; the
//! metadata entry is written once when the recording ends.

pub mod zip;

use crate::error::{RecordingError, Result};
use crate::frame::{Frame, FrameReader};
use crate::metadata::MetadataSnapshot;
use std::path::Path;

/// Name of the streamed frame entry.
pub const FRAMES_ENTRY: &str = "recording.frames";

/// Name of the trailing metadata entry.
pub const METADATA_ENTRY: &str = "metaData";

/// Conventional file extension for containers.
pub const CONTAINER_EXTENSION: &str = "mcpr";

/// A parsed container.
#[derive(Debug, Clone)]
pub struct ContainerReader {
    frames: Vec<u8>,
    metadata: MetadataSnapshot,
    entry_names: Vec<String>,
}

impl ContainerReader {
    /// Parse a container held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let entries = zip::read_archive(bytes)?;
        let entry_names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();

        let mut frames = None;
        let mut metadata = None;
        for entry in entries {
            match entry.name.as_str() {
                FRAMES_ENTRY => frames = Some(entry.data),
                METADATA_ENTRY => metadata = Some(MetadataSnapshot::from_json(&entry.data)?),
                other => tracing::debug!("Ignoring unknown container entry `{}`", other),
            }
        }

        Ok(Self {
            frames: frames.ok_or_else(|| RecordingError::format("missing `recording.frames` entry"))?,
            metadata: metadata.ok_or_else(|| RecordingError::format("missing `metaData` entry"))?,
            entry_names,
        })
    }

    /// Read and parse a container file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn metadata(&self) -> &MetadataSnapshot {
        &self.metadata
    }

    /// Entry names in archive order.
    pub fn entry_names(&self) -> &[String] {
        &self.entry_names
    }

    /// Raw bytes of the frames entry.
    pub fn frame_bytes(&self) -> &[u8] {
        &self.frames
    }

    pub fn frames(&self) -> FrameReader<&[u8]> {
        FrameReader::new(&self.frames)
    }

    /// Decode every frame.
    pub fn read_all_frames(&self) -> Result<Vec<Frame>> {
        self.frames().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::zip::{DosDateTime, ZipStreamWriter};
    use super::*;
    use crate::frame::Direction;

    #[test]
    fn test_reader_requires_both_entries() {
        let mut zip = ZipStreamWriter::new(Vec::new(), 6, DosDateTime::now());
        zip.start_entry(FRAMES_ENTRY).expect("start");
        zip.finish_entry().expect("finish entry");
        let bytes = zip.finish().expect("finish");

        let err = ContainerReader::from_bytes(&bytes).expect_err("missing metadata");
        assert!(matches!(err, RecordingError::Format(_)));
    }

    #[test]
    fn test_reader_decodes_entries() {
        let frame = Frame::new(12, Direction::Inbound, vec![1, 2, 3]);
        let meta = MetadataSnapshot::new().with("serverName", "Lobby");

        let mut zip = ZipStreamWriter::new(Vec::new(), 6, DosDateTime::now());
        zip.start_entry(FRAMES_ENTRY).expect("start");
        zip.write_entry(&frame.encode().expect("encode")).expect("write");
        zip.finish_entry().expect("finish entry");
        zip.start_entry(METADATA_ENTRY).expect("start");
        zip.write_entry(&meta.to_json().expect("json")).expect("write");
        zip.finish_entry().expect("finish entry");
        let bytes = zip.finish().expect("finish");

        let reader = ContainerReader::from_bytes(&bytes).expect("parse");
        assert_eq!(reader.entry_names(), [FRAMES_ENTRY, METADATA_ENTRY]);
        assert_eq!(reader.metadata(), &meta);
        assert_eq!(reader.read_all_frames().expect("frames"), [frame]);
    }
}
