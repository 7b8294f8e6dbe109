// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet framing.
//!
//! # Frame Format
//!
//! ```text
//! +--------------------------------------------------------+
//! | varint(time_offset_ms << 1 | dir) | varint(len) | data |
//! +--------------------------------------------------------+
//! ```
//!
//! `dir` is 0 for outbound (server to client) and 1 for inbound. There is no
//! other framing, so a frame must always be written in one piece.

use crate::error::{RecordingError, Result};
use crate::varint::{decode_varint, encode_varint, read_varint, varint_len, VarintError};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

/// Direction of a captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Sent by the server to the client.
    Outbound,
    /// Received by the server from the client.
    Inbound,
}

impl Direction {
    /// Low bit of the frame header.
    pub fn bit(self) -> u64 {
        match self {
            Self::Outbound => 0,
            Self::Inbound => 1,
        }
    }

    pub fn from_bit(bit: u64) -> Self {
        if bit & 1 == 0 {
            Self::Outbound
        } else {
            Self::Inbound
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Milliseconds since the recording started.
    pub time_offset_ms: u64,
    pub direction: Direction,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(time_offset_ms: u64, direction: Direction, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            time_offset_ms,
            direction,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_frame(self.time_offset_ms, self.direction, &self.payload)
    }

    /// Decode a frame from the front of `buf`, returning it and the bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, header_len) = decode_varint(buf)?;
        let (len, len_len) = decode_varint(&buf[header_len..])?;
        let start = header_len + len_len;
        let len = usize::try_from(len)
            .map_err(|_| RecordingError::format("frame length exceeds address space"))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| RecordingError::format("frame payload truncated"))?;

        let frame = Self {
            time_offset_ms: header >> 1,
            direction: Direction::from_bit(header),
            payload: buf[start..end].to_vec(),
        };
        Ok((frame, end))
    }
}

/// Encode a single frame.
///
/// Fails only when `time_offset_ms` does not fit in 63 bits.
pub fn encode_frame(time_offset_ms: u64, direction: Direction, payload: &[u8]) -> Result<Vec<u8>> {
    if time_offset_ms > u64::MAX >> 1 {
        return Err(VarintError::Overflow.into());
    }
    let header = time_offset_ms << 1 | direction.bit();
    let len = payload.len() as u64;

    let mut out = Vec::with_capacity(varint_len(header) + varint_len(len) + payload.len());
    encode_varint(header, &mut out);
    encode_varint(len, &mut out);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Reads consecutive frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next frame, or `None` at a clean end of stream.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let header = match read_varint(&mut self.inner) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(into_frame_error(e)),
        };
        let len = read_varint(&mut self.inner).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => RecordingError::format("stream ended inside frame header"),
            _ => into_frame_error(e),
        })?;

        let mut payload = Vec::new();
        let read = (&mut self.inner).take(len).read_to_end(&mut payload)?;
        if read as u64 != len {
            return Err(RecordingError::format(format!(
                "frame payload truncated: expected {len} bytes, got {read}"
            )));
        }

        Ok(Some(Frame {
            time_offset_ms: header >> 1,
            direction: Direction::from_bit(header),
            payload,
        }))
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

fn into_frame_error(e: io::Error) -> RecordingError {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<VarintError>()) {
        Some(v) => RecordingError::MalformedVarint(*v),
        None => RecordingError::Io(e),
    }
}
