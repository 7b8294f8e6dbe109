// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streaming ZIP archive writer and in-memory reader.
//!
//! The writer never seeks: every entry uses a data descriptor (general
//! purpose flag bit 3), so sizes and CRC follow the compressed data instead of
//! being patched into the local header. Entries are deflated.
//!
//! # Layout
//!
//! ```text
//! +-----------------------------------------------------------+
//! | LocalHeader(30 + name) | deflate data | DataDescriptor(16) |  entry 0
//! | LocalHeader(30 + name) | deflate data | DataDescriptor(16) |  entry 1
//! | CentralHeader(46 + name) ...                               |
//! | EndOfCentralDirectory(22)                                  |
//! +-----------------------------------------------------------+
//! ```
//!
//! Only the classic 32-bit layout is produced. Entries or archives beyond
//! 4 GiB fail on close.

use crate::error::{RecordingError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDateTime, Timelike};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

const VERSION_NEEDED: u16 = 20;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const FLAG_UTF8: u16 = 0x0800;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

const LOCAL_HEADER_SIZE: usize = 30;
const CENTRAL_HEADER_SIZE: usize = 46;
const END_OF_CENTRAL_DIR_SIZE: usize = 22;

/// MS-DOS packed modification time and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// Pack a local timestamp. Dates before 1980 clamp to 1980-01-01 00:00.
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self {
                time: 0,
                date: (1 << 5) | 1,
            };
        }
        let year = (dt.year() - 1980).min(127) as u16;
        Self {
            time: ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2),
            date: (year << 9) | ((dt.month() as u16) << 5) | dt.day() as u16,
        }
    }

    pub fn now() -> Self {
        Self::from_naive(chrono::Local::now().naive_local())
    }
}

/// Writer wrapper that counts bytes passed through.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct OpenEntry {
    name: String,
    header_offset: u64,
    data_start: u64,
    crc: crc32fast::Hasher,
    size: u64,
}

struct CentralRecord {
    name: String,
    crc: u32,
    compressed_size: u32,
    size: u32,
    header_offset: u32,
}

enum WriterState<W: Write> {
    Idle(CountingWriter<W>),
    Entry {
        encoder: DeflateEncoder<CountingWriter<W>>,
        entry: OpenEntry,
    },
    /// Finished, or poisoned by an earlier I/O failure.
    Done,
}

/// Append-only ZIP writer.
pub struct ZipStreamWriter<W: Write> {
    state: WriterState<W>,
    records: Vec<CentralRecord>,
    level: Compression,
    modified: DosDateTime,
}

impl<W: Write> ZipStreamWriter<W> {
    pub fn new(inner: W, level: u32, modified: DosDateTime) -> Self {
        Self {
            state: WriterState::Idle(CountingWriter { inner, count: 0 }),
            records: Vec::new(),
            level: Compression::new(level.min(9)),
            modified,
        }
    }

    /// Write a local header and start streaming a new entry.
    pub fn start_entry(&mut self, name: &str) -> io::Result<()> {
        let mut out = match std::mem::replace(&mut self.state, WriterState::Done) {
            WriterState::Idle(out) => out,
            other => {
                self.state = other;
                return Err(misuse("an entry is already open or the archive is closed"));
            }
        };

        let header_offset = out.count;
        out.write_u32::<LittleEndian>(LOCAL_HEADER_SIG)?;
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(FLAG_DATA_DESCRIPTOR | FLAG_UTF8)?;
        out.write_u16::<LittleEndian>(METHOD_DEFLATE)?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        // crc, compressed size, size: deferred to the data descriptor
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(name_len(name)?)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_all(name.as_bytes())?;

        let entry = OpenEntry {
            name: name.to_string(),
            header_offset,
            data_start: out.count,
            crc: crc32fast::Hasher::new(),
            size: 0,
        };
        self.state = WriterState::Entry {
            encoder: DeflateEncoder::new(out, self.level),
            entry,
        };
        Ok(())
    }

    /// Stream bytes into the open entry.
    pub fn write_entry(&mut self, buf: &[u8]) -> io::Result<()> {
        match &mut self.state {
            WriterState::Entry { encoder, entry } => {
                encoder.write_all(buf)?;
                entry.crc.update(buf);
                entry.size += buf.len() as u64;
                Ok(())
            }
            _ => Err(misuse("no entry is open")),
        }
    }

    /// Finish compression of the open entry and write its data descriptor.
    pub fn finish_entry(&mut self) -> io::Result<()> {
        let (encoder, entry) = match std::mem::replace(&mut self.state, WriterState::Done) {
            WriterState::Entry { encoder, entry } => (encoder, entry),
            other => {
                self.state = other;
                return Err(misuse("no entry is open"));
            }
        };

        let mut out = encoder.finish()?;
        let crc = entry.crc.finalize();
        let compressed_size = to_u32(out.count - entry.data_start, "entry compressed size")?;
        let size = to_u32(entry.size, "entry size")?;
        let header_offset = to_u32(entry.header_offset, "entry offset")?;

        out.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIG)?;
        out.write_u32::<LittleEndian>(crc)?;
        out.write_u32::<LittleEndian>(compressed_size)?;
        out.write_u32::<LittleEndian>(size)?;

        self.records.push(CentralRecord {
            name: entry.name,
            crc,
            compressed_size,
            size,
            header_offset,
        });
        self.state = WriterState::Idle(out);
        Ok(())
    }

    /// Write the central directory, flush, and return the destination.
    pub fn finish(&mut self) -> io::Result<W> {
        let mut out = match std::mem::replace(&mut self.state, WriterState::Done) {
            WriterState::Idle(out) => out,
            other => {
                self.state = other;
                return Err(misuse("entry still open or archive already closed"));
            }
        };

        let directory_offset = to_u32(out.count, "central directory offset")?;
        for record in &self.records {
            out.write_u32::<LittleEndian>(CENTRAL_HEADER_SIG)?;
            out.write_u16::<LittleEndian>(VERSION_NEEDED)?; // made by
            out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
            out.write_u16::<LittleEndian>(FLAG_DATA_DESCRIPTOR | FLAG_UTF8)?;
            out.write_u16::<LittleEndian>(METHOD_DEFLATE)?;
            out.write_u16::<LittleEndian>(self.modified.time)?;
            out.write_u16::<LittleEndian>(self.modified.date)?;
            out.write_u32::<LittleEndian>(record.crc)?;
            out.write_u32::<LittleEndian>(record.compressed_size)?;
            out.write_u32::<LittleEndian>(record.size)?;
            out.write_u16::<LittleEndian>(name_len(&record.name)?)?;
            out.write_u16::<LittleEndian>(0)?; // extra
            out.write_u16::<LittleEndian>(0)?; // comment
            out.write_u16::<LittleEndian>(0)?; // disk
            out.write_u16::<LittleEndian>(0)?; // internal attrs
            out.write_u32::<LittleEndian>(0)?; // external attrs
            out.write_u32::<LittleEndian>(record.header_offset)?;
            out.write_all(record.name.as_bytes())?;
        }
        let directory_size = to_u32(out.count - u64::from(directory_offset), "central directory size")?;
        let count = u16::try_from(self.records.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many entries"))?;

        out.write_u32::<LittleEndian>(END_OF_CENTRAL_DIR_SIG)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u32::<LittleEndian>(directory_size)?;
        out.write_u32::<LittleEndian>(directory_offset)?;
        out.write_u16::<LittleEndian>(0)?;
        out.flush()?;

        Ok(out.inner)
    }

    /// Sync-flush pending compressed data to the destination.
    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            WriterState::Idle(out) => out.flush(),
            WriterState::Entry { encoder, .. } => encoder.flush(),
            WriterState::Done => Err(misuse("archive is closed")),
        }
    }

    pub fn entry_open(&self) -> bool {
        matches!(self.state, WriterState::Entry { .. })
    }
}

fn misuse(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

fn name_len(name: &str) -> io::Result<u16> {
    u16::try_from(name.len()).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry name too long"))
}

fn to_u32(value: u64, what: &str) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, format!("{what} exceeds the 4 GiB zip limit"))
    })
}

/// A fully decompressed archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub method: u16,
    pub data: Vec<u8>,
}

/// Parse an archive held in memory, decompressing and CRC-checking every entry.
///
/// Entries come back in central directory order.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<ZipEntry>> {
    let eocd = find_end_of_central_dir(bytes)?;
    let mut r = &bytes[eocd + 4..];
    let _disk = r.read_u16::<LittleEndian>()?;
    let _directory_disk = r.read_u16::<LittleEndian>()?;
    let _entries_on_disk = r.read_u16::<LittleEndian>()?;
    let total_entries = r.read_u16::<LittleEndian>()?;
    let _directory_size = r.read_u32::<LittleEndian>()?;
    let directory_offset = r.read_u32::<LittleEndian>()? as usize;

    let mut dir = bytes
        .get(directory_offset..eocd)
        .ok_or_else(|| RecordingError::format("central directory offset out of range"))?;

    let mut entries = Vec::with_capacity(usize::from(total_entries));
    for _ in 0..total_entries {
        if dir.len() < CENTRAL_HEADER_SIZE || dir.read_u32::<LittleEndian>()? != CENTRAL_HEADER_SIG {
            return Err(RecordingError::format("bad central directory header"));
        }
        let _made_by = dir.read_u16::<LittleEndian>()?;
        let _needed = dir.read_u16::<LittleEndian>()?;
        let _flags = dir.read_u16::<LittleEndian>()?;
        let method = dir.read_u16::<LittleEndian>()?;
        let _time = dir.read_u16::<LittleEndian>()?;
        let _date = dir.read_u16::<LittleEndian>()?;
        let crc = dir.read_u32::<LittleEndian>()?;
        let compressed_size = dir.read_u32::<LittleEndian>()? as usize;
        let size = dir.read_u32::<LittleEndian>()? as usize;
        let name_len = usize::from(dir.read_u16::<LittleEndian>()?);
        let extra_len = usize::from(dir.read_u16::<LittleEndian>()?);
        let comment_len = usize::from(dir.read_u16::<LittleEndian>()?);
        let _disk = dir.read_u16::<LittleEndian>()?;
        let _internal = dir.read_u16::<LittleEndian>()?;
        let _external = dir.read_u32::<LittleEndian>()?;
        let header_offset = dir.read_u32::<LittleEndian>()? as usize;

        let mut name_buf = vec![0u8; name_len];
        dir.read_exact(&mut name_buf)?;
        let name = String::from_utf8(name_buf)
            .map_err(|_| RecordingError::format("entry name is not UTF-8"))?;
        let skip = extra_len + comment_len;
        dir = dir
            .get(skip..)
            .ok_or_else(|| RecordingError::format("central directory truncated"))?;

        let compressed = entry_data(bytes, header_offset, compressed_size)?;
        let data = match method {
            METHOD_STORED => compressed.to_vec(),
            METHOD_DEFLATE => {
                // The declared size is untrusted until the CRC check.
                let mut out = Vec::with_capacity(size.min(compressed.len().saturating_mul(8)));
                DeflateDecoder::new(compressed).read_to_end(&mut out)?;
                out
            }
            other => {
                return Err(RecordingError::format(format!(
                    "entry `{name}` uses unsupported method {other}"
                )))
            }
        };

        if data.len() != size {
            return Err(RecordingError::format(format!(
                "entry `{name}` size mismatch: expected {size}, got {}",
                data.len()
            )));
        }
        if crc32fast::hash(&data) != crc {
            return Err(RecordingError::format(format!("CRC mismatch in entry `{name}`")));
        }

        entries.push(ZipEntry { name, method, data });
    }

    Ok(entries)
}

fn find_end_of_central_dir(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < END_OF_CENTRAL_DIR_SIZE {
        return Err(RecordingError::format("file too small to be an archive"));
    }
    let sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
    let last = bytes.len() - END_OF_CENTRAL_DIR_SIZE;
    // The record may be followed by a comment of up to 64 KiB.
    let first = last.saturating_sub(usize::from(u16::MAX));
    (first..=last)
        .rev()
        .find(|&i| bytes[i..i + 4] == sig)
        .ok_or_else(|| RecordingError::format("end of central directory not found"))
}

fn entry_data(bytes: &[u8], header_offset: usize, compressed_size: usize) -> Result<&[u8]> {
    let mut header = bytes
        .get(header_offset..header_offset + LOCAL_HEADER_SIZE)
        .ok_or_else(|| RecordingError::format("local header out of range"))?;
    if header.read_u32::<LittleEndian>()? != LOCAL_HEADER_SIG {
        return Err(RecordingError::format("bad local header signature"));
    }
    // version, flags, method, time, date, crc, sizes
    let mut rest = &header[22..];
    let name_len = usize::from(rest.read_u16::<LittleEndian>()?);
    let extra_len = usize::from(rest.read_u16::<LittleEndian>()?);

    let start = header_offset + LOCAL_HEADER_SIZE + name_len + extra_len;
    bytes
        .get(start..start + compressed_size)
        .ok_or_else(|| RecordingError::format("entry data out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_time() -> DosDateTime {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_opt(14, 30, 22))
            .expect("valid date");
        DosDateTime::from_naive(dt)
    }

    #[test]
    fn test_dos_datetime_packing() {
        let packed = fixed_time();
        assert_eq!(packed.time, (14 << 11) | (30 << 5) | 11);
        assert_eq!(packed.date, (44 << 9) | (1 << 5) | 15);

        let old = NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid date");
        assert_eq!(DosDateTime::from_naive(old).date, (1 << 5) | 1);
    }

    #[test]
    fn test_two_entry_archive() {
        let mut zip = ZipStreamWriter::new(Vec::new(), 6, fixed_time());
        zip.start_entry("first.bin").expect("start");
        zip.write_entry(b"hello ").expect("write");
        zip.write_entry(b"world").expect("write");
        zip.finish_entry().expect("finish entry");
        zip.start_entry("second.json").expect("start");
        zip.write_entry(br#"{"a":1}"#).expect("write");
        zip.finish_entry().expect("finish entry");
        let bytes = zip.finish().expect("finish");

        assert_eq!(&bytes[..4], &LOCAL_HEADER_SIG.to_le_bytes());

        let entries = read_archive(&bytes).expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "first.bin");
        assert_eq!(entries[0].data, b"hello world");
        assert_eq!(entries[0].method, METHOD_DEFLATE);
        assert_eq!(entries[1].name, "second.json");
        assert_eq!(entries[1].data, br#"{"a":1}"#);
    }

    #[test]
    fn test_empty_entry() {
        let mut zip = ZipStreamWriter::new(Vec::new(), 6, fixed_time());
        zip.start_entry("empty").expect("start");
        zip.finish_entry().expect("finish entry");
        let bytes = zip.finish().expect("finish");

        let entries = read_archive(&bytes).expect("read");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].data.is_empty());
    }

    #[test]
    fn test_misuse_is_rejected() {
        let mut zip = ZipStreamWriter::new(Vec::new(), 6, fixed_time());
        assert!(zip.write_entry(b"x").is_err());
        assert!(zip.finish_entry().is_err());

        zip.start_entry("a").expect("start");
        assert!(zip.start_entry("b").is_err());
        assert!(zip.finish().is_err());
        assert!(zip.entry_open());

        zip.finish_entry().expect("finish entry");
        zip.finish().expect("finish");
        assert!(zip.finish().is_err());
    }

    #[test]
    fn test_corruption_detected() {
        let mut zip = ZipStreamWriter::new(Vec::new(), 0, fixed_time());
        zip.start_entry("data").expect("start");
        zip.write_entry(&[7u8; 64]).expect("write");
        zip.finish_entry().expect("finish entry");
        let mut bytes = zip.finish().expect("finish");

        // Level 0 emits stored deflate blocks; flip a payload byte.
        let idx = LOCAL_HEADER_SIZE + "data".len() + 5 + 10;
        bytes[idx] ^= 0xFF;
        assert!(read_archive(&bytes).is_err());

        assert!(matches!(read_archive(b"not a zip"), Err(RecordingError::Format(_))));
    }

    #[test]
    fn test_inflated_declared_size_rejected() {
        let mut zip = ZipStreamWriter::new(Vec::new(), 6, fixed_time());
        zip.start_entry("data").expect("start");
        zip.write_entry(b"small payload").expect("write");
        zip.finish_entry().expect("finish entry");
        let mut bytes = zip.finish().expect("finish");

        // Uncompressed size field of the central directory header.
        let sig = CENTRAL_HEADER_SIG.to_le_bytes();
        let central = bytes
            .windows(4)
            .position(|w| w == sig)
            .expect("central header");
        bytes[central + 24..central + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

        let err = read_archive(&bytes).expect_err("size mismatch");
        assert!(matches!(err, RecordingError::Format(ref m) if m.contains("size mismatch")));
    }
}
