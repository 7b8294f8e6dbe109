// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recording session.
//!
//! A [`RecordingSession`] timestamps captured packets against its start
//! instant, encodes them as frames and fans them out to every registered
//! output. Outputs are either container-wrapped (ZIP with trailing metadata)
//! or raw (bare frame stream).
//!
//! All output mutations and packet writes go through one mutex, so frames
//! never interleave on a destination and time offsets are non-decreasing on
//! every output. Finalizing a container happens after its output has been
//! unregistered, outside the lock.

use crate::config::{PlatformInfo, RecorderConfig};
use crate::container::ContainerWriter;
use crate::error::{DestinationError, RecordingError, Result};
use crate::frame::{encode_frame, Direction};
use crate::metadata::*;
use crate::sink::{MultiSink, WriteReport};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Boxed writable destination supplied by the caller.
pub type Destination = Box<dyn Write + Send>;

/// Opaque identifier of a registered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputHandle(pub(crate) u64);

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an output is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// ZIP container with frames and metadata entries.
    Container,
    /// Bare concatenated frames.
    Raw,
}

/// Registered destination as seen by the sink.
enum Output {
    Container(ContainerWriter<Destination>),
    Raw(Destination),
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Container(c) => c.write(buf),
            Self::Raw(w) => w.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Container(c) => c.write_all(buf),
            Self::Raw(w) => w.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Container(c) => Write::flush(c),
            Self::Raw(w) => w.flush(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputState {
    Active,
    /// Dropped from the sink after a write failure; awaiting `end_recording`.
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct OutputEntry {
    kind: OutputKind,
    state: OutputState,
}

#[derive(Default)]
struct Registry {
    sink: MultiSink<Output>,
    outputs: HashMap<OutputHandle, OutputEntry>,
}

impl Registry {
    /// Unregister outputs that failed a write and close their destinations.
    fn detach_failed(&mut self, report: &WriteReport) {
        for failure in &report.failures {
            if let Some(entry) = self.outputs.get_mut(&failure.handle) {
                entry.state = OutputState::Failed;
            }
            if self.sink.remove(failure.handle).is_some() {
                tracing::warn!("Detached output {}: {}", failure.handle, failure.source);
            }
        }
    }
}

/// Recording statistics.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Frames written through the sink.
    pub frames_written: u64,

    /// Encoded bytes per output (not multiplied by output count).
    pub bytes_written: u64,

    /// Outputs currently receiving frames.
    pub active_outputs: usize,
}

/// Records one connection into any number of outputs.
pub struct RecordingSession {
    config: RecorderConfig,
    platform: PlatformInfo,
    start: Instant,
    start_epoch_ms: i64,
    participants: DashSet<Uuid>,
    registry: Mutex<Registry>,
    next_handle: AtomicU64,
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl RecordingSession {
    /// Start a new session; the start time is taken now.
    pub fn new(config: RecorderConfig, platform: PlatformInfo) -> Self {
        let session = Self {
            config,
            platform,
            start: Instant::now(),
            start_epoch_ms: chrono::Utc::now().timestamp_millis(),
            participants: DashSet::new(),
            registry: Mutex::new(Registry::default()),
            next_handle: AtomicU64::new(1),
            frames_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        };
        tracing::info!(
            "Recording session started ({} {})",
            session.platform.name,
            session.platform.protocol_version
        );
        session
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    /// Wall-clock start, in milliseconds since the Unix epoch.
    pub fn start_epoch_ms(&self) -> i64 {
        self.start_epoch_ms
    }

    /// Time elapsed since the session started.
    pub fn duration(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration().as_millis()).unwrap_or(u64::MAX)
    }

    /// Record a participant. Returns `false` if it was already known.
    pub fn add_participant(&self, id: Uuid) -> bool {
        self.participants.insert(id)
    }

    /// Participants seen so far, sorted.
    pub fn participants(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.participants.iter().map(|id| *id).collect();
        ids.sort();
        ids
    }

    fn allocate_handle(&self) -> OutputHandle {
        OutputHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a destination wrapped in a replay container.
    ///
    /// The archive and its frames entry are created before the output is
    /// registered; on failure nothing is registered and the destination is
    /// dropped.
    pub fn add_output(&self, destination: Destination) -> Result<OutputHandle> {
        let handle = self.allocate_handle();
        let mut container = ContainerWriter::with_compression(destination, self.config.compression_level);
        container.open().map_err(|e| attribute(handle, e))?;

        let mut registry = self.registry.lock();
        register(&mut registry, handle, OutputKind::Container, Output::Container(container));
        tracing::info!("Added container output {}", handle);
        Ok(handle)
    }

    /// Register a destination that receives bare frames.
    pub fn add_raw_output(&self, destination: Destination) -> OutputHandle {
        let handle = self.allocate_handle();
        let mut registry = self.registry.lock();
        register(&mut registry, handle, OutputKind::Raw, Output::Raw(destination));
        tracing::info!("Added raw output {}", handle);
        handle
    }

    /// Kind of a registered output, `None` if unknown or already ended.
    pub fn output_kind(&self, handle: OutputHandle) -> Option<OutputKind> {
        self.registry.lock().outputs.get(&handle).map(|e| e.kind)
    }

    /// Record one packet to every active output.
    ///
    /// Outputs whose destination fails are reported and detached; the others
    /// still receive the frame. The returned error is reserved for frames that
    /// cannot be encoded at all.
    pub fn write_packet(&self, direction: Direction, payload: &[u8]) -> Result<WriteReport> {
        let mut registry = self.registry.lock();
        let offset = self.duration_ms();
        let frame = encode_frame(offset, direction, payload)?;

        let report = registry.sink.write(&frame);
        if !report.is_ok() {
            registry.detach_failed(&report);
        }
        drop(registry);

        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Flush every active output, detaching the ones that fail.
    pub fn flush(&self) -> WriteReport {
        let mut registry = self.registry.lock();
        let report = registry.sink.flush();
        registry.detach_failed(&report);
        report
    }

    /// End recording to one output.
    ///
    /// `metadata` must be `Some` for container outputs and `None` for raw
    /// outputs. The output is unregistered exactly once; ending it again, or
    /// with the wrong metadata presence, fails with `InvalidArgument` and
    /// leaves it untouched. An I/O error while finalizing means the written
    /// container is corrupt.
    pub fn end_recording(&self, handle: OutputHandle, metadata: Option<&MetadataSnapshot>) -> Result<()> {
        let (entry, output) = {
            let mut registry = self.registry.lock();
            let entry = *registry.outputs.get(&handle).ok_or_else(|| {
                RecordingError::invalid_argument(format!("output {handle} is unknown or already ended"))
            })?;
            match (entry.kind, metadata.is_some()) {
                (OutputKind::Container, false) => {
                    return Err(RecordingError::invalid_argument(format!(
                        "output {handle} is a container and needs metadata"
                    )))
                }
                (OutputKind::Raw, true) => {
                    return Err(RecordingError::invalid_argument(format!(
                        "output {handle} is raw and takes no metadata"
                    )))
                }
                _ => {}
            }
            registry.outputs.remove(&handle);
            (entry, registry.sink.remove(handle))
        };

        match (output, metadata) {
            (Some(Output::Raw(mut destination)), None) => {
                destination.flush().map_err(|e| DestinationError::new(handle, e))?;
                drop(destination);
                tracing::info!("Ended raw output {}", handle);
                Ok(())
            }
            (Some(Output::Container(mut container)), Some(meta)) => {
                let mut destination = container.finalize(meta).map_err(|e| attribute(handle, e))?;
                destination.flush().map_err(|e| DestinationError::new(handle, e))?;
                drop(destination);
                tracing::info!(
                    "Ended container output {} ({} ms recorded)",
                    handle,
                    meta.duration_ms().unwrap_or_default()
                );
                Ok(())
            }
            // Raw destination already closed by its consumer; the failure was
            // reported by the write that detected it.
            (None, None) if entry.state == OutputState::Failed => {
                tracing::debug!("Ended detached raw output {}", handle);
                Ok(())
            }
            (None, Some(_)) if entry.state == OutputState::Failed => Err(DestinationError::new(
                handle,
                io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "destination failed during recording, container is incomplete",
                ),
            )
            .into()),
            _ => Err(RecordingError::invalid_state(format!(
                "output {handle} registry and sink disagree"
            ))),
        }
    }

    /// End an output with the metadata its kind requires, taking a fresh
    /// snapshot for containers.
    pub fn end_output(&self, handle: OutputHandle) -> Result<()> {
        match self.output_kind(handle) {
            Some(OutputKind::Container) => {
                let meta = self.snapshot_metadata();
                self.end_recording(handle, Some(&meta))
            }
            Some(OutputKind::Raw) => self.end_recording(handle, None),
            None => Err(RecordingError::invalid_argument(format!(
                "output {handle} is unknown or already ended"
            ))),
        }
    }

    /// End every registered output. Returns one result per output.
    pub fn end_all(&self) -> Vec<(OutputHandle, Result<()>)> {
        let mut handles: Vec<OutputHandle> = self.registry.lock().outputs.keys().copied().collect();
        handles.sort();
        handles.into_iter().map(|h| (h, self.end_output(h))).collect()
    }

    /// Current metadata. Reads session state only and may be called at any time.
    pub fn snapshot_metadata(&self) -> MetadataSnapshot {
        let players = self.participants().into_iter().map(|id| id.to_string());
        let duration = i64::try_from(self.duration_ms()).unwrap_or(i64::MAX);

        MetadataSnapshot::new()
            .with(KEY_FILE_FORMAT, FILE_FORMAT)
            .with(KEY_FILE_FORMAT_VERSION, FILE_FORMAT_VERSION)
            .with(KEY_SINGLEPLAYER, false)
            .with(KEY_SERVER_NAME, self.config.server_name.as_str())
            .with(KEY_DATE, self.start_epoch_ms)
            .with(KEY_DURATION, duration)
            .with(KEY_PLAYERS, MetaValue::unordered(players))
            .with(KEY_PROTOCOL_VERSION, self.platform.protocol_version.as_str())
            .with(KEY_GENERATOR, self.config.generator_string(&self.platform))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            active_outputs: self.registry.lock().sink.len(),
        }
    }
}

fn register(registry: &mut Registry, handle: OutputHandle, kind: OutputKind, output: Output) {
    // Handles are never reused, so the sink cannot already hold this one.
    if registry.sink.add(handle, output).is_ok() {
        registry.outputs.insert(
            handle,
            OutputEntry {
                kind,
                state: OutputState::Active,
            },
        );
    }
}

/// Attribute an I/O failure to `handle`; other errors pass through.
fn attribute(handle: OutputHandle, e: RecordingError) -> RecordingError {
    match e {
        RecordingError::Io(source) => DestinationError::new(handle, source).into(),
        other => other,
    }
}
