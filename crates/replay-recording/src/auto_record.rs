// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record every connection automatically.
//!
//! [`AutoRecorder`] is a [`ConnectionListener`] that starts a recording when a
//! connection initializes, attaches one container output obtained from an
//! [`OutputFactory`], and finalizes it with a fresh metadata snapshot when
//! the connection closes.
//!
//! ```no_run
//! use replay_recording::{AutoRecorder, ConnectionHub};
//! use std::sync::Arc;
//!
//! # fn demo(hub: &ConnectionHub) {
//! let recorder = AutoRecorder::in_directory("recordings");
//! hub.add_listener(Arc::new(recorder));
//! # }
//! ```

use crate::connection::{ConnectionClosed, ConnectionId, ConnectionInitializing, ConnectionListener};
use crate::error::RecordingError;
use crate::format::CONTAINER_EXTENSION;
use crate::session::{Destination, OutputHandle};
use dashmap::DashMap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

/// Produces the destination for a newly initialized connection.
pub trait OutputFactory: Send + Sync {
    fn create(&self, event: &ConnectionInitializing) -> io::Result<Destination>;
}

impl<F> OutputFactory for F
where
    F: Fn(&ConnectionInitializing) -> io::Result<Destination> + Send + Sync,
{
    fn create(&self, event: &ConnectionInitializing) -> io::Result<Destination> {
        self(event)
    }
}

/// Writes `<dir>/<name>-<uuid>.mcpr` files.
#[derive(Debug, Clone)]
pub struct DirectoryOutput {
    dir: PathBuf,
}

impl DirectoryOutput {
    /// Write recordings under `dir`, creating it on first use.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path a connection's recording will be written to.
    pub fn path_for(&self, event: &ConnectionInitializing) -> PathBuf {
        self.dir.join(format!(
            "{}-{}.{}",
            sanitize(&event.name),
            event.uuid,
            CONTAINER_EXTENSION
        ))
    }
}

impl OutputFactory for DirectoryOutput {
    fn create(&self, event: &ConnectionInitializing) -> io::Result<Destination> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(event);
        let file = File::create(&path)?;
        tracing::info!("Recording {} to {}", event.name, path.display());
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Keep names usable as a single path component.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "player".to_string()
    } else {
        cleaned
    }
}

/// Listener that records each initialized connection to its own container.
pub struct AutoRecorder<F: OutputFactory> {
    factory: F,
    outputs: DashMap<ConnectionId, OutputHandle>,
}

impl AutoRecorder<DirectoryOutput> {
    /// Record to `<dir>/<name>-<uuid>.mcpr`.
    pub fn in_directory<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(DirectoryOutput::new(dir))
    }
}

impl<F: OutputFactory> AutoRecorder<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            outputs: DashMap::new(),
        }
    }

    /// Number of connections currently being recorded.
    pub fn active(&self) -> usize {
        self.outputs.len()
    }

    fn start(&self, event: &ConnectionInitializing) -> crate::Result<OutputHandle> {
        let connection = &event.connection;
        let session = match connection.start_recording() {
            Ok(session) => session,
            Err(RecordingError::AlreadyRecording) => connection
                .recorder()
                .ok_or_else(|| RecordingError::invalid_state("recorder vanished"))?,
            Err(e) => return Err(e),
        };

        let destination = self.factory.create(event)?;
        session.add_output(destination)
    }
}

impl<F: OutputFactory> ConnectionListener for AutoRecorder<F> {
    fn on_initializing(&self, event: &ConnectionInitializing) {
        let id = event.connection.id();
        match self.start(event) {
            Ok(handle) => {
                self.outputs.insert(id, handle);
            }
            Err(e) => tracing::error!("Failed to start recording {} ({}): {}", event.name, id, e),
        }
    }

    fn on_closed(&self, event: &ConnectionClosed) {
        let id = event.connection.id();
        let Some((_, handle)) = self.outputs.remove(&id) else {
            return;
        };
        let Some(session) = event.connection.recorder() else {
            tracing::warn!("{} closed without a recorder", id);
            return;
        };

        let metadata = session.snapshot_metadata();
        match session.end_recording(handle, Some(&metadata)) {
            Ok(()) => tracing::info!(
                "Finished recording {} ({} ms, {} frames)",
                id,
                session.duration_ms(),
                session.stats().frames_written
            ),
            Err(e) => tracing::error!("Failed to finish recording {}: {}", id, e),
        }
    }
}
