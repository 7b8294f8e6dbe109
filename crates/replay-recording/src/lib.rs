// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replay Recording Engine
//!
//! Capture the packets of a client/server session and stream them into
//! replay containers:
//! - Compact frames (`varint(time << 1 | dir)`, `varint(len)`, payload)
//! - Fan-out to any number of outputs per recording
//! - ZIP containers with a frames entry and a JSON metadata entry
//! - Raw frame streams for live consumers
//!
//! # Quick Start
//!
//! ```bash
//! # Record everyone connecting through a relay
//! replay-record --listen 0.0.0.0:25566 --upstream 127.0.0.1:25565
//!
//! # Inspect a recording
//! replay-inspect --input recordings/Steve-<uuid>.mcpr --info-only
//! ```
//!
//! # Library
//!
//! ```no_run
//! use replay_recording::{Direction, PlatformInfo, RecorderConfig, RecordingSession};
//! use std::fs::File;
//!
//! # fn main() -> replay_recording::Result<()> {
//! let session = RecordingSession::new(RecorderConfig::default(), PlatformInfo::default());
//! let output = session.add_output(Box::new(File::create("capture.mcpr")?))?;
//!
//! session.write_packet(Direction::Outbound, b"hello")?;
//! session.write_packet(Direction::Inbound, b"world")?;
//!
//! let metadata = session.snapshot_metadata();
//! session.end_recording(output, Some(&metadata))?;
//! # Ok(())
//! # }
//! ```
//!
//! # Output Kinds
//!
//! | Feature | container | raw |
//! |---------|-----------|-----|
//! | Self-contained | [OK] | [X] |
//! | Metadata | [OK] | [X] |
//! | Compressed | [OK] | [X] |
//! | Readable while recording | [X] | [OK] |

pub mod auto_record;
pub mod config;
pub mod connection;
pub mod container;
pub mod error;
pub mod format;
pub mod frame;
pub mod metadata;
pub mod player;
pub mod session;
pub mod sink;
pub mod varint;

pub use auto_record::{AutoRecorder, DirectoryOutput, OutputFactory};
pub use config::{PlatformInfo, RecorderConfig};
pub use connection::{
    Connection, ConnectionClosed, ConnectionHub, ConnectionId, ConnectionInitializing,
    ConnectionListener, PacketCapture, TransportAdapter,
};
pub use container::{ContainerState, ContainerWriter};
pub use error::{DestinationError, RecordingError, Result};
pub use format::ContainerReader;
pub use frame::{encode_frame, Direction, Frame, FrameReader};
pub use metadata::{MetaPrimitive, MetaValue, MetadataSnapshot};
pub use player::{PlaybackSpeed, Player, PlayerConfig};
pub use session::{Destination, OutputHandle, OutputKind, RecordingSession, SessionStats};
pub use sink::WriteReport;
pub use varint::{decode_varint, encode_varint, VarintError};
