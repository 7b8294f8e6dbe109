// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recording errors.

use crate::session::OutputHandle;
use crate::varint::VarintError;
use std::io;
use thiserror::Error;

/// Recording engine errors.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// Container writer used outside the state the operation requires.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unknown handle, wrong output kind, or a handle ended twice.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O failure of one specific destination.
    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error("Malformed varint: {0}")]
    MalformedVarint(#[from] VarintError),

    #[error("Already recording")]
    AlreadyRecording,

    /// Container could not be parsed.
    #[error("Invalid container: {0}")]
    Format(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecordingError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }
}

/// An I/O failure attributed to a single output.
#[derive(Debug, Error)]
#[error("output {handle} failed: {source}")]
pub struct DestinationError {
    pub handle: OutputHandle,
    #[source]
    pub source: io::Error,
}

impl DestinationError {
    pub fn new(handle: OutputHandle, source: io::Error) -> Self {
        Self { handle, source }
    }
}

pub type Result<T, E = RecordingError> = std::result::Result<T, E>;
