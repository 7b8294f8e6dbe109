// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recorder configuration.

use crate::container::DEFAULT_COMPRESSION_LEVEL;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Host platform description, supplied by the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Platform implementation name (e.g. the server software).
    pub name: String,

    /// Platform implementation version.
    pub version: String,

    /// Protocol/game version of recorded sessions.
    pub protocol_version: String,
}

impl PlatformInfo {
    /// Describe a host platform.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        protocol_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            protocol_version: protocol_version.into(),
        }
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::new("unknown", "unknown", "unknown")
    }
}

/// Recorder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Value of the `serverName` metadata key.
    pub server_name: String,

    /// Engine name used in the `generator` string.
    pub generator_name: String,

    /// Engine version used in the `generator` string.
    pub generator_version: String,

    /// Deflate level for container outputs (0-9).
    pub compression_level: u32,

    /// Write the player's UUID as an inbound frame when a connection initializes.
    pub record_identity_packet: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            server_name: "Unknown".to_string(),
            generator_name: env!("CARGO_PKG_NAME").to_string(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            record_identity_packet: true,
        }
    }
}

impl RecorderConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Set server name.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Set generator name and version.
    pub fn generator(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.generator_name = name.into();
        self.generator_version = version.into();
        self
    }

    /// Set compression level (clamped to 9).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Enable or disable the identity packet.
    pub fn record_identity_packet(mut self, enable: bool) -> Self {
        self.record_identity_packet = enable;
        self
    }

    /// `"<engine> <version> on <platform> (<platform version>)"`.
    pub fn generator_string(&self, platform: &PlatformInfo) -> String {
        format!(
            "{} {} on {} ({})",
            self.generator_name, self.generator_version, platform.name, platform.version
        )
    }
}
