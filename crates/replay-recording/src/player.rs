// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replay playback.
//!
//! Reads frames back from a container and paces them by their recorded time
//! offsets.

use crate::error::RecordingError;
use crate::format::ContainerReader;
use crate::frame::{Direction, Frame};
use crate::metadata::MetadataSnapshot;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Playback speed control.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum PlaybackSpeed {
    /// Real-time playback (1.0x).
    #[default]
    Realtime,
    /// Fixed speed multiplier (e.g., 2.0 = 2x faster).
    Speed(f64),
    /// As fast as possible (no timing).
    Unlimited,
}

impl PlaybackSpeed {
    /// Map a multiplier to a speed; zero or less means unlimited.
    pub fn from_multiplier(multiplier: f64) -> Self {
        if multiplier <= 0.0 || !multiplier.is_finite() {
            Self::Unlimited
        } else if (multiplier - 1.0).abs() < 0.001 {
            Self::Realtime
        } else {
            Self::Speed(multiplier)
        }
    }

    /// Get the speed multiplier (Unlimited returns f64::INFINITY).
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Realtime => 1.0,
            Self::Speed(s) => *s,
            Self::Unlimited => f64::INFINITY,
        }
    }

    /// Delay before a frame recorded `delta_ms` after the previous one.
    pub fn delay_for(&self, delta_ms: u64) -> Option<Duration> {
        match self {
            Self::Unlimited => None,
            Self::Realtime => Some(Duration::from_millis(delta_ms)),
            Self::Speed(s) if *s > 0.0 => {
                Some(Duration::from_nanos((delta_ms as f64 * 1_000_000.0 / s) as u64))
            }
            Self::Speed(_) => None,
        }
    }
}

/// Player configuration.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Input container path.
    pub input_path: PathBuf,

    pub speed: PlaybackSpeed,

    /// Only play frames in this direction (None = both).
    pub direction: Option<Direction>,

    pub loop_playback: bool,

    /// Skip frames recorded before this offset.
    pub start_offset_ms: u64,

    /// Stop after this offset (0 = play all).
    pub end_time_ms: u64,
}

impl PlayerConfig {
    /// Create a new player configuration.
    pub fn new<P: AsRef<Path>>(input_path: P) -> Self {
        Self {
            input_path: input_path.as_ref().to_path_buf(),
            speed: PlaybackSpeed::Realtime,
            direction: None,
            loop_playback: false,
            start_offset_ms: 0,
            end_time_ms: 0,
        }
    }

    /// Set playback speed.
    pub fn speed(mut self, speed: PlaybackSpeed) -> Self {
        self.speed = speed;
        self
    }

    /// Set speed as multiplier.
    pub fn speed_multiplier(mut self, multiplier: f64) -> Self {
        self.speed = PlaybackSpeed::from_multiplier(multiplier);
        self
    }

    /// Set direction filter.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Enable loop playback.
    pub fn loop_playback(mut self, enable: bool) -> Self {
        self.loop_playback = enable;
        self
    }

    /// Set start offset.
    pub fn start_offset(mut self, offset: Duration) -> Self {
        self.start_offset_ms = offset.as_millis() as u64;
        self
    }

    /// Set end time.
    pub fn end_time(mut self, end: Duration) -> Self {
        self.end_time_ms = end.as_millis() as u64;
        self
    }
}

/// Player errors.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Player not opened")]
    NotOpen,

    #[error("Playback cancelled")]
    Cancelled,
}

/// Playback statistics.
#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub frames_played: u64,

    /// Frames skipped by the direction or time filters.
    pub frames_skipped: u64,

    pub bytes_played: u64,

    /// Wall-clock playback duration in seconds.
    pub duration_secs: f64,

    /// Offset of the last frame in the recording, in milliseconds.
    pub recording_duration_ms: u64,

    pub loops_completed: u32,
}

/// Container player.
pub struct Player {
    config: PlayerConfig,
    reader: Option<ContainerReader>,
    position: usize,
    last_offset_ms: u64,
    playback_start: Option<Instant>,
    stats: PlaybackStats,
    cancelled: bool,
}

impl Player {
    /// Create a new player.
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            reader: None,
            position: 0,
            last_offset_ms: 0,
            playback_start: None,
            stats: PlaybackStats::default(),
            cancelled: false,
        }
    }

    /// Open and parse the container.
    pub fn open(&mut self) -> Result<(), PlayerError> {
        if !self.config.input_path.exists() {
            return Err(PlayerError::FileNotFound(self.config.input_path.clone()));
        }
        let reader = ContainerReader::open(&self.config.input_path)?;
        self.load(reader);

        tracing::info!(
            "Opened {} ({} bytes of frames, {} ms)",
            self.config.input_path.display(),
            self.reader.as_ref().map_or(0, |r| r.frame_bytes().len()),
            self.stats.recording_duration_ms
        );
        Ok(())
    }

    /// Play an already parsed container instead of reading `input_path`.
    pub fn with_reader(config: PlayerConfig, reader: ContainerReader) -> Self {
        let mut player = Self::new(config);
        player.load(reader);
        player
    }

    fn load(&mut self, reader: ContainerReader) {
        self.stats.recording_duration_ms = reader
            .metadata()
            .duration_ms()
            .and_then(|d| u64::try_from(d).ok())
            .unwrap_or(0);
        self.reader = Some(reader);
        self.position = 0;
        self.last_offset_ms = 0;
        self.playback_start = Some(Instant::now());
    }

    /// Get the next frame to play.
    ///
    /// Returns `Ok(None)` when playback is complete. Sleeps according to the
    /// playback speed before returning a frame.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PlayerError> {
        if self.cancelled {
            return Err(PlayerError::Cancelled);
        }

        loop {
            let reader = self.reader.as_ref().ok_or(PlayerError::NotOpen)?;
            let remaining = &reader.frame_bytes()[self.position..];

            if remaining.is_empty() {
                if self.config.loop_playback && self.stats.frames_played > 0 {
                    self.restart();
                    continue;
                }
                self.finish();
                return Ok(None);
            }

            let (frame, consumed) = Frame::decode(remaining)?;
            self.position += consumed;

            if frame.time_offset_ms < self.config.start_offset_ms {
                self.stats.frames_skipped += 1;
                continue;
            }

            if self.config.end_time_ms > 0 && frame.time_offset_ms > self.config.end_time_ms {
                if self.config.loop_playback && self.stats.frames_played > 0 {
                    self.restart();
                    continue;
                }
                self.finish();
                return Ok(None);
            }

            if self.config.direction.is_some_and(|d| d != frame.direction) {
                self.stats.frames_skipped += 1;
                continue;
            }

            if frame.time_offset_ms > self.last_offset_ms {
                let delta = frame.time_offset_ms - self.last_offset_ms;
                if let Some(delay) = self.config.speed.delay_for(delta) {
                    std::thread::sleep(delay);
                }
            }

            self.last_offset_ms = frame.time_offset_ms;
            self.stats.frames_played += 1;
            self.stats.bytes_played += frame.payload.len() as u64;
            return Ok(Some(frame));
        }
    }

    fn restart(&mut self) {
        self.position = 0;
        self.last_offset_ms = self.config.start_offset_ms;
        self.stats.loops_completed += 1;
        tracing::debug!("Restarting playback (loop {})", self.stats.loops_completed);
    }

    fn finish(&mut self) {
        if let Some(start) = self.playback_start {
            self.stats.duration_secs = start.elapsed().as_secs_f64();
        }
    }

    /// Cancel playback.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Check if playback is complete.
    pub fn is_complete(&self) -> bool {
        self.cancelled
            || self
                .reader
                .as_ref()
                .map_or(true, |r| self.position >= r.frame_bytes().len())
    }

    /// Get playback statistics.
    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    /// Get recording metadata (after open).
    pub fn metadata(&self) -> Option<&MetadataSnapshot> {
        self.reader.as_ref().map(|r| r.metadata())
    }

    /// Get configuration.
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Iterate over the remaining frames.
    pub fn frames(mut self) -> impl Iterator<Item = Result<Frame, PlayerError>> {
        std::iter::from_fn(move || match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerWriter;
    use crate::frame::encode_frame;
    use crate::metadata::KEY_DURATION;
    use tempfile::tempdir;

    fn create_test_recording(path: &Path, count: u64) {
        let mut writer = ContainerWriter::new(Vec::new());
        writer.open().expect("open");
        for i in 0..count {
            let direction = if i % 2 == 0 { Direction::Outbound } else { Direction::Inbound };
            let frame = encode_frame(i, direction, &[i as u8]).expect("encode");
            writer.append_frame_bytes(&frame).expect("append");
        }
        let meta = MetadataSnapshot::new().with(KEY_DURATION, count.saturating_sub(1) as i32);
        let bytes = writer.finalize(&meta).expect("finalize");
        std::fs::write(path, bytes).expect("write");
    }

    #[test]
    fn test_playback_speed_delay() {
        assert_eq!(PlaybackSpeed::Realtime.delay_for(10), Some(Duration::from_millis(10)));
        assert_eq!(PlaybackSpeed::Speed(2.0).delay_for(10), Some(Duration::from_millis(5)));
        assert_eq!(PlaybackSpeed::Unlimited.delay_for(10), None);
        assert_eq!(PlaybackSpeed::from_multiplier(0.0), PlaybackSpeed::Unlimited);
        assert_eq!(PlaybackSpeed::from_multiplier(1.0), PlaybackSpeed::Realtime);
    }

    #[test]
    fn test_player_config_builder() {
        let config = PlayerConfig::new("/tmp/test.mcpr")
            .speed_multiplier(2.0)
            .loop_playback(true)
            .start_offset(Duration::from_secs(10));

        assert!(matches!(config.speed, PlaybackSpeed::Speed(s) if (s - 2.0).abs() < 0.001));
        assert!(config.loop_playback);
        assert_eq!(config.start_offset_ms, 10_000);
    }

    #[test]
    fn test_player_open_and_read() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.mcpr");
        create_test_recording(&path, 10);

        let mut player = Player::new(PlayerConfig::new(&path).speed(PlaybackSpeed::Unlimited));
        player.open().expect("open");
        assert_eq!(player.stats().recording_duration_ms, 9);

        let mut offsets = Vec::new();
        while let Some(frame) = player.next_frame().expect("next") {
            offsets.push(frame.time_offset_ms);
        }

        assert_eq!(offsets, (0..10).collect::<Vec<_>>());
        assert_eq!(player.stats().frames_played, 10);
        assert!(player.is_complete());
    }

    #[test]
    fn test_player_direction_and_range() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.mcpr");
        create_test_recording(&path, 10);

        let config = PlayerConfig::new(&path)
            .speed(PlaybackSpeed::Unlimited)
            .direction(Direction::Inbound)
            .start_offset(Duration::from_millis(2))
            .end_time(Duration::from_millis(7));
        let mut player = Player::new(config);
        player.open().expect("open");

        let frames: Vec<Frame> = player.frames().collect::<Result<_, _>>().expect("frames");
        let offsets: Vec<u64> = frames.iter().map(|f| f.time_offset_ms).collect();
        assert_eq!(offsets, [3, 5, 7]);
    }

    #[test]
    fn test_player_missing_file() {
        let mut player = Player::new(PlayerConfig::new("/nonexistent/replay.mcpr"));
        assert!(matches!(player.open(), Err(PlayerError::FileNotFound(_))));
        assert!(matches!(player.next_frame(), Err(PlayerError::NotOpen)));
    }

    #[test]
    fn test_player_cancel() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.mcpr");
        create_test_recording(&path, 100);

        let mut player = Player::new(PlayerConfig::new(&path).speed(PlaybackSpeed::Unlimited));
        player.open().expect("open");
        for _ in 0..5 {
            player.next_frame().expect("next");
        }

        player.cancel();
        assert!(player.next_frame().is_err());
        assert!(player.is_complete());
    }

    #[test]
    fn test_player_loops() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.mcpr");
        create_test_recording(&path, 3);

        let config = PlayerConfig::new(&path)
            .speed(PlaybackSpeed::Unlimited)
            .loop_playback(true);
        let mut player = Player::new(config);
        player.open().expect("open");

        for _ in 0..7 {
            assert!(player.next_frame().expect("next").is_some());
        }
        assert_eq!(player.stats().loops_completed, 2);
    }
}
