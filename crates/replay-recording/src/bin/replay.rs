// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! replay-inspect - Inspect and play back replay containers.
//!
//! Usage:
//!   replay-inspect --input capture.mcpr --info-only
//!   replay-inspect --input capture.mcpr --speed 2.0 --dump
//!   replay-inspect --input capture.mcpr --direction inbound

use clap::{Parser, ValueEnum};
use replay_recording::{
    player::{PlaybackSpeed, Player, PlayerConfig},
    ContainerReader, Direction, MetaValue,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Inbound,
    Outbound,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Inbound => Direction::Inbound,
            DirectionArg::Outbound => Direction::Outbound,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "replay-inspect")]
#[command(about = "Inspect and play back replay containers")]
#[command(version)]
struct Args {
    /// Input container (.mcpr)
    #[arg(short, long)]
    input: PathBuf,

    /// Playback speed multiplier (1.0 = realtime, 0 = unlimited)
    #[arg(short, long, default_value = "0")]
    speed: f64,

    /// Only play frames in this direction
    #[arg(short, long, value_enum)]
    direction: Option<DirectionArg>,

    /// Start offset (milliseconds from beginning)
    #[arg(long, default_value = "0")]
    start: u64,

    /// End time (milliseconds from beginning, 0 = play all)
    #[arg(long, default_value = "0")]
    end: u64,

    /// Print every frame
    #[arg(long)]
    dump: bool,

    /// Show recording info and exit
    #[arg(long)]
    info_only: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (minimal output)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let reader = ContainerReader::open(&args.input)?;

    if !args.quiet || args.info_only {
        info!("Replay Inspector v{}", env!("CARGO_PKG_VERSION"));
        info!("Input: {}", args.input.display());
        info!("Entries: {}", reader.entry_names().join(", "));
        info!("Metadata:");
        for (key, value) in reader.metadata().iter() {
            info!("  {}: {}", key, format_value(value));
        }
        info!("Frame data: {} bytes", reader.frame_bytes().len());
    }

    if args.info_only {
        return Ok(());
    }

    let speed = PlaybackSpeed::from_multiplier(args.speed);
    let mut config = PlayerConfig::new(&args.input).speed(speed);
    if let Some(direction) = args.direction {
        config = config.direction(direction.into());
    }
    if args.start > 0 {
        config = config.start_offset(Duration::from_millis(args.start));
    }
    if args.end > 0 {
        config = config.end_time(Duration::from_millis(args.end));
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut player = Player::with_reader(config, reader);
    let mut inbound = 0u64;
    let mut outbound = 0u64;
    let mut last_offset = 0u64;
    let mut last_progress = Instant::now();

    while running.load(Ordering::SeqCst) {
        match player.next_frame() {
            Ok(Some(frame)) => {
                match frame.direction {
                    Direction::Inbound => inbound += 1,
                    Direction::Outbound => outbound += 1,
                }
                last_offset = frame.time_offset_ms;

                if args.dump {
                    println!(
                        "{:>10} ms {:<8} {:>6} B  {}",
                        frame.time_offset_ms,
                        format!("{:?}", frame.direction),
                        frame.payload.len(),
                        hex_preview(&frame.payload, 16)
                    );
                }

                if !args.quiet && last_progress.elapsed() >= Duration::from_secs(1) {
                    info!("Played {} frames ({} ms)", player.stats().frames_played, last_offset);
                    last_progress = Instant::now();
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Playback error: {}", e);
                break;
            }
        }
    }

    let stats = player.stats();
    if !args.quiet {
        info!("Playback complete");
        info!("  Frames played: {} ({} inbound, {} outbound)", stats.frames_played, inbound, outbound);
        info!("  Frames skipped: {}", stats.frames_skipped);
        info!("  Payload bytes: {}", stats.bytes_played);
        info!("  Last offset: {} ms", last_offset);
        info!("  Recorded duration: {} ms", stats.recording_duration_ms);
    }

    Ok(())
}

fn format_value(value: &MetaValue) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "?".to_string())
}

fn hex_preview(bytes: &[u8], max: usize) -> String {
    let mut out: String = bytes
        .iter()
        .take(max)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > max {
        out.push_str(" ..");
    }
    out
}
