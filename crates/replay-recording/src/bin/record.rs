// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! replay-record - Record client/server traffic through a TCP relay.
//!
//! Every accepted client is relayed to the upstream server and recorded to
//! `<output>/<name>-<uuid>.mcpr`. Each TCP read is captured as one frame.
//!
//! Usage:
//!   replay-record --upstream 127.0.0.1:25565
//!   replay-record --listen 0.0.0.0:25566 --upstream play.example.net:25565 --output captures

use clap::Parser;
use dashmap::DashMap;
use replay_recording::{
    AutoRecorder, ConnectionHub, ConnectionId, Direction, PacketCapture, PlatformInfo,
    RecorderConfig, TransportAdapter,
};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "replay-record")]
#[command(about = "Record client/server traffic to replay containers")]
#[command(version)]
struct Args {
    /// Address to accept clients on
    #[arg(short, long, default_value = "0.0.0.0:25566")]
    listen: SocketAddr,

    /// Upstream server address
    #[arg(short, long)]
    upstream: String,

    /// Directory for recordings
    #[arg(short, long, default_value = "recordings")]
    output: PathBuf,

    /// Recorder config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server name stored in recordings
    #[arg(long)]
    server_name: Option<String>,

    /// Protocol version stored in recordings
    #[arg(long, default_value = "unknown")]
    protocol_version: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (minimal output)
    #[arg(short, long)]
    quiet: bool,
}

/// Transport adapter over relayed TCP connections.
struct RelayAdapter {
    protocol_version: String,
    streams: DashMap<ConnectionId, (TcpStream, TcpStream)>,
    captures: DashMap<ConnectionId, PacketCapture>,
}

impl RelayAdapter {
    fn new(protocol_version: String) -> Self {
        Self {
            protocol_version,
            streams: DashMap::new(),
            captures: DashMap::new(),
        }
    }

    fn register(&self, id: ConnectionId, client: &TcpStream, server: &TcpStream) -> io::Result<()> {
        self.streams
            .insert(id, (client.try_clone()?, server.try_clone()?));
        Ok(())
    }

    fn capture(&self, id: ConnectionId) -> Option<PacketCapture> {
        self.captures.get(&id).map(|c| c.value().clone())
    }

    fn unregister(&self, id: ConnectionId) {
        self.streams.remove(&id);
        self.captures.remove(&id);
    }

    /// Close both sides of every relayed connection.
    fn shutdown_all(&self) {
        for entry in self.streams.iter() {
            let (client, server) = entry.value();
            let _ = client.shutdown(Shutdown::Both);
            let _ = server.shutdown(Shutdown::Both);
        }
    }
}

impl TransportAdapter for RelayAdapter {
    fn platform(&self) -> PlatformInfo {
        PlatformInfo::new("replay-record relay", env!("CARGO_PKG_VERSION"), &self.protocol_version)
    }

    fn is_alive(&self, id: ConnectionId) -> bool {
        self.streams.contains_key(&id)
    }

    fn attach(&self, id: ConnectionId, capture: PacketCapture) -> replay_recording::Result<()> {
        self.captures.insert(id, capture);
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => RecorderConfig::from_json_file(path)?,
        None => RecorderConfig::default(),
    };
    if let Some(name) = &args.server_name {
        config = config.server_name(name.clone());
    }

    let adapter = Arc::new(RelayAdapter::new(args.protocol_version.clone()));
    let hub = Arc::new(ConnectionHub::new(adapter.clone(), config)?);
    let recorder = Arc::new(AutoRecorder::in_directory(&args.output));
    hub.add_listener(recorder.clone());

    let listener = TcpListener::bind(args.listen)?;
    listener.set_nonblocking(true)?;

    if !args.quiet {
        info!("Replay Recorder v{}", env!("CARGO_PKG_VERSION"));
        info!("Listening: {}", args.listen);
        info!("Upstream: {}", args.upstream);
        info!("Output: {}", args.output.display());
        info!("Recording started. Press Ctrl+C to stop.");
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((client, peer)) => {
                let hub = Arc::clone(&hub);
                let adapter = Arc::clone(&adapter);
                let upstream = args.upstream.clone();
                workers.push(thread::spawn(move || {
                    if let Err(e) = relay(&hub, &adapter, client, peer, &upstream) {
                        warn!("Relay for {} failed: {}", peer, e);
                    }
                }));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => warn!("Accept failed: {}", e),
        }
        workers.retain(|w| !w.is_finished());
    }

    info!("Shutting down {} connection(s)", hub.connection_count());
    adapter.shutdown_all();
    for worker in workers {
        let _ = worker.join();
    }

    if !args.quiet {
        info!("Recording stopped");
    }
    Ok(())
}

/// Relay one client until either side closes.
fn relay(
    hub: &ConnectionHub,
    adapter: &RelayAdapter,
    client: TcpStream,
    peer: SocketAddr,
    upstream: &str,
) -> anyhow::Result<()> {
    client.set_nonblocking(false)?;
    let server = TcpStream::connect(upstream)?;
    let _ = client.set_nodelay(true);
    let _ = server.set_nodelay(true);

    let connection = hub.open_connection();
    let id = connection.id();
    adapter.register(id, &client, &server)?;

    let name = format!("{}-{}", peer.ip(), peer.port());
    let uuid = Uuid::new_v4();
    let result = hub.connection_initializing(id, &name, uuid);
    if let Err(e) = &result {
        warn!("Initializing {} failed: {}", id, e);
    }
    debug!("Relaying {} for {} as {}", id, peer, uuid);

    let capture = adapter.capture(id);
    let inbound = {
        let from = client.try_clone()?;
        let to = server.try_clone()?;
        let capture = capture.clone();
        thread::spawn(move || pump(from, to, Direction::Inbound, capture))
    };
    pump(server, client, Direction::Outbound, capture);
    let _ = inbound.join();

    adapter.unregister(id);
    hub.connection_closed(id);
    info!("{} disconnected", peer);
    Ok(())
}

/// Copy `from` into `to`, capturing every chunk read.
fn pump(mut from: TcpStream, mut to: TcpStream, direction: Direction, capture: Option<PacketCapture>) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };

        if let Some(capture) = &capture {
            match capture.on_packet(direction, &buf[..n]) {
                Ok(report) if !report.is_ok() => {
                    warn!("{} output(s) failed on {}", report.failures.len(), capture.connection())
                }
                Ok(_) => {}
                Err(e) => warn!("Capture failed on {}: {}", capture.connection(), e),
            }
        }

        if to.write_all(&buf[..n]).is_err() {
            break;
        }
    }
    let _ = to.shutdown(Shutdown::Write);
    let _ = from.shutdown(Shutdown::Read);
}
