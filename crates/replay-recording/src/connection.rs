// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connections and their lifecycle.
//!
//! The core never touches the host's network stack. A host implements
//! [`TransportAdapter`] once, hands it to a [`ConnectionHub`], and reports
//! connection events to the hub:
//!
//! 1. [`ConnectionHub::open_connection`] when a transport connection appears
//! 2. [`ConnectionHub::connection_initializing`] once the peer is identified
//! 3. [`ConnectionHub::connection_closed`] when it goes away
//!
//! Registered [`ConnectionListener`]s see the initializing event at most once
//! per connection and the closed event exactly once per initialized
//! connection. Packets reach a recording through the [`PacketCapture`] the
//! adapter receives in [`TransportAdapter::attach`].

use crate::config::{PlatformInfo, RecorderConfig};
use crate::error::{RecordingError, Result};
use crate::frame::Direction;
use crate::session::RecordingSession;
use crate::sink::WriteReport;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Version of the [`TransportAdapter`] contract this crate implements.
pub const ADAPTER_API_VERSION: u32 = 1;

/// Host-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Capture point for one recorded connection.
///
/// Call [`on_packet`](Self::on_packet) exactly once per packet, with the
/// payload as it crosses the wire before any transport compression.
#[derive(Clone)]
pub struct PacketCapture {
    connection: ConnectionId,
    session: Arc<RecordingSession>,
}

impl PacketCapture {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn on_packet(&self, direction: Direction, payload: &[u8]) -> Result<WriteReport> {
        self.session.write_packet(direction, payload)
    }
}

/// Bridge between the recorder and a host network stack.
///
/// Where capture hooks sit in the host pipeline, and keeping them there, is
/// the adapter's responsibility.
pub trait TransportAdapter: Send + Sync {
    /// Contract version; must equal [`ADAPTER_API_VERSION`].
    fn api_version(&self) -> u32 {
        ADAPTER_API_VERSION
    }

    /// Description of the host platform.
    fn platform(&self) -> PlatformInfo;

    /// Whether the host still holds the connection. A connection the host no
    /// longer knows is simply not alive.
    fn is_alive(&self, id: ConnectionId) -> bool;

    /// Begin feeding packets of `id` into `capture`.
    fn attach(&self, id: ConnectionId, capture: PacketCapture) -> Result<()>;
}

/// Lifecycle phase of a connection as seen by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    /// Initializing listeners are running.
    Initializing,
    /// Closed while initializing; the closed event follows initialization.
    ClosePending,
    Initialized,
    Closed,
}

/// A connection known to the hub.
pub struct Connection {
    id: ConnectionId,
    adapter: Arc<dyn TransportAdapter>,
    config: RecorderConfig,
    recorder: Mutex<Option<Arc<RecordingSession>>>,
    /// Held while a recording is being started and attached.
    starting: Mutex<()>,
    player: OnceLock<Uuid>,
    lifecycle: Mutex<Lifecycle>,
}

impl Connection {
    fn new(id: ConnectionId, adapter: Arc<dyn TransportAdapter>, config: RecorderConfig) -> Self {
        Self {
            id,
            adapter,
            config,
            recorder: Mutex::new(None),
            starting: Mutex::new(()),
            player: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle::Open),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        let closing = matches!(
            *self.lifecycle.lock(),
            Lifecycle::ClosePending | Lifecycle::Closed
        );
        !closing && self.adapter.is_alive(self.id)
    }

    /// Identified player, once the connection has initialized.
    pub fn player(&self) -> Option<Uuid> {
        self.player.get().copied()
    }

    /// Set the player identity. Fails if one is already set.
    pub fn set_player(&self, uuid: Uuid) -> Result<()> {
        self.player
            .set(uuid)
            .map_err(|_| RecordingError::invalid_state(format!("player of {} already set", self.id)))
    }

    pub fn protocol_version(&self) -> String {
        self.adapter.platform().protocol_version
    }

    pub fn recorder(&self) -> Option<Arc<RecordingSession>> {
        self.recorder.lock().clone()
    }

    /// Start recording this connection.
    ///
    /// Only a recording started while handling the initializing event is
    /// guaranteed to contain every packet of the session. A start already in
    /// progress counts as recording.
    ///
    /// The adapter is attached without the recorder lock held, so it may
    /// query the connection from inside [`TransportAdapter::attach`].
    pub fn start_recording(&self) -> Result<Arc<RecordingSession>> {
        let _starting = self
            .starting
            .try_lock()
            .ok_or(RecordingError::AlreadyRecording)?;
        if self.recorder.lock().is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let session = Arc::new(RecordingSession::new(self.config.clone(), self.adapter.platform()));
        let capture = PacketCapture {
            connection: self.id,
            session: Arc::clone(&session),
        };
        self.adapter.attach(self.id, capture)?;

        *self.recorder.lock() = Some(Arc::clone(&session));
        tracing::info!("Started recording {}", self.id);
        Ok(session)
    }

    /// Record a packet if this connection is being recorded.
    pub fn capture(&self, direction: Direction, payload: &[u8]) -> Result<Option<WriteReport>> {
        match self.recorder() {
            Some(session) => session.write_packet(direction, payload).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("player", &self.player())
            .field("recording", &self.recorder.lock().is_some())
            .finish()
    }
}

/// Fired once a connection's peer has been identified.
#[derive(Debug, Clone)]
pub struct ConnectionInitializing {
    pub connection: Arc<Connection>,
    /// Display name; not necessarily unique.
    pub name: String,
    pub uuid: Uuid,
}

/// Fired once per initialized connection when it closes.
#[derive(Debug, Clone)]
pub struct ConnectionClosed {
    pub connection: Arc<Connection>,
}

/// Receives connection lifecycle events.
///
/// Handlers run on the thread reporting the event and must not block.
pub trait ConnectionListener: Send + Sync {
    fn on_initializing(&self, event: &ConnectionInitializing);

    fn on_closed(&self, _event: &ConnectionClosed) {}
}

/// Registry of live connections and dispatcher of their events.
pub struct ConnectionHub {
    adapter: Arc<dyn TransportAdapter>,
    config: RecorderConfig,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
    next_id: AtomicU64,
}

impl ConnectionHub {
    /// Create a hub around the host's adapter.
    pub fn new(adapter: Arc<dyn TransportAdapter>, config: RecorderConfig) -> Result<Self> {
        let version = adapter.api_version();
        if version != ADAPTER_API_VERSION {
            return Err(RecordingError::invalid_argument(format!(
                "transport adapter implements API v{version}, expected v{ADAPTER_API_VERSION}"
            )));
        }

        let platform = adapter.platform();
        tracing::info!(
            "Recording hub ready on {} {} (protocol {})",
            platform.name,
            platform.version,
            platform.protocol_version
        );

        Ok(Self {
            adapter,
            config,
            connections: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.write().push(listener);
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Register a new transport connection.
    pub fn open_connection(&self) -> Arc<Connection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(Connection::new(
            id,
            Arc::clone(&self.adapter),
            self.config.clone(),
        ));
        self.connections.insert(id, Arc::clone(&connection));
        tracing::debug!("Opened {}", id);
        connection
    }

    /// Look up a connection; `None` once it has closed.
    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|c| Arc::clone(c.value()))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Report that the peer of `id` has been identified.
    ///
    /// Listeners run first so they can start recording; if the connection is
    /// then being recorded the player becomes a participant and, unless
    /// disabled, its UUID is written as an inbound frame. Repeated reports are
    /// ignored. A close reported while listeners are still running is
    /// dispatched once they have finished.
    pub fn connection_initializing(&self, id: ConnectionId, name: &str, uuid: Uuid) -> Result<()> {
        let connection = self
            .lookup(id)
            .ok_or_else(|| RecordingError::invalid_argument(format!("{id} is not open")))?;
        {
            let mut lifecycle = connection.lifecycle.lock();
            if *lifecycle != Lifecycle::Open {
                tracing::debug!("Ignoring repeated initialization of {}", id);
                return Ok(());
            }
            connection.set_player(uuid)?;
            *lifecycle = Lifecycle::Initializing;
        }

        let event = ConnectionInitializing {
            connection: Arc::clone(&connection),
            name: name.to_string(),
            uuid,
        };
        for listener in self.listeners.read().iter() {
            listener.on_initializing(&event);
        }

        let identity = match connection.recorder() {
            Some(session) => {
                session.add_participant(uuid);
                if self.config.record_identity_packet {
                    session.write_packet(Direction::Inbound, uuid.as_bytes()).map(drop)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        };

        let close_pending = {
            let mut lifecycle = connection.lifecycle.lock();
            let pending = *lifecycle == Lifecycle::ClosePending;
            *lifecycle = if pending {
                Lifecycle::Closed
            } else {
                Lifecycle::Initialized
            };
            pending
        };
        if close_pending {
            tracing::debug!("Delivering close of {} deferred during initialization", id);
            self.dispatch_closed(connection);
        }
        identity
    }

    /// Report that `id` has closed. Unknown or already closed ids are ignored.
    pub fn connection_closed(&self, id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&id) else {
            return;
        };
        let dispatch = {
            let mut lifecycle = connection.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Open => {
                    *lifecycle = Lifecycle::Closed;
                    tracing::debug!("Closed {} before initialization", id);
                    false
                }
                Lifecycle::Initializing => {
                    *lifecycle = Lifecycle::ClosePending;
                    false
                }
                Lifecycle::Initialized => {
                    *lifecycle = Lifecycle::Closed;
                    true
                }
                Lifecycle::ClosePending | Lifecycle::Closed => false,
            }
        };
        if dispatch {
            self.dispatch_closed(connection);
        }
    }

    fn dispatch_closed(&self, connection: Arc<Connection>) {
        let id = connection.id();
        let event = ConnectionClosed { connection };
        for listener in self.listeners.read().iter() {
            listener.on_closed(&event);
        }
        tracing::debug!("Closed {}", id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicBool;

    /// Adapter double that records attachments and liveness.
    #[derive(Default)]
    pub(crate) struct MockAdapter {
        pub captures: Mutex<HashMap<ConnectionId, PacketCapture>>,
        pub alive: Mutex<HashSet<ConnectionId>>,
        pub fail_attach: AtomicBool,
    }

    impl MockAdapter {
        pub fn capture(&self, id: ConnectionId) -> Option<PacketCapture> {
            self.captures.lock().get(&id).cloned()
        }
    }

    impl TransportAdapter for MockAdapter {
        fn platform(&self) -> PlatformInfo {
            PlatformInfo::new("MockServer", "2.1", "1.8.9")
        }

        fn is_alive(&self, id: ConnectionId) -> bool {
            self.alive.lock().contains(&id)
        }

        fn attach(&self, id: ConnectionId, capture: PacketCapture) -> Result<()> {
            if self.fail_attach.load(Ordering::SeqCst) {
                return Err(RecordingError::Io(std::io::Error::other("pipeline missing")));
            }
            self.captures.lock().insert(id, capture);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingListener {
        initialized: Mutex<Vec<(ConnectionId, String)>>,
        closed: Mutex<Vec<ConnectionId>>,
        record: bool,
    }

    impl ConnectionListener for CountingListener {
        fn on_initializing(&self, event: &ConnectionInitializing) {
            self.initialized
                .lock()
                .push((event.connection.id(), event.name.clone()));
            if self.record {
                event.connection.start_recording().expect("start");
            }
        }

        fn on_closed(&self, event: &ConnectionClosed) {
            self.closed.lock().push(event.connection.id());
        }
    }

    struct OldAdapter;

    impl TransportAdapter for OldAdapter {
        fn api_version(&self) -> u32 {
            0
        }
        fn platform(&self) -> PlatformInfo {
            PlatformInfo::default()
        }
        fn is_alive(&self, _id: ConnectionId) -> bool {
            false
        }
        fn attach(&self, _id: ConnectionId, _capture: PacketCapture) -> Result<()> {
            Ok(())
        }
    }

    /// Adapter that inspects the connection from inside `attach`.
    #[derive(Default)]
    struct InspectingAdapter {
        connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
        observed: Mutex<Vec<(bool, bool)>>,
    }

    impl TransportAdapter for InspectingAdapter {
        fn platform(&self) -> PlatformInfo {
            PlatformInfo::default()
        }
        fn is_alive(&self, _id: ConnectionId) -> bool {
            true
        }
        fn attach(&self, id: ConnectionId, _capture: PacketCapture) -> Result<()> {
            let connection = self.connections.lock().get(&id).cloned();
            if let Some(connection) = connection {
                let nested_rejected = matches!(
                    connection.start_recording(),
                    Err(RecordingError::AlreadyRecording)
                );
                self.observed
                    .lock()
                    .push((connection.recorder().is_some(), nested_rejected));
            }
            Ok(())
        }
    }

    fn hub() -> (Arc<MockAdapter>, ConnectionHub) {
        let adapter = Arc::new(MockAdapter::default());
        let hub = ConnectionHub::new(adapter.clone(), RecorderConfig::default()).expect("hub");
        (adapter, hub)
    }

    #[test]
    fn test_rejects_other_adapter_versions() {
        assert!(matches!(
            ConnectionHub::new(Arc::new(OldAdapter), RecorderConfig::default()),
            Err(RecordingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_start_recording_twice() {
        let (adapter, hub) = hub();
        let conn = hub.open_connection();
        assert!(conn.recorder().is_none());

        conn.start_recording().expect("start");
        assert!(adapter.capture(conn.id()).is_some());
        assert!(matches!(conn.start_recording(), Err(RecordingError::AlreadyRecording)));
    }

    #[test]
    fn test_failed_attach_leaves_connection_unrecorded() {
        let (adapter, hub) = hub();
        adapter.fail_attach.store(true, Ordering::SeqCst);
        let conn = hub.open_connection();

        assert!(conn.start_recording().is_err());
        assert!(conn.recorder().is_none());

        adapter.fail_attach.store(false, Ordering::SeqCst);
        conn.start_recording().expect("retry");
    }

    #[test]
    fn test_liveness_uses_host_lookup() {
        let (adapter, hub) = hub();
        let conn = hub.open_connection();
        assert!(!conn.is_alive());

        adapter.alive.lock().insert(conn.id());
        assert!(conn.is_alive());

        hub.connection_closed(conn.id());
        assert!(!conn.is_alive());
        assert!(hub.lookup(conn.id()).is_none());
    }

    #[test]
    fn test_events_fire_once() {
        let (_adapter, hub) = hub();
        let listener = Arc::new(CountingListener::default());
        hub.add_listener(listener.clone());

        let conn = hub.open_connection();
        let uuid = Uuid::new_v4();
        hub.connection_initializing(conn.id(), "Steve", uuid).expect("init");
        hub.connection_initializing(conn.id(), "Steve", uuid).expect("repeat ignored");
        assert_eq!(conn.player(), Some(uuid));

        hub.connection_closed(conn.id());
        hub.connection_closed(conn.id());

        assert_eq!(listener.initialized.lock().len(), 1);
        assert_eq!(listener.initialized.lock()[0].1, "Steve");
        assert_eq!(*listener.closed.lock(), [conn.id()]);
    }

    #[test]
    fn test_attach_can_query_connection() {
        let adapter = Arc::new(InspectingAdapter::default());
        let hub = ConnectionHub::new(adapter.clone(), RecorderConfig::default()).expect("hub");
        let conn = hub.open_connection();
        adapter.connections.lock().insert(conn.id(), Arc::clone(&conn));

        conn.start_recording().expect("start");
        assert_eq!(*adapter.observed.lock(), [(false, true)]);
        assert!(conn.recorder().is_some());
        adapter.connections.lock().clear();
    }

    #[test]
    fn test_player_conflict_keeps_connection_uninitialized() {
        let (_adapter, hub) = hub();
        let listener = Arc::new(CountingListener::default());
        hub.add_listener(listener.clone());

        let conn = hub.open_connection();
        conn.set_player(Uuid::new_v4()).expect("preset player");
        assert!(matches!(
            hub.connection_initializing(conn.id(), "Steve", Uuid::new_v4()),
            Err(RecordingError::InvalidState(_))
        ));

        hub.connection_closed(conn.id());
        assert!(listener.initialized.lock().is_empty());
        assert!(listener.closed.lock().is_empty());
    }

    #[test]
    fn test_closed_without_init_is_silent() {
        let (_adapter, hub) = hub();
        let listener = Arc::new(CountingListener::default());
        hub.add_listener(listener.clone());

        let conn = hub.open_connection();
        hub.connection_closed(conn.id());
        assert!(listener.closed.lock().is_empty());
        assert!(hub
            .connection_initializing(conn.id(), "late", Uuid::new_v4())
            .is_err());
    }

    #[test]
    fn test_identity_packet_and_participant() {
        let (adapter, hub) = hub();
        hub.add_listener(Arc::new(CountingListener {
            record: true,
            ..Default::default()
        }));

        let conn = hub.open_connection();
        let uuid = Uuid::new_v4();
        hub.connection_initializing(conn.id(), "Alex", uuid).expect("init");

        let session = conn.recorder().expect("recording");
        assert_eq!(session.participants(), [uuid]);
        assert_eq!(session.stats().frames_written, 1);

        let capture = adapter.capture(conn.id()).expect("attached");
        capture.on_packet(Direction::Outbound, b"chunk").expect("packet");
        assert_eq!(session.stats().frames_written, 2);
        assert_eq!(conn.capture(Direction::Inbound, b"x").expect("capture").map(|r| r.delivered), Some(0));
    }
}
