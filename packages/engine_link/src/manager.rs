//! Per-engine connection manager.
//!
//! One manager owns everything about a single engine link: the session
//! lifecycle, the status cache, the single in-flight passthrough slot, and
//! the reconnection driver. All of its state sits behind one lock, so cache
//! merges, slot handoffs, and state transitions are serialized exactly as
//! the protocol assumes.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::session::{self, DisconnectReason, SessionEvent, SessionHandle, SessionState};
use crate::status::StatusCache;

/// How often the driver retries while connect intent is set. A flat cadence,
/// deliberately: retries stop only when intent is cleared or the manager is
/// shut down.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Fan-out channel for status snapshots pushed to subscribers. Snapshots are
/// immutable once published; subscribers can never observe a partial update.
pub type StatusSink = broadcast::Sender<Arc<Value>>;

/// Create a status sink with the given buffer capacity.
pub fn status_sink(capacity: usize) -> StatusSink {
    let (tx, _) = broadcast::channel(capacity);
    tx
}

/// Failure envelope returned when a passthrough command cannot reach the
/// engine.
pub fn passthrough_failure(detail: &str) -> Value {
    json!({ "result": "fail", "error": "passthrough fail", "errordetail": detail })
}

/// Requested change of connect intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Connect,
    Disconnect,
}

impl FromStr for ConnectionAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            _ => Err(()),
        }
    }
}

struct Shared {
    state: SessionState,
    /// Client intent, independent of actual socket state. Transport failures
    /// never clear it; only an explicit disconnect request does.
    should_connect: bool,
    /// Whether this engine's snapshots go to the broadcast sink.
    selected: bool,
    cache: StatusCache,
    /// At most one outstanding passthrough reply slot. Registering a new one
    /// drops the previous sender; the superseded caller's receiver errors.
    pending: Option<oneshot::Sender<Value>>,
    session: Option<SessionHandle>,
    /// Bumped per connect cycle and per explicit disconnect; stale session
    /// events are discarded by mismatch.
    generation: u64,
}

/// Manages the link to one engine. Created once per engine name and shared
/// behind an [`Arc`] for the life of the process.
pub struct ConnectionManager {
    engine_name: String,
    host: String,
    port: u16,
    shared: Mutex<Shared>,
    connected_tx: watch::Sender<bool>,
    sink: StatusSink,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager with connect intent already set. Call
    /// [`start`](Self::start) to run the reconnection driver.
    pub fn new(
        engine_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        sink: StatusSink,
    ) -> Arc<Self> {
        let (connected_tx, _) = watch::channel(false);
        Arc::new(Self {
            engine_name: engine_name.into(),
            host: host.into(),
            port,
            shared: Mutex::new(Shared {
                state: SessionState::Disconnected,
                should_connect: true,
                selected: false,
                cache: StatusCache::new(),
                pending: None,
                session: None,
                generation: 0,
            }),
            connected_tx,
            sink,
            cancel: CancellationToken::new(),
        })
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run the reconnection driver until [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RECONNECT_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        manager.attempt_connection().await;
                    }
                }
            }
        });
    }

    /// Stop the driver and tear down any live session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.disconnect().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.lock().await.state.is_connected()
    }

    pub async fn is_selected(&self) -> bool {
        self.shared.lock().await.selected
    }

    /// Mark this engine as the broadcast source for subscriber pushes.
    pub async fn set_selected(&self, selected: bool) {
        self.shared.lock().await.selected = selected;
    }

    /// Begin a connect cycle. Returns false when intent is off or a session
    /// already exists; true means the attempt was initiated, not that it
    /// completed.
    pub async fn attempt_connection(self: &Arc<Self>) -> bool {
        let generation = {
            let mut shared = self.shared.lock().await;
            if !shared.should_connect || !shared.state.can_connect() {
                return false;
            }
            shared.state = SessionState::Connecting;
            shared.generation += 1;
            shared.generation
        };

        info!(
            engine = %self.engine_name,
            host = %self.host,
            port = self.port,
            "connecting to engine"
        );

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let stream = manager.open_socket().await;
            manager.finish_connect(generation, stream).await;
        });

        true
    }

    async fn open_socket(&self) -> Result<TcpStream, LinkError> {
        TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| LinkError::ConnectFailed {
                host: self.host.clone(),
                port: self.port,
                source,
            })
    }

    async fn finish_connect(self: &Arc<Self>, generation: u64, stream: Result<TcpStream, LinkError>) {
        let mut shared = self.shared.lock().await;
        // A disconnect request or a newer attempt may have superseded this
        // one while the connect was in flight.
        if shared.generation != generation || shared.state != SessionState::Connecting {
            return;
        }

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                debug!(engine = %self.engine_name, error = %e, "engine connect failed");
                shared.state = SessionState::Disconnected;
                return;
            }
        };

        let (events_tx, mut events_rx) = mpsc::channel(64);
        let handle = session::spawn_session(&self.engine_name, stream, events_tx);
        shared.state = SessionState::Connected;
        shared.cache.set_connected(true);
        shared.session = Some(handle);
        drop(shared);

        info!(engine = %self.engine_name, "engine connected");
        self.connected_tx.send_replace(true);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    SessionEvent::Message(msg) => manager.handle_message(msg).await,
                    SessionEvent::Closed(reason) => {
                        manager.handle_connection_lost(generation, reason).await;
                        break;
                    }
                }
            }
        });
    }

    /// Fold one decoded message into the cache, resolve any waiting
    /// passthrough caller, and push a snapshot if this engine is selected.
    async fn handle_message(&self, msg: Value) {
        let snapshot = {
            let mut shared = self.shared.lock().await;
            shared.cache.apply_message(&msg);

            if let Some(reply) = shared.pending.take() {
                let response = msg.get("response").cloned().unwrap_or(Value::Null);
                let _ = reply.send(response);
            }

            shared.selected.then(|| Arc::new(shared.cache.snapshot()))
        };

        if let Some(snapshot) = snapshot {
            let _ = self.sink.send(snapshot);
        }
    }

    async fn handle_connection_lost(&self, generation: u64, reason: DisconnectReason) {
        let mut shared = self.shared.lock().await;
        // Stale event from a session already torn down.
        if shared.generation != generation || shared.state != SessionState::Connected {
            return;
        }

        match reason {
            DisconnectReason::PeerClosed => {
                info!(engine = %self.engine_name, "engine closed the connection");
            }
            DisconnectReason::ReadTimeout => {
                warn!(engine = %self.engine_name, "engine connection timed out");
            }
            DisconnectReason::SocketError => {
                warn!(engine = %self.engine_name, "engine socket error");
            }
        }

        if let Some(session) = shared.session.take() {
            session.shutdown();
        }
        shared.state = SessionState::Disconnected;
        shared.cache.set_connected(false);
        // Intent is untouched: the driver keeps retrying until an explicit
        // disconnect request clears it.
        drop(shared);
        self.connected_tx.send_replace(false);
    }

    /// Tear down the live session. Returns whether one existed. Connect
    /// intent is left alone; [`toggle_connection`](Self::toggle_connection)
    /// clears it for explicit disconnect requests.
    pub async fn disconnect(&self) -> bool {
        let mut shared = self.shared.lock().await;
        // Invalidate the running session's events and any in-flight connect.
        shared.generation += 1;
        let torn_down = if let Some(session) = shared.session.take() {
            session.shutdown();
            shared.cache.set_connected(false);
            true
        } else {
            false
        };
        shared.state = SessionState::Disconnected;
        drop(shared);
        self.connected_tx.send_replace(false);
        torn_down
    }

    /// Resolve immediately when connected; otherwise set connect intent,
    /// fire an attempt, and resolve on the next successful connect.
    pub async fn wait_until_connected(self: &Arc<Self>) {
        let mut rx = self.connected_tx.subscribe();
        {
            let mut shared = self.shared.lock().await;
            if shared.state.is_connected() {
                return;
            }
            shared.should_connect = true;
        }
        self.attempt_connection().await;
        // The sender lives as long as the manager, so this cannot fail.
        let _ = rx.wait_for(|connected| *connected).await;
    }

    /// Synchronous read of the cached status; no engine I/O.
    pub async fn status_snapshot(&self) -> Value {
        self.shared.lock().await.cache.snapshot()
    }

    /// Ask the engine for a full status report. The receiver resolves with
    /// the engine's response object, or errors if the request is superseded
    /// or the link drops first. When not connected the poll is silently
    /// skipped but the reply slot is still registered.
    pub async fn request_full_status(&self) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let mut shared = self.shared.lock().await;
        shared.pending = Some(tx);
        if let Err(e) = Self::send_command(&shared.session, json!({ "query": "fullstatus" })) {
            debug!(engine = %self.engine_name, error = %e, "full status poll not sent");
        }
        rx
    }

    /// Forward an arbitrary command to the engine verbatim and route its
    /// single reply back to the caller. Registering a new passthrough
    /// supersedes any pending one. When the link is down nothing is written
    /// and the failure envelope comes back instead.
    pub async fn send_passthrough(&self, payload: Value) -> Result<oneshot::Receiver<Value>, Value> {
        let mut shared = self.shared.lock().await;
        if !shared.state.is_connected() {
            return Err(passthrough_failure(&format!(
                "unable to complete passthrough request for engine {}",
                self.engine_name
            )));
        }

        debug!(engine = %self.engine_name, command = %payload, "sending passthrough command");
        let (tx, rx) = oneshot::channel();
        shared.pending = Some(tx);
        if let Err(e) = Self::send_command(&shared.session, payload) {
            shared.pending = None;
            return Err(passthrough_failure(&e.to_string()));
        }
        Ok(rx)
    }

    /// Apply a connect/disconnect request. The word returned names the
    /// transition actually performed.
    pub async fn toggle_connection(self: &Arc<Self>, action: ConnectionAction) -> &'static str {
        match action {
            ConnectionAction::Connect => {
                let already_connected = {
                    let mut shared = self.shared.lock().await;
                    shared.should_connect = true;
                    shared.state.is_connected()
                };
                if already_connected {
                    "Connected"
                } else {
                    self.attempt_connection().await;
                    "Connecting"
                }
            }
            ConnectionAction::Disconnect => {
                self.shared.lock().await.should_connect = false;
                if self.disconnect().await {
                    "Disconnecting"
                } else {
                    "Disconnected"
                }
            }
        }
    }

    /// Whether the driver would currently retry (intent set, no session).
    pub async fn wants_reconnect(&self) -> bool {
        let shared = self.shared.lock().await;
        shared.should_connect && !shared.state.is_connected()
    }

    /// Outbound commands go out as bare JSON text: the engine's parser does
    /// not expect a length prefix on its side of the stream.
    fn send_command(session: &Option<SessionHandle>, command: Value) -> Result<(), LinkError> {
        let Some(session) = session else {
            return Err(LinkError::NotConnected);
        };
        session.send(command.to_string().into_bytes())
    }
}
