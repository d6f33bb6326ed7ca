//! TCP session lifecycle around one engine socket.
//!
//! A session exists only while a socket does: [`spawn_session`] takes a
//! freshly connected stream, splits it, and runs a reader task and a writer
//! task until the peer closes, the read side idles past [`READ_TIMEOUT`],
//! the socket errors, or the handle is shut down. Every teardown path is
//! identical; only the logged reason differs.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::frame::FrameReassembler;

/// Idle time on the read side before the session is torn down.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    /// A new connect attempt is only legal from Disconnected.
    pub fn can_connect(self) -> bool {
        matches!(self, SessionState::Disconnected)
    }

    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerClosed,
    ReadTimeout,
    SocketError,
}

/// Events flowing from the session tasks to the connection manager.
#[derive(Debug)]
pub enum SessionEvent {
    /// One fully reassembled JSON message from the engine.
    Message(serde_json::Value),
    /// The socket is gone.
    Closed(DisconnectReason),
}

/// Handle to a live session's reader/writer tasks.
pub struct SessionHandle {
    writer: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Queue bytes for the writer task. Fails once the session is gone;
    /// nothing is queued across disconnects.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), LinkError> {
        self.writer
            .try_send(bytes)
            .map_err(|_| LinkError::SessionClosed)
    }

    /// Stop both tasks. Idempotent; no Closed event is emitted for an
    /// explicit shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Split a connected socket and run its reader/writer tasks, reporting
/// decoded messages and the eventual teardown over `events`.
pub fn spawn_session(
    engine: &str,
    stream: TcpStream,
    events: mpsc::Sender<SessionEvent>,
) -> SessionHandle {
    let (mut read_half, mut write_half) = stream.into_split();
    let cancel = CancellationToken::new();
    let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(64);

    // Writer: drain the queue into the socket.
    let writer_cancel = cancel.clone();
    let writer_events = events.clone();
    let writer_engine = engine.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                msg = writer_rx.recv() => {
                    match msg {
                        Some(bytes) => {
                            if let Err(e) = write_half.write_all(&bytes).await {
                                warn!(engine = %writer_engine, error = %e, "engine write failed");
                                writer_cancel.cancel();
                                let _ = writer_events
                                    .send(SessionEvent::Closed(DisconnectReason::SocketError))
                                    .await;
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    // Reader: socket chunks → frame reassembly → events.
    let reader_cancel = cancel.clone();
    let reader_engine = engine.to_string();
    tokio::spawn(async move {
        let mut reassembler = FrameReassembler::new();
        let mut buf = vec![0u8; 8 * 1024];

        let reason = loop {
            let read = tokio::select! {
                _ = reader_cancel.cancelled() => return,
                read = tokio::time::timeout(READ_TIMEOUT, read_half.read(&mut buf)) => read,
            };

            match read {
                Err(_) => break DisconnectReason::ReadTimeout,
                Ok(Ok(0)) => break DisconnectReason::PeerClosed,
                Ok(Ok(n)) => {
                    for frame in reassembler.push(&buf[..n]) {
                        match frame {
                            Ok(msg) => {
                                if events.send(SessionEvent::Message(msg)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                // Protocol error: drop the frame, keep the session.
                                warn!(
                                    engine = %reader_engine,
                                    error = %e,
                                    "discarding malformed engine frame"
                                );
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    debug!(engine = %reader_engine, error = %e, "engine read error");
                    break DisconnectReason::SocketError;
                }
            }
        };

        reader_cancel.cancel();
        let _ = events.send(SessionEvent::Closed(reason)).await;
    });

    SessionHandle {
        writer: writer_tx,
        cancel,
    }
}
