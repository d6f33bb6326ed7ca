//! Engine link - persistent TCP sessions to remote engine processes
//!
//! This crate manages the client side of the engine control protocol: it
//! keeps a TCP session per engine alive (reconnecting on a fixed cadence),
//! reassembles the engine's length-prefixed JSON messages, folds status
//! traffic into a cached snapshot, and correlates passthrough commands with
//! their single reply. It has no HTTP dependencies; the gateway server sits
//! on top of it.
//!
//! # Example
//!
//! ```no_run
//! use engine_link::{ConnectionManager, status_sink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = status_sink(256);
//!     let manager = ConnectionManager::new("cortex", "cortex.local", 8000, sink.clone());
//!     manager.start();
//!
//!     manager.wait_until_connected().await;
//!     let snapshot = manager.status_snapshot().await;
//!     println!("{snapshot}");
//! }
//! ```

mod error;
mod frame;
mod manager;
mod session;
mod status;

pub use error::LinkError;
pub use frame::{FrameReassembler, MAX_FRAME_SIZE};
pub use manager::{
    ConnectionAction, ConnectionManager, RECONNECT_INTERVAL, StatusSink, passthrough_failure,
    status_sink,
};
pub use session::{DisconnectReason, READ_TIMEOUT, SessionEvent, SessionHandle, SessionState};
pub use status::{CPU_HISTORY_LEN, StatusCache};
