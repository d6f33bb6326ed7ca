use thiserror::Error;

/// Errors that can occur on the engine link
#[derive(Debug, Error)]
pub enum LinkError {
    /// TCP connect to the engine failed
    #[error("connect to {host}:{port} failed: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// Operation requires a live session
    #[error("not connected to engine")]
    NotConnected,
    /// A completed frame did not parse as JSON
    #[error("malformed engine frame: {0}")]
    BadFrame(String),
    /// The session's writer task is gone
    #[error("engine session closed")]
    SessionClosed,
}
