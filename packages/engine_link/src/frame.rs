//! Inbound engine frame reassembly.
//!
//! Engines send each message as a 2-byte unsigned little-endian length
//! prefix followed by that many bytes of UTF-8 JSON text. Outbound commands
//! travel the other way as bare JSON with no prefix; the engine-side parser
//! does not expect one, so the asymmetry is part of the wire contract.
//!
//! TCP delivery can split a message anywhere, including inside the 2-byte
//! header. Partial headers are buffered, so reassembly is correct for every
//! chunking of the stream. Bytes arriving past a frame's declared length
//! belong to the next frame.

use serde_json::Value;

use crate::error::LinkError;

/// Largest payload a 2-byte length prefix can declare.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Incremental decoder for the length-prefixed engine stream.
///
/// Feed raw chunks with [`push`](Self::push); each call returns the frames
/// completed by that chunk, in arrival order. A frame whose payload is not
/// valid JSON comes back as an error and is dropped; the decoder resets and
/// awaits the next header, so one bad frame never poisons the stream.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    header: [u8; 2],
    header_len: usize,
    expected: Option<usize>,
    accumulated: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially assembled frame and await a fresh header.
    pub fn reset(&mut self) {
        self.header_len = 0;
        self.expected = None;
        self.accumulated.clear();
    }

    /// Feed one chunk of bytes; returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Value, LinkError>> {
        let mut completed = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            match self.expected {
                None => {
                    let take = (2 - self.header_len).min(rest.len());
                    self.header[self.header_len..self.header_len + take]
                        .copy_from_slice(&rest[..take]);
                    self.header_len += take;
                    rest = &rest[take..];

                    if self.header_len == 2 {
                        let expected = u16::from_le_bytes(self.header) as usize;
                        self.expected = Some(expected);
                        if expected == 0 {
                            completed.push(self.complete(0));
                        }
                    }
                }
                Some(expected) => {
                    let take = (expected - self.accumulated.len()).min(rest.len());
                    self.accumulated.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];

                    if self.accumulated.len() >= expected {
                        completed.push(self.complete(expected));
                    }
                }
            }
        }

        completed
    }

    fn complete(&mut self, expected: usize) -> Result<Value, LinkError> {
        let payload = std::mem::take(&mut self.accumulated);
        self.reset();
        serde_json::from_slice(&payload[..expected]).map_err(|e| LinkError::BadFrame(e.to_string()))
    }
}
