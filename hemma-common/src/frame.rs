//! Serial line framing.
//!
//! Outbound frames carry a 2-byte little-endian length header followed by
//! the CBOR-encoded message. Inbound bytes are a plain sequence of
//! self-delimiting CBOR items, which [`FrameDecoder`] reassembles from
//! arbitrary read chunks.

use std::io::{Cursor, ErrorKind};

use ciborium::Value;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::serialization::{Format, encode};

/// Size of the outbound length header.
pub const HEADER_LEN: usize = 2;

/// Largest payload an outbound frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Most bytes [`FrameDecoder`] holds for a single incomplete item.
pub const MAX_BUFFERED_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Encode a message into a length-prefixed frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    let payload = encode(message, Format::Cbor)?;
    let len = u16::try_from(payload.len()).map_err(|_| {
        Error::Frame(format!(
            "payload of {} bytes exceeds {} byte limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        ))
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Incremental decoder for a stream of CBOR-encoded messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a complete item.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete message, if any.
    ///
    /// Malformed CBOR is logged and the buffered bytes are dropped, since
    /// the stream offers no way to resynchronize inside them. The same
    /// happens to an incomplete item that grows past [`MAX_BUFFERED_LEN`].
    /// Well-formed items that are not maps are logged and skipped.
    pub fn next_message(&mut self) -> Option<Message> {
        while !self.buffer.is_empty() {
            let mut cursor = Cursor::new(self.buffer.as_slice());
            let item: std::result::Result<Value, _> = ciborium::from_reader(&mut cursor);

            match item {
                Ok(_) => {
                    let consumed = cursor.position() as usize;
                    let item: Vec<u8> = self.buffer.drain(..consumed).collect();

                    match ciborium::from_reader::<Message, _>(item.as_slice()) {
                        Ok(message) => return Some(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "Discarding non-message CBOR item");
                        }
                    }
                }
                Err(ciborium::de::Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    if self.buffer.len() > MAX_BUFFERED_LEN {
                        tracing::error!(
                            discarded = self.buffer.len(),
                            limit = MAX_BUFFERED_LEN,
                            "Incomplete CBOR item too large, discarding"
                        );
                        self.buffer.clear();
                    }
                    return None;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        discarded = self.buffer.len(),
                        "Invalid CBOR received"
                    );
                    self.buffer.clear();
                }
            }
        }

        None
    }
}
