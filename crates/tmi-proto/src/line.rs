//! Line-based codec for tokio.
//!
//! Reads and writes newline-terminated lines. Tagged chat lines routinely
//! exceed the classic 512-byte limit, so the default cap is 4096 bytes.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, Result};

/// Default maximum line length in bytes, terminator included.
pub const MAX_LINE_LEN: usize = 4096;

/// Newline-terminated line codec.
pub struct LineCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    /// Maximum line length
    max_len: usize,
}

impl LineCodec {
    /// Create a codec with the default line limit.
    pub fn new() -> Self {
        Self {
            next_index: 0,
            max_len: MAX_LINE_LEN,
        }
    }

    /// Create a codec with a custom line limit.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if line.len() > self.max_len {
                return Err(ProtocolError::MessageTooLong {
                    actual: line.len(),
                    limit: self.max_len,
                });
            }

            let data = std::str::from_utf8(&line).map_err(|e| ProtocolError::InvalidUtf8 {
                byte_pos: e.valid_up_to(),
                details: e.to_string(),
            })?;

            Ok(Some(data.trim_end_matches(['\r', '\n']).to_owned()))
        } else {
            self.next_index = src.len();

            if src.len() > self.max_len {
                return Err(ProtocolError::MessageTooLong {
                    actual: src.len(),
                    limit: self.max_len,
                });
            }

            Ok(None)
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let encoded = item.len() + 2;
        if encoded > self.max_len {
            return Err(ProtocolError::MessageTooLong {
                actual: encoded,
                limit: self.max_len,
            });
        }

        dst.reserve(encoded);
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}

impl Encoder<&str> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<()> {
        self.encode(item.to_owned(), dst)
    }
}
