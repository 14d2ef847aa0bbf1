//! Tokio codec for JSON message framing.
//!
//! Messages on the wire are bare JSON values written back to back, with no
//! length prefix and no delimiter. The decoder finds where one complete value
//! ends and yields its raw bytes; turning those bytes into a [`Request`] or
//! [`Response`] is left to the caller so that a syntactically broken frame can
//! still be answered.
//!
//! ```text
//! {"type":"open_door",...}{"type":"register_device",...}
//! ^----- frame 1 --------^^------- frame 2 -----------^
//! ```
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use latchkey_protocol::{JsonCodec, Response};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> latchkey_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:9500").await?;
//! let mut framed = Framed::new(stream, JsonCodec::new());
//!
//! framed.send(serde_json::json!({"type": "register_device",
//!     "device_id": "abc", "device_key": "12345"})).await?;
//!
//! if let Some(frame) = framed.next().await {
//!     let response = Response::parse(&frame?)?;
//!     println!("success: {}", response.success);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! - Bytes that can never become valid JSON are emitted as one frame, running
//!   from the start of the buffer up to the first `{` after the syntax error.
//!   Parsing it fails and the server answers `{"success":0}`; the connection
//!   survives and decoding resumes at that `{`.
//! - A value still incomplete after `max_frame_size` bytes is rejected with
//!   `Error::FrameTooLarge`, which ends the stream.
//!
//! [`Request`]: crate::Request
//! [`Response`]: crate::Response

use bytes::{Buf, Bytes, BytesMut};
use latchkey_core::constants::MAX_FRAME_SIZE;
use latchkey_core::{Error, Result};
use serde::Serialize;
use serde::de::IgnoredAny;
use tokio_util::codec::{Decoder, Encoder};

/// Tokio codec for back-to-back JSON values.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    /// Maximum allowed frame size in bytes.
    max_frame_size: usize,
}

/// Outcome of scanning the buffer for one JSON value.
enum Scan {
    /// A value ends at this offset.
    Complete(usize),
    /// The value is cut short; wait for more bytes.
    Incomplete,
    /// The bytes before this offset can never form a value.
    Invalid(usize),
}

impl JsonCodec {
    /// Create a codec with the default 64 KB frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom frame limit.
    ///
    /// ```
    /// use latchkey_protocol::JsonCodec;
    ///
    /// let codec = JsonCodec::with_max_frame_size(1024);
    /// assert_eq!(codec.max_frame_size(), 1024);
    /// ```
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn scan(buf: &[u8]) -> Scan {
        let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<IgnoredAny>();
        match values.next() {
            Some(Ok(_)) => {
                let end = values.byte_offset();
                // A bare number at the end of the buffer may still grow.
                if end == buf.len() && !is_self_delimiting(buf[0]) {
                    Scan::Incomplete
                } else {
                    Scan::Complete(end)
                }
            }
            Some(Err(e)) if e.is_eof() => Scan::Incomplete,
            Some(Err(e)) => Scan::Invalid(resync_offset(buf, e.line(), e.column())),
            None => Scan::Incomplete,
        }
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn is_self_delimiting(first: u8) -> bool {
    matches!(first, b'{' | b'[' | b'"' | b't' | b'f' | b'n')
}

/// Where decoding can pick up again after a syntax error reported at
/// `line`/`column` (1-based, column counted in bytes): the first `{` past the
/// error, or the end of the buffer.
fn resync_offset(buf: &[u8], line: usize, column: usize) -> usize {
    let line_start = match line {
        0 | 1 => 0,
        _ => buf
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(line - 2)
            .map_or(buf.len(), |(i, _)| i + 1),
    };
    let error_at = (line_start + column).clamp(1, buf.len());

    buf[error_at..]
        .iter()
        .position(|b| *b == b'{')
        .map_or(buf.len(), |p| error_at + p)
}

fn skip_whitespace(src: &mut BytesMut) {
    let leading = src
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    src.advance(leading);
}

impl Decoder for JsonCodec {
    type Item = Bytes;
    type Error = Error;

    /// Extract the raw bytes of the next JSON value.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` - one complete (or irrecoverably broken) frame
    /// - `Ok(None)` - need more data
    ///
    /// # Errors
    ///
    /// Returns `Error::FrameTooLarge` once a frame outgrows the limit.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        skip_whitespace(src);
        if src.is_empty() {
            return Ok(None);
        }

        match Self::scan(src) {
            Scan::Complete(end) => {
                self.check_size(end)?;
                Ok(Some(src.split_to(end).freeze()))
            }
            Scan::Incomplete => {
                self.check_size(src.len())?;
                Ok(None)
            }
            Scan::Invalid(end) => {
                self.check_size(end)?;
                Ok(Some(src.split_to(end).freeze()))
            }
        }
    }

    /// Flush whatever is left when the peer closes the stream.
    ///
    /// A truncated value is handed out as a (malformed) frame rather than
    /// raising an error, so the peer still gets an answer.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        skip_whitespace(src);
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(src.split().freeze()))
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec {
    type Error = Error;

    /// Serialize `item` as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails and
    /// `Error::FrameTooLarge` if the result exceeds the limit.
    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let encoded = serde_json::to_vec(&item)?;
        self.check_size(encoded.len())?;
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}
