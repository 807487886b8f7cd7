//! Newline-delimited message framing.
//!
//! Every message on the wire is a single line of UTF-8 JSON terminated by
//! `\n`. TCP delivers those bytes in arbitrary chunks, so the decoder keeps the
//! unterminated tail buffered until its delimiter arrives.
//!
//! No maximum frame size is enforced unless one is configured with
//! [`LineCodec::with_max_length`]. A peer that never sends a newline can grow
//! the read buffer without bound.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::FramingError;

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// A complete message body taken off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message body, without the trailing delimiter.
    pub body: Bytes,
    /// Number of bytes consumed from the stream, delimiter included.
    pub consumed: usize,
}

impl Frame {
    /// Body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer sent bytes that are not valid UTF-8.
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}

/// Codec splitting a byte stream on `\n`.
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    /// Index in the buffer up to which we already know there is no delimiter.
    next_index: usize,
    max_length: Option<usize>,
}

impl LineCodec {
    /// Create a codec without a frame size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_index: 0,
            max_length: None,
        }
    }

    /// Reject frames whose body is longer than `max` bytes.
    #[must_use]
    pub const fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    fn check_length(&self, len: usize) -> Result<(), FramingError> {
        match self.max_length {
            Some(max) if len > max => Err(FramingError::FrameTooLong { max }),
            _ => Ok(()),
        }
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = FramingError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.next_index.min(buf.len());

        let Some(offset) = buf[start..].iter().position(|b| *b == DELIMITER) else {
            self.check_length(buf.len())?;
            self.next_index = buf.len();
            return Ok(None);
        };

        let delimiter_at = start + offset;
        self.next_index = 0;
        self.check_length(delimiter_at)?;

        let mut line = buf.split_to(delimiter_at + 1);
        line.truncate(delimiter_at);

        Ok(Some(Frame {
            body: line.freeze(),
            consumed: delimiter_at + 1,
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        if !buf.is_empty() {
            debug!("Discarding {} unterminated bytes at end of stream", buf.len());
            buf.clear();
        }
        self.next_index = 0;

        Ok(None)
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = FramingError;

    fn encode(&mut self, body: Bytes, buf: &mut BytesMut) -> Result<(), Self::Error> {
        self.check_length(body.len())?;

        buf.reserve(body.len() + 1);
        buf.put(body);
        buf.put_u8(DELIMITER);

        Ok(())
    }
}
