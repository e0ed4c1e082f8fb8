//! NDJSON codec for the agent event stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line
//! length so an unterminated or runaway line from a misbehaving agent
//! process cannot exhaust memory. Used as the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the child's stdout.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted from the agent: 1 MiB.
///
/// Longer lines cause [`EventCodec::decode`] to return
/// [`AppError::Protocol`] with `"line too long"` instead of allocating.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for the agent's stdout stream.
///
/// Each `\n`-terminated UTF-8 string is one complete protocol event.
/// The caller decides what to do with lines that are not valid JSON;
/// the codec only enforces framing and the length cap.
#[derive(Debug)]
pub struct EventCodec(LinesCodec);

impl EventCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` while no complete line is buffered yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when the line exceeds
    /// [`MAX_LINE_BYTES`], or [`AppError::Io`] on underlying I/O failure.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
