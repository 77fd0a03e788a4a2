//! DAP wire framing.
//!
//! Every message is an HTTP-like header section followed by the JSON
//! payload:
//!
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! { ...json... }
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::FramingError;

/// Literal opening every frame this side writes.
pub const HEADER: &str = "Content-Length: ";

/// Separator between the header section and the payload.
pub const SEPARATOR: &str = "\r\n\r\n";

/// Largest header section accepted before a separator must appear.
pub const MAX_HEADER_BYTES: usize = 4096;

/// Largest payload accepted from the engine (16 MiB).
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Frame `payload` for the wire.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let length = payload.len().to_string();
    let mut frame =
        BytesMut::with_capacity(HEADER.len() + length.len() + SEPARATOR.len() + payload.len());
    frame.extend_from_slice(HEADER.as_bytes());
    frame.extend_from_slice(length.as_bytes());
    frame.extend_from_slice(SEPARATOR.as_bytes());
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Incremental decoder for a byte stream of frames.
///
/// Feed it whatever the socket returns; pull complete payloads out with
/// [`FrameDecoder::next_frame`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Buffer to read into directly, e.g. with `AsyncReadExt::read_buf`.
    pub const fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Bytes received but not yet returned as a frame.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete payload, if any.
    ///
    /// # Errors
    /// Returns error if the header section is malformed or announces a
    /// payload larger than [`MAX_MESSAGE_BYTES`]. The decoder state
    /// is unusable afterwards; the connection should be dropped.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FramingError> {
        let Some(header_end) = find(&self.buffer, SEPARATOR.as_bytes()) else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                return Err(FramingError::HeaderTooLarge(MAX_HEADER_BYTES));
            }
            return Ok(None);
        };

        let header = std::str::from_utf8(&self.buffer[..header_end])
            .map_err(|_| FramingError::HeaderEncoding)?;
        let content_length = parse_content_length(header)?;
        if content_length > MAX_MESSAGE_BYTES {
            return Err(FramingError::MessageTooLarge {
                length: content_length,
                max: MAX_MESSAGE_BYTES,
            });
        }

        let payload_start = header_end + SEPARATOR.len();
        let frame_end = payload_start
            .checked_add(content_length)
            .ok_or_else(|| FramingError::InvalidContentLength(content_length.to_string()))?;
        if self.buffer.len() < frame_end {
            return Ok(None);
        }

        let _ = self.buffer.split_to(payload_start);
        Ok(Some(self.buffer.split_to(content_length).freeze()))
    }
}

fn parse_content_length(header: &str) -> Result<usize, FramingError> {
    // Other headers (Content-Type) may appear; only the length matters.
    let value = header
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("Content-Length"))
        .map(|(_, value)| value.trim())
        .ok_or(FramingError::MissingContentLength)?;

    value
        .parse()
        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
