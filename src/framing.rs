//! Wire framing layer
//!
//! Handles the length-prefixed message framing used on the child process
//! pipes, as specified by the Language Server Protocol:
//!
//! `Content-Length: <length>\r\n\r\n<content>`
//!
//! The decoder consumes arbitrary read chunks and yields complete frame
//! bodies; partial frames stay buffered until the remaining bytes arrive.

use tracing::trace;

/// Maximum frame body size to prevent memory exhaustion
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Error types for wire framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Invalid frame header: {0}")]
    InvalidHeader(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Encode a message body into its wire form.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental frame decoder
///
/// Bytes are appended with [`push`](Self::push) as they arrive from the pipe;
/// [`try_next`](Self::try_next) extracts complete frame bodies in order. The
/// header block is only ever recognized at the start of the unconsumed buffer;
/// header-like text inside an earlier frame's payload can never be mistaken
/// for a frame boundary.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append freshly read bytes to the decode buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered, not-yet-consumed bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to extract the next complete frame body.
    ///
    /// Returns `Ok(None)` if the buffered bytes do not yet contain a complete
    /// frame; the buffer is left untouched for the next read. A malformed
    /// header is a fatal protocol fault.
    pub fn try_next(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        // Header block is anchored at position 0 of the unconsumed buffer.
        let Some(header_end) = find_subslice(&self.buffer, b"\r\n\r\n") else {
            return Ok(None);
        };

        let header = std::str::from_utf8(&self.buffer[..header_end])
            .map_err(|_| FramingError::InvalidHeader("non-ASCII header block".to_string()))?;
        let content_length = parse_content_length(header)?;

        let content_start = header_end + 4;
        let available = self.buffer.len() - content_start;
        if available < content_length {
            trace!(
                "FrameDecoder: incomplete frame, need {} more bytes",
                content_length - available
            );
            return Ok(None);
        }

        let body = self.buffer[content_start..content_start + content_length].to_vec();
        self.buffer.drain(..content_start + content_length);

        trace!("FrameDecoder: extracted complete frame ({content_length} bytes)");
        Ok(Some(body))
    }
}

/// Parse the `Content-Length` value out of a complete header block
fn parse_content_length(header: &str) -> Result<usize, FramingError> {
    for line in header.lines() {
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let value = value.trim();
            let length = value
                .parse::<usize>()
                .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;

            if length > MAX_FRAME_SIZE {
                return Err(FramingError::FrameTooLarge {
                    size: length,
                    max: MAX_FRAME_SIZE,
                });
            }

            return Ok(length);
        }
    }

    Err(FramingError::InvalidHeader(
        "missing Content-Length header".to_string(),
    ))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.try_next().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;

        let mut decoder = FrameDecoder::new();
        decoder.push(&encode(payload));

        let frames = decode_all(&mut decoder);
        assert_eq!(frames, vec![payload.to_vec()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_incomplete_body_leaves_buffer_untouched() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let frame = encode(payload);

        let mut decoder = FrameDecoder::new();
        decoder.push(&frame[..frame.len() - 5]);

        assert!(decoder.try_next().unwrap().is_none());
        let buffered = decoder.buffered();
        assert!(decoder.try_next().unwrap().is_none());
        assert_eq!(decoder.buffered(), buffered);

        decoder.push(&frame[frame.len() - 5..]);
        assert_eq!(decoder.try_next().unwrap().unwrap(), payload.to_vec());
    }

    #[test]
    fn test_multiple_frames_from_single_read() {
        let first = br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let second = br#"{"jsonrpc":"2.0","method":"initialized"}"#;

        let mut combined = encode(first);
        combined.extend_from_slice(&encode(second));

        let mut decoder = FrameDecoder::new();
        decoder.push(&combined);

        let frames = decode_all(&mut decoder);
        assert_eq!(frames, vec![first.to_vec(), second.to_vec()]);
    }

    #[test]
    fn test_chunk_invariance_byte_at_a_time() {
        let payloads: Vec<&[u8]> = vec![
            br#"{"jsonrpc":"2.0","id":7,"result":null}"#,
            br#"{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{}}"#,
            br#"{"jsonrpc":"2.0","id":8,"error":{"code":-32601,"message":"nope"}}"#,
        ];

        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend_from_slice(&encode(payload));
        }

        let mut whole = FrameDecoder::new();
        whole.push(&stream);
        let expected = decode_all(&mut whole);

        let mut trickled = FrameDecoder::new();
        let mut got = Vec::new();
        for byte in &stream {
            trickled.push(std::slice::from_ref(byte));
            got.extend(decode_all(&mut trickled));
        }

        assert_eq!(got, expected);
        assert_eq!(got.len(), payloads.len());
    }

    #[test]
    fn test_header_like_payload_does_not_confuse_decoder() {
        // A payload containing header-looking text must not be taken as a
        // frame boundary; only the anchored header counts.
        let tricky = br#"{"text":"Content-Length: 999\r\n\r\nbogus"}"#;
        let follow = br#"{"jsonrpc":"2.0","id":2,"result":[]}"#;

        let mut stream = encode(tricky);
        stream.extend_from_slice(&encode(follow));

        let mut decoder = FrameDecoder::new();
        decoder.push(&stream);

        let frames = decode_all(&mut decoder);
        assert_eq!(frames, vec![tricky.to_vec(), follow.to_vec()]);
    }

    #[test]
    fn test_invalid_content_length_is_fatal() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: not-a-number\r\n\r\n{}");

        match decoder.try_next() {
            Err(FramingError::InvalidContentLength(value)) => {
                assert_eq!(value, "not-a-number");
            }
            other => panic!("Expected InvalidContentLength, got: {other:?}"),
        }
    }

    #[test]
    fn test_missing_content_length_is_fatal() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Type: application/json\r\n\r\n{}");

        assert!(matches!(
            decoder.try_next(),
            Err(FramingError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let declared = MAX_FRAME_SIZE + 1;
        let mut decoder = FrameDecoder::new();
        decoder.push(format!("Content-Length: {declared}\r\n\r\n").as_bytes());

        match decoder.try_next() {
            Err(FramingError::FrameTooLarge { size, max }) => {
                assert_eq!(size, declared);
                assert_eq!(max, MAX_FRAME_SIZE);
            }
            other => panic!("Expected FrameTooLarge, got: {other:?}"),
        }
    }

    #[test]
    fn test_extra_headers_are_tolerated() {
        let payload = b"{}";
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: 2\r\nContent-Type: application/vscode-jsonrpc\r\n\r\n{}");

        assert_eq!(decoder.try_next().unwrap().unwrap(), payload.to_vec());
    }
}
