//! Session recorder
//!
//! Append-only binary capture of wire traffic for offline replay and
//! debugging. Each record is an 8-byte header (4-byte direction tag,
//! 4-byte payload length, both little-endian) followed by exactly that many
//! raw bytes; the payload is one or more complete wire frames. Not required
//! for live operation.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Mutex;

/// Direction of a captured record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDirection {
    /// Bytes received from the server
    Inbound,
    /// Bytes sent to the server
    Outbound,
}

impl WireDirection {
    /// Wire tag for this direction
    pub fn tag(self) -> u32 {
        match self {
            WireDirection::Inbound => 0,
            WireDirection::Outbound => 1,
        }
    }

    /// Decode a wire tag
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(WireDirection::Inbound),
            1 => Some(WireDirection::Outbound),
            _ => None,
        }
    }
}

/// Error types for session recording
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unknown direction tag: {0}")]
    UnknownDirection(u32),
}

/// One captured record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub direction: WireDirection,
    pub payload: Vec<u8>,
}

// ============================================================================
// Writer
// ============================================================================

/// Append-only wire log writer
///
/// Every record is flushed before `append` returns, so a capture survives an
/// abrupt process death up to the last complete record.
pub struct WireLog {
    file: Mutex<File>,
}

impl WireLog {
    /// Create (truncating) a wire log at `path`
    pub fn create(path: &Path) -> Result<Self, RecorderError> {
        Ok(Self {
            file: Mutex::new(File::create(path)?),
        })
    }

    /// Append one record
    pub fn append(&self, direction: WireDirection, payload: &[u8]) -> Result<(), RecorderError> {
        let mut block = Vec::with_capacity(8 + payload.len());
        block.extend_from_slice(&direction.tag().to_le_bytes());
        block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        block.extend_from_slice(payload);

        let mut file = self.file.lock().unwrap();
        file.write_all(&block)?;
        file.flush()?;
        Ok(())
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Reads captured records back in order
pub struct WireLogReader {
    reader: BufReader<File>,
}

impl WireLogReader {
    /// Open a wire log for reading
    pub fn open(path: &Path) -> Result<Self, RecorderError> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Read the next record; `Ok(None)` at clean end of log.
    pub fn next_record(&mut self) -> Result<Option<WireRecord>, RecorderError> {
        let mut header = [0u8; 8];
        match read_fully(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            8 => {}
            actual => {
                return Err(RecorderError::Truncated {
                    expected: 8,
                    actual,
                });
            }
        }

        let tag = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let length = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
        let direction =
            WireDirection::from_tag(tag).ok_or(RecorderError::UnknownDirection(tag))?;

        let mut payload = vec![0u8; length];
        let actual = read_fully(&mut self.reader, &mut payload)?;
        if actual != length {
            return Err(RecorderError::Truncated {
                expected: length,
                actual,
            });
        }

        Ok(Some(WireRecord { direction, payload }))
    }
}

/// Fill `buf` as far as the stream allows, returning the byte count
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, RecorderError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_recorder_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.wirelog");

        let log = WireLog::create(&path).unwrap();
        log.append(WireDirection::Outbound, b"AB").unwrap();
        log.append(WireDirection::Inbound, b"CDE").unwrap();
        drop(log);

        let mut reader = WireLogReader::open(&path).unwrap();

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.direction, WireDirection::Outbound);
        assert_eq!(first.payload, b"AB");

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.direction, WireDirection::Inbound);
        assert_eq!(second.payload, b"CDE");

        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_header_length_matches_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.wirelog");

        let log = WireLog::create(&path).unwrap();
        log.append(WireDirection::Inbound, b"CDE").unwrap();
        drop(log);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 8 + 3);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);
        assert_eq!(&bytes[8..], b"CDE");
    }

    #[test]
    fn test_truncated_record_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.wirelog");

        let log = WireLog::create(&path).unwrap();
        log.append(WireDirection::Outbound, b"ABCDEF").unwrap();
        drop(log);

        // Chop the capture mid-payload, as a crash would.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let mut reader = WireLogReader::open(&path).unwrap();
        match reader.next_record() {
            Err(RecorderError::Truncated { expected, actual }) => {
                assert_eq!(expected, 6);
                assert_eq!(actual, 4);
            }
            other => panic!("Expected Truncated, got: {other:?}"),
        }
    }

    #[test]
    fn test_empty_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.wirelog");

        WireLog::create(&path).unwrap();
        let mut reader = WireLogReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_none());
    }
}
