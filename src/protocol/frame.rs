//! Framing of the multiplexed output channel.
//!
//! Each frame is an 8 byte header followed by the payload:
//!
//! ```text
//! +--------+-----------+--------------------+
//! | stream | 0 0 0     | length (u32, BE)   |
//! +--------+-----------+--------------------+
//! ```

use std::fmt;

use crate::error::FrameError;

pub const HEADER_LEN: usize = 8;

/// Logical stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stream {
    /// Command responses
    Stdout = 1,
    /// Banner noise and shell errors
    Stderr = 2,
}

impl TryFrom<u8> for Stream {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Stream::Stdout),
            2 => Ok(Stream::Stderr),
            other => Err(FrameError::UnknownStream(other)),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub stream: Stream,
    pub len: usize,
}

impl FrameHeader {
    pub fn new(stream: Stream, len: usize) -> Self {
        Self { stream, len }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let stream = Stream::try_from(bytes[0])?;
        let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self {
            stream,
            len: len as usize,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = self.stream as u8;
        header[4..].copy_from_slice(&(self.len as u32).to_be_bytes());
        header
    }
}

/// Header and payload as one buffer.
pub fn encode_frame(stream: Stream, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&FrameHeader::new(stream, payload.len()).encode());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stderr_header() {
        let header = FrameHeader::parse(&[2, 0, 0, 0, 0, 0, 1, 4]).unwrap();
        assert_eq!(header, FrameHeader::new(Stream::Stderr, 260));
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode_frame(Stream::Stdout, b"hello");
        assert_eq!(&frame[..HEADER_LEN], &[1, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&frame[HEADER_LEN..], b"hello");
    }

    #[test]
    fn test_unknown_stream() {
        assert!(matches!(
            FrameHeader::parse(&[0, 0, 0, 0, 0, 0, 0, 1]),
            Err(FrameError::UnknownStream(0))
        ));
        assert!(matches!(
            FrameHeader::parse(&[3, 0, 0, 0, 0, 0, 0, 1]),
            Err(FrameError::UnknownStream(3))
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            FrameHeader::parse(&[1, 0, 0]),
            Err(FrameError::TooShort { expected: 8, actual: 3 })
        ));
    }
}
