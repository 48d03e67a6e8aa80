//! Length-prefixed framing for payloads exchanged between nodes.
//!
//! Every payload is sent as a single frame:
//!
//! ```text
//! +----------------+------------------------------------------+
//! | u32 length, BE | JSON envelope {"version":1,"lines":[..]} |
//! +----------------+------------------------------------------+
//! ```
//!
//! A read from the socket may carry part of a frame or several frames; the
//! length prefix is what delimits messages, never the payload contents.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::NetError;

pub const PROTOCOL_VERSION: u16 = 1;

/// Upper bound for a single frame body
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

/// Versioned wrapper around the lines of one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub lines: Vec<String>,
}

impl Envelope {
    pub fn new(lines: Vec<String>) -> Self {
        Envelope {
            version: PROTOCOL_VERSION,
            lines,
        }
    }

    /// Decode an envelope from a frame body
    pub fn from_frame(frame: &[u8]) -> Result<Self, NetError> {
        let envelope: Envelope =
            serde_json::from_slice(frame).map_err(|e| NetError::Codec(e.to_string()))?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(NetError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }

    pub fn to_frame(&self) -> Result<Bytes, NetError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| NetError::Codec(e.to_string()))
    }
}

/// Splits a byte stream into frame bodies and encodes outgoing envelopes.
///
/// Decoding yields raw frame bodies so that a malformed envelope can be
/// dropped by the reader without tearing the stream down. A corrupt length
/// prefix is an error and ends the stream.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        FrameCodec {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.inner.decode(src)?)
    }
}

impl Encoder<Envelope> for FrameCodec {
    type Error = NetError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_frame()?;
        self.inner.encode(body, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let mut codec = FrameCodec::new();
        let mut encoded = BytesMut::new();
        codec
            .encode(Envelope::new(lines(&["{", "\"round\": 1", "}"])), &mut encoded)
            .unwrap();

        let tail = encoded.split_off(encoded.len() - 3);
        assert!(codec.decode(&mut encoded).unwrap().is_none());

        encoded.unsplit(tail);
        let frame = codec.decode(&mut encoded).unwrap().unwrap();
        let envelope = Envelope::from_frame(&frame).unwrap();
        assert_eq!(envelope.lines.len(), 3);
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Envelope::new(lines(&["first"])), &mut buf).unwrap();
        codec.encode(Envelope::new(lines(&["second"])), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Envelope::from_frame(&first).unwrap().lines, lines(&["first"]));
        assert_eq!(Envelope::from_frame(&second).unwrap().lines, lines(&["second"]));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_marker_text_inside_payload_is_opaque() {
        // Payload text that looks like a block header must not affect framing
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let tricky = lines(&["{\"proposer\": 0", "garbage"]);
        codec.encode(Envelope::new(tricky.clone()), &mut buf).unwrap();

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Envelope::from_frame(&frame).unwrap().lines, tricky);
    }

    #[test]
    fn test_unsupported_version() {
        let body = br#"{"version":9,"lines":[]}"#;
        assert!(matches!(
            Envelope::from_frame(body),
            Err(NetError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LENGTH + 1) as u32);
        assert!(matches!(codec.decode(&mut buf), Err(NetError::Io(_))));
    }
}
