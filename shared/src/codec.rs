//! Length-prefixed codec for the messaging channel
//!
//! All frames are sent as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: JSON Frame ]
//! ```
//!
//! This keeps frame boundaries intact over a TCP stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum frame size (1 MiB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// A single publish/subscribe frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Frame {
    /// Ask the broker to deliver messages published on `topic`
    Subscribe { topic: String },
    /// A message on `topic`; the payload is UTF-8 JSON text
    Publish { topic: String, payload: String },
    /// Keepalive
    Ping,
}

impl Frame {
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Frame::Publish {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Frame::Subscribe {
            topic: topic.into(),
        }
    }
}

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a frame into a length-prefixed byte buffer
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame directly into a provided buffer
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let body = serde_json::to_vec(frame)?;

    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(body.len()));
    }

    buf.reserve(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);

    Ok(())
}

/// Try to decode a length-prefixed frame from a buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if frame_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(frame_len));
    }

    let total_len = 4 + frame_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let body = buf.split_to(frame_len as usize);

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode(&mut self.buffer)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_frame() -> Frame {
        Frame::publish("/tenants/demo/devices/1/action_status", r#"{"status":"completed"}"#)
    }

    #[test]
    fn test_length_prefix_matches_body() {
        let encoded = encode(&status_frame()).expect("encode failed");
        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no frame");
        assert_eq!(decoded, status_frame());
        assert!(buf.is_empty(), "buffer should be empty after decode");
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(&Frame::Ping).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder_split_and_multiple() {
        let first = encode(&Frame::subscribe("/tenants/demo/devices/1/actions")).unwrap();
        let second = encode(&status_frame()).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&first[..3]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&first[3..]);
        decoder.extend(&second);
        assert!(matches!(
            decoder.decode_next().unwrap(),
            Some(Frame::Subscribe { .. })
        ));
        assert!(matches!(
            decoder.decode_next().unwrap(),
            Some(Frame::Publish { .. })
        ));
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 100);

        let result = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));
    }

    #[test]
    fn test_garbage_body_is_json_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(b"nop");
        assert!(matches!(decode(&mut buf), Err(CodecError::Json(_))));
    }
}
