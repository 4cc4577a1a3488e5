//! Message framing for the wire protocol.

use super::body::{Body, decode_body, encode_body};
use super::header::{Encoding, HEADER_SIZE, Header};
use crate::error::{CodecError, Error, FramingError, RemoteError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame body size (10MB by default).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// A frame with a decoded body.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Frame header. `length` is filled in when the frame is encoded.
    pub header: Header,
    /// Frame body.
    pub body: Body,
}

impl Frame {
    /// Create a frame whose encoding follows the body.
    #[must_use]
    pub fn new(id: i32, body: Body, err: bool, stream: bool) -> Self {
        let encoding = body.encoding();
        Self::with_encoding(id, encoding, body, err, stream)
    }

    /// Create a frame with an explicit encoding.
    #[must_use]
    pub fn with_encoding(
        id: i32,
        encoding: Encoding,
        body: Body,
        err: bool,
        stream: bool,
    ) -> Self {
        Self {
            header: Header {
                id,
                length: 0,
                encoding,
                err,
                stream,
            },
            body,
        }
    }

    /// Reply to an async call. `id` is the negated call id.
    #[must_use]
    pub fn reply(id: i32, result: std::result::Result<Body, RemoteError>) -> Self {
        match result {
            Ok(body) => Self::new(id, body, false, false),
            Err(err) => Self::new(id, err.to_body(), true, false),
        }
    }

    /// One value of a source stream.
    #[must_use]
    pub fn stream_data(id: i32, encoding: Encoding, body: Body) -> Self {
        Self::with_encoding(id, encoding, body, false, true)
    }

    /// The terminal frame of a source stream: body `true` on normal
    /// completion, the error detail otherwise.
    #[must_use]
    pub fn stream_end(id: i32, error: Option<&RemoteError>) -> Self {
        let body = error.map_or(Body::Json(serde_json::Value::Bool(true)), RemoteError::to_body);
        Self::new(id, body, true, true)
    }

    /// Serialize the body, producing a frame ready for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not fit the declared encoding or
    /// exceeds `max_frame_size`.
    pub fn encode(&self, max_frame_size: usize) -> Result<EncodedFrame> {
        let payload = encode_body(&self.body, self.header.encoding)?;
        let size = payload.len();
        let length = u32::try_from(size)
            .ok()
            .filter(|_| size <= max_frame_size)
            .ok_or(FramingError::FrameTooLarge {
                size,
                max: max_frame_size.min(u32::MAX as usize),
            })?;

        Ok(EncodedFrame {
            header: Header {
                length,
                ..self.header
            },
            payload,
        })
    }
}

/// A frame whose body is still in wire form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Frame header. `length` equals `payload.len()`.
    pub header: Header,
    /// Encoded body bytes.
    pub payload: Bytes,
}

impl EncodedFrame {
    /// Decode the body according to the header's encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the declared encoding.
    pub fn decode(self) -> std::result::Result<Frame, CodecError> {
        let body = decode_body(self.payload, self.header.encoding)?;
        Ok(Frame {
            header: self.header,
            body,
        })
    }
}

/// Codec for encoding/decoding frames.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = EncodedFrame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least header size
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let header = Header::get(&mut &buf[..HEADER_SIZE]);
        let payload_len = header.length as usize;

        if payload_len > self.max_frame_size {
            return Err(FramingError::FrameTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            }
            .into());
        }

        // Wait for the full body
        let frame_len = HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(EncodedFrame { header, payload }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let needed = if buf.len() < HEADER_SIZE {
            HEADER_SIZE
        } else {
            HEADER_SIZE + Header::get(&mut &buf[..HEADER_SIZE]).length as usize
        };

        Err(FramingError::Truncated {
            needed,
            available: buf.len(),
        }
        .into())
    }
}

impl Encoder<EncodedFrame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: EncodedFrame, buf: &mut BytesMut) -> Result<()> {
        let payload_len = frame.payload.len();

        if payload_len > self.max_frame_size {
            return Err(FramingError::FrameTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            }
            .into());
        }

        buf.reserve(HEADER_SIZE + payload_len);
        frame.header.put(buf);
        buf.put(frame.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_roundtrip() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let frame = Frame::new(7, Body::Json(json!({"text": "hi world!"})), false, false);
        let encoded = frame.encode(MAX_FRAME_SIZE).unwrap();
        assert_eq!(encoded.header.length as usize, encoded.payload.len());

        codec.encode(encoded.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, encoded);
        assert_eq!(decoded.decode().unwrap().body, frame.body);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let encoded = Frame::new(1, Body::from("hello"), false, false)
            .encode(MAX_FRAME_SIZE)
            .unwrap();
        let mut wire = BytesMut::new();
        codec.encode(encoded.clone(), &mut wire).unwrap();

        // Header only
        buf.extend_from_slice(&wire[..HEADER_SIZE]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Rest of the body
        buf.extend_from_slice(&wire[HEADER_SIZE..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(encoded));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        for id in 1..=3 {
            let frame = Frame::stream_data(-id, Encoding::Json, Body::Json(json!(id)));
            codec
                .encode(frame.encode(MAX_FRAME_SIZE).unwrap(), &mut buf)
                .unwrap();
        }

        for id in 1..=3 {
            let frame = codec.decode(&mut buf).unwrap().unwrap().decode().unwrap();
            assert_eq!(frame.header.id, -id);
            assert_eq!(frame.body, Body::Json(json!(id)));
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_header_is_framing_error() {
        let mut codec = FrameCodec::new().with_max_frame_size(16);
        let mut buf = BytesMut::new();
        Header {
            id: 1,
            length: 17,
            encoding: Encoding::Binary,
            err: false,
            stream: false,
        }
        .put(&mut buf);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Framing(FramingError::FrameTooLarge { size: 17, max: 16 }))
        ));
    }

    #[test]
    fn test_oversized_body_is_rejected_before_encoding() {
        let frame = Frame::new(1, Body::Binary(Bytes::from(vec![0u8; 32])), false, false);
        assert!(matches!(
            frame.encode(16),
            Err(Error::Framing(FramingError::FrameTooLarge { size: 32, .. }))
        ));
    }

    #[test]
    fn test_truncated_frame_at_eof() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        Header {
            id: 1,
            length: 10,
            encoding: Encoding::Binary,
            err: false,
            stream: false,
        }
        .put(&mut buf);
        buf.extend_from_slice(b"abc");

        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(Error::Framing(FramingError::Truncated {
                needed: 19,
                available: 12,
            }))
        ));

        let mut empty = BytesMut::new();
        assert!(codec.decode_eof(&mut empty).unwrap().is_none());
    }

    #[test]
    fn test_stream_end_bodies() {
        let ok = Frame::stream_end(-4, None);
        assert!(ok.header.is_terminal());
        assert_eq!(ok.body, Body::Json(json!(true)));

        let err = RemoteError::new("broken");
        let failed = Frame::stream_end(-4, Some(&err));
        assert!(failed.header.is_terminal());
        assert_eq!(RemoteError::from_body(&failed.body), err);
    }
}
