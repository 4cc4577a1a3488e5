//! Protocol layer for the muxrpc engine.
//!
//! This module contains the wire format:
//! - The 9-byte frame header
//! - Body encodings (binary, utf8, json)
//! - Framing codec for `tokio_util::codec`
//! - Call request bodies

pub mod body;
pub mod framing;
pub mod header;
pub mod message;

pub use body::{Body, decode_body, encode_body};
pub use framing::{EncodedFrame, Frame, FrameCodec, MAX_FRAME_SIZE};
pub use header::{Encoding, HEADER_SIZE, Header, decode_header, encode_header};
pub use message::{CallRequest, CallType};
