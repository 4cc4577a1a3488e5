//! The fixed 9-byte frame header.
//!
//! ```text
//! byte 0     flags: bit0 utf8, bit1 json (neither = binary), bit2 err, bit3 stream
//! bytes 1-4  body length, u32 big-endian
//! bytes 5-8  correlation id, i32 big-endian
//! ```

use bytes::{Buf, BufMut};
use std::fmt;

/// Frame header size (1 byte flags + 4 bytes length + 4 bytes id).
pub const HEADER_SIZE: usize = 9;

const FLAG_UTF8: u8 = 1;
const FLAG_JSON: u8 = 1 << 1;
const FLAG_ERR: u8 = 1 << 2;
const FLAG_STREAM: u8 = 1 << 3;
const ENCODING_MASK: u8 = FLAG_UTF8 | FLAG_JSON;

/// How a frame body is serialized.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Encoding {
    /// Raw bytes, passed through unchanged.
    #[default]
    Binary,
    /// A UTF-8 string.
    Utf8,
    /// JSON text.
    Json,
}

impl Encoding {
    const fn flag_bits(self) -> u8 {
        match self {
            Self::Binary => 0,
            Self::Utf8 => FLAG_UTF8,
            Self::Json => FLAG_JSON,
        }
    }

    // Both bits set is not produced by any encoder; it reads as json.
    const fn from_flag_bits(bits: u8) -> Self {
        match bits & ENCODING_MASK {
            0 => Self::Binary,
            FLAG_UTF8 => Self::Utf8,
            _ => Self::Json,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Utf8 => "utf8",
            Self::Json => "json",
        })
    }
}

/// Decoded frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    /// Correlation id. Positive for frames of a call the sender initiated,
    /// negative for frames answering a call the receiver initiated.
    pub id: i32,
    /// Byte length of the encoded body.
    pub length: u32,
    /// Body encoding.
    pub encoding: Encoding,
    /// Error reply, or end of stream when `stream` is set.
    pub err: bool,
    /// Part of a multi-frame streaming exchange.
    pub stream: bool,
}

impl Header {
    /// Whether this frame ends a streaming exchange.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.stream && self.err
    }

    /// Write the header into `dst`.
    pub fn put(&self, dst: &mut impl BufMut) {
        let mut flags = self.encoding.flag_bits();
        if self.err {
            flags |= FLAG_ERR;
        }
        if self.stream {
            flags |= FLAG_STREAM;
        }

        dst.put_u8(flags);
        dst.put_u32(self.length);
        dst.put_i32(self.id);
    }

    /// Read a header from `src`, which must hold at least [`HEADER_SIZE`] bytes.
    pub fn get(src: &mut impl Buf) -> Self {
        let flags = src.get_u8();
        let length = src.get_u32();
        let id = src.get_i32();

        Self {
            id,
            length,
            encoding: Encoding::from_flag_bits(flags),
            err: flags & FLAG_ERR != 0,
            stream: flags & FLAG_STREAM != 0,
        }
    }
}

/// Encode a header into its 9-byte wire form.
#[must_use]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    header.put(&mut &mut buf[..]);
    buf
}

/// Decode a header from its 9-byte wire form.
#[must_use]
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> Header {
    Header::get(&mut &buf[..])
}
