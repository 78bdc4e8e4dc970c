//! Protocol primitives for reading and writing SoulSeek messages.
//!
//! All integers are signed 32-bit little-endian. Strings are prefixed with an
//! `i32` byte count and carried in ISO-8859-1, one byte per character.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Read, Write};
use std::net::Ipv4Addr;

use crate::{Error, Result};

/// The three independent numbering domains for message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeSpace {
    /// Messages exchanged with the central server (4-byte code).
    Server,
    /// Messages exchanged over an established P connection (4-byte code).
    Peer,
    /// The first message on a fresh peer socket (1-byte code).
    PeerInit,
}

impl CodeSpace {
    /// Width in bytes of the code field that follows the length prefix.
    pub fn code_width(self) -> usize {
        match self {
            CodeSpace::Server | CodeSpace::Peer => 4,
            CodeSpace::PeerInit => 1,
        }
    }

    fn read_code<B: Buf>(self, buf: &mut B) -> Result<u32> {
        match self {
            CodeSpace::Server | CodeSpace::Peer => Ok(i32::read_from(buf)? as u32),
            CodeSpace::PeerInit => Ok(u32::from(u8::read_from(buf)?)),
        }
    }

    fn put_code<B: BufMut>(self, buf: &mut B, code: u32) {
        match self {
            CodeSpace::Server | CodeSpace::Peer => buf.put_u32_le(code),
            CodeSpace::PeerInit => buf.put_u8(code as u8),
        }
    }
}

/// Trait for reading protocol primitives from a buffer.
pub trait ProtocolRead: Sized {
    fn read_from<B: Buf>(buf: &mut B) -> Result<Self>;
}

/// Trait for writing protocol primitives to a buffer.
pub trait ProtocolWrite {
    fn write_to<B: BufMut>(&self, buf: &mut B);

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }
}

/// Trait for reading complete messages of one code space.
pub trait MessageRead: Sized {
    const CODE_SPACE: CodeSpace;

    /// Read a message body given its code.
    ///
    /// Codes absent from the code space decode to the type's `Unknown`
    /// variant rather than failing.
    fn read_with_code<B: Buf>(code: u32, buf: &mut B) -> Result<Self>;
}

/// Trait for writing complete messages of one code space.
pub trait MessageWrite {
    const CODE_SPACE: CodeSpace;

    /// Get the message code.
    fn code(&self) -> u32;

    /// Write the message contents (without length prefix or code).
    fn write_payload<B: BufMut>(&self, buf: &mut B) -> Result<()>;

    /// Write a complete message with length prefix and code.
    fn write_message<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut payload = BytesMut::new();
        self.write_payload(&mut payload)?;

        let width = Self::CODE_SPACE.code_width();
        let total_len = width + payload.len();
        buf.put_i32_le(total_len as i32);
        Self::CODE_SPACE.put_code(buf, self.code());
        buf.put_slice(&payload);
        Ok(())
    }

    /// Encode into a standalone frame ready for the wire.
    fn to_frame(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.write_message(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Decode one frame whose length prefix has already been stripped.
///
/// The input is only read through a cursor, so decoding the same frame twice
/// yields the same message.
pub fn decode_frame<M: MessageRead>(frame: &[u8]) -> Result<M> {
    let mut cursor = frame;
    let code = M::CODE_SPACE.read_code(&mut cursor)?;
    M::read_with_code(code, &mut cursor)
}

/// Read a complete message (including length prefix) from a buffer.
///
/// Exactly `4 + length` bytes are consumed even when the body carries
/// trailing fields the decoder does not know about.
pub fn read_message<M: MessageRead, B: Buf>(buf: &mut B) -> Result<M> {
    let len = read_len(buf)?;
    if buf.remaining() < len {
        return Err(Error::underflow(len, buf.remaining()));
    }
    let frame = buf.copy_to_bytes(len);
    decode_frame(&frame)
}

/// Read an `i32` length or count field, rejecting negative values.
pub fn read_len<B: Buf>(buf: &mut B) -> Result<usize> {
    let len = i32::read_from(buf)?;
    if len < 0 {
        return Err(Error::InvalidLength(len));
    }
    Ok(len as usize)
}

// Primitive implementations

impl ProtocolRead for u8 {
    fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(Error::underflow(1, buf.remaining()));
        }
        Ok(buf.get_u8())
    }
}

impl ProtocolWrite for u8 {
    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(*self);
    }
}

impl ProtocolRead for i32 {
    fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::underflow(4, buf.remaining()));
        }
        Ok(buf.get_i32_le())
    }
}

impl ProtocolWrite for i32 {
    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(*self);
    }
}

impl ProtocolRead for bool {
    fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        let byte = u8::read_from(buf)?;
        Ok(byte != 0)
    }
}

impl ProtocolWrite for bool {
    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(if *self { 1 } else { 0 });
    }
}

impl ProtocolRead for String {
    fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        let bytes = read_bytes(buf)?;
        Ok(decode_latin1(&bytes))
    }
}

impl ProtocolWrite for String {
    fn write_to<B: BufMut>(&self, buf: &mut B) {
        self.as_str().write_to(buf);
    }
}

impl ProtocolWrite for &str {
    fn write_to<B: BufMut>(&self, buf: &mut B) {
        write_bytes(buf, &encode_latin1(self));
    }
}

/// Encode text as ISO-8859-1. Characters above U+00FF become `?`.
pub fn encode_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Decode ISO-8859-1 bytes. Every byte maps to exactly one character.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Read raw bytes with an `i32` length prefix.
pub fn read_bytes<B: Buf>(buf: &mut B) -> Result<Vec<u8>> {
    let len = read_len(buf)?;
    if buf.remaining() < len {
        return Err(Error::underflow(len, buf.remaining()));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

/// Write raw bytes with an `i32` length prefix.
pub fn write_bytes<B: BufMut>(buf: &mut B, data: &[u8]) {
    buf.put_i32_le(data.len() as i32);
    buf.put_slice(data);
}

impl ProtocolRead for Ipv4Addr {
    fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::underflow(4, buf.remaining()));
        }
        // Stored as a little-endian 32-bit integer: [d, c, b, a] is a.b.c.d
        let d = buf.get_u8();
        let c = buf.get_u8();
        let b = buf.get_u8();
        let a = buf.get_u8();
        Ok(Ipv4Addr::new(a, b, c, d))
    }
}

impl ProtocolWrite for Ipv4Addr {
    fn write_to<B: BufMut>(&self, buf: &mut B) {
        let octets = self.octets();
        buf.put_u8(octets[3]);
        buf.put_u8(octets[2]);
        buf.put_u8(octets[1]);
        buf.put_u8(octets[0]);
    }
}

/// Compress data using zlib.
pub fn zlib_compress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(e.to_string()))
}

/// Decompress zlib data.
pub fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;

    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::Decompression(e.to_string()))?;
    Ok(decompressed)
}

/// Hex MD5 of the raw username bytes followed by the raw password bytes.
pub fn login_hash(username: &str, password: &str) -> String {
    let mut input = encode_latin1(username);
    input.extend_from_slice(&encode_latin1(password));
    let digest = md5::compute(&input);
    format!("{:x}", digest)
}

/// Read a counted list of items from a buffer.
pub fn read_list<B, T, F>(buf: &mut B, read_fn: F) -> Result<Vec<T>>
where
    B: Buf,
    F: Fn(&mut B) -> Result<T>,
{
    let count = read_len(buf)?;
    // A hostile count must not drive the allocation.
    let mut items = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        items.push(read_fn(buf)?);
    }
    Ok(items)
}

/// Write a counted list of items to a buffer.
pub fn write_list<B, T, F>(buf: &mut B, items: &[T], write_fn: F)
where
    B: BufMut,
    F: Fn(&mut B, &T),
{
    buf.put_i32_le(items.len() as i32);
    for item in items {
        write_fn(buf, item);
    }
}
