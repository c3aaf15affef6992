//! Little-endian SMB wire encoding with UTF-16LE strings

use bytes::{Bytes, BytesMut};

use crate::error::{ProtoError, Result};

/// Encoder for SMB/DFSC little-endian structures.
pub struct WireEncoder {
    buf: BytesMut,
}

impl WireEncoder {
    /// Creates a new WireEncoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Encodes a 16-bit unsigned integer.
    pub fn encode_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Encodes a 32-bit unsigned integer.
    pub fn encode_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Encodes raw bytes.
    pub fn encode_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Encodes a string as UTF-16LE without a terminator.
    pub fn encode_utf16(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.encode_u16(unit);
        }
    }

    /// Encodes a string as UTF-16LE followed by a null terminator.
    pub fn encode_utf16_nul(&mut self, s: &str) {
        self.encode_utf16(s);
        self.encode_u16(0);
    }

    /// Overwrites a previously written u16 at `offset`.
    pub fn patch_u16(&mut self, offset: usize, v: u16) {
        self.buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for WireEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of UTF-16 code units in `s`.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Decoder for SMB/DFSC little-endian structures.
///
/// Reads advance a cursor; `*_at` methods read at absolute offsets and leave
/// the cursor untouched, which is how record-relative string offsets are
/// resolved.
pub struct WireDecoder {
    buf: Bytes,
    pos: usize,
}

impl WireDecoder {
    /// Creates a new WireDecoder from encoded bytes.
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn ensure_available(&self, offset: usize, len: usize) -> Result<()> {
        let available = self.buf.len().saturating_sub(offset);
        if len > available {
            return Err(ProtoError::Truncated {
                offset,
                needed: len,
                available,
            });
        }
        Ok(())
    }

    /// A second decoder over the same buffer with its cursor at `offset`.
    pub fn view_from(&self, offset: usize) -> Result<WireDecoder> {
        if offset > self.buf.len() {
            return Err(ProtoError::BadOffset {
                offset,
                len: self.buf.len(),
            });
        }
        Ok(WireDecoder {
            buf: self.buf.clone(),
            pos: offset,
        })
    }

    /// Reads a little-endian u16.
    pub fn decode_u16(&mut self) -> Result<u16> {
        let v = self.u16_at(self.pos)?;
        self.pos += 2;
        Ok(v)
    }

    /// Reads a little-endian u32.
    pub fn decode_u32(&mut self) -> Result<u32> {
        self.ensure_available(self.pos, 4)?;
        let b = &self.buf[self.pos..self.pos + 4];
        let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        Ok(v)
    }

    /// Reads `len` raw bytes.
    pub fn decode_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_available(self.pos, len)?;
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    /// Reads a null-terminated UTF-16LE string at the cursor.
    pub fn decode_utf16_nul(&mut self) -> Result<String> {
        let (s, consumed) = self.read_utf16_nul(self.pos)?;
        self.pos += consumed;
        Ok(s)
    }

    /// Reads `byte_len` bytes of unterminated UTF-16LE text.
    pub fn decode_utf16(&mut self, byte_len: usize) -> Result<String> {
        if byte_len % 2 != 0 {
            return Err(ProtoError::InvalidString {
                reason: format!("odd UTF-16 byte length {}", byte_len),
            });
        }
        let raw = self.decode_bytes(byte_len)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units).map_err(|e| ProtoError::InvalidString {
            reason: e.to_string(),
        })
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        self.ensure_available(offset, 2)?;
        Ok(u16::from_le_bytes([self.buf[offset], self.buf[offset + 1]]))
    }

    /// Reads a null-terminated UTF-16LE string at an absolute offset.
    pub fn utf16_nul_at(&self, offset: usize) -> Result<String> {
        if offset >= self.buf.len() {
            return Err(ProtoError::BadOffset {
                offset,
                len: self.buf.len(),
            });
        }
        self.read_utf16_nul(offset).map(|(s, _)| s)
    }

    /// Reads `count` consecutive null-terminated strings starting at `offset`.
    pub fn utf16_list_at(&self, offset: usize, count: usize) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(count);
        let mut at = offset;
        for _ in 0..count {
            if at >= self.buf.len() {
                return Err(ProtoError::BadOffset {
                    offset: at,
                    len: self.buf.len(),
                });
            }
            let (s, consumed) = self.read_utf16_nul(at)?;
            out.push(s);
            at += consumed;
        }
        Ok(out)
    }

    // Returns the string and bytes consumed including the terminator. A
    // string running to the end of the buffer without a terminator is
    // accepted.
    fn read_utf16_nul(&self, offset: usize) -> Result<(String, usize)> {
        let mut units = Vec::new();
        let mut at = offset;
        while at + 1 < self.buf.len() {
            let unit = u16::from_le_bytes([self.buf[at], self.buf[at + 1]]);
            at += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        let s = String::from_utf16(&units).map_err(|e| ProtoError::InvalidString {
            reason: e.to_string(),
        })?;
        Ok((s, at - offset))
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Length of the whole buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
