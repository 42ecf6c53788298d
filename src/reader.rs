use crate::error::*;
use crate::leb128::{read_leb128, read_sleb128};

/// Bounds checked cursor over a module binary.
///
/// Offsets are always absolute positions in the underlying buffer, so a
/// sub-reader reports the same offsets as its parent.
#[derive(Clone, Copy)]
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> BinaryReader<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8]) -> Self { Self { bytes, pos: 0, end: bytes.len() } }

    /// A reader over the next `len` bytes. The parent is not advanced.
    pub fn subreader(&self, len: usize) -> Result<BinaryReader<'a>, Error> {
        let end = self.pos.checked_add(len).ok_or(Error::Malformed(LENGTH_OUT_OF_BOUNDS))?;
        if end > self.end { return Err(Error::Malformed(LENGTH_OUT_OF_BOUNDS)); }
        Ok(BinaryReader { bytes: self.bytes, pos: self.pos, end })
    }

    #[inline]
    pub fn offset(&self) -> usize { self.pos }
    #[inline]
    pub fn end(&self) -> usize { self.end }
    #[inline]
    pub fn has_more(&self) -> bool { self.pos < self.end }
    #[inline]
    pub fn remaining(&self) -> usize { self.end - self.pos }

    pub fn seek(&mut self, offset: usize) -> Result<(), Error> {
        if offset > self.end { return Err(Error::Malformed(UNEXPECTED_END)); }
        self.pos = offset;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        let target = self.pos.checked_add(n).ok_or(Error::Malformed(UNEXPECTED_END))?;
        self.seek(target)
    }

    #[inline]
    fn window(&self) -> &'a [u8] { &self.bytes[..self.end] }

    #[inline]
    pub fn peek_u8(&self) -> Result<u8, Error> {
        if self.pos >= self.end { return Err(Error::Malformed(UNEXPECTED_END)); }
        Ok(self.bytes[self.pos])
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).ok_or(Error::Malformed(UNEXPECTED_END))?;
        if end > self.end { return Err(Error::Malformed(UNEXPECTED_END)); }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> { Ok(u32::from_le_bytes(self.read_array()?)) }
    pub fn read_u64(&mut self) -> Result<u64, Error> { Ok(u64::from_le_bytes(self.read_array()?)) }
    pub fn read_f32_bits(&mut self) -> Result<u32, Error> { self.read_u32() }
    pub fn read_f64_bits(&mut self) -> Result<u64, Error> { self.read_u64() }

    #[inline]
    pub fn read_leb_u32(&mut self) -> Result<u32, Error> {
        let v = read_leb128(self.window(), &mut self.pos, 32)?;
        Ok(v as u32)
    }

    #[inline]
    pub fn read_leb_i32(&mut self) -> Result<i32, Error> {
        let v = read_sleb128(self.window(), &mut self.pos, 32)?;
        Ok(v as i32)
    }

    /// Block types are encoded as 33-bit signed values.
    #[inline]
    pub fn read_leb_i33(&mut self) -> Result<i64, Error> {
        read_sleb128(self.window(), &mut self.pos, 33)
    }

    #[inline]
    pub fn read_leb_i64(&mut self) -> Result<i64, Error> {
        read_sleb128(self.window(), &mut self.pos, 64)
    }

    /// Reads a length prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String, Error> {
        let len = self.read_leb_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        validate_utf8(bytes)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Validates a UTF-8 byte sequence, classifying the first failure found.
pub fn validate_utf8(bytes: &[u8]) -> Result<(), Error> {
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        let (len, min) = match lead {
            0x00..=0x7f => { i += 1; continue; }
            0x80..=0xbf => return Err(Error::Malformed(UTF8_UNEXPECTED_CONTINUATION)),
            0xc0..=0xdf => (2, 0x80u32),
            0xe0..=0xef => (3, 0x800u32),
            0xf0..=0xf7 => (4, 0x10000u32),
            _ => return Err(Error::Malformed(UTF8_INVALID_BYTE)),
        };
        if i + len > bytes.len() { return Err(Error::Malformed(UTF8_OUT_OF_BOUNDS)); }
        let mut cp = (lead as u32) & (0x7f >> len);
        for &b in &bytes[i + 1..i + len] {
            if b & 0xc0 != 0x80 { return Err(Error::Malformed(UTF8_UNEXPECTED_LEADING)); }
            cp = (cp << 6) | (b & 0x3f) as u32;
        }
        if cp < min { return Err(Error::Malformed(UTF8_OVERLONG)); }
        if cp > 0x10ffff || (0xd800..=0xdfff).contains(&cp) {
            return Err(Error::Malformed(UTF8_INVALID_CODEPOINT));
        }
        i += len;
    }
    Ok(())
}
