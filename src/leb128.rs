use crate::error::*;

/// Reads an unsigned LEB128 value of at most `bits` bits starting at `*pc`.
///
/// The encoding may use at most `ceil(bits / 7)` bytes, and the unused high
/// bits of the last permitted byte must be zero.
#[inline]
pub fn read_leb128(bytes: &[u8], pc: &mut usize, bits: u32) -> Result<u64, Error> {
    let max_len = bits.div_ceil(7) as usize;
    let start = *pc;
    let mut pos = start;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *bytes.get(pos).ok_or(Error::Malformed(UNEXPECTED_END))?;
        pos += 1;
        if pos - start == max_len {
            if byte & 0x80 != 0 { return Err(Error::Malformed(INT_TOO_LONG)); }
            let remaining = bits - shift;
            if remaining < 7 && (byte >> remaining) != 0 { return Err(Error::Malformed(INT_TOO_LARGE)); }
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 { break; }
        shift += 7;
    }
    *pc = pos;
    Ok(result)
}

/// Reads a signed LEB128 value of at most `bits` bits starting at `*pc`.
///
/// The unused bits of the last permitted byte must all match the sign bit.
#[inline]
pub fn read_sleb128(bytes: &[u8], pc: &mut usize, bits: u32) -> Result<i64, Error> {
    let max_len = bits.div_ceil(7) as usize;
    let start = *pc;
    let mut pos = start;
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut byte: u8;
    loop {
        byte = *bytes.get(pos).ok_or(Error::Malformed(UNEXPECTED_END))?;
        pos += 1;
        if pos - start == max_len {
            if byte & 0x80 != 0 { return Err(Error::Malformed(INT_TOO_LONG)); }
            let remaining = bits - shift;
            if remaining < 7 {
                let top = (byte & 0x7f) >> (remaining - 1);
                if top != 0 && top != (0x7f >> (remaining - 1)) {
                    return Err(Error::Malformed(INT_TOO_LARGE));
                }
            }
        }
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 { break; }
    }
    if shift < 64 && (byte & 0x40) != 0 {
        result |= -1i64 << shift;
    }
    *pc = pos;
    Ok(result)
}
