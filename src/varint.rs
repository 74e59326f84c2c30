//! Minecraft-style variable-length integers: 7 bits per byte, low group
//! first, high bit set on every byte except the last.

use thiserror::Error;

/// A 32-bit value never needs more than this many bytes.
pub const MAX_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarIntError {
    #[error("VarInt is too big")]
    TooLarge,
    #[error("unexpected end of input while reading VarInt")]
    UnexpectedEof,
}

pub fn encode(value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(len(value));
    write(&mut out, value);
    out
}

#[inline]
pub fn write(out: &mut Vec<u8>, value: u32) {
    let mut val = value;
    loop {
        if (val & 0xffff_ff80) == 0 {
            out.push(val as u8);
            return;
        }
        out.push((val as u8 & 0x7f) | 0x80);
        val >>= 7;
    }
}

/// Decodes the VarInt starting at `offset`, returning the value and the
/// number of bytes it occupied.
#[inline]
pub fn decode(bytes: &[u8], offset: usize) -> Result<(u32, usize), VarIntError> {
    let input = bytes.get(offset..).unwrap_or_default();
    let mut value: u32 = 0;
    for i in 0..MAX_LEN {
        let Some(&byte) = input.get(i) else {
            return Err(VarIntError::UnexpectedEof);
        };
        value |= ((byte & 0x7f) as u32) << (i * 7);
        if (byte & 0x80) == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(VarIntError::TooLarge)
}

#[inline]
pub fn len(value: u32) -> usize {
    let mut val = value;
    let mut count = 1;
    while (val & 0xffff_ff80) != 0 {
        count += 1;
        val >>= 7;
    }
    count
}
