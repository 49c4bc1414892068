//! Small helpers shared by the heap, signature and image writers.
//!
//! ECMA-335 §II.23.2 defines the compressed unsigned integer encoding used for blob lengths,
//! user string lengths and signature element counts:
//!
//! | Range                      | Encoding                         |
//! |----------------------------|----------------------------------|
//! | `0x00 ..= 0x7F`            | 1 byte, `0xxxxxxx`               |
//! | `0x80 ..= 0x3FFF`          | 2 bytes, `10xxxxxx xxxxxxxx`     |
//! | `0x4000 ..= 0x1FFF_FFFF`   | 4 bytes, `110xxxxx` + 3 bytes    |

use crate::{Error, Result};

/// Largest value the compressed unsigned integer format can carry.
pub const MAX_COMPRESSED_UINT: u32 = 0x1FFF_FFFF;

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be non-zero; an alignment of 1 returns `value` unchanged.
#[must_use]
pub fn align_to(value: u64, alignment: u64) -> u64 {
    let remainder = value % alignment;
    if remainder == 0 {
        value
    } else {
        value + (alignment - remainder)
    }
}

/// Rounds `value` up to a multiple of four, the alignment every metadata stream uses.
#[must_use]
pub fn align_to_4(value: usize) -> usize {
    (value + 3) & !3
}

/// Pads `buffer` with zero bytes until its length is a multiple of `alignment`.
pub fn pad_to(buffer: &mut Vec<u8>, alignment: usize) {
    let remainder = buffer.len() % alignment;
    if remainder != 0 {
        buffer.resize(buffer.len() + (alignment - remainder), 0);
    }
}

/// Appends `value` to `buffer` in ECMA-335 compressed unsigned integer form.
///
/// # Errors
/// Returns [`crate::Error::Error`] when `value` exceeds [`MAX_COMPRESSED_UINT`].
pub fn write_compressed_uint(value: u32, buffer: &mut Vec<u8>) -> Result<()> {
    if value <= 0x7F {
        buffer.push(value as u8);
    } else if value <= 0x3FFF {
        buffer.extend_from_slice(&((value as u16) | 0x8000).to_be_bytes());
    } else if value <= MAX_COMPRESSED_UINT {
        buffer.extend_from_slice(&(value | 0xC000_0000).to_be_bytes());
    } else {
        return Err(Error::Error(format!(
            "Value 0x{:X} does not fit a compressed unsigned integer",
            value
        )));
    }

    Ok(())
}

/// Number of bytes [`write_compressed_uint`] will emit for `value`.
#[must_use]
pub fn compressed_uint_size(value: usize) -> u64 {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else {
        4
    }
}

/// Reads a compressed unsigned integer from `data` at `offset`.
///
/// Returns the decoded value and the number of bytes consumed.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] when the encoding runs past the end of `data`, or
/// [`crate::Error::Malformed`] for the reserved `111xxxxx` lead byte.
pub fn read_compressed_uint(data: &[u8], offset: usize) -> Result<(u32, usize)> {
    let first = *data.get(offset).ok_or(Error::OutOfBounds)?;

    if first & 0x80 == 0 {
        Ok((u32::from(first), 1))
    } else if first & 0xC0 == 0x80 {
        let second = *data.get(offset + 1).ok_or(Error::OutOfBounds)?;
        Ok(((u32::from(first & 0x3F) << 8) | u32::from(second), 2))
    } else if first & 0xE0 == 0xC0 {
        let bytes = data.get(offset..offset + 4).ok_or(Error::OutOfBounds)?;
        let value = (u32::from(bytes[0] & 0x1F) << 24)
            | (u32::from(bytes[1]) << 16)
            | (u32::from(bytes[2]) << 8)
            | u32::from(bytes[3]);
        Ok((value, 4))
    } else {
        Err(malformed_error!(
            "Invalid compressed integer lead byte - 0x{:02X}",
            first
        ))
    }
}
