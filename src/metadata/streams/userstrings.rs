use std::collections::HashMap;

use log::trace;
use widestring::{U16Str, U16String};

use crate::{
    metadata::streams::{check_offset, UserStringIndex},
    utils::{read_compressed_uint, write_compressed_uint},
    Error::OutOfBounds,
    Result,
};

/// Whether a UTF-16 code unit forces the trailing "special characters" byte to 1
/// (ECMA-335 §II.24.2.4).
fn is_special(unit: u16) -> bool {
    if unit > 0x00FF {
        return true;
    }

    matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
}

/// Accumulates the `#US` heap.
///
/// Each entry is a compressed byte length, the UTF-16LE code units, and one trailing byte that
/// is 1 if any unit needs more than plain 8-bit handling. The length counts the trailing
/// byte. Offset 0 is reserved; even the empty string gets a real entry so `ldstr ""` produces
/// an empty string rather than a null.
#[derive(Debug, Clone)]
pub struct UserStringsHeapBuilder {
    data: Vec<u8>,
    index: HashMap<String, UserStringIndex>,
}

impl UserStringsHeapBuilder {
    /// A heap holding only the reserved zero byte
    #[must_use]
    pub fn new() -> Self {
        UserStringsHeapBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Intern `value`, returning its offset
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] if the heap is full.
    pub fn intern(&mut self, value: &str) -> Result<UserStringIndex> {
        if let Some(existing) = self.index.get(value) {
            return Ok(*existing);
        }

        let units = U16String::from_str(value);
        let byte_len = units.len() * 2 + 1;
        let length = u32::try_from(byte_len).map_err(|_| crate::Error::HeapOverflow {
            heap: "#US",
            size: self.data.len() + byte_len,
        })?;

        let offset = check_offset("#US", self.data.len(), self.data.len() + byte_len + 4)?;

        let mut entry = Vec::with_capacity(byte_len + 4);
        write_compressed_uint(length, &mut entry)?;
        let mut special = false;
        for unit in units.as_slice() {
            special |= is_special(*unit);
            entry.extend_from_slice(&unit.to_le_bytes());
        }
        entry.push(u8::from(special));

        self.data.extend_from_slice(&entry);

        let handle = UserStringIndex(offset);
        self.index.insert(value.to_string(), handle);
        trace!("#US: interned {:?} at 0x{:X}", value, offset);

        Ok(handle)
    }

    /// Current heap size, without padding
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing but the reserved entry is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    }

    /// The heap bytes, without padding
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for UserStringsHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader for a `#US` heap of a loaded image
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap heap data
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the heap doesn't start with the reserved byte.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(OutOfBounds);
        }

        Ok(UserStrings { data })
    }

    /// Decode the literal at `index`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] for an offset
    /// outside the heap, a truncated entry, an even byte length, or invalid UTF-16.
    pub fn get(&self, index: usize) -> Result<String> {
        if index == 0 || index >= self.data.len() {
            return Err(OutOfBounds);
        }

        let (length, consumed) = read_compressed_uint(self.data, index)?;
        let length = length as usize;
        if length == 0 || length % 2 == 0 {
            return Err(malformed_error!(
                "Invalid user string length {} at index - {}",
                length,
                index
            ));
        }

        let start = index + consumed;
        let Some(entry) = self.data.get(start..start + length) else {
            return Err(OutOfBounds);
        };

        let units: Vec<u16> = entry[..length - 1]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        U16Str::from_slice(&units)
            .to_string()
            .map_err(|_| malformed_error!("Invalid UTF-16 user string at index - {}", index))
    }
}
