use std::{collections::HashMap, ffi::CStr};

use log::trace;

use crate::{
    metadata::streams::{check_offset, StringIndex},
    Error::OutOfBounds,
    Result,
};

/// Accumulates the `#Strings` heap.
///
/// Identifiers are stored as UTF-8 with a NUL terminator. Offset 0 holds the empty string, and
/// interning the same identifier twice returns the first offset.
///
/// ```rust
/// use dotforge::metadata::streams::StringsHeapBuilder;
///
/// let mut strings = StringsHeapBuilder::new();
/// let name = strings.intern("TestClass")?;
///
/// assert_eq!(name.value(), 1);
/// assert_eq!(strings.intern("TestClass")?, name);
/// # Ok::<(), dotforge::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct StringsHeapBuilder {
    data: Vec<u8>,
    index: HashMap<String, StringIndex>,
}

impl StringsHeapBuilder {
    /// A heap holding only the empty string at offset 0
    #[must_use]
    pub fn new() -> Self {
        StringsHeapBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Intern `value`, returning its offset
    ///
    /// The empty string maps to offset 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `value` contains a NUL character, or
    /// [`crate::Error::HeapOverflow`] if the heap is full.
    pub fn intern(&mut self, value: &str) -> Result<StringIndex> {
        if value.is_empty() {
            return Ok(StringIndex(0));
        }

        if let Some(existing) = self.index.get(value) {
            return Ok(*existing);
        }

        if value.contains('\0') {
            return Err(crate::Error::Error(format!(
                "Identifier {:?} contains a NUL character",
                value
            )));
        }

        let offset = check_offset("#Strings", self.data.len(), self.data.len() + value.len() + 1)?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);

        let handle = StringIndex(offset);
        self.index.insert(value.to_string(), handle);
        trace!("#Strings: interned {:?} at 0x{:X}", value, offset);

        Ok(handle)
    }

    /// The identifier stored at `index`, if it was interned here
    #[must_use]
    pub fn get(&self, index: StringIndex) -> Option<&str> {
        if index.is_null() {
            return Some("");
        }

        let start = index.value() as usize;
        let rest = self.data.get(start..)?;
        let end = rest.iter().position(|&byte| byte == 0)?;
        std::str::from_utf8(&rest[..end]).ok()
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

impl Default for StringsHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader for a `#Strings` heap of a loaded image
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wrap heap data
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap doesn't start with the empty string.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Provided #String heap is empty"));
        }

        Ok(Strings { data })
    }

    /// The identifier at `index`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] for an offset
    /// outside the heap or an entry that is not terminated UTF-8.
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(result) => match result.to_str() {
                Ok(result) => Ok(result),
                Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
            },
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }

    /// Size of the heap in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the heap is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
