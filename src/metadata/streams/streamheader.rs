use crate::{
    file::io::{read_le, write_le},
    Error::OutOfBounds,
    Result,
};

/// Names of the streams a metadata root may carry
pub const STREAM_NAMES: [&str; 5] = ["#Strings", "#US", "#GUID", "#Blob", "#~"];

/// A stream header of the metadata root: where a stream lives and what it is called.
///
/// On disk this is the offset and size (relative to the metadata root) followed by the name,
/// NUL terminated and padded to a multiple of 4 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset of the stream from the start of the metadata root
    pub offset: u32,
    /// Size of the stream in bytes, a multiple of 4
    pub size: u32,
    /// Stream name, e.g. `#Strings`
    pub name: String,
}

impl StreamHeader {
    /// Parse a stream header from the start of `data`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data, or
    /// [`crate::Error::Malformed`] for a name outside the known stream set.
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(OutOfBounds);
        }

        let name_bytes = &data[8..std::cmp::min(data.len(), 8 + 32)];
        let Some(end) = name_bytes.iter().position(|&byte| byte == 0) else {
            return Err(malformed_error!("Stream header name is not terminated"));
        };
        let name: String = name_bytes[..end].iter().map(|&byte| char::from(byte)).collect();

        if !STREAM_NAMES.iter().any(|valid_name| name == *valid_name) {
            return Err(malformed_error!("Invalid stream header name - {}", name));
        }

        Ok(StreamHeader {
            offset: read_le::<u32>(data)?,
            size: read_le::<u32>(&data[4..])?,
            name,
        })
    }

    /// Size of this header on disk
    #[must_use]
    pub fn header_size(&self) -> usize {
        Self::size_for(&self.name)
    }

    /// Size a header with `name` takes on disk
    #[must_use]
    pub fn size_for(name: &str) -> usize {
        8 + crate::utils::align_to_4(name.len() + 1)
    }

    /// Append the encoded header to `buffer`
    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        write_le(buffer, self.offset);
        write_le(buffer, self.size);
        buffer.extend_from_slice(self.name.as_bytes());
        buffer.push(0);
        crate::utils::pad_to(buffer, 4);
    }
}
