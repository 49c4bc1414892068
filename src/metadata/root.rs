//! Metadata root header and stream directory (ECMA-335 §II.24.2.1).
//!
//! The root starts with the `BSJB` signature, carries the runtime version string the image
//! was built for, and lists the streams that follow it. [`Root::write`] lays out a complete
//! metadata blob from already serialized streams; [`Root::read`] parses the header back.

use crate::{
    file::io::{read_le, read_le_at, write_le},
    metadata::streams::StreamHeader,
    utils::{align_to_4, pad_to},
    Error::OutOfBounds,
    Result,
};

/// `BSJB`, the metadata root signature
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;
/// Metadata root major version
pub const ROOT_MAJOR_VERSION: u16 = 1;
/// Metadata root minor version
pub const ROOT_MINOR_VERSION: u16 = 1;

/// The parsed metadata root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    /// `BSJB`
    pub signature: u32,
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Reserved, 0
    pub reserved: u32,
    /// Length of the padded version string
    pub length: u32,
    /// Runtime version string, e.g. `v4.0.30319`
    pub version: String,
    /// Reserved, 0
    pub flags: u16,
    /// Number of streams
    pub stream_number: u16,
    /// Stream directory
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Parse a metadata root
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] for a bad
    /// signature, version string or stream directory.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 36 {
            return Err(OutOfBounds);
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let version_string_length = read_le_at::<u32>(data, &mut 12)? as usize;
        let Some(str_end) = version_string_length.checked_add(16) else {
            return Err(malformed_error!(
                "Version string length causing integer overflow - {}",
                version_string_length
            ));
        };
        if str_end + 4 > data.len() {
            return Err(OutOfBounds);
        }

        let version: String = data[16..str_end]
            .iter()
            .take_while(|&&byte| byte != 0)
            .map(|&byte| char::from(byte))
            .collect();

        let flags = read_le::<u16>(&data[str_end..])?;
        let stream_count = read_le::<u16>(&data[str_end + 2..])?;
        if stream_count == 0 || stream_count > 5 {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut streams: Vec<StreamHeader> = Vec::with_capacity(usize::from(stream_count));
        let mut stream_offset = str_end + 4;
        for _ in 0..stream_count {
            if stream_offset > data.len() {
                return Err(OutOfBounds);
            }

            let new_stream = StreamHeader::from(&data[stream_offset..])?;
            match u32::checked_add(new_stream.offset, new_stream.size) {
                Some(range) => {
                    if range as usize > data.len() {
                        return Err(OutOfBounds);
                    }
                }
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        new_stream.offset,
                        new_stream.size
                    ))
                }
            }

            if streams.iter().any(|stream| stream.name == new_stream.name) {
                return Err(malformed_error!("Duplicate stream - {}", new_stream.name));
            }

            stream_offset += new_stream.header_size();
            streams.push(new_stream);
        }

        Ok(Root {
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            length: u32::try_from(version_string_length)
                .map_err(|_| malformed_error!("Version string length too large"))?,
            version,
            flags,
            stream_number: stream_count,
            stream_headers: streams,
        })
    }

    /// The header of the stream called `name`
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|stream| stream.name == name)
    }

    /// Size of the root header and stream directory for `version` and `stream_names`
    #[must_use]
    pub fn header_size(version: &str, stream_names: &[&str]) -> usize {
        let directory: usize = stream_names
            .iter()
            .map(|name| StreamHeader::size_for(name))
            .sum();
        16 + align_to_4(version.len() + 1) + 4 + directory
    }

    /// Lay out a complete metadata blob: the root header, the stream directory and each stream
    /// padded to 4 bytes, in the order given
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if the blob would not be addressable with 32-bit offsets.
    pub fn write(version: &str, streams: &[(&str, &[u8])]) -> Result<Vec<u8>> {
        let names: Vec<&str> = streams.iter().map(|(name, _)| *name).collect();
        let header_size = Self::header_size(version, &names);

        let too_large = || crate::Error::Error("metadata exceeds 4 GiB".to_string());

        let mut headers = Vec::with_capacity(streams.len());
        let mut offset = header_size;
        for (name, data) in streams {
            let size = align_to_4(data.len());
            headers.push(StreamHeader {
                offset: u32::try_from(offset).map_err(|_| too_large())?,
                size: u32::try_from(size).map_err(|_| too_large())?,
                name: (*name).to_string(),
            });
            offset += size;
        }

        let padded_version = align_to_4(version.len() + 1);

        let mut buffer = Vec::with_capacity(offset);
        write_le(&mut buffer, CIL_HEADER_MAGIC);
        write_le(&mut buffer, ROOT_MAJOR_VERSION);
        write_le(&mut buffer, ROOT_MINOR_VERSION);
        write_le(&mut buffer, 0u32);
        write_le(
            &mut buffer,
            u32::try_from(padded_version).map_err(|_| too_large())?,
        );
        buffer.extend_from_slice(version.as_bytes());
        buffer.resize(16 + padded_version, 0);
        write_le(&mut buffer, 0u16);
        write_le(
            &mut buffer,
            u16::try_from(streams.len()).map_err(|_| too_large())?,
        );

        for header in &headers {
            header.write_to(&mut buffer);
        }

        for (_, data) in streams {
            buffer.extend_from_slice(data);
            pad_to(&mut buffer, 4);
        }

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x42, 0x53, 0x4A, 0x42,
            0x01, 0x00,
            0x01, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            b'H', b'E', b'L', b'L', b'O', 0x00, 0x00, 0x00,
            0x00, 0x00,
            0x01, 0x00,

            0x24, 0x00, 0x00, 0x00, // StreamHeader
            0x04, 0x00, 0x00, 0x00,
            0x23, 0x7E, 0x00, 0x00,

            0x00, 0x00, 0x00, 0x00,
        ];

        let parsed_header = Root::read(&header_bytes).unwrap();

        assert_eq!(parsed_header.signature, CIL_HEADER_MAGIC);
        assert_eq!(parsed_header.major_version, 1);
        assert_eq!(parsed_header.minor_version, 1);
        assert_eq!(parsed_header.length, 8);
        assert_eq!(parsed_header.version, "HELLO");
        assert_eq!(parsed_header.stream_number, 1);
        assert_eq!(parsed_header.stream("#~").unwrap().offset, 0x24);
        assert_eq!(parsed_header.stream("#~").unwrap().size, 4);
        assert!(parsed_header.stream("#Blob").is_none());
    }

    #[test]
    fn write_layout() {
        let strings: &[u8] = b"\0Hello\0";
        let user_strings: &[u8] = &[0u8];
        let guids: &[u8] = &[0xAAu8; 16];
        let blobs: &[u8] = &[0u8, 3, 0x20, 0, 1];
        let tables: &[u8] = &[0u8; 24];

        let streams: Vec<(&str, &[u8])> = vec![
            ("#Strings", strings),
            ("#US", user_strings),
            ("#GUID", guids),
            ("#Blob", blobs),
            ("#~", tables),
        ];
        let data = Root::write("v4.0.30319", &streams).unwrap();

        assert_eq!(&data[..4], b"BSJB");
        assert_eq!(&data[12..16], &[12, 0, 0, 0]);
        assert_eq!(&data[16..28], b"v4.0.30319\0\0");

        // 32 byte root + 20 + 12 + 16 + 16 + 12 byte stream headers
        let header_size = Root::header_size(
            "v4.0.30319",
            &["#Strings", "#US", "#GUID", "#Blob", "#~"],
        );
        assert_eq!(header_size, 108);

        let root = Root::read(&data).unwrap();
        assert_eq!(root.version, "v4.0.30319");
        assert_eq!(root.stream_number, 5);

        let names: Vec<&str> = root.stream_headers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["#Strings", "#US", "#GUID", "#Blob", "#~"]);

        let strings_header = root.stream("#Strings").unwrap();
        assert_eq!(strings_header.offset, 108);
        assert_eq!(strings_header.size, 8);
        assert_eq!(root.stream("#US").unwrap().offset, 116);
        assert_eq!(root.stream("#US").unwrap().size, 4);
        assert_eq!(root.stream("#~").unwrap().offset, 116 + 4 + 16 + 8);

        for header in &root.stream_headers {
            assert_eq!(header.offset % 4, 0);
            assert_eq!(header.size % 4, 0);
        }
        assert_eq!(data.len(), 116 + 4 + 16 + 8 + 24);
    }

    #[test]
    fn invalid() {
        assert!(Root::read(&[0u8; 20]).is_err());

        let tables: &[u8] = &[0u8; 4];

        let mut data = Root::write("v4.0.30319", &[("#~", tables)]).unwrap();
        data[0] = 0x43;
        assert!(Root::read(&data).is_err());

        let data = Root::write("v4.0.30319", &[("#~", tables), ("#~", tables)]).unwrap();
        assert!(Root::read(&data).is_err());
    }
}
