//! A strict, read-only view of a managed image.
//!
//! [`CilImage`] parses the PE container, the CLI header, the metadata root and every stream,
//! then applies the structural rules a runtime loader enforces. An image that a loader would
//! refuse is reported as [`crate::Error::LoadRejected`] carrying a `BadImageFormatException`
//! style diagnostic, so callers can tell a rejected image from an I/O failure.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotforge::metadata::cilimage::CilImage;
//! use dotforge::metadata::tables::TypeDefRaw;
//! use std::path::Path;
//!
//! let image = CilImage::from_file(Path::new("SampleLib.dll"))?;
//! if let Some(types) = image.tables().table::<TypeDefRaw>() {
//!     for row in &types {
//!         println!("{}", image.strings().get(row.type_name as usize)?);
//!     }
//! }
//! # Ok::<(), dotforge::Error>(())
//! ```

use std::{path::Path, sync::Arc};

use log::warn;
use ouroboros::self_referencing;

use crate::{
    file::{pe::Characteristics, File},
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        method::MethodBody,
        root::Root,
        streams::{Blob, Guid, StreamHeader, Strings, TablesHeader, UserStrings},
        validation::{validate, Heaps},
    },
    Error, Result,
};

/// The parsed structures of an image, borrowing from its bytes
pub struct CilImageData<'a> {
    /// The complete image
    pub data: &'a [u8],
    /// CLI header
    pub cor20header: Cor20Header,
    /// Metadata root with its stream directory
    pub metadata_root: Root,
    /// The `#~` stream
    pub tables: TablesHeader<'a>,
    /// The `#Strings` heap
    pub strings: Strings<'a>,
    /// The `#US` heap, absent in images without literals
    pub userstrings: Option<UserStrings<'a>>,
    /// The `#GUID` heap
    pub guids: Guid<'a>,
    /// The `#Blob` heap
    pub blobs: Blob<'a>,
}

impl<'a> CilImageData<'a> {
    /// Parse and validate the metadata of `file`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`], [`crate::Error::OutOfBounds`] or
    /// [`crate::Error::NotSupported`] for the first structural problem found.
    pub fn from_file(file: &'a File) -> Result<Self> {
        let data = file.data();

        let characteristics = Characteristics::from_bits_truncate(file.characteristics());
        if !characteristics.contains(Characteristics::EXECUTABLE_IMAGE) {
            return Err(malformed_error!(
                "COFF characteristics 0x{:04X} lack IMAGE_FILE_EXECUTABLE_IMAGE",
                file.characteristics()
            ));
        }

        match file.optional_magic() {
            Some(0x10B | 0x20B) => {}
            Some(magic) => {
                return Err(malformed_error!("Unknown optional header magic 0x{:04X}", magic))
            }
            None => return Err(malformed_error!("File does not have an OptionalHeader")),
        }

        let (clr_rva, clr_size) = file.clr()?;
        if clr_size < COR20_HEADER_SIZE as usize {
            return Err(malformed_error!(
                "CLI header directory is {} bytes, expected {}",
                clr_size,
                COR20_HEADER_SIZE
            ));
        }
        let clr_offset = file.rva_to_offset(clr_rva)?;
        let cor20header = Cor20Header::read(file.data_slice(clr_offset, clr_size)?)?;

        let metadata_offset = file.rva_to_offset(cor20header.meta_data_rva as usize)?;
        let metadata_slice =
            file.data_slice(metadata_offset, cor20header.meta_data_size as usize)?;
        let metadata_root = Root::read(metadata_slice)?;

        let stream = |name: &str| -> Result<Option<&'a [u8]>> {
            let Some(header) = metadata_root.stream(name) else {
                return Ok(None);
            };
            Ok(Some(stream_data(metadata_slice, header)?))
        };
        let required = |name: &str| -> Result<&'a [u8]> {
            stream(name)?.ok_or_else(|| malformed_error!("Required stream {} is missing", name))
        };

        let tables = TablesHeader::from(required("#~")?)?;
        let strings = Strings::from(required("#Strings")?)?;
        let guids = Guid::from(required("#GUID")?)?;
        let blobs = Blob::from(required("#Blob")?)?;
        let userstrings = match stream("#US")? {
            Some(data) => Some(UserStrings::from(data)?),
            None => None,
        };

        validate(
            file,
            &Heaps {
                tables: &tables,
                strings: &strings,
                guids: &guids,
                blobs: &blobs,
            },
        )?;

        Ok(CilImageData {
            data,
            cor20header,
            metadata_root,
            tables,
            strings,
            userstrings,
            guids,
            blobs,
        })
    }
}

fn stream_data<'a>(metadata: &'a [u8], header: &StreamHeader) -> Result<&'a [u8]> {
    let start = header.offset as usize;
    let end = start
        .checked_add(header.size as usize)
        .ok_or(Error::OutOfBounds)?;

    metadata.get(start..end).ok_or_else(|| {
        malformed_error!(
            "Stream {} at 0x{:X}+0x{:X} is outside the metadata",
            header.name,
            header.offset,
            header.size
        )
    })
}

fn rejected(error: Error) -> Error {
    match error {
        Error::FileError(_) => error,
        error => {
            let diagnostic = format!("BadImageFormatException: {}", error);
            warn!("Image rejected - {}", diagnostic);
            Error::LoadRejected(diagnostic)
        }
    }
}

#[self_referencing]
/// A loaded and validated managed image
pub struct CilImage {
    file: Arc<File>,
    #[borrows(file)]
    #[not_covariant]
    data: CilImageData<'this>,
}

impl CilImage {
    /// Memory map, parse and validate the image at `path`
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can't be read, and
    /// [`crate::Error::LoadRejected`] for an image a loader would refuse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::from_file(path).map_err(rejected)?;
        Self::load(Arc::new(file))
    }

    /// Parse and validate an image held in memory
    ///
    /// # Errors
    /// Returns [`crate::Error::LoadRejected`] for an image a loader would refuse.
    pub fn from_mem(data: Vec<u8>) -> Result<Self> {
        let file = File::from_mem(data).map_err(rejected)?;
        Self::load(Arc::new(file))
    }

    fn load(file: Arc<File>) -> Result<Self> {
        CilImage::try_new(file, |file| CilImageData::from_file(file)).map_err(rejected)
    }

    /// The CLI header
    #[must_use]
    pub fn cor20header(&self) -> &Cor20Header {
        self.with_data(|data| &data.cor20header)
    }

    /// The metadata root
    #[must_use]
    pub fn metadata_root(&self) -> &Root {
        self.with_data(|data| &data.metadata_root)
    }

    /// The `#~` stream
    #[must_use]
    pub fn tables(&self) -> &TablesHeader<'_> {
        self.with_data(|data| &data.tables)
    }

    /// The `#Strings` heap
    #[must_use]
    pub fn strings(&self) -> &Strings<'_> {
        self.with_data(|data| &data.strings)
    }

    /// The `#US` heap
    #[must_use]
    pub fn userstrings(&self) -> Option<&UserStrings<'_>> {
        self.with_data(|data| data.userstrings.as_ref())
    }

    /// The `#GUID` heap
    #[must_use]
    pub fn guids(&self) -> &Guid<'_> {
        self.with_data(|data| &data.guids)
    }

    /// The `#Blob` heap
    #[must_use]
    pub fn blobs(&self) -> &Blob<'_> {
        self.with_data(|data| &data.blobs)
    }

    /// The underlying PE file
    #[must_use]
    pub fn file(&self) -> &Arc<File> {
        self.borrow_file()
    }

    /// The complete image
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data)
    }

    /// The header and code of the method body at `rva`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `rva` maps to no section, or a decode error for
    /// a bad header.
    pub fn method_body(&self, rva: u32) -> Result<(MethodBody, &[u8])> {
        let offset = self.file().rva_to_offset(rva as usize)?;
        let data = self.data().get(offset..).ok_or(Error::OutOfBounds)?;

        let body = MethodBody::from(data)?;
        let code = data
            .get(body.size_header..body.size())
            .ok_or(Error::OutOfBounds)?;
        Ok((body, code))
    }
}
