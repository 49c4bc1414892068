//! Placement of the header region and the single `.text` section.
//!
//! `.text` holds, in order: the 72 byte CLI header, the method body stream and the metadata
//! root, the latter starting on a 4 byte boundary. The method body stream's RVA only depends on
//! the configuration, so the tables can be serialized with final method RVAs before the size of
//! the metadata is known.

use crate::{
    cilassembly::writer::ImageConfig,
    file::pe::{
        COFF_HEADER_SIZE, DOS_HEADER_SIZE, OPTIONAL_HEADER_SIZE, PE_SIGNATURE, SECTION_HEADER_SIZE,
    },
    metadata::cor20header::COR20_HEADER_SIZE,
    utils::align_to,
    Result,
};

/// Bytes taken by the headers and the one section header
pub const HEADERS_SIZE: u32 = (DOS_HEADER_SIZE
    + PE_SIGNATURE.len()
    + COFF_HEADER_SIZE
    + OPTIONAL_HEADER_SIZE
    + SECTION_HEADER_SIZE) as u32;

/// A range of the file or of the mapped image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start offset or RVA
    pub start: u32,
    /// Length in bytes
    pub size: u32,
}

impl Region {
    /// A region of `size` bytes at `start`
    #[must_use]
    pub fn new(start: u32, size: u32) -> Self {
        Region { start, size }
    }

    /// First byte past the region
    #[must_use]
    pub fn end(&self) -> u32 {
        self.start + self.size
    }

    /// Whether `other` starts at or after the end of this region
    #[must_use]
    pub fn precedes(&self, other: &Region) -> bool {
        self.end() <= other.start
    }
}

fn align(value: u32, alignment: u32) -> Result<u32> {
    if alignment == 0 {
        return Err(assembly_error!("Alignment must not be zero"));
    }
    u32::try_from(align_to(u64::from(value), u64::from(alignment)))
        .map_err(|_| assembly_error!("0x{:X} aligned to 0x{:X} overflows 32 bits", value, alignment))
}

fn checked_add(a: u32, b: u32) -> Result<u32> {
    a.checked_add(b)
        .ok_or_else(|| assembly_error!("Image layout overflows 32 bits (0x{:X} + 0x{:X})", a, b))
}

/// Every offset and RVA of the image being written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    /// `SizeOfHeaders`, the header region rounded up to the file alignment
    pub size_of_headers: u32,
    /// RVA and virtual size of `.text`
    pub text: Region,
    /// File offset and raw size of `.text`
    pub text_raw: Region,
    /// RVA of the CLI header
    pub cli_header: Region,
    /// RVA of the method body stream
    pub method_bodies: Region,
    /// RVA of the metadata root
    pub metadata: Region,
    /// `SizeOfImage`
    pub size_of_image: u32,
}

impl ImageLayout {
    /// Check that the alignments in `config` are usable
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] for a zero or non power of two alignment, or a
    /// file alignment above the section alignment.
    pub fn check_alignment(config: &ImageConfig) -> Result<()> {
        if !config.file_alignment.is_power_of_two() || !config.section_alignment.is_power_of_two() {
            return Err(assembly_error!(
                "Alignments must be powers of two, got section 0x{:X} and file 0x{:X}",
                config.section_alignment,
                config.file_alignment
            ));
        }
        if config.file_alignment > config.section_alignment {
            return Err(assembly_error!(
                "File alignment 0x{:X} exceeds section alignment 0x{:X}",
                config.file_alignment,
                config.section_alignment
            ));
        }
        Ok(())
    }

    /// RVA of `.text`, the first section after the headers
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] if the alignment overflows.
    pub fn text_rva(config: &ImageConfig) -> Result<u32> {
        align(HEADERS_SIZE, config.section_alignment)
    }

    /// RVA of the method body stream, right behind the CLI header
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] if the alignment overflows.
    pub fn method_bodies_rva(config: &ImageConfig) -> Result<u32> {
        checked_add(Self::text_rva(config)?, COR20_HEADER_SIZE)
    }

    /// Lay out an image with `method_bodies_len` bytes of IL and `metadata_len` bytes of metadata
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] if the alignments are unusable or the image
    /// outgrows 32-bit offsets.
    pub fn plan(config: &ImageConfig, method_bodies_len: u32, metadata_len: u32) -> Result<Self> {
        Self::check_alignment(config)?;

        let text_rva = Self::text_rva(config)?;
        let cli_header = Region::new(text_rva, COR20_HEADER_SIZE);
        let method_bodies = Region::new(cli_header.end(), method_bodies_len);

        let code_size = align(checked_add(COR20_HEADER_SIZE, method_bodies_len)?, 4)?;
        let metadata_rva = checked_add(text_rva, code_size)?;
        let metadata = Region::new(metadata_rva, metadata_len);

        let virtual_size = checked_add(code_size, metadata_len)?;
        let size_of_headers = align(HEADERS_SIZE, config.file_alignment)?;
        let raw_size = align(virtual_size, config.file_alignment)?;
        let size_of_image = align(checked_add(text_rva, virtual_size)?, config.section_alignment)?;

        Ok(ImageLayout {
            size_of_headers,
            text: Region::new(text_rva, virtual_size),
            text_raw: Region::new(size_of_headers, raw_size),
            cli_header,
            method_bodies,
            metadata,
            size_of_image,
        })
    }

    /// Total size of the file
    #[must_use]
    pub fn file_size(&self) -> u32 {
        self.text_raw.end()
    }

    /// File offset of `rva` inside `.text`
    #[must_use]
    pub fn text_offset(&self, rva: u32) -> u32 {
        rva - self.text.start + self.text_raw.start
    }
}
