//! Input abstraction for PE images.
//!
//! [`File`] owns the image bytes (either memory mapped through [`physical::Physical`] or held
//! in a buffer through [`memory::Memory`]) together with the `goblin` view of the PE headers
//! borrowed from them. Everything above this layer addresses the image through RVAs and
//! converts them with [`File::rva_to_offset`].
//!
//! [`pe`] holds the owned header structures the image writer serializes.

pub mod io;
pub mod parser;
pub mod pe;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use goblin::pe::{section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Storage the image bytes are read from
pub trait Backend: Send + Sync {
    /// Returns a bounds-checked slice of the data
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset + len` is past the end of the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the complete data
    fn data(&self) -> &[u8];

    /// Returns the size of the data
    fn len(&self) -> usize;
}

#[self_referencing]
/// A loaded PE image: the raw bytes plus the parsed PE headers
pub struct File {
    data: Box<dyn Backend>,
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Memory map and parse the file at `file`
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can't be read, [`crate::Error::Empty`]
    /// for an empty file, or a parse error if it isn't a PE image with a CLI header directory.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Parse an image held in memory
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer, or a parse error if it isn't a PE
    /// image with a CLI header directory.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| {
            let data = data.as_ref();
            match PE::parse(data.data()) {
                Ok(pe) => match pe.header.optional_header.as_ref() {
                    Some(optional_header) => {
                        if optional_header
                            .data_directories
                            .get_clr_runtime_header()
                            .is_none()
                        {
                            Err(malformed_error!(
                                "File does not have a CLR runtime header directory"
                            ))
                        } else {
                            Ok(pe)
                        }
                    }
                    None => Err(malformed_error!("File does not have an OptionalHeader")),
                },
                Err(error) => Err(GoblinErr(error)),
            }
        })
    }

    /// Size of the image in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Whether the image holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// COFF `Characteristics` field
    #[must_use]
    pub fn characteristics(&self) -> u16 {
        self.with_pe(|pe| pe.header.coff_header.characteristics)
    }

    /// COFF `Machine` field
    #[must_use]
    pub fn machine(&self) -> u16 {
        self.with_pe(|pe| pe.header.coff_header.machine)
    }

    /// Optional header magic (`0x10B` for PE32, `0x20B` for PE32+)
    #[must_use]
    pub fn optional_magic(&self) -> Option<u16> {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .map(|header| header.standard_fields.magic)
        })
    }

    /// RVA and size of the CLI header directory
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the directory is absent.
    pub fn clr(&self) -> Result<(usize, usize)> {
        self.with_pe(|pe| {
            let Some(optional_header) = pe.header.optional_header.as_ref() else {
                return Err(malformed_error!("File does not have an OptionalHeader"));
            };

            if let Some(clr_dir) = optional_header.data_directories.get_clr_runtime_header() {
                Ok((clr_dir.virtual_address as usize, clr_dir.size as usize))
            } else {
                Err(malformed_error!(
                    "File does not have a CLR runtime header directory"
                ))
            }
        })
    }

    /// Section headers, in file order
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// The complete image
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// A bounds-checked slice of the image
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is outside the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Translate an RVA into a file offset using the section table
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section maps `rva`, or a section header
    /// overflows.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        self.with_pe(|pe| {
            let rva_u32 = u32::try_from(rva)
                .map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

            for section in &pe.sections {
                let Some(section_max) = section.virtual_address.checked_add(section.virtual_size)
                else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        section.virtual_size
                    ));
                };

                if section.virtual_address <= rva_u32 && section_max > rva_u32 {
                    return Ok((rva - section.virtual_address as usize)
                        + section.pointer_to_raw_data as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - {}",
                rva
            ))
        })
    }
}
