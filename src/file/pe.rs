//! Owned PE header structures for image emission.
//!
//! Reading goes through `goblin`; these types only exist so the image writer can describe a
//! PE32 header region field by field and serialize it with `write_to`. Only what a managed,
//! IL-only image needs is modelled: a DOS stub, the COFF file header, the PE32 optional header
//! with its 16 data directories, and section headers.

use std::io::Write;

use bitflags::bitflags;

use crate::Result;

/// Offset of the PE signature, as stored in `e_lfanew`
pub const PE_HEADER_OFFSET: u32 = 0x80;
/// `PE\0\0`
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
/// `IMAGE_FILE_MACHINE_I386`, which is what AnyCPU managed images declare
pub const MACHINE_I386: u16 = 0x014C;
/// PE32 optional header magic
pub const PE32_MAGIC: u16 = 0x010B;
/// `IMAGE_SUBSYSTEM_WINDOWS_CUI`
pub const SUBSYSTEM_WINDOWS_CUI: u16 = 3;
/// Number of data directories a PE32 optional header carries
pub const NUMBER_OF_DATA_DIRECTORIES: usize = 16;
/// Index of the CLI (COR20) header directory
pub const DIRECTORY_CLR_RUNTIME_HEADER: usize = 14;

/// Size of the DOS header plus stub
pub const DOS_HEADER_SIZE: usize = 128;
/// Size of the COFF file header
pub const COFF_HEADER_SIZE: usize = 20;
/// Size of a PE32 optional header with 16 data directories
pub const OPTIONAL_HEADER_SIZE: usize = 224;
/// Size of one section header
pub const SECTION_HEADER_SIZE: usize = 40;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// COFF file header characteristics
    pub struct Characteristics: u16 {
        /// Relocation information was stripped from the file
        const RELOCS_STRIPPED = 0x0001;
        /// The file is executable; loaders refuse images without it
        const EXECUTABLE_IMAGE = 0x0002;
        /// The application can handle addresses above 2 GB
        const LARGE_ADDRESS_AWARE = 0x0020;
        /// The computer supports 32-bit words
        const MACHINE_32BIT = 0x0100;
        /// The image is a dynamic-link library
        const DLL = 0x2000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Optional header DLL characteristics
    pub struct DllCharacteristics: u16 {
        /// Image can be relocated at load time
        const DYNAMIC_BASE = 0x0040;
        /// Image is compatible with data execution prevention
        const NX_COMPAT = 0x0100;
        /// Image does not use structured exception handling
        const NO_SEH = 0x0400;
        /// Image is terminal server aware
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Section header characteristics
    pub struct SectionCharacteristics: u32 {
        /// Section contains executable code
        const CNT_CODE = 0x0000_0020;
        /// Section contains initialized data
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// Section can be executed
        const MEM_EXECUTE = 0x2000_0000;
        /// Section can be read
        const MEM_READ = 0x4000_0000;
        /// Section can be written
        const MEM_WRITE = 0x8000_0000;
    }
}

/// The classic 128 byte DOS header and stub, with `e_lfanew` pointing at 0x80
const DOS_STUB: [u8; DOS_HEADER_SIZE] = [
    0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00,
    0xB8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00,
    0x0E, 0x1F, 0xBA, 0x0E, 0x00, 0xB4, 0x09, 0xCD, 0x21, 0xB8, 0x01, 0x4C, 0xCD, 0x21, 0x54, 0x68,
    0x69, 0x73, 0x20, 0x70, 0x72, 0x6F, 0x67, 0x72, 0x61, 0x6D, 0x20, 0x63, 0x61, 0x6E, 0x6E, 0x6F,
    0x74, 0x20, 0x62, 0x65, 0x20, 0x72, 0x75, 0x6E, 0x20, 0x69, 0x6E, 0x20, 0x44, 0x4F, 0x53, 0x20,
    0x6D, 0x6F, 0x64, 0x65, 0x2E, 0x0D, 0x0D, 0x0A, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// The DOS header region in front of the PE signature
#[derive(Debug, Clone, Copy, Default)]
pub struct DosHeader;

impl DosHeader {
    /// Write the DOS header and stub
    ///
    /// # Errors
    /// Returns an error if writing to `writer` fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&DOS_STUB)?;
        Ok(())
    }
}

/// COFF file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct CoffHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    /// Write the 20 byte COFF header
    ///
    /// # Errors
    /// Returns an error if writing to `writer` fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.machine.to_le_bytes())?;
        writer.write_all(&self.number_of_sections.to_le_bytes())?;
        writer.write_all(&self.time_date_stamp.to_le_bytes())?;
        writer.write_all(&self.pointer_to_symbol_table.to_le_bytes())?;
        writer.write_all(&self.number_of_symbols.to_le_bytes())?;
        writer.write_all(&self.size_of_optional_header.to_le_bytes())?;
        writer.write_all(&self.characteristics.to_le_bytes())?;
        Ok(())
    }
}

/// One RVA/size pair of the optional header's directory array
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    /// RVA of the referenced structure
    pub virtual_address: u32,
    /// Size of the referenced structure in bytes
    pub size: u32,
}

/// PE32 optional header, standard and Windows-specific fields plus data directories
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct OptionalHeader {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub data_directories: [DataDirectory; NUMBER_OF_DATA_DIRECTORIES],
}

impl OptionalHeader {
    /// Write the 224 byte PE32 optional header
    ///
    /// # Errors
    /// Returns an error if writing to `writer` fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        // Standard fields
        writer.write_all(&self.magic.to_le_bytes())?;
        writer.write_all(&[self.major_linker_version, self.minor_linker_version])?;
        writer.write_all(&self.size_of_code.to_le_bytes())?;
        writer.write_all(&self.size_of_initialized_data.to_le_bytes())?;
        writer.write_all(&self.size_of_uninitialized_data.to_le_bytes())?;
        writer.write_all(&self.address_of_entry_point.to_le_bytes())?;
        writer.write_all(&self.base_of_code.to_le_bytes())?;
        writer.write_all(&self.base_of_data.to_le_bytes())?;

        // Windows fields
        writer.write_all(&self.image_base.to_le_bytes())?;
        writer.write_all(&self.section_alignment.to_le_bytes())?;
        writer.write_all(&self.file_alignment.to_le_bytes())?;
        writer.write_all(&self.major_operating_system_version.to_le_bytes())?;
        writer.write_all(&self.minor_operating_system_version.to_le_bytes())?;
        writer.write_all(&self.major_image_version.to_le_bytes())?;
        writer.write_all(&self.minor_image_version.to_le_bytes())?;
        writer.write_all(&self.major_subsystem_version.to_le_bytes())?;
        writer.write_all(&self.minor_subsystem_version.to_le_bytes())?;
        writer.write_all(&self.win32_version_value.to_le_bytes())?;
        writer.write_all(&self.size_of_image.to_le_bytes())?;
        writer.write_all(&self.size_of_headers.to_le_bytes())?;
        writer.write_all(&self.check_sum.to_le_bytes())?;
        writer.write_all(&self.subsystem.to_le_bytes())?;
        writer.write_all(&self.dll_characteristics.to_le_bytes())?;
        writer.write_all(&self.size_of_stack_reserve.to_le_bytes())?;
        writer.write_all(&self.size_of_stack_commit.to_le_bytes())?;
        writer.write_all(&self.size_of_heap_reserve.to_le_bytes())?;
        writer.write_all(&self.size_of_heap_commit.to_le_bytes())?;
        writer.write_all(&self.loader_flags.to_le_bytes())?;

        writer.write_all(&(NUMBER_OF_DATA_DIRECTORIES as u32).to_le_bytes())?;
        for directory in &self.data_directories {
            writer.write_all(&directory.virtual_address.to_le_bytes())?;
            writer.write_all(&directory.size.to_le_bytes())?;
        }

        Ok(())
    }
}

/// Section header
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct SectionTable {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}

impl SectionTable {
    /// Build a section name field from a string of at most 8 bytes
    #[must_use]
    pub fn encode_name(name: &str) -> [u8; 8] {
        let mut encoded = [0u8; 8];
        for (slot, byte) in encoded.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }
        encoded
    }

    /// Write the 40 byte section header
    ///
    /// # Errors
    /// Returns an error if writing to `writer` fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.name)?;
        writer.write_all(&self.virtual_size.to_le_bytes())?;
        writer.write_all(&self.virtual_address.to_le_bytes())?;
        writer.write_all(&self.size_of_raw_data.to_le_bytes())?;
        writer.write_all(&self.pointer_to_raw_data.to_le_bytes())?;
        writer.write_all(&self.pointer_to_relocations.to_le_bytes())?;
        writer.write_all(&self.pointer_to_linenumbers.to_le_bytes())?;
        writer.write_all(&self.number_of_relocations.to_le_bytes())?;
        writer.write_all(&self.number_of_linenumbers.to_le_bytes())?;
        writer.write_all(&self.characteristics.to_le_bytes())?;
        Ok(())
    }
}
