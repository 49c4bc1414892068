//! Serialization of frozen metadata into a loadable PE image.
//!
//! The [`ImageAssembler`] works in three steps:
//!
//! 1. Serialize the `#~` stream against the final method body RVA, which only depends on the
//!    [`ImageConfig`], and wrap it with the heaps into a metadata root.
//! 2. Plan the layout: headers, then `.text` holding the CLI header, the method body stream and
//!    the metadata root.
//! 3. Write the DOS stub, COFF header, PE32 optional header, section table and `.text`.
//!
//! Nothing is patched after it is written; every RVA is known before its bytes are produced.
//! The result is an [`Image`], an immutable byte buffer with a scoped file write.
//!
//! # Examples
//!
//! ```rust
//! use dotforge::cilassembly::{ImageAssembler, ImageConfig, MetadataBuilder};
//! use dotforge::metadata::{tables::TypeAttributes, validation::MODULE_TYPE_NAME};
//!
//! let mut metadata = MetadataBuilder::new();
//! metadata.add_module("Empty.dll", uguid::guid!("5d3c1a2b-4e6f-4a8b-9c0d-1e2f3a4b5c6d"))?;
//! metadata.add_type_definition(TypeAttributes::empty(), "", MODULE_TYPE_NAME, None, 1, 1)?;
//!
//! let image = ImageAssembler::new(ImageConfig::default()).assemble(&metadata.freeze()?)?;
//! assert_eq!(&image.as_bytes()[..2], b"MZ");
//! # Ok::<(), dotforge::Error>(())
//! ```

mod config;
mod layout;
mod output;

pub use config::{ImageConfig, DEFAULT_METADATA_VERSION};
pub use layout::{ImageLayout, Region, HEADERS_SIZE};
pub use output::Output;

use std::path::Path;

use log::debug;

use crate::{
    cilassembly::FrozenMetadata,
    file::pe::{
        CoffHeader, DataDirectory, DosHeader, OptionalHeader, SectionCharacteristics,
        SectionTable, DIRECTORY_CLR_RUNTIME_HEADER, NUMBER_OF_DATA_DIRECTORIES,
        OPTIONAL_HEADER_SIZE, PE32_MAGIC, PE_SIGNATURE,
    },
    metadata::{cor20header::Cor20Header, root::Root, tables::TableInfo},
    utils::pad_to,
    Result,
};

/// Name of the one section
pub const TEXT_SECTION_NAME: &str = ".text";

/// Turns [`FrozenMetadata`] into an [`Image`]
#[derive(Debug, Clone, Default)]
pub struct ImageAssembler {
    config: ImageConfig,
}

impl ImageAssembler {
    /// An assembler writing headers from `config`
    #[must_use]
    pub fn new(config: ImageConfig) -> Self {
        ImageAssembler { config }
    }

    /// The header configuration
    #[must_use]
    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Build the metadata root: root header, stream directory and the five streams
    ///
    /// `method_bodies_rva` is where the method body stream will be mapped; `MethodDef` RVAs are
    /// computed from it.
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] if a method RVA overflows, or an encoding
    /// error if a column doesn't fit its width.
    pub fn metadata_root(
        &self,
        metadata: &FrozenMetadata,
        method_bodies_rva: u32,
    ) -> Result<Vec<u8>> {
        let heap_sizes = TableInfo::heap_sizes_for(
            metadata.strings().len(),
            metadata.guids().count(),
            metadata.blobs().len(),
        );
        let tables = metadata.tables().write(heap_sizes, method_bodies_rva)?;
        let guids = metadata.guids().to_bytes();

        debug!(
            "streams: #Strings {} #US {} #GUID {} #Blob {} #~ {} bytes, heap sizes 0x{:02X}",
            metadata.strings().len(),
            metadata.userstrings().len(),
            guids.len(),
            metadata.blobs().len(),
            tables.len(),
            heap_sizes
        );

        Root::write(
            &self.config.metadata_version,
            &[
                ("#Strings", metadata.strings().as_bytes()),
                ("#US", metadata.userstrings().as_bytes()),
                ("#GUID", &guids),
                ("#Blob", metadata.blobs().as_bytes()),
                ("#~", &tables),
            ],
        )
    }

    /// Lay out and serialize the complete image
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] if the configuration or the metadata can't be
    /// laid out in a PE32 image, or an encoding error for a row that doesn't fit.
    pub fn assemble(&self, metadata: &FrozenMetadata) -> Result<Image> {
        let config = &self.config;
        ImageLayout::check_alignment(config)?;
        if config.metadata_version.len() >= 255 {
            return Err(assembly_error!(
                "Metadata version string is {} bytes, at most 254 fit",
                config.metadata_version.len()
            ));
        }

        let method_bodies = metadata.method_bodies().as_bytes();
        let method_bodies_len = u32::try_from(method_bodies.len())
            .map_err(|_| assembly_error!("Method body stream exceeds 4 GiB"))?;

        let method_bodies_rva = ImageLayout::method_bodies_rva(config)?;
        let root = self.metadata_root(metadata, method_bodies_rva)?;
        let root_len =
            u32::try_from(root.len()).map_err(|_| assembly_error!("Metadata exceeds 4 GiB"))?;

        let layout = ImageLayout::plan(config, method_bodies_len, root_len)?;
        if layout.method_bodies.start != method_bodies_rva {
            return Err(assembly_error!(
                "Method bodies were addressed at 0x{:X} but laid out at 0x{:X}",
                method_bodies_rva,
                layout.method_bodies.start
            ));
        }
        debug!(
            "layout: .text at 0x{:X} ({} bytes), IL at 0x{:X}, metadata at 0x{:X} ({} bytes), image {} bytes",
            layout.text.start,
            layout.text.size,
            layout.method_bodies.start,
            layout.metadata.start,
            layout.metadata.size,
            layout.file_size()
        );

        let mut data = Vec::with_capacity(layout.file_size() as usize);
        self.write_headers(&layout, &mut data)?;
        pad_to(&mut data, layout.size_of_headers as usize);

        Cor20Header::new(
            config.runtime_version,
            layout.metadata.start,
            layout.metadata.size,
            config.cli_flags,
        )
        .write_to(&mut data);
        data.extend_from_slice(method_bodies);
        pad_to(&mut data, 4);
        data.extend_from_slice(&root);
        data.resize(layout.file_size() as usize, 0);

        let metadata_offset = layout.text_offset(layout.metadata.start) as usize;
        if data.get(metadata_offset..metadata_offset + 4) != Some(&b"BSJB"[..]) {
            return Err(assembly_error!(
                "Metadata root landed outside its planned offset 0x{:X}",
                metadata_offset
            ));
        }

        debug!("image written: {} bytes", data.len());
        Ok(Image { data })
    }

    fn write_headers(&self, layout: &ImageLayout, data: &mut Vec<u8>) -> Result<()> {
        let config = &self.config;

        DosHeader.write_to(data)?;
        data.extend_from_slice(&PE_SIGNATURE);

        CoffHeader {
            machine: config.machine,
            number_of_sections: 1,
            time_date_stamp: config.timestamp,
            pointer_to_symbol_table: 0,
            number_of_symbols: 0,
            size_of_optional_header: OPTIONAL_HEADER_SIZE as u16,
            characteristics: config.characteristics.bits(),
        }
        .write_to(data)?;

        let mut data_directories = [DataDirectory::default(); NUMBER_OF_DATA_DIRECTORIES];
        data_directories[DIRECTORY_CLR_RUNTIME_HEADER] = DataDirectory {
            virtual_address: layout.cli_header.start,
            size: layout.cli_header.size,
        };

        OptionalHeader {
            magic: PE32_MAGIC,
            major_linker_version: config.linker_version.0,
            minor_linker_version: config.linker_version.1,
            size_of_code: layout.text_raw.size,
            size_of_initialized_data: 0,
            size_of_uninitialized_data: 0,
            address_of_entry_point: 0,
            base_of_code: layout.text.start,
            base_of_data: layout.size_of_image,
            image_base: config.image_base,
            section_alignment: config.section_alignment,
            file_alignment: config.file_alignment,
            major_operating_system_version: config.os_version.0,
            minor_operating_system_version: config.os_version.1,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: config.subsystem_version.0,
            minor_subsystem_version: config.subsystem_version.1,
            win32_version_value: 0,
            size_of_image: layout.size_of_image,
            size_of_headers: layout.size_of_headers,
            check_sum: 0,
            subsystem: config.subsystem,
            dll_characteristics: config.dll_characteristics.bits(),
            size_of_stack_reserve: config.stack_reserve,
            size_of_stack_commit: config.stack_commit,
            size_of_heap_reserve: config.heap_reserve,
            size_of_heap_commit: config.heap_commit,
            loader_flags: 0,
            data_directories,
        }
        .write_to(data)?;

        SectionTable {
            name: SectionTable::encode_name(TEXT_SECTION_NAME),
            virtual_size: layout.text.size,
            virtual_address: layout.text.start,
            size_of_raw_data: layout.text_raw.size,
            pointer_to_raw_data: layout.text_raw.start,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: (SectionCharacteristics::CNT_CODE
                | SectionCharacteristics::MEM_EXECUTE
                | SectionCharacteristics::MEM_READ)
                .bits(),
        }
        .write_to(data)?;

        Ok(())
    }
}

/// A complete PE image, immutable once assembled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
}

impl Image {
    /// The image bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take the image bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Size of the image in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for an assembled image
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write the image to `path`, replacing any existing file
    ///
    /// The file is closed on every exit path and removed again if writing fails part way.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can't be created or written.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut output = Output::create(path.as_ref(), self.data.len() as u64)?;
        output.write_at(0, &self.data)?;
        output.finalize()?;

        debug!("wrote {} bytes to {}", self.data.len(), path.as_ref().display());
        Ok(())
    }
}
