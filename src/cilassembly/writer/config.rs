//! Knobs for the PE container wrapped around the metadata.
//!
//! The defaults produce the same headers a C# compiler emits for an AnyCPU class library:
//! `EXECUTABLE_IMAGE | DLL`, a PE32 optional header at image base `0x400000`, a console
//! subsystem and an IL-only CLI header for runtime 2.5.

use crate::{
    file::pe::{Characteristics, DllCharacteristics, MACHINE_I386, SUBSYSTEM_WINDOWS_CUI},
    metadata::cor20header::COMIMAGE_FLAGS_ILONLY,
};

/// Version string written into the metadata root of images targeting the 4.x runtimes
pub const DEFAULT_METADATA_VERSION: &str = "v4.0.30319";

/// Header values the [`crate::cilassembly::ImageAssembler`] writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    /// Preferred load address
    pub image_base: u32,
    /// Alignment of sections in memory
    pub section_alignment: u32,
    /// Alignment of sections in the file
    pub file_alignment: u32,
    /// COFF characteristics
    pub characteristics: Characteristics,
    /// Optional header DLL characteristics
    pub dll_characteristics: DllCharacteristics,
    /// Optional header subsystem
    pub subsystem: u16,
    /// COFF machine
    pub machine: u16,
    /// Linker version, major and minor
    pub linker_version: (u8, u8),
    /// Required OS version, major and minor
    pub os_version: (u16, u16),
    /// Required subsystem version, major and minor
    pub subsystem_version: (u16, u16),
    /// Stack reserve size
    pub stack_reserve: u32,
    /// Stack commit size
    pub stack_commit: u32,
    /// Heap reserve size
    pub heap_reserve: u32,
    /// Heap commit size
    pub heap_commit: u32,
    /// CLI header runtime version, major and minor
    pub runtime_version: (u16, u16),
    /// CLI header `COMIMAGE_FLAGS_*`
    pub cli_flags: u32,
    /// Version string of the metadata root
    pub metadata_version: String,
    /// COFF `TimeDateStamp`, 0 keeps output reproducible
    pub timestamp: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            image_base: 0x0040_0000,
            section_alignment: 0x2000,
            file_alignment: 0x200,
            characteristics: Characteristics::EXECUTABLE_IMAGE | Characteristics::DLL,
            dll_characteristics: DllCharacteristics::DYNAMIC_BASE
                | DllCharacteristics::NX_COMPAT
                | DllCharacteristics::NO_SEH
                | DllCharacteristics::TERMINAL_SERVER_AWARE,
            subsystem: SUBSYSTEM_WINDOWS_CUI,
            machine: MACHINE_I386,
            linker_version: (48, 0),
            os_version: (4, 0),
            subsystem_version: (4, 0),
            stack_reserve: 0x0010_0000,
            stack_commit: 0x1000,
            heap_reserve: 0x0010_0000,
            heap_commit: 0x1000,
            runtime_version: (2, 5),
            cli_flags: COMIMAGE_FLAGS_ILONLY,
            metadata_version: DEFAULT_METADATA_VERSION.to_string(),
            timestamp: 0,
        }
    }
}

impl ImageConfig {
    /// Start from the class library defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the preferred load address
    #[must_use]
    pub fn image_base(mut self, image_base: u32) -> Self {
        self.image_base = image_base;
        self
    }

    /// Set section alignment in memory and in the file
    #[must_use]
    pub fn alignment(mut self, section: u32, file: u32) -> Self {
        self.section_alignment = section;
        self.file_alignment = file;
        self
    }

    /// Replace the COFF characteristics
    #[must_use]
    pub fn characteristics(mut self, characteristics: Characteristics) -> Self {
        self.characteristics = characteristics;
        self
    }

    /// Replace the DLL characteristics
    #[must_use]
    pub fn dll_characteristics(mut self, dll_characteristics: DllCharacteristics) -> Self {
        self.dll_characteristics = dll_characteristics;
        self
    }

    /// Set the subsystem
    #[must_use]
    pub fn subsystem(mut self, subsystem: u16) -> Self {
        self.subsystem = subsystem;
        self
    }

    /// Set the machine
    #[must_use]
    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Set the stack reserve and commit sizes
    #[must_use]
    pub fn stack(mut self, reserve: u32, commit: u32) -> Self {
        self.stack_reserve = reserve;
        self.stack_commit = commit;
        self
    }

    /// Set the heap reserve and commit sizes
    #[must_use]
    pub fn heap(mut self, reserve: u32, commit: u32) -> Self {
        self.heap_reserve = reserve;
        self.heap_commit = commit;
        self
    }

    /// Set the CLI header runtime version
    #[must_use]
    pub fn runtime_version(mut self, major: u16, minor: u16) -> Self {
        self.runtime_version = (major, minor);
        self
    }

    /// Set the CLI header flags
    #[must_use]
    pub fn cli_flags(mut self, flags: u32) -> Self {
        self.cli_flags = flags;
        self
    }

    /// Set the metadata root version string
    #[must_use]
    pub fn metadata_version(mut self, version: impl Into<String>) -> Self {
        self.metadata_version = version.into();
        self
    }

    /// Set the COFF timestamp
    #[must_use]
    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_library_defaults() {
        let config = ImageConfig::default();
        assert_eq!(config.characteristics.bits(), 0x2002);
        assert_eq!(config.dll_characteristics.bits(), 0x8540);
        assert_eq!(config.runtime_version, (2, 5));
        assert_eq!(config.cli_flags, 1);
        assert_eq!(config.metadata_version, "v4.0.30319");
    }

    #[test]
    fn setters_chain() {
        let config = ImageConfig::new()
            .characteristics(Characteristics::DLL)
            .timestamp(0x5F00_0000)
            .alignment(0x1000, 0x1000);
        assert!(!config.characteristics.contains(Characteristics::EXECUTABLE_IMAGE));
        assert_eq!(config.timestamp, 0x5F00_0000);
        assert_eq!((config.section_alignment, config.file_alignment), (0x1000, 0x1000));
    }
}
