//! The CLI header (ECMA-335 §II.25.3.3), located through data directory 14 of the PE optional
//! header. It points the runtime at the metadata root and carries the runtime version and
//! image flags.

use crate::{
    file::{io::write_le, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Size of the CLI header, also the value of its `cb` field
pub const COR20_HEADER_SIZE: u32 = 72;

/// `COMIMAGE_FLAGS_ILONLY`: the image contains only IL code
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
/// `COMIMAGE_FLAGS_32BITREQUIRED`
pub const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;
/// `COMIMAGE_FLAGS_STRONGNAMESIGNED`
pub const COMIMAGE_FLAGS_STRONGNAMESIGNED: u32 = 0x0000_0008;

/// The CLI header
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cor20Header {
    /// Size of the header, always 72
    pub cb: u32,
    /// Major runtime version, 2
    pub major_runtime_version: u16,
    /// Minor runtime version, 5
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata root
    pub meta_data_size: u32,
    /// `COMIMAGE_FLAGS_*`
    pub flags: u32,
    /// Entry point token, 0 for libraries
    pub entry_point_token: u32,
    /// RVA of managed resources
    pub resource_rva: u32,
    /// Size of managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature
    pub strong_name_signature_size: u32,
    /// Reserved, 0
    pub code_manager_table_rva: u32,
    /// Reserved, 0
    pub code_manager_table_size: u32,
    /// RVA of the vtable fixups
    pub vtable_fixups_rva: u32,
    /// Size of the vtable fixups
    pub vtable_fixups_size: u32,
    /// Reserved, 0
    pub export_address_table_jmp_rva: u32,
    /// Reserved, 0
    pub export_address_table_jmp_size: u32,
    /// Reserved, 0
    pub managed_native_header_rva: u32,
    /// Reserved, 0
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// A header for an image without resources, strong name or native code
    #[must_use]
    pub fn new(
        runtime_version: (u16, u16),
        meta_data_rva: u32,
        meta_data_size: u32,
        flags: u32,
    ) -> Self {
        Cor20Header {
            cb: COR20_HEADER_SIZE,
            major_runtime_version: runtime_version.0,
            minor_runtime_version: runtime_version.1,
            meta_data_rva,
            meta_data_size,
            flags,
            ..Cor20Header::default()
        }
    }

    /// Parse and validate a CLI header
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than 72 bytes, or
    /// [`crate::Error::Malformed`] when a field violates the header rules.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        const VALID_FLAGS: u32 = 0x0000_001F;

        if data.len() < COR20_HEADER_SIZE as usize {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        if major_runtime_version == 0 || major_runtime_version > 10 {
            return Err(malformed_error!(
                "Invalid major runtime version: {}",
                major_runtime_version
            ));
        }

        let meta_data_rva = parser.read_le::<u32>()?;
        if meta_data_rva == 0 {
            return Err(malformed_error!("Metadata RVA cannot be zero"));
        }

        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_size == 0 {
            return Err(malformed_error!("Metadata size cannot be zero"));
        }

        let flags = parser.read_le::<u32>()?;
        if flags & !VALID_FLAGS != 0 {
            return Err(malformed_error!(
                "Invalid CLR flags: 0x{:08X} contains undefined bits",
                flags
            ));
        }

        let entry_point_token = parser.read_le::<u32>()?;

        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;
        if (resource_rva == 0) != (resource_size == 0) {
            return Err(malformed_error!("Resource values are invalid"));
        }

        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;
        if (strong_name_signature_rva == 0) != (strong_name_signature_size == 0) {
            return Err(malformed_error!("Strong name values are invalid"));
        }

        let code_manager_table_rva = parser.read_le::<u32>()?;
        let code_manager_table_size = parser.read_le::<u32>()?;
        if code_manager_table_rva != 0 || code_manager_table_size != 0 {
            return Err(malformed_error!(
                "Code Manager Table fields must be zero (reserved)"
            ));
        }

        let vtable_fixups_rva = parser.read_le::<u32>()?;
        let vtable_fixups_size = parser.read_le::<u32>()?;
        if (vtable_fixups_rva == 0) != (vtable_fixups_size == 0) {
            return Err(malformed_error!("VTable fixups are invalid"));
        }

        let export_address_table_jmp_rva = parser.read_le::<u32>()?;
        let export_address_table_jmp_size = parser.read_le::<u32>()?;
        let managed_native_header_rva = parser.read_le::<u32>()?;
        let managed_native_header_size = parser.read_le::<u32>()?;
        if export_address_table_jmp_rva != 0
            || export_address_table_jmp_size != 0
            || managed_native_header_rva != 0
            || managed_native_header_size != 0
        {
            return Err(malformed_error!("Reserved CLR header fields must be zero"));
        }

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            code_manager_table_rva,
            code_manager_table_size,
            vtable_fixups_rva,
            vtable_fixups_size,
            export_address_table_jmp_rva,
            export_address_table_jmp_size,
            managed_native_header_rva,
            managed_native_header_size,
        })
    }

    /// Append the encoded header to `buffer`
    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        write_le(buffer, self.cb);
        write_le(buffer, self.major_runtime_version);
        write_le(buffer, self.minor_runtime_version);
        write_le(buffer, self.meta_data_rva);
        write_le(buffer, self.meta_data_size);
        write_le(buffer, self.flags);
        write_le(buffer, self.entry_point_token);
        write_le(buffer, self.resource_rva);
        write_le(buffer, self.resource_size);
        write_le(buffer, self.strong_name_signature_rva);
        write_le(buffer, self.strong_name_signature_size);
        write_le(buffer, self.code_manager_table_rva);
        write_le(buffer, self.code_manager_table_size);
        write_le(buffer, self.vtable_fixups_rva);
        write_le(buffer, self.vtable_fixups_size);
        write_le(buffer, self.export_address_table_jmp_rva);
        write_le(buffer, self.export_address_table_jmp_size);
        write_le(buffer, self.managed_native_header_rva);
        write_le(buffer, self.managed_native_header_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read() {
        let header = Cor20Header::new((2, 5), 0x2058, 0x1F4, COMIMAGE_FLAGS_ILONLY);

        let mut buffer = Vec::new();
        header.write_to(&mut buffer);
        assert_eq!(buffer.len(), 72);
        assert_eq!(&buffer[..8], &[0x48, 0x00, 0x00, 0x00, 0x02, 0x00, 0x05, 0x00]);
        assert_eq!(&buffer[8..12], &[0x58, 0x20, 0x00, 0x00]);
        assert_eq!(&buffer[16..20], &[0x01, 0x00, 0x00, 0x00]);
        assert!(buffer[20..].iter().all(|&byte| byte == 0));

        assert_eq!(Cor20Header::read(&buffer).unwrap(), header);
    }

    #[test]
    fn strict_rules() {
        let header = Cor20Header::new((2, 5), 0x2058, 0x1F4, COMIMAGE_FLAGS_ILONLY);
        let mut valid = Vec::new();
        header.write_to(&mut valid);

        assert!(Cor20Header::read(&valid[..71]).is_err());

        let mut bad_cb = valid.clone();
        bad_cb[0] = 0x40;
        assert!(Cor20Header::read(&bad_cb).is_err());

        let mut no_metadata = valid.clone();
        no_metadata[8..12].copy_from_slice(&[0, 0, 0, 0]);
        assert!(Cor20Header::read(&no_metadata).is_err());

        let mut bad_flags = valid.clone();
        bad_flags[16] = 0x20;
        assert!(Cor20Header::read(&bad_flags).is_err());

        let mut half_resource = valid;
        half_resource[28] = 0x10;
        assert!(Cor20Header::read(&half_resource).is_err());
    }
}
