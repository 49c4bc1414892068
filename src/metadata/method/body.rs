use bitflags::bitflags;

use crate::{
    file::io::read_le,
    metadata::method::{FAT_HEADER_SIZE, TINY_MAX_CODE_SIZE, TINY_MAX_STACK},
    Error::{NotSupported, OutOfBounds},
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags in the low bits of a method header
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// More data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize all locals
        const INIT_LOCALS = 0x10;
    }
}

/// Encode the header for a body of `code_size` bytes.
///
/// A tiny header (one byte, `(code_size << 2) | 2`) is used when the code is shorter than 64
/// bytes, `max_stack` is at most 8 and there are no locals. Otherwise a 12 byte fat header is
/// produced: flags and header size, `max_stack`, code size and the local signature token.
///
/// # Errors
/// Returns [`crate::Error::Error`] if `init_locals` is requested without a local signature.
pub fn encode_method_body_header(
    code_size: u32,
    max_stack: u16,
    local_var_sig_token: u32,
    init_locals: bool,
) -> Result<Vec<u8>> {
    if init_locals && local_var_sig_token == 0 {
        return Err(crate::Error::Error(
            "init_locals requires a local variable signature".to_string(),
        ));
    }

    if code_size <= TINY_MAX_CODE_SIZE && max_stack <= TINY_MAX_STACK && local_var_sig_token == 0
    {
        // code_size fits in 6 bits here
        let header = ((code_size as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8;
        return Ok(vec![header]);
    }

    let mut flags = MethodBodyFlags::FAT_FORMAT;
    if init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS;
    }

    // Header size in dwords sits in the top nibble
    let flags_and_size = flags.bits() | (((FAT_HEADER_SIZE / 4) as u16) << 12);

    let mut header = Vec::with_capacity(FAT_HEADER_SIZE);
    header.extend_from_slice(&flags_and_size.to_le_bytes());
    header.extend_from_slice(&max_stack.to_le_bytes());
    header.extend_from_slice(&code_size.to_le_bytes());
    header.extend_from_slice(&local_var_sig_token.to_le_bytes());

    Ok(header)
}

/// A decoded method header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the code in bytes
    pub size_code: usize,
    /// Size of the header in bytes
    pub size_header: usize,
    /// `StandAloneSig` token of the locals, 0 without locals
    pub local_var_sig_token: u32,
    /// Maximum evaluation stack depth
    pub max_stack: usize,
    /// Fat header
    pub is_fat: bool,
    /// Locals are zero-initialized
    pub is_init_local: bool,
}

impl MethodBody {
    /// Decode the header at the start of `data` and check the code fits
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the code runs past `data`,
    /// [`crate::Error::NotSupported`] for bodies with extra data sections, or
    /// [`crate::Error::Malformed`] for an unknown header format.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: usize::from(TINY_MAX_STACK),
                    is_fat: false,
                    is_init_local: false,
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header != FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Fat method header with size {}",
                        size_header
                    ));
                }

                let size_code = read_le::<u32>(&data[4..])? as usize;
                if data.len() < size_code.saturating_add(size_header) {
                    return Err(OutOfBounds);
                }

                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    return Err(NotSupported);
                }

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token: read_le::<u32>(&data[8..])?,
                    max_stack: usize::from(read_le::<u16>(&data[2..])?),
                    is_fat: true,
                    is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Header plus code size
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }
}
