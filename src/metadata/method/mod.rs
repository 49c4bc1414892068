//! Method body headers (ECMA-335 §II.25.4).

mod body;

pub use body::{encode_method_body_header, MethodBody, MethodBodyFlags};

/// Largest code size a tiny header can describe
pub const TINY_MAX_CODE_SIZE: u32 = 63;
/// Largest evaluation stack a tiny header implies
pub const TINY_MAX_STACK: u16 = 8;
/// Size of a fat header in bytes
pub const FAT_HEADER_SIZE: usize = 12;
