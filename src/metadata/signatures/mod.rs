//! Signature blobs (ECMA-335 §II.23.2).
//!
//! Signatures describe the shape of methods, fields and local variable sets. They are stored
//! in `#Blob` and referenced from `MethodDef`, `MemberRef` and `StandAloneSig` rows.
//!
//! ```rust
//! use dotforge::metadata::signatures::{encode_method_signature, SignatureMethod, TypeSignature};
//!
//! // instance void .ctor()
//! let ctor = SignatureMethod::instance(TypeSignature::Void, vec![]);
//! assert_eq!(encode_method_signature(&ctor)?, vec![0x20, 0x00, 0x01]);
//!
//! // static void WriteLine(string)
//! let write_line = SignatureMethod::static_method(TypeSignature::Void, vec![TypeSignature::String]);
//! assert_eq!(encode_method_signature(&write_line)?, vec![0x00, 0x01, 0x01, 0x0E]);
//! # Ok::<(), dotforge::Error>(())
//! ```

mod encoders;
mod parser;
mod types;

pub use encoders::{
    encode_field_signature, encode_local_var_signature, encode_method_signature,
    encode_type_signature,
};
pub use parser::SignatureParser;
pub use types::{SignatureField, SignatureLocalVariables, SignatureMethod, TypeSignature};

#[allow(non_snake_case)]
/// Element type bytes used inside signatures
pub mod ELEMENT_TYPE {
    /// Marks the end of a list
    pub const END: u8 = 0x00;
    /// `void`
    pub const VOID: u8 = 0x01;
    /// `bool`
    pub const BOOLEAN: u8 = 0x02;
    /// `char`
    pub const CHAR: u8 = 0x03;
    /// `int8`
    pub const I1: u8 = 0x04;
    /// `unsigned int8`
    pub const U1: u8 = 0x05;
    /// `int16`
    pub const I2: u8 = 0x06;
    /// `unsigned int16`
    pub const U2: u8 = 0x07;
    /// `int32`
    pub const I4: u8 = 0x08;
    /// `unsigned int32`
    pub const U4: u8 = 0x09;
    /// `int64`
    pub const I8: u8 = 0x0a;
    /// `unsigned int64`
    pub const U8: u8 = 0x0b;
    /// `float32`
    pub const R4: u8 = 0x0c;
    /// `float64`
    pub const R8: u8 = 0x0d;
    /// `string`
    pub const STRING: u8 = 0x0e;
    /// Followed by a `TypeDefOrRef` coded token
    pub const VALUETYPE: u8 = 0x11;
    /// Followed by a `TypeDefOrRef` coded token
    pub const CLASS: u8 = 0x12;
    /// `native int`
    pub const I: u8 = 0x18;
    /// `native unsigned int`
    pub const U: u8 = 0x19;
    /// `object`
    pub const OBJECT: u8 = 0x1c;
}

#[allow(non_snake_case)]
/// Leading byte of a signature blob
pub mod SIGNATURE_HEADER {
    /// Field signature
    pub const FIELD: u8 = 0x06;
    /// Local variable signature
    pub const LOCAL_SIG: u8 = 0x07;
}

#[allow(non_snake_case)]
/// Calling convention bits of a method signature
pub mod CALLING_CONVENTION {
    /// Managed default calling convention
    pub const DEFAULT: u8 = 0x00;
    /// Mask of the calling convention kind
    pub const KIND_MASK: u8 = 0x0F;
    /// Variable argument list
    pub const VARARG: u8 = 0x05;
    /// Generic method, a generic parameter count follows
    pub const GENERIC: u8 = 0x10;
    /// Instance method, `this` is passed implicitly
    pub const HASTHIS: u8 = 0x20;
    /// `this` is the first explicit parameter
    pub const EXPLICITTHIS: u8 = 0x40;
}
