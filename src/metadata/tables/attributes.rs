//! Flag words stored in `TypeDef`, `MethodDef`, `Assembly` and `AssemblyRef` rows.
//!
//! Only the flags the builder and loader make decisions on are named; unnamed bits survive
//! through `from_bits_retain`.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// `TypeAttributes` (ECMA-335 §II.23.1.15)
    pub struct TypeAttributes: u32 {
        /// Type is not visible outside the assembly
        const NOT_PUBLIC = 0x0000_0000;
        /// Type is visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Class fields are auto-laid out
        const AUTO_LAYOUT = 0x0000_0000;
        /// Type is a class
        const CLASS = 0x0000_0000;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class can not be extended
        const SEALED = 0x0000_0100;
        /// Class name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Type initialization may run any time before the first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

/// Mask selecting the visibility bits of [`TypeAttributes`]
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// `MethodAttributes` (ECMA-335 §II.23.1.10)
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by everyone
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Can not be overridden
        const FINAL = 0x0020;
        /// Virtual method
        const VIRTUAL = 0x0040;
        /// Hidden by name and signature, not by name only
        const HIDE_BY_SIG = 0x0080;
        /// No implementation is provided
        const ABSTRACT = 0x0400;
        /// Method name is special
        const SPECIAL_NAME = 0x0800;
        /// The runtime checks the name encoding (`.ctor`, `.cctor`)
        const RT_SPECIAL_NAME = 0x1000;
    }
}

/// Mask selecting the member access bits of [`MethodAttributes`]
pub const METHOD_ACCESS_MASK: u16 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// `MethodImplAttributes` (ECMA-335 §II.23.1.11)
    pub struct MethodImplAttributes: u16 {
        /// Method body is CIL
        const IL = 0x0000;
        /// Method is managed code
        const MANAGED = 0x0000;
        /// Method body is native
        const NATIVE = 0x0001;
        /// Method body is provided by the runtime
        const RUNTIME = 0x0003;
        /// Method is implemented in unmanaged code
        const UNMANAGED = 0x0004;
        /// Method can not be inlined
        const NO_INLINING = 0x0008;
        /// Method is implemented internally by the runtime
        const INTERNAL_CALL = 0x1000;
    }
}

/// Mask selecting the code type bits of [`MethodImplAttributes`]
pub const METHOD_IMPL_CODE_TYPE_MASK: u16 = 0x0003;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// `AssemblyFlags` (ECMA-335 §II.23.1.2)
    pub struct AssemblyFlags: u32 {
        /// The blob holds the full public key rather than a token
        const PUBLIC_KEY = 0x0001;
        /// The assembly can be retargeted at runtime
        const RETARGETABLE = 0x0100;
        /// JIT tracking is disabled
        const DISABLE_JIT_COMPILE_OPTIMIZER = 0x4000;
        /// JIT tracking is enabled
        const ENABLE_JIT_COMPILE_TRACKING = 0x8000;
    }
}

#[allow(non_snake_case)]
/// All possible values for `AssemblyHashAlgorithm`
pub mod AssemblyHashAlgorithm {
    /// No hash algorithm specified
    pub const NONE: u32 = 0x0000;
    /// MD5 hash algorithm
    pub const MD5: u32 = 0x8003;
    /// SHA1 hash algorithm
    pub const SHA1: u32 = 0x8004;
}
