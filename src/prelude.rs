//! # dotforge Prelude
//!
//! The types most programs building or loading an image need, for glob imports.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotforge operations
pub use crate::Error;

/// The result type used throughout dotforge
pub use crate::Result;

// ================================================================================================
// Building
// ================================================================================================

/// Metadata accumulation and the frozen result
pub use crate::cilassembly::{FrozenMetadata, MetadataBuilder, MethodBodyBuilder};

/// Image layout and serialization
pub use crate::cilassembly::{Image, ImageAssembler, ImageConfig};

/// The sample class library
pub use crate::cilassembly::{LibraryBuilder, LibrarySpec, MvidPolicy, DEFAULT_MESSAGE};

/// CIL instructions
pub use crate::assembly::Instruction;

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata tokens
pub use crate::metadata::token::Token;

/// Assembly identities and versions
pub use crate::metadata::identity::{AssemblyIdentity, AssemblyVersion};

/// Method signatures
pub use crate::metadata::signatures::{SignatureMethod, TypeSignature};

/// Row flags
pub use crate::metadata::tables::{
    AssemblyHashAlgorithm, MethodAttributes, MethodImplAttributes, TableId, TypeAttributes,
};

/// Loaded images
pub use crate::metadata::cilimage::CilImage;

// ================================================================================================
// Loading and Invoking
// ================================================================================================

/// Reflection style runtime access
pub use crate::runtime::{
    run_method, HostRuntime, Invocation, LoadedModule, MethodHandle, ReferenceRuntime,
    RuntimeInstance, RuntimeLoader, RuntimeType, Value,
};
