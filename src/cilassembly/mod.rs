//! Building managed images from scratch.
//!
//! Construction follows a two-phase protocol. During accumulation a [`MetadataBuilder`] interns
//! heap content and appends rows and method bodies, handing out tokens later rows and
//! instructions refer to. [`MetadataBuilder::freeze`] then checks every cross reference and
//! yields [`FrozenMetadata`], which the [`ImageAssembler`] serializes into an [`Image`]. Tokens
//! and method RVAs are final before any byte is written, so nothing is back-patched.
//!
//! # Key Components
//!
//! - [`MetadataBuilder`] / [`FrozenMetadata`] - Heaps, tables and the method body stream
//! - [`MethodBodyBuilder`] - Bodies with locals or an explicit stack size
//! - [`MethodBodyStream`] - The encoded bodies, back to back
//! - [`ImageAssembler`] / [`ImageConfig`] - PE32 container layout and serialization
//! - [`LibraryBuilder`] / [`LibrarySpec`] - A complete one type, one method class library
//!
//! # Usage Examples
//!
//! ```rust
//! use dotforge::cilassembly::{LibraryBuilder, LibrarySpec, MvidPolicy};
//! use dotforge::metadata::cilimage::CilImage;
//!
//! let spec = LibrarySpec::default()
//!     .mvid(MvidPolicy::Fixed(uguid::guid!("8c2e4f6a-1b3d-4c5e-8f7a-9b0c1d2e3f4a")));
//! let image = LibraryBuilder::default().build(&spec)?;
//!
//! let loaded = CilImage::from_mem(image.into_bytes())?;
//! assert_eq!(loaded.tables().row_count(dotforge::metadata::tables::TableId::TypeDef), 2);
//! # Ok::<(), dotforge::Error>(())
//! ```

mod builder;
mod builders;
mod library;
mod methods;
mod validation;
mod writer;

pub use builder::{FrozenMetadata, MetadataBuilder, SignatureResolver};
pub use builders::MethodBodyBuilder;
pub use library::{LibraryBuilder, LibrarySpec, MvidPolicy, CONSTRUCTOR_NAME, DEFAULT_MESSAGE};
pub use methods::MethodBodyStream;
pub use writer::{
    Image, ImageAssembler, ImageConfig, ImageLayout, Output, Region, DEFAULT_METADATA_VERSION,
    HEADERS_SIZE, TEXT_SECTION_NAME,
};
