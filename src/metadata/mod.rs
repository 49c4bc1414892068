//! ECMA-335 metadata: the structures a managed image carries, for writing and for reading.
//!
//! # Key Components
//!
//! - [`streams`] - The `#Strings`, `#US`, `#GUID` and `#Blob` heaps and the `#~` header
//! - [`tables`] - Table rows, coded indices and the [`tables::TableBuilder`]
//! - [`signatures`] - Method, field and local variable signature blobs
//! - [`method`] - Tiny and fat method body headers
//! - [`root`] / [`cor20header`] - The metadata root and the CLI header
//! - [`identity`] - Assembly identities and public key tokens
//! - [`cilimage`] - A strict reader applying the loader's structural rules
//!
//! # Examples
//!
//! ```rust
//! use dotforge::metadata::{streams::StringsHeapBuilder, token::Token, tables::TableId};
//!
//! let mut strings = StringsHeapBuilder::new();
//! let name = strings.intern("SampleLib")?;
//! assert_eq!(strings.get(name), Some("SampleLib"));
//!
//! assert_eq!(Token::from_parts(TableId::TypeDef, 2).value(), 0x0200_0002);
//! # Ok::<(), dotforge::Error>(())
//! ```

/// Implementation of a loaded and validated CIL image
pub mod cilimage;
/// Implementation of the Header of CIL
pub mod cor20header;
/// Implementation of assembly identities and public key tokens
pub mod identity;
/// Implementation of the MethodHeader of CIL
pub mod method;
/// Implementation of the root metadata structure
pub mod root;
/// Implementation of method and type signatures
pub mod signatures;
/// Implementation of the heaps and the tables stream header
pub mod streams;
/// Implementation of the metadata tables
pub mod tables;
/// Implementation of metadata tokens
pub mod token;
/// Implementation of the loader's structural rules
pub mod validation;
