//! Metadata tables (ECMA-335 §II.22).
//!
//! Only the tables a minimal library needs are modeled: `Module`, `TypeRef`, `TypeDef`,
//! `MethodDef`, `MemberRef`, `StandAloneSig`, `Assembly` and `AssemblyRef`. Each has a raw row
//! type in [`rows`] that knows its layout under a given [`TableInfo`].
//!
//! - [`TableBuilder`] accumulates rows for a new image and serializes the `#~` stream
//! - [`MetadataTable`] decodes rows out of an existing `#~` stream
//! - [`CodedIndex`] packs the multi-table references rows use
//! - [`attributes`] holds the flag types stored in rows

pub mod attributes;
mod builder;
mod codedindex;
mod rows;
mod table;
mod tableid;
mod tableinfo;

pub use attributes::{
    AssemblyFlags, AssemblyHashAlgorithm, MethodAttributes, MethodImplAttributes, TypeAttributes,
};
pub use builder::{MethodDefEntry, TableBuilder};
pub use codedindex::{CodedIndex, CodedIndexType};
pub use rows::{
    AssemblyRaw, AssemblyRefRaw, MemberRefRaw, MethodDefRaw, ModuleRaw, RowReadable, RowWritable,
    StandAloneSigRaw, TypeDefRaw, TypeRefRaw,
};
pub use table::{MetadataTable, TableIterator};
pub use tableid::{TableId, MAX_TABLE_ID};
pub use tableinfo::{
    TableInfo, HEAP_SIZE_LARGE_BLOB, HEAP_SIZE_LARGE_GUID, HEAP_SIZE_LARGE_STRINGS,
};
