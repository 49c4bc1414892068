//! The four metadata heaps and the stream headers that locate them.
//!
//! Each heap has a builder, which interns content and hands back a typed offset, and a reader,
//! which resolves offsets in a loaded image:
//!
//! | Stream     | Builder                      | Reader          | Content                        |
//! |------------|------------------------------|-----------------|--------------------------------|
//! | `#Strings` | [`StringsHeapBuilder`]       | [`Strings`]     | UTF-8 identifiers, NUL ended   |
//! | `#US`      | [`UserStringsHeapBuilder`]   | [`UserStrings`] | UTF-16 literals for `ldstr`    |
//! | `#GUID`    | [`GuidHeapBuilder`]          | [`Guid`]        | 16 byte GUIDs, 1-based index   |
//! | `#Blob`    | [`BlobHeapBuilder`]          | [`Blob`]        | Length prefixed byte runs      |
//!
//! Every heap reserves offset (or index) 0 for the absent entry and deduplicates identical
//! content. References are limited to 24 bits; crossing that ceiling is
//! [`crate::Error::HeapOverflow`].

mod blob;
mod guid;
mod streamheader;
mod strings;
mod tablesheader;
mod userstrings;

pub use blob::{Blob, BlobHeapBuilder};
pub use guid::{Guid, GuidHeapBuilder};
pub use streamheader::StreamHeader;
pub use strings::{Strings, StringsHeapBuilder};
pub use tablesheader::{
    TablesHeader, SORTED_TABLES, TABLES_HEADER_SIZE, TABLES_MAJOR_VERSION, TABLES_MINOR_VERSION,
};
pub use userstrings::{UserStrings, UserStringsHeapBuilder};

/// Largest heap offset (or GUID index) a reference can carry
pub const MAX_HEAP_OFFSET: usize = 0x00FF_FFFF;

macro_rules! heap_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            /// Raw offset (or index) value
            #[must_use]
            pub fn value(&self) -> u32 {
                self.0
            }

            /// Whether this is the reserved absent entry
            #[must_use]
            pub fn is_null(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

heap_index!(
    /// Offset of an identifier in `#Strings`
    StringIndex
);
heap_index!(
    /// Offset of a literal in `#US`
    UserStringIndex
);
heap_index!(
    /// 1-based index of a GUID in `#GUID`
    GuidIndex
);
heap_index!(
    /// Offset of an entry in `#Blob`
    BlobIndex
);

impl UserStringIndex {
    /// The `ldstr` operand referring to this literal
    #[must_use]
    pub fn token(&self) -> crate::metadata::token::Token {
        crate::metadata::token::Token::user_string(self.0)
    }
}

/// Check that an entry starting at `offset` is still addressable
fn check_offset(heap: &'static str, offset: usize, size_after: usize) -> crate::Result<u32> {
    if offset > MAX_HEAP_OFFSET {
        return Err(crate::Error::HeapOverflow {
            heap,
            size: size_after,
        });
    }

    u32::try_from(offset).map_err(|_| crate::Error::HeapOverflow {
        heap,
        size: size_after,
    })
}
