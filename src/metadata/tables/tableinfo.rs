use crate::metadata::tables::{
    tableid::MAX_TABLE_ID, CodedIndexType, TableId,
};

/// `HeapSizes` bit: `#Strings` indices are 4 bytes wide
pub const HEAP_SIZE_LARGE_STRINGS: u8 = 0x01;
/// `HeapSizes` bit: `#GUID` indices are 4 bytes wide
pub const HEAP_SIZE_LARGE_GUID: u8 = 0x02;
/// `HeapSizes` bit: `#Blob` indices are 4 bytes wide
pub const HEAP_SIZE_LARGE_BLOB: u8 = 0x04;

/// Row counts and heap index widths, which together decide every column width in `#~`.
///
/// The same [`TableInfo`] is used to size, write and read rows, so a writer and a reader that
/// agree on row counts and `HeapSizes` agree on the layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    rows: [u32; MAX_TABLE_ID],
    heap_sizes: u8,
}

impl TableInfo {
    /// Build from per-table row counts and the `HeapSizes` byte
    pub fn new(row_counts: impl IntoIterator<Item = (TableId, u32)>, heap_sizes: u8) -> Self {
        let mut rows = [0u32; MAX_TABLE_ID];
        for (table, count) in row_counts {
            rows[table as usize] = count;
        }

        TableInfo { rows, heap_sizes }
    }

    /// Compute the `HeapSizes` byte for heaps of the given sizes
    #[must_use]
    pub fn heap_sizes_for(strings_len: usize, guid_count: usize, blob_len: usize) -> u8 {
        let mut flags = 0;
        if strings_len > 0xFFFF {
            flags |= HEAP_SIZE_LARGE_STRINGS;
        }
        if guid_count > 0xFFFF {
            flags |= HEAP_SIZE_LARGE_GUID;
        }
        if blob_len > 0xFFFF {
            flags |= HEAP_SIZE_LARGE_BLOB;
        }
        flags
    }

    /// Row count of `table`
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize]
    }

    /// The `HeapSizes` byte
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        self.heap_sizes
    }

    /// Whether `#Strings` indices are 4 bytes
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.heap_sizes & HEAP_SIZE_LARGE_STRINGS != 0
    }

    /// Whether `#GUID` indices are 4 bytes
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.heap_sizes & HEAP_SIZE_LARGE_GUID != 0
    }

    /// Whether `#Blob` indices are 4 bytes
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.heap_sizes & HEAP_SIZE_LARGE_BLOB != 0
    }

    /// Width of a `#Strings` index
    #[must_use]
    pub fn str_bytes(&self) -> u8 {
        if self.is_large_str() {
            4
        } else {
            2
        }
    }

    /// Width of a `#GUID` index
    #[must_use]
    pub fn guid_bytes(&self) -> u8 {
        if self.is_large_guid() {
            4
        } else {
            2
        }
    }

    /// Width of a `#Blob` index
    #[must_use]
    pub fn blob_bytes(&self) -> u8 {
        if self.is_large_blob() {
            4
        } else {
            2
        }
    }

    /// Whether a simple index into `table` is 4 bytes
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows(table) > 0xFFFF
    }

    /// Width of a simple index into `table`
    #[must_use]
    pub fn table_index_bytes(&self, table: TableId) -> u8 {
        if self.is_large(table) {
            4
        } else {
            2
        }
    }

    /// Whether a `kind` coded index is 4 bytes
    ///
    /// A coded index stays 2 bytes while every target table has fewer than
    /// `2^(16 - tag_bits)` rows.
    #[must_use]
    pub fn is_large_coded(&self, kind: CodedIndexType) -> bool {
        let limit = 1u32 << (16 - kind.tag_bits());
        kind.tables().iter().any(|table| self.rows(*table) >= limit)
    }

    /// Width of a `kind` coded index
    #[must_use]
    pub fn coded_index_bytes(&self, kind: CodedIndexType) -> u8 {
        if self.is_large_coded(kind) {
            4
        } else {
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_tables() {
        let info = TableInfo::new([(TableId::TypeDef, 2), (TableId::MethodDef, 2)], 0);

        assert_eq!(info.rows(TableId::TypeDef), 2);
        assert_eq!(info.rows(TableId::Module), 0);
        assert_eq!(info.str_bytes(), 2);
        assert_eq!(info.guid_bytes(), 2);
        assert_eq!(info.blob_bytes(), 2);
        assert_eq!(info.table_index_bytes(TableId::MethodDef), 2);
        assert_eq!(info.coded_index_bytes(CodedIndexType::MemberRefParent), 2);
    }

    #[test]
    fn large_heaps() {
        let flags = TableInfo::heap_sizes_for(0x1_0000, 1, 0x10);
        assert_eq!(flags, HEAP_SIZE_LARGE_STRINGS);

        let info = TableInfo::new([], flags | HEAP_SIZE_LARGE_BLOB);
        assert_eq!(info.str_bytes(), 4);
        assert_eq!(info.guid_bytes(), 2);
        assert_eq!(info.blob_bytes(), 4);
    }

    #[test]
    fn coded_index_threshold() {
        // MemberRefParent has 3 tag bits, so 2^13 rows tip it over
        let info = TableInfo::new([(TableId::TypeRef, 0x1FFF)], 0);
        assert_eq!(info.coded_index_bytes(CodedIndexType::MemberRefParent), 2);

        let info = TableInfo::new([(TableId::TypeRef, 0x2000)], 0);
        assert_eq!(info.coded_index_bytes(CodedIndexType::MemberRefParent), 4);
        assert_eq!(info.coded_index_bytes(CodedIndexType::ResolutionScope), 2);
        assert_eq!(info.table_index_bytes(TableId::TypeRef), 2);
    }
}
