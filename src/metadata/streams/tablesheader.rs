use strum::IntoEnumIterator;

use crate::{
    file::io::read_le,
    metadata::tables::{
        AssemblyRaw, AssemblyRefRaw, MemberRefRaw, MetadataTable, MethodDefRaw, ModuleRaw,
        RowReadable, StandAloneSigRaw, TableId, TableInfo, TypeDefRaw, TypeRefRaw,
    },
    Error::{NotSupported, OutOfBounds},
    Result,
};

/// Schema major version written into `#~`
pub const TABLES_MAJOR_VERSION: u8 = 2;
/// Schema minor version written into `#~`
pub const TABLES_MINOR_VERSION: u8 = 0;
/// The `Sorted` vector the reference toolchains emit; it only declares which tables *would*
/// be sorted, none of the tables written here need ordering
pub const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

/// Size of the fixed part of the `#~` header, before the row counts
pub const TABLES_HEADER_SIZE: usize = 24;

/// Row size of `table`, for the tables this crate knows how to lay out
fn known_row_size(table: TableId, info: &TableInfo) -> Option<u32> {
    match table {
        TableId::Module => Some(ModuleRaw::row_size(info)),
        TableId::TypeRef => Some(TypeRefRaw::row_size(info)),
        TableId::TypeDef => Some(TypeDefRaw::row_size(info)),
        TableId::MethodDef => Some(MethodDefRaw::row_size(info)),
        TableId::MemberRef => Some(MemberRefRaw::row_size(info)),
        TableId::StandAloneSig => Some(StandAloneSigRaw::row_size(info)),
        TableId::Assembly => Some(AssemblyRaw::row_size(info)),
        TableId::AssemblyRef => Some(AssemblyRefRaw::row_size(info)),
        TableId::Field | TableId::Param | TableId::ModuleRef | TableId::TypeSpec => None,
    }
}

/// The parsed header of a `#~` stream, giving typed access to each table.
///
/// Only images restricted to the tables this crate writes can be read; any other bit in the
/// `Valid` vector is [`crate::Error::NotSupported`], since the row size of an unknown table
/// (and therefore the position of every table after it) can't be determined.
pub struct TablesHeader<'a> {
    /// Schema major version
    pub major_version: u8,
    /// Schema minor version
    pub minor_version: u8,
    /// Bit vector of present tables
    pub valid: u64,
    /// Bit vector of sorted tables
    pub sorted: u64,
    info: TableInfo,
    data: &'a [u8],
    offsets: Vec<(TableId, usize)>,
}

impl<'a> TablesHeader<'a> {
    /// Parse a `#~` stream
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data, [`crate::Error::Malformed`]
    /// for an empty `Valid` vector and [`crate::Error::NotSupported`] for unknown tables.
    pub fn from(data: &'a [u8]) -> Result<TablesHeader<'a>> {
        if data.len() < TABLES_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let valid = read_le::<u64>(&data[8..])?;
        if valid == 0 {
            return Err(malformed_error!("No valid rows in any of the tables"));
        }

        let mut known = 0u64;
        for table in TableId::iter() {
            known |= table.mask();
        }
        if valid & !known != 0 {
            return Err(NotSupported);
        }

        let heap_sizes = read_le::<u8>(&data[6..])?;

        let mut counts = Vec::new();
        let mut cursor = TABLES_HEADER_SIZE;
        for table in TableId::iter() {
            if valid & table.mask() == 0 {
                continue;
            }

            let Some(raw) = data.get(cursor..) else {
                return Err(OutOfBounds);
            };
            counts.push((table, read_le::<u32>(raw)?));
            cursor += 4;
        }

        let info = TableInfo::new(counts.iter().copied(), heap_sizes);

        let mut offsets = Vec::with_capacity(counts.len());
        for (table, rows) in &counts {
            let Some(row_size) = known_row_size(*table, &info) else {
                return Err(NotSupported);
            };

            offsets.push((*table, cursor));

            let size = u64::from(*rows) * u64::from(row_size);
            cursor = usize::try_from(size)
                .ok()
                .and_then(|size| cursor.checked_add(size))
                .ok_or(OutOfBounds)?;
            if cursor > data.len() {
                return Err(OutOfBounds);
            }
        }

        Ok(TablesHeader {
            major_version: read_le::<u8>(&data[4..])?,
            minor_version: read_le::<u8>(&data[5..])?,
            valid,
            sorted: read_le::<u64>(&data[16..])?,
            info,
            data,
            offsets,
        })
    }

    /// Column widths and row counts
    #[must_use]
    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    /// Number of present tables
    #[must_use]
    pub fn table_count(&self) -> u32 {
        self.valid.count_ones()
    }

    /// Row count of `table`, 0 if absent
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.info.rows(table)
    }

    /// Typed access to the table holding `T` rows
    #[must_use]
    pub fn table<T: RowReadable>(&self) -> Option<MetadataTable<'_, T>> {
        let (_, offset) = self
            .offsets
            .iter()
            .find(|(table, _)| *table == T::TABLE)?;

        MetadataTable::new(&self.data[*offset..], self.info.rows(T::TABLE), &self.info).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn crafted() -> Vec<u8> {
        vec![
            0x00, 0x00, 0x00, 0x00,                         // reserved
            0x02, 0x00,                                     // version 2.0
            0x00,                                           // heap sizes
            0x01,                                           // reserved
            0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, // valid: Module, StandAloneSig
            0x00, 0xFA, 0x01, 0x33, 0x00, 0x16, 0x00, 0x00, // sorted
            0x01, 0x00, 0x00, 0x00,                         // Module rows
            0x02, 0x00, 0x00, 0x00,                         // StandAloneSig rows
            0x00, 0x00, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, // Module
            0x07, 0x00,                                     // StandAloneSig 1
            0x0B, 0x00,                                     // StandAloneSig 2
        ]
    }

    #[test]
    fn parse_crafted() {
        let data = crafted();
        let header = TablesHeader::from(&data).unwrap();

        assert_eq!(header.major_version, 2);
        assert_eq!(header.minor_version, 0);
        assert_eq!(header.sorted, SORTED_TABLES);
        assert_eq!(header.table_count(), 2);
        assert_eq!(header.row_count(TableId::Module), 1);
        assert_eq!(header.row_count(TableId::TypeDef), 0);

        let module = header.table::<ModuleRaw>().unwrap().get(1).unwrap();
        assert_eq!(module.name, 0x0A);
        assert_eq!(module.mvid, 1);

        let sigs = header.table::<StandAloneSigRaw>().unwrap();
        assert_eq!(sigs.get(2).unwrap().signature, 0x0B);

        assert!(header.table::<TypeDefRaw>().is_none());
    }

    #[test]
    fn rejects_unknown_tables() {
        let mut data = crafted();
        // Field (0x04) has no layout here
        data[8] |= 0x10;
        assert!(matches!(TablesHeader::from(&data), Err(NotSupported)));

        let mut data = crafted();
        // CustomAttribute (0x0C)
        data[9] |= 0x10;
        assert!(matches!(TablesHeader::from(&data), Err(NotSupported)));
    }

    #[test]
    fn rejects_truncated() {
        let data = crafted();
        assert!(TablesHeader::from(&data[..data.len() - 1]).is_err());
        assert!(TablesHeader::from(&data[..20]).is_err());

        let mut empty = crafted();
        empty[8] = 0;
        empty[10] = 0;
        assert!(TablesHeader::from(&empty).is_err());
    }
}
