//! Raw row layouts of the supported tables.
//!
//! A raw row holds exactly what is stored in `#~`: primitives, heap offsets, simple table
//! indices and coded indices. Column widths come from [`TableInfo`], so the same definitions
//! serve the writer ([`RowWritable`]) and the loader ([`RowReadable`]).

use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le, write_le_dyn},
    metadata::tables::{CodedIndex, CodedIndexType, TableId, TableInfo},
    Result,
};

/// A row that can be decoded from the tables stream
pub trait RowReadable: Sized {
    /// The table this row type belongs to
    const TABLE: TableId;

    /// Size of one row in bytes under `sizes`
    fn row_size(sizes: &TableInfo) -> u32;

    /// Decode one row at `offset`, advancing it
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is too short, or a decode error for
    /// an invalid coded index.
    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self>;
}

/// A row that can be encoded into the tables stream
pub trait RowWritable {
    /// Append the encoded row to `data`
    ///
    /// # Errors
    /// Returns an error if a value does not fit its column.
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()>;
}

fn read_coded(
    data: &[u8],
    offset: &mut usize,
    sizes: &TableInfo,
    kind: CodedIndexType,
) -> Result<CodedIndex> {
    let value = read_le_at_dyn(data, offset, sizes.is_large_coded(kind))?;
    CodedIndex::decode(value, kind)
}

fn write_coded(
    data: &mut Vec<u8>,
    index: &CodedIndex,
    sizes: &TableInfo,
    kind: CodedIndexType,
) -> Result<()> {
    write_le_dyn(data, index.encode(kind)?, sizes.is_large_coded(kind))
}

/// `Module` (0x00)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRaw {
    /// Reserved, zero
    pub generation: u16,
    /// `#Strings` offset of the module file name
    pub name: u32,
    /// `#GUID` index of the module version id
    pub mvid: u32,
    /// `#GUID` index, zero
    pub encid: u32,
    /// `#GUID` index, zero
    pub encbaseid: u32,
}

impl RowReadable for ModuleRaw {
    const TABLE: TableId = TableId::Module;

    #[rustfmt::skip]
    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(
            /* generation */    2 +
            /* name */          sizes.str_bytes() +
            /* mvid */          sizes.guid_bytes() +
            /* encid */         sizes.guid_bytes() +
            /* encbaseid */     sizes.guid_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(ModuleRaw {
            generation: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            mvid: read_le_at_dyn(data, offset, sizes.is_large_guid())?,
            encid: read_le_at_dyn(data, offset, sizes.is_large_guid())?,
            encbaseid: read_le_at_dyn(data, offset, sizes.is_large_guid())?,
        })
    }
}

impl RowWritable for ModuleRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_le(data, self.generation);
        write_le_dyn(data, self.name, sizes.is_large_str())?;
        write_le_dyn(data, self.mvid, sizes.is_large_guid())?;
        write_le_dyn(data, self.encid, sizes.is_large_guid())?;
        write_le_dyn(data, self.encbaseid, sizes.is_large_guid())
    }
}

/// `TypeRef` (0x01)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRefRaw {
    /// Where the type lives - usually an `AssemblyRef`
    pub resolution_scope: CodedIndex,
    /// `#Strings` offset of the type name
    pub type_name: u32,
    /// `#Strings` offset of the namespace
    pub type_namespace: u32,
}

impl RowReadable for TypeRefRaw {
    const TABLE: TableId = TableId::TypeRef;

    #[rustfmt::skip]
    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(
            /* resolution_scope */  sizes.coded_index_bytes(CodedIndexType::ResolutionScope) +
            /* type_name */         sizes.str_bytes() +
            /* type_namespace */    sizes.str_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(TypeRefRaw {
            resolution_scope: read_coded(data, offset, sizes, CodedIndexType::ResolutionScope)?,
            type_name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            type_namespace: read_le_at_dyn(data, offset, sizes.is_large_str())?,
        })
    }
}

impl RowWritable for TypeRefRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_coded(
            data,
            &self.resolution_scope,
            sizes,
            CodedIndexType::ResolutionScope,
        )?;
        write_le_dyn(data, self.type_name, sizes.is_large_str())?;
        write_le_dyn(data, self.type_namespace, sizes.is_large_str())
    }
}

/// `TypeDef` (0x02)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDefRaw {
    /// `TypeAttributes`
    pub flags: u32,
    /// `#Strings` offset of the type name
    pub type_name: u32,
    /// `#Strings` offset of the namespace
    pub type_namespace: u32,
    /// Base type, null for `<Module>` and interfaces
    pub extends: CodedIndex,
    /// First `Field` row owned by this type
    pub field_list: u32,
    /// First `MethodDef` row owned by this type
    pub method_list: u32,
}

impl RowReadable for TypeDefRaw {
    const TABLE: TableId = TableId::TypeDef;

    #[rustfmt::skip]
    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(
            /* flags */             4 +
            /* type_name */         sizes.str_bytes() +
            /* type_namespace */    sizes.str_bytes() +
            /* extends */           sizes.coded_index_bytes(CodedIndexType::TypeDefOrRef) +
            /* field_list */        sizes.table_index_bytes(TableId::Field) +
            /* method_list */       sizes.table_index_bytes(TableId::MethodDef)
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(TypeDefRaw {
            flags: read_le_at::<u32>(data, offset)?,
            type_name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            type_namespace: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            extends: read_coded(data, offset, sizes, CodedIndexType::TypeDefOrRef)?,
            field_list: read_le_at_dyn(data, offset, sizes.is_large(TableId::Field))?,
            method_list: read_le_at_dyn(data, offset, sizes.is_large(TableId::MethodDef))?,
        })
    }
}

impl RowWritable for TypeDefRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_le(data, self.flags);
        write_le_dyn(data, self.type_name, sizes.is_large_str())?;
        write_le_dyn(data, self.type_namespace, sizes.is_large_str())?;
        write_coded(data, &self.extends, sizes, CodedIndexType::TypeDefOrRef)?;
        write_le_dyn(data, self.field_list, sizes.is_large(TableId::Field))?;
        write_le_dyn(data, self.method_list, sizes.is_large(TableId::MethodDef))
    }
}

/// `MethodDef` (0x06)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDefRaw {
    /// RVA of the method body, 0 for abstract and runtime-provided methods
    pub rva: u32,
    /// `MethodImplAttributes`
    pub impl_flags: u16,
    /// `MethodAttributes`
    pub flags: u16,
    /// `#Strings` offset of the method name
    pub name: u32,
    /// `#Blob` offset of the method signature
    pub signature: u32,
    /// First `Param` row owned by this method
    pub param_list: u32,
}

impl RowReadable for MethodDefRaw {
    const TABLE: TableId = TableId::MethodDef;

    #[rustfmt::skip]
    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(
            /* rva */           4 +
            /* impl_flags */    2 +
            /* flags */         2 +
            /* name */          sizes.str_bytes() +
            /* signature */     sizes.blob_bytes() +
            /* param_list */    sizes.table_index_bytes(TableId::Param)
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(MethodDefRaw {
            rva: read_le_at::<u32>(data, offset)?,
            impl_flags: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            signature: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
            param_list: read_le_at_dyn(data, offset, sizes.is_large(TableId::Param))?,
        })
    }
}

impl RowWritable for MethodDefRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_le(data, self.rva);
        write_le(data, self.impl_flags);
        write_le(data, self.flags);
        write_le_dyn(data, self.name, sizes.is_large_str())?;
        write_le_dyn(data, self.signature, sizes.is_large_blob())?;
        write_le_dyn(data, self.param_list, sizes.is_large(TableId::Param))
    }
}

/// `MemberRef` (0x0A)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRefRaw {
    /// The type (or module) declaring the member
    pub class: CodedIndex,
    /// `#Strings` offset of the member name
    pub name: u32,
    /// `#Blob` offset of the member signature
    pub signature: u32,
}

impl RowReadable for MemberRefRaw {
    const TABLE: TableId = TableId::MemberRef;

    #[rustfmt::skip]
    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(
            /* class */     sizes.coded_index_bytes(CodedIndexType::MemberRefParent) +
            /* name */      sizes.str_bytes() +
            /* signature */ sizes.blob_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(MemberRefRaw {
            class: read_coded(data, offset, sizes, CodedIndexType::MemberRefParent)?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            signature: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
        })
    }
}

impl RowWritable for MemberRefRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_coded(data, &self.class, sizes, CodedIndexType::MemberRefParent)?;
        write_le_dyn(data, self.name, sizes.is_large_str())?;
        write_le_dyn(data, self.signature, sizes.is_large_blob())
    }
}

/// `StandAloneSig` (0x11) - carries local variable signatures of fat method bodies
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandAloneSigRaw {
    /// `#Blob` offset of the signature
    pub signature: u32,
}

impl RowReadable for StandAloneSigRaw {
    const TABLE: TableId = TableId::StandAloneSig;

    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(sizes.blob_bytes())
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(StandAloneSigRaw {
            signature: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
        })
    }
}

impl RowWritable for StandAloneSigRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_le_dyn(data, self.signature, sizes.is_large_blob())
    }
}

/// `Assembly` (0x20)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyRaw {
    /// `AssemblyHashAlgorithm`
    pub hash_alg_id: u32,
    /// Version, major part
    pub major_version: u16,
    /// Version, minor part
    pub minor_version: u16,
    /// Version, build part
    pub build_number: u16,
    /// Version, revision part
    pub revision_number: u16,
    /// `AssemblyFlags`
    pub flags: u32,
    /// `#Blob` offset of the public key, 0 when unsigned
    pub public_key: u32,
    /// `#Strings` offset of the assembly name
    pub name: u32,
    /// `#Strings` offset of the culture, 0 for neutral
    pub culture: u32,
}

impl RowReadable for AssemblyRaw {
    const TABLE: TableId = TableId::Assembly;

    #[rustfmt::skip]
    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(
            /* hash_alg_id */       4 +
            /* version */           8 +
            /* flags */             4 +
            /* public_key */        sizes.blob_bytes() +
            /* name */              sizes.str_bytes() +
            /* culture */           sizes.str_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(AssemblyRaw {
            hash_alg_id: read_le_at::<u32>(data, offset)?,
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            culture: read_le_at_dyn(data, offset, sizes.is_large_str())?,
        })
    }
}

impl RowWritable for AssemblyRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_le(data, self.hash_alg_id);
        write_le(data, self.major_version);
        write_le(data, self.minor_version);
        write_le(data, self.build_number);
        write_le(data, self.revision_number);
        write_le(data, self.flags);
        write_le_dyn(data, self.public_key, sizes.is_large_blob())?;
        write_le_dyn(data, self.name, sizes.is_large_str())?;
        write_le_dyn(data, self.culture, sizes.is_large_str())
    }
}

/// `AssemblyRef` (0x23)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyRefRaw {
    /// Version, major part
    pub major_version: u16,
    /// Version, minor part
    pub minor_version: u16,
    /// Version, build part
    pub build_number: u16,
    /// Version, revision part
    pub revision_number: u16,
    /// `AssemblyFlags`
    pub flags: u32,
    /// `#Blob` offset of the public key or its 8 byte token
    pub public_key_or_token: u32,
    /// `#Strings` offset of the assembly name
    pub name: u32,
    /// `#Strings` offset of the culture, 0 for neutral
    pub culture: u32,
    /// `#Blob` offset of the hash value, usually 0
    pub hash_value: u32,
}

impl RowReadable for AssemblyRefRaw {
    const TABLE: TableId = TableId::AssemblyRef;

    #[rustfmt::skip]
    fn row_size(sizes: &TableInfo) -> u32 {
        u32::from(
            /* version */               8 +
            /* flags */                 4 +
            /* public_key_or_token */   sizes.blob_bytes() +
            /* name */                  sizes.str_bytes() +
            /* culture */               sizes.str_bytes() +
            /* hash_value */            sizes.blob_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, sizes: &TableInfo) -> Result<Self> {
        Ok(AssemblyRefRaw {
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key_or_token: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            culture: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            hash_value: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
        })
    }
}

impl RowWritable for AssemblyRefRaw {
    fn row_write(&self, data: &mut Vec<u8>, sizes: &TableInfo) -> Result<()> {
        write_le(data, self.major_version);
        write_le(data, self.minor_version);
        write_le(data, self.build_number);
        write_le(data, self.revision_number);
        write_le(data, self.flags);
        write_le_dyn(data, self.public_key_or_token, sizes.is_large_blob())?;
        write_le_dyn(data, self.name, sizes.is_large_str())?;
        write_le_dyn(data, self.culture, sizes.is_large_str())?;
        write_le_dyn(data, self.hash_value, sizes.is_large_blob())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> TableInfo {
        TableInfo::new([(TableId::TypeDef, 2), (TableId::MethodDef, 2)], 0)
    }

    #[test]
    fn typedef_crafted_short() {
        let data = vec![
            0x01, 0x00, 0x10, 0x00, // flags
            0x42, 0x00, // type_name
            0x43, 0x00, // type_namespace
            0x05, 0x00, // extends
            0x01, 0x00, // field_list
            0x02, 0x00, // method_list
        ];

        let sizes = small();
        assert_eq!(TypeDefRaw::row_size(&sizes) as usize, data.len());

        let mut offset = 0;
        let row = TypeDefRaw::row_read(&data, &mut offset, &sizes).unwrap();
        assert_eq!(offset, data.len());
        assert_eq!(row.flags, 0x0010_0001);
        assert_eq!(row.type_name, 0x42);
        assert_eq!(row.type_namespace, 0x43);
        assert_eq!(row.extends, CodedIndex::new(TableId::TypeRef, 1));
        assert_eq!(row.field_list, 1);
        assert_eq!(row.method_list, 2);

        let mut written = Vec::new();
        row.row_write(&mut written, &sizes).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn typedef_crafted_long() {
        let sizes = TableInfo::new([(TableId::MethodDef, 0x1_0000)], 0x07);
        let row = TypeDefRaw {
            flags: 0,
            type_name: 0x0001_0001,
            type_namespace: 0,
            extends: CodedIndex::null(),
            field_list: 1,
            method_list: 0x0001_0000,
        };

        let mut written = Vec::new();
        row.row_write(&mut written, &sizes).unwrap();
        assert_eq!(written.len(), TypeDefRaw::row_size(&sizes) as usize);
        // flags + 2 large strings + small coded index + small field index + large method index
        assert_eq!(written.len(), 4 + 4 + 4 + 2 + 2 + 4);

        let mut offset = 0;
        assert_eq!(TypeDefRaw::row_read(&written, &mut offset, &sizes).unwrap(), row);
    }

    #[test]
    fn methoddef_layout() {
        let row = MethodDefRaw {
            rva: 0x2050,
            impl_flags: 0,
            flags: 0x0086,
            name: 0x10,
            signature: 0x0A,
            param_list: 1,
        };

        let mut written = Vec::new();
        row.row_write(&mut written, &small()).unwrap();
        assert_eq!(
            written,
            vec![0x50, 0x20, 0x00, 0x00, 0x00, 0x00, 0x86, 0x00, 0x10, 0x00, 0x0A, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn memberref_layout() {
        let row = MemberRefRaw {
            class: CodedIndex::new(TableId::TypeRef, 2),
            name: 0x20,
            signature: 0x01,
        };

        let sizes = small();
        let mut written = Vec::new();
        row.row_write(&mut written, &sizes).unwrap();
        assert_eq!(written, vec![0x11, 0x00, 0x20, 0x00, 0x01, 0x00]);

        let mut offset = 0;
        assert_eq!(MemberRefRaw::row_read(&written, &mut offset, &sizes).unwrap(), row);
    }

    #[test]
    fn assembly_layouts() {
        let sizes = small();
        let assembly = AssemblyRaw {
            hash_alg_id: 0x8004,
            major_version: 1,
            minor_version: 0,
            build_number: 0,
            revision_number: 0,
            flags: 0,
            public_key: 0,
            name: 0x0F,
            culture: 0,
        };
        let mut written = Vec::new();
        assembly.row_write(&mut written, &sizes).unwrap();
        assert_eq!(written.len(), AssemblyRaw::row_size(&sizes) as usize);
        assert_eq!(&written[0..6], &[0x04, 0x80, 0x00, 0x00, 0x01, 0x00]);

        let reference = AssemblyRefRaw {
            major_version: 4,
            minor_version: 0,
            build_number: 0,
            revision_number: 0,
            flags: 0,
            public_key_or_token: 0x01,
            name: 0x19,
            culture: 0,
            hash_value: 0,
        };
        let mut written = Vec::new();
        reference.row_write(&mut written, &sizes).unwrap();
        assert_eq!(written.len(), AssemblyRefRaw::row_size(&sizes) as usize);

        let mut offset = 0;
        assert_eq!(
            AssemblyRefRaw::row_read(&written, &mut offset, &sizes).unwrap(),
            reference
        );
    }

    #[test]
    fn column_overflow() {
        let row = StandAloneSigRaw {
            signature: 0x1_0000,
        };
        let mut written = Vec::new();
        assert!(row.row_write(&mut written, &small()).is_err());
    }

    #[test]
    fn truncated_read() {
        let mut offset = 0;
        assert!(ModuleRaw::row_read(&[0x00, 0x00, 0x01], &mut offset, &small()).is_err());
    }
}
