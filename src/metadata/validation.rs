//! Structural rules a loader applies before it accepts an image.
//!
//! These mirror what the runtime's own loader rejects with `BadImageFormatException`: every heap
//! reference must land inside its heap, every row index inside its table, `<Module>` must be
//! the first type and member lists must never go backwards. The checks run on a parsed
//! [`crate::metadata::cilimage::CilImage`] and report the first violation found.

use crate::{
    file::File,
    metadata::{
        method::MethodBody,
        signatures::SignatureParser,
        streams::{Blob, Guid, Strings, TablesHeader},
        tables::{
            attributes::METHOD_IMPL_CODE_TYPE_MASK, AssemblyHashAlgorithm, AssemblyRaw,
            AssemblyRefRaw, CodedIndex, MemberRefRaw, MethodAttributes, MethodDefRaw,
            MethodImplAttributes, ModuleRaw, StandAloneSigRaw, TableId, TypeDefRaw, TypeRefRaw,
        },
    },
    Result,
};

/// Name the first `TypeDef` row must carry
pub const MODULE_TYPE_NAME: &str = "<Module>";

/// The heaps and tables rows are checked against
pub(crate) struct Heaps<'a, 'b> {
    pub tables: &'b TablesHeader<'a>,
    pub strings: &'b Strings<'a>,
    pub guids: &'b Guid<'a>,
    pub blobs: &'b Blob<'a>,
}

impl Heaps<'_, '_> {
    fn string(&self, index: u32, what: &str) -> Result<()> {
        self.strings
            .get(index as usize)
            .map(|_| ())
            .map_err(|_| malformed_error!("{} - #Strings offset 0x{:X} is invalid", what, index))
    }

    fn name(&self, index: u32, what: &str) -> Result<()> {
        match self.strings.get(index as usize) {
            Ok(name) if !name.is_empty() => Ok(()),
            Ok(_) => Err(malformed_error!("{} - name is empty", what)),
            Err(_) => Err(malformed_error!(
                "{} - #Strings offset 0x{:X} is invalid",
                what,
                index
            )),
        }
    }

    fn blob(&self, index: u32, what: &str) -> Result<&[u8]> {
        self.blobs
            .get(index as usize)
            .map_err(|_| malformed_error!("{} - #Blob offset 0x{:X} is invalid", what, index))
    }

    fn guid(&self, index: u32, what: &str) -> Result<()> {
        if index as usize > self.guids.count() {
            return Err(malformed_error!(
                "{} - #GUID index {} is past the {} entries",
                what,
                index,
                self.guids.count()
            ));
        }
        Ok(())
    }

    fn coded(&self, index: &CodedIndex, what: &str) -> Result<()> {
        if index.row > self.tables.row_count(index.tag) {
            return Err(malformed_error!(
                "{} - {} row {} does not exist",
                what,
                index.tag.name(),
                index.row
            ));
        }
        Ok(())
    }
}

/// Apply every loader rule to the image
///
/// # Errors
/// Returns [`crate::Error::Malformed`] describing the first violated rule.
pub(crate) fn validate(file: &File, heaps: &Heaps<'_, '_>) -> Result<()> {
    validate_module(heaps)?;
    validate_assembly(heaps)?;
    validate_type_refs(heaps)?;
    validate_type_defs(heaps)?;
    validate_method_defs(file, heaps)?;
    validate_member_refs(heaps)?;
    validate_standalone_sigs(heaps)
}

fn validate_module(heaps: &Heaps<'_, '_>) -> Result<()> {
    if heaps.tables.row_count(TableId::Module) != 1 {
        return Err(malformed_error!(
            "Module table must have exactly one row, found {}",
            heaps.tables.row_count(TableId::Module)
        ));
    }

    let Some(table) = heaps.tables.table::<ModuleRaw>() else {
        return Err(malformed_error!("Module table is missing"));
    };

    for row in &table {
        heaps.name(row.name, "Module")?;
        heaps.guid(row.mvid, "Module.Mvid")?;
        if row.mvid == 0 {
            return Err(malformed_error!("Module has no MVID"));
        }
    }

    Ok(())
}

fn validate_assembly(heaps: &Heaps<'_, '_>) -> Result<()> {
    if heaps.tables.row_count(TableId::Assembly) > 1 {
        return Err(malformed_error!("Assembly table has more than one row"));
    }

    if let Some(table) = heaps.tables.table::<AssemblyRaw>() {
        for row in &table {
            heaps.name(row.name, "Assembly")?;
            heaps.string(row.culture, "Assembly.Culture")?;
            heaps.blob(row.public_key, "Assembly.PublicKey")?;
            if !matches!(
                row.hash_alg_id,
                AssemblyHashAlgorithm::NONE | AssemblyHashAlgorithm::MD5 | AssemblyHashAlgorithm::SHA1
            ) {
                return Err(malformed_error!(
                    "Assembly hash algorithm 0x{:X} is unknown",
                    row.hash_alg_id
                ));
            }
        }
    }

    if let Some(table) = heaps.tables.table::<AssemblyRefRaw>() {
        for row in &table {
            heaps.name(row.name, "AssemblyRef")?;
            heaps.string(row.culture, "AssemblyRef.Culture")?;
            heaps.blob(row.public_key_or_token, "AssemblyRef.PublicKeyOrToken")?;
            heaps.blob(row.hash_value, "AssemblyRef.HashValue")?;
        }
    }

    Ok(())
}

fn validate_type_refs(heaps: &Heaps<'_, '_>) -> Result<()> {
    let Some(table) = heaps.tables.table::<TypeRefRaw>() else {
        return Ok(());
    };

    for (index, row) in table.iter().enumerate() {
        let what = format!("TypeRef row {}", index + 1);
        heaps.coded(&row.resolution_scope, &what)?;
        heaps.name(row.type_name, &what)?;
        heaps.string(row.type_namespace, &what)?;
    }

    Ok(())
}

fn validate_type_defs(heaps: &Heaps<'_, '_>) -> Result<()> {
    let Some(table) = heaps.tables.table::<TypeDefRaw>() else {
        return Err(malformed_error!("TypeDef table is missing, {} is required", MODULE_TYPE_NAME));
    };

    let field_end = heaps.tables.row_count(TableId::Field) + 1;
    let method_end = heaps.tables.row_count(TableId::MethodDef) + 1;

    let mut previous: Option<TypeDefRaw> = None;
    for (index, row) in table.iter().enumerate() {
        let what = format!("TypeDef row {}", index + 1);

        heaps.name(row.type_name, &what)?;
        heaps.string(row.type_namespace, &what)?;
        heaps.coded(&row.extends, &what)?;

        if index == 0 {
            let name = heaps.strings.get(row.type_name as usize)?;
            if name != MODULE_TYPE_NAME {
                return Err(malformed_error!(
                    "First TypeDef must be {}, found {}",
                    MODULE_TYPE_NAME,
                    name
                ));
            }
            if !row.extends.is_null() {
                return Err(malformed_error!("{} must not have a base type", MODULE_TYPE_NAME));
            }
        }

        if row.field_list == 0 || row.field_list > field_end {
            return Err(malformed_error!(
                "{} - field list {} is outside 1..={}",
                what,
                row.field_list,
                field_end
            ));
        }
        if row.method_list == 0 || row.method_list > method_end {
            return Err(malformed_error!(
                "{} - method list {} is outside 1..={}",
                what,
                row.method_list,
                method_end
            ));
        }

        if let Some(previous) = &previous {
            if row.field_list < previous.field_list || row.method_list < previous.method_list {
                return Err(malformed_error!("{} - member lists go backwards", what));
            }
        }

        previous = Some(row);
    }

    Ok(())
}

fn validate_method_defs(file: &File, heaps: &Heaps<'_, '_>) -> Result<()> {
    let Some(table) = heaps.tables.table::<MethodDefRaw>() else {
        return Ok(());
    };

    for (index, row) in table.iter().enumerate() {
        let what = format!("MethodDef row {}", index + 1);

        heaps.name(row.name, &what)?;
        let signature = heaps.blob(row.signature, &what)?;
        SignatureParser::new(signature)
            .parse_method_signature()
            .map_err(|error| malformed_error!("{} - bad signature: {}", what, error))?;

        if row.rva == 0 {
            let flags = MethodAttributes::from_bits_truncate(row.flags);
            let code_type = row.impl_flags & METHOD_IMPL_CODE_TYPE_MASK;
            if !flags.contains(MethodAttributes::ABSTRACT)
                && code_type != MethodImplAttributes::RUNTIME.bits()
            {
                return Err(malformed_error!("{} - concrete method without a body", what));
            }
            continue;
        }

        let offset = file
            .rva_to_offset(row.rva as usize)
            .map_err(|_| malformed_error!("{} - RVA 0x{:X} is outside every section", what, row.rva))?;
        let Some(body) = file.data().get(offset..) else {
            return Err(malformed_error!("{} - body is outside the file", what));
        };
        MethodBody::from(body)
            .map_err(|error| malformed_error!("{} - bad method body: {}", what, error))?;
    }

    Ok(())
}

fn validate_member_refs(heaps: &Heaps<'_, '_>) -> Result<()> {
    let Some(table) = heaps.tables.table::<MemberRefRaw>() else {
        return Ok(());
    };

    for (index, row) in table.iter().enumerate() {
        let what = format!("MemberRef row {}", index + 1);

        if row.class.is_null() {
            return Err(malformed_error!("{} - parent is null", what));
        }
        heaps.coded(&row.class, &what)?;
        heaps.name(row.name, &what)?;
        heaps.blob(row.signature, &what)?;
    }

    Ok(())
}

fn validate_standalone_sigs(heaps: &Heaps<'_, '_>) -> Result<()> {
    let Some(table) = heaps.tables.table::<StandAloneSigRaw>() else {
        return Ok(());
    };

    for (index, row) in table.iter().enumerate() {
        heaps.blob(row.signature, &format!("StandAloneSig row {}", index + 1))?;
    }

    Ok(())
}
