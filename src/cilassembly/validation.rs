//! The consistency pass run when metadata is frozen.
//!
//! Appends already reject rows that reference something not yet added; this pass checks what
//! can only be judged once every row is in: the `Module` row exists, `<Module>` leads the types
//! and owns nothing, `TypeDef` bases and member lists point inside their tables, every heap
//! reference resolves and every body offset lies inside the method body stream.

use crate::{
    cilassembly::MetadataBuilder,
    metadata::{
        streams::{BlobIndex, GuidIndex, StringIndex},
        tables::{CodedIndex, TableId},
        validation::MODULE_TYPE_NAME,
    },
    Result,
};

struct Checker<'a> {
    metadata: &'a MetadataBuilder,
}

impl Checker<'_> {
    fn string(&self, index: u32, what: &str) -> Result<()> {
        match self.metadata.strings().get(StringIndex(index)) {
            Some(_) => Ok(()),
            None => Err(assembly_error!(
                "{} refers to #Strings offset 0x{:X}, which holds no identifier",
                what,
                index
            )),
        }
    }

    fn blob(&self, index: u32, what: &str) -> Result<()> {
        match self.metadata.blobs().get(BlobIndex(index)) {
            Some(_) => Ok(()),
            None => Err(assembly_error!(
                "{} refers to #Blob offset 0x{:X}, which holds no blob",
                what,
                index
            )),
        }
    }

    fn guid(&self, index: GuidIndex, what: &str) -> Result<()> {
        if index.is_null() || index.value() as usize > self.metadata.guids().count() {
            return Err(assembly_error!(
                "{} refers to #GUID index {}, the heap holds {}",
                what,
                index.value(),
                self.metadata.guids().count()
            ));
        }
        Ok(())
    }

    fn row(&self, index: &CodedIndex, what: &str) -> Result<()> {
        if !index.is_null() && !self.metadata.tables().contains(index.token()) {
            return Err(assembly_error!(
                "{} refers to {} row {}, which does not exist",
                what,
                index.tag.name(),
                index.row
            ));
        }
        Ok(())
    }
}

/// Check every cross reference of `metadata`
///
/// # Errors
/// Returns [`crate::Error::AssemblyFailure`] for the first inconsistency found.
pub(crate) fn check_consistency(metadata: &MetadataBuilder) -> Result<()> {
    let checker = Checker { metadata };
    let tables = metadata.tables();

    let Some(module) = tables.module() else {
        return Err(assembly_error!("The Module row is missing"));
    };
    checker.string(module.name, "Module")?;
    checker.guid(GuidIndex(module.mvid), "Module")?;

    if let Some(assembly) = tables.assembly() {
        checker.string(assembly.name, "Assembly")?;
        checker.string(assembly.culture, "Assembly")?;
        checker.blob(assembly.public_key, "Assembly")?;
    }

    for (index, row) in tables.assembly_refs().iter().enumerate() {
        let what = format!("AssemblyRef row {}", index + 1);
        checker.string(row.name, &what)?;
        checker.string(row.culture, &what)?;
        checker.blob(row.public_key_or_token, &what)?;
    }

    for (index, row) in tables.type_refs().iter().enumerate() {
        let what = format!("TypeRef row {}", index + 1);
        checker.row(&row.resolution_scope, &what)?;
        checker.string(row.type_name, &what)?;
        checker.string(row.type_namespace, &what)?;
    }

    check_type_defs(&checker)?;

    for (index, entry) in tables.method_defs().iter().enumerate() {
        let what = format!("MethodDef row {}", index + 1);
        checker.string(entry.row.name, &what)?;
        checker.blob(entry.row.signature, &what)?;

        if let Some(offset) = entry.body_offset {
            if !metadata.method_bodies().contains(offset) {
                return Err(assembly_error!(
                    "{} has its body at 0x{:X}, past the {} byte method body stream",
                    what,
                    offset,
                    metadata.method_bodies().len()
                ));
            }
        }
    }

    for (index, row) in tables.member_refs().iter().enumerate() {
        let what = format!("MemberRef row {}", index + 1);
        checker.row(&row.class, &what)?;
        checker.string(row.name, &what)?;
        checker.blob(row.signature, &what)?;
    }

    for (index, row) in tables.standalone_sigs().iter().enumerate() {
        checker.blob(row.signature, &format!("StandAloneSig row {}", index + 1))?;
    }

    Ok(())
}

fn check_type_defs(checker: &Checker<'_>) -> Result<()> {
    let tables = checker.metadata.tables();
    let type_defs = tables.type_defs();

    let Some(module_type) = type_defs.first() else {
        return Err(assembly_error!(
            "No types are defined, {} is required",
            MODULE_TYPE_NAME
        ));
    };
    if checker.metadata.strings().get(StringIndex(module_type.type_name)) != Some(MODULE_TYPE_NAME)
    {
        return Err(assembly_error!(
            "The first TypeDef row is not {}",
            MODULE_TYPE_NAME
        ));
    }
    if let Some(next) = type_defs.get(1) {
        if module_type.field_list != next.field_list || module_type.method_list != next.method_list
        {
            return Err(assembly_error!(
                "{} owns members: its lists ({}, {}) differ from the next type's ({}, {})",
                MODULE_TYPE_NAME,
                module_type.field_list,
                module_type.method_list,
                next.field_list,
                next.method_list
            ));
        }
    }

    let field_end = tables.row_count(TableId::Field) + 1;
    let method_end = tables.row_count(TableId::MethodDef) + 1;
    for (index, row) in type_defs.iter().enumerate() {
        let what = format!("TypeDef row {}", index + 1);
        checker.string(row.type_name, &what)?;
        checker.string(row.type_namespace, &what)?;
        checker.row(&row.extends, &what)?;

        if row.field_list > field_end || row.method_list > method_end {
            return Err(assembly_error!(
                "{} lists start past the end of their tables ({} > {} or {} > {})",
                what,
                row.field_list,
                field_end,
                row.method_list,
                method_end
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::Instruction,
        cilassembly::MetadataBuilder,
        metadata::{
            identity::AssemblyIdentity,
            signatures::{SignatureMethod, TypeSignature},
            tables::{MethodAttributes, MethodImplAttributes, TypeAttributes},
            validation::MODULE_TYPE_NAME,
        },
        Error,
    };

    const MVID: uguid::Guid = uguid::guid!("0f6e2d1c-3b4a-4958-8776-a5b4c3d2e1f0");

    fn base() -> MetadataBuilder {
        let mut metadata = MetadataBuilder::new();
        metadata.add_module("SampleLib.dll", MVID).unwrap();
        metadata
    }

    #[test]
    fn minimal_freezes() {
        let mut metadata = base();
        metadata
            .add_type_definition(TypeAttributes::empty(), "", MODULE_TYPE_NAME, None, 1, 1)
            .unwrap();
        assert!(metadata.freeze().is_ok());
    }

    #[test]
    fn no_types() {
        assert!(matches!(base().freeze(), Err(Error::AssemblyFailure { .. })));
    }

    #[test]
    fn module_type_owning_methods() {
        let mut metadata = base();
        let corlib = metadata
            .add_assembly_reference(&AssemblyIdentity::mscorlib())
            .unwrap();
        let object = metadata.add_type_reference(corlib, "System", "Object").unwrap();

        let signature = metadata
            .get_or_add_method_signature(&SignatureMethod::static_method(TypeSignature::Void, vec![]))
            .unwrap();
        let body = metadata.add_method_body(&[Instruction::Ret]).unwrap();
        metadata
            .add_method_definition(
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                MethodImplAttributes::IL,
                "Run",
                signature,
                Some(body),
            )
            .unwrap();

        metadata
            .add_type_definition(TypeAttributes::empty(), "", MODULE_TYPE_NAME, None, 1, 1)
            .unwrap();
        // The real type starts at method 2, leaving method 1 with <Module>
        metadata
            .add_type_definition(TypeAttributes::PUBLIC, "SampleLib", "TestClass", Some(object), 1, 2)
            .unwrap();

        let err = metadata.freeze().unwrap_err();
        assert!(matches!(err, Error::AssemblyFailure { .. }));
    }

    #[test]
    fn body_offset_outside_stream() {
        let mut metadata = base();
        let signature = metadata
            .get_or_add_method_signature(&SignatureMethod::static_method(TypeSignature::Void, vec![]))
            .unwrap();
        metadata
            .add_method_definition(
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                MethodImplAttributes::IL,
                "Run",
                signature,
                Some(0x40),
            )
            .unwrap();
        metadata
            .add_type_definition(TypeAttributes::empty(), "", MODULE_TYPE_NAME, None, 1, 1)
            .unwrap();

        assert!(matches!(metadata.freeze(), Err(Error::AssemblyFailure { .. })));
    }
}
