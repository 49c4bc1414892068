//! Integration tests for metadata accumulation.
//!
//! These cover the guarantees the builder gives before anything is serialized: heap
//! deduplication, 1-based row indices, the placement of `<Module>` and reproducible body
//! encoding.

use dotforge::{
    metadata::{streams::MAX_HEAP_OFFSET, tables::TableId},
    prelude::*,
};

const MVID: uguid::Guid = uguid::guid!("6a0c4e1d-9f2b-4b7a-8c3d-1e5f7a9b0c2d");

/// Interning the same content twice hands back the same offset, and the empty entry is 0.
#[test]
fn test_heaps_deduplicate() -> Result<()> {
    let mut metadata = MetadataBuilder::new();

    let first = metadata.get_or_add_string("TestClass")?;
    let second = metadata.get_or_add_string("TestClass")?;
    assert_eq!(first, second);
    assert_eq!(metadata.get_or_add_string("")?.value(), 0);
    assert_ne!(metadata.get_or_add_string("TestMethod")?, first);

    let blob: &[u8] = &[0x20, 0x00, 0x01];
    let a = metadata.get_or_add_blob(blob)?;
    let b = metadata.get_or_add_blob(&blob.to_vec())?;
    assert_eq!(a, b);
    assert_eq!(metadata.get_or_add_blob(&[])?.value(), 0);

    let literal = metadata.get_or_add_user_string("Hello")?;
    assert_eq!(metadata.get_or_add_user_string("Hello")?, literal);
    assert_eq!(literal.value(), 1);

    let guid = metadata.get_or_add_guid(MVID)?;
    assert_eq!(metadata.get_or_add_guid(MVID)?, guid);
    assert_eq!(guid.value(), 1);
    assert_eq!(metadata.guids().count(), 1);

    // A signature interned through the encoder lands on the same blob
    let signature = metadata
        .get_or_add_method_signature(&SignatureMethod::instance(TypeSignature::Void, vec![]))?;
    assert_eq!(signature, a);

    assert!(metadata.strings().len() < MAX_HEAP_OFFSET);
    Ok(())
}

/// Single-row tables start at row 1 and tokens carry the table in the high byte.
#[test]
fn test_single_rows_are_row_one() -> Result<()> {
    let mut metadata = MetadataBuilder::new();

    let module = metadata.add_module("SampleLib.dll", MVID)?;
    assert_eq!(module.value(), 0x0000_0001);

    let assembly = metadata.add_assembly(
        &AssemblyIdentity::new("SampleLib", AssemblyVersion::new(1, 0, 0, 0)),
        AssemblyHashAlgorithm::SHA1,
    )?;
    assert_eq!(assembly.value(), 0x2000_0001);

    let corlib = metadata.add_assembly_reference(&AssemblyIdentity::mscorlib())?;
    assert_eq!(corlib.value(), 0x2300_0001);

    let object = metadata.add_type_reference(corlib, "System", "Object")?;
    let console = metadata.add_type_reference(corlib, "System", "Console")?;
    assert_eq!(object.value(), 0x0100_0001);
    assert_eq!(console.value(), 0x0100_0002);

    // A second Module or Assembly row is refused
    assert!(matches!(
        metadata.add_module("Other.dll", MVID),
        Err(Error::InvalidTableOrder { .. })
    ));
    assert!(matches!(
        metadata.add_assembly(
            &AssemblyIdentity::new("Other", AssemblyVersion::new(1, 0, 0, 0)),
            AssemblyHashAlgorithm::SHA1,
        ),
        Err(Error::InvalidTableOrder { .. })
    ));

    assert_eq!(metadata.tables().row_count(TableId::Module), 1);
    assert_eq!(metadata.tables().row_count(TableId::TypeRef), 2);
    Ok(())
}

/// `<Module>` has to be the first TypeDef and may not appear later.
#[test]
fn test_module_type_comes_first() -> Result<()> {
    let mut metadata = MetadataBuilder::new();
    metadata.add_module("SampleLib.dll", MVID)?;

    assert!(matches!(
        metadata.add_type_definition(TypeAttributes::PUBLIC, "SampleLib", "TestClass", None, 1, 1),
        Err(Error::InvalidTableOrder { .. })
    ));

    let module_type =
        metadata.add_type_definition(TypeAttributes::empty(), "", "<Module>", None, 1, 1)?;
    assert_eq!(module_type.value(), 0x0200_0001);

    assert!(matches!(
        metadata.add_type_definition(TypeAttributes::empty(), "", "<Module>", None, 1, 1),
        Err(Error::InvalidTableOrder { .. })
    ));

    let test_class =
        metadata.add_type_definition(TypeAttributes::PUBLIC, "SampleLib", "TestClass", None, 1, 1)?;
    assert_eq!(test_class.row(), 2);
    Ok(())
}

/// Member references need an existing parent.
#[test]
fn test_member_reference_parent_must_exist() -> Result<()> {
    let mut metadata = MetadataBuilder::new();
    let signature = metadata
        .get_or_add_method_signature(&SignatureMethod::instance(TypeSignature::Void, vec![]))?;

    let dangling = Token::from_parts(TableId::TypeRef, 1);
    assert!(metadata
        .add_member_reference(dangling, ".ctor", signature)
        .is_err());
    Ok(())
}

/// Two independent builders encode the same instructions to the same bytes.
#[test]
fn test_body_encoding_is_deterministic() -> Result<()> {
    fn encode() -> Result<(u32, u32, Vec<u8>)> {
        let mut metadata = MetadataBuilder::new();
        let corlib = metadata.add_assembly_reference(&AssemblyIdentity::mscorlib())?;
        let object = metadata.add_type_reference(corlib, "System", "Object")?;
        let parameterless = metadata
            .get_or_add_method_signature(&SignatureMethod::instance(TypeSignature::Void, vec![]))?;
        let object_ctor = metadata.add_member_reference(object, ".ctor", parameterless)?;

        let ctor = metadata.add_method_body(&[
            Instruction::Ldarg(0),
            Instruction::Call(object_ctor),
            Instruction::Ret,
        ])?;
        let console = metadata.add_type_reference(corlib, "System", "Console")?;
        let write_line_signature = metadata.get_or_add_method_signature(
            &SignatureMethod::static_method(TypeSignature::Void, vec![TypeSignature::String]),
        )?;
        let write_line = metadata.add_member_reference(console, "WriteLine", write_line_signature)?;
        let message = metadata.get_or_add_user_string(DEFAULT_MESSAGE)?;
        let body = metadata.add_method_body(&[
            Instruction::Ldstr(message.token()),
            Instruction::Call(write_line),
            Instruction::Ret,
        ])?;

        Ok((ctor, body, metadata.method_bodies().as_bytes().to_vec()))
    }

    let (ctor, body, first) = encode()?;
    let (_, _, second) = encode()?;
    assert_eq!(first, second);

    assert_eq!(ctor, 0);
    assert_eq!(body, 8);

    // Tiny headers: code size shifted left by two, format bits 0b10
    let expected: &[u8] = &[
        0x1E, 0x02, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A, //
        0x2E, 0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x02, 0x00, 0x00, 0x0A, 0x2A,
    ];
    assert_eq!(first, expected);
    Ok(())
}

/// Freezing the sample library keeps the emission order of every table.
#[test]
fn test_library_tables() -> Result<()> {
    let spec = LibrarySpec::default().mvid(MvidPolicy::Fixed(MVID));
    let metadata = LibraryBuilder::default().metadata(&spec)?;
    let tables = metadata.tables();

    assert_eq!(tables.row_count(TableId::Module), 1);
    assert_eq!(tables.row_count(TableId::Assembly), 1);
    assert_eq!(tables.row_count(TableId::AssemblyRef), 1);
    assert_eq!(tables.row_count(TableId::TypeRef), 2);
    assert_eq!(tables.row_count(TableId::MemberRef), 2);
    assert_eq!(tables.row_count(TableId::TypeDef), 2);
    assert_eq!(tables.row_count(TableId::MethodDef), 2);

    let type_defs = tables.type_defs();
    assert_eq!(
        metadata.strings().get(dotforge::metadata::streams::StringIndex(type_defs[0].type_name)),
        Some("<Module>")
    );
    assert_eq!(type_defs[0].method_list, 1);
    assert_eq!(type_defs[1].method_list, 1);
    Ok(())
}
