//! Integration tests for assembled images.
//!
//! Builds the sample class library, writes it to disk, loads it back and invokes its method,
//! and checks the container invariants a loader refuses to forgive.

use dotforge::{
    file::pe::Characteristics,
    metadata::{root::Root, tables::TableId},
    prelude::*,
};
use std::path::Path;

const MVID: uguid::Guid = uguid::guid!("3d1f5b7a-2c4e-4a6b-9d8f-0e1c2b3a4f5e");

/// Offset of the COFF characteristics word, behind the 128 byte DOS header and the signature
const COFF_CHARACTERISTICS_OFFSET: usize = 0x80 + 4 + 18;

fn pinned() -> LibrarySpec {
    LibrarySpec::default().mvid(MvidPolicy::Fixed(MVID))
}

/// Write, load and invoke: the method runs and writes the literal exactly once.
#[test]
fn test_round_trip_through_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("SampleLib.dll");

    LibraryBuilder::default()
        .build(&pinned())?
        .write_to_file(&path)?;

    let invocation = run_method(
        &ReferenceRuntime::new(),
        &path,
        "SampleLib.TestClass",
        "TestMethod",
    )?;
    assert_eq!(invocation.output, vec![DEFAULT_MESSAGE.to_string()]);
    assert_eq!(invocation.value, None);
    Ok(())
}

/// The file on disk holds exactly the assembled bytes.
#[test]
fn test_written_file_matches_image() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("SampleLib.dll");

    let image = LibraryBuilder::default().build(&pinned())?;
    image.write_to_file(&path)?;
    assert_eq!(std::fs::read(&path)?, image.as_bytes());

    let loaded = CilImage::from_file(&path)?;
    assert_eq!(loaded.tables().row_count(TableId::MethodDef), 2);
    assert_eq!(loaded.guids().get(1)?, MVID);
    Ok(())
}

/// Without IMAGE_FILE_EXECUTABLE_IMAGE the loader refuses the image.
#[test]
fn test_missing_executable_image_is_rejected() -> Result<()> {
    // Configured away
    let config = ImageConfig::default().characteristics(Characteristics::DLL);
    let image = LibraryBuilder::new(config).build(&pinned())?;
    assert!(matches!(
        ReferenceRuntime::new().load_bytes(image.into_bytes()),
        Err(Error::LoadRejected(_))
    ));

    // Patched away in an otherwise valid file
    let mut data = LibraryBuilder::default().build(&pinned())?.into_bytes();
    let characteristics = u16::from_le_bytes([
        data[COFF_CHARACTERISTICS_OFFSET],
        data[COFF_CHARACTERISTICS_OFFSET + 1],
    ]);
    assert_eq!(characteristics, 0x2002);
    let cleared = characteristics & !Characteristics::EXECUTABLE_IMAGE.bits();
    data[COFF_CHARACTERISTICS_OFFSET..COFF_CHARACTERISTICS_OFFSET + 2]
        .copy_from_slice(&cleared.to_le_bytes());

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Broken.dll");
    std::fs::write(&path, &data)?;
    match run_method(
        &ReferenceRuntime::new(),
        &path,
        "SampleLib.TestClass",
        "TestMethod",
    ) {
        Err(Error::LoadRejected(message)) => assert!(!message.is_empty()),
        other => panic!("expected a rejected load, got {:?}", other.map(|i| i.output)),
    }
    Ok(())
}

/// Load rejection and a throwing invocation stay distinguishable.
#[test]
fn test_lookup_failures_are_not_load_failures() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("SampleLib.dll");
    LibraryBuilder::default()
        .build(&pinned())?
        .write_to_file(&path)?;

    let runtime = ReferenceRuntime::new();
    assert!(matches!(
        run_method(&runtime, &path, "SampleLib.Missing", "TestMethod"),
        Err(Error::TypeNotFound(_))
    ));
    assert!(matches!(
        run_method(&runtime, &path, "SampleLib.TestClass", "Missing"),
        Err(Error::MethodNotFound(_))
    ));
    assert!(matches!(
        run_method(&runtime, Path::new("/nonexistent/SampleLib.dll"), "A", "B"),
        Err(Error::LoadRejected(_)) | Err(Error::FileError(_))
    ));
    Ok(())
}

/// Assembling the same frozen metadata twice, or the same pinned description in two builders,
/// gives identical bytes.
#[test]
fn test_assembly_is_idempotent() -> Result<()> {
    let builder = LibraryBuilder::default();
    let metadata = builder.metadata(&pinned())?;

    let assembler = ImageAssembler::default();
    let first = assembler.assemble(&metadata)?;
    let second = assembler.assemble(&metadata)?;
    assert_eq!(first, second);

    let third = LibraryBuilder::default().build(&pinned())?;
    assert_eq!(first, third);

    // Only the MVID differs between random builds
    let random = LibraryBuilder::default().build(&LibrarySpec::default())?;
    assert_eq!(random.len(), first.len());
    assert_ne!(random, first);
    Ok(())
}

/// Streams appear in the fixed order, 4 byte aligned, behind the BSJB signature.
#[test]
fn test_metadata_root_layout() -> Result<()> {
    let image = LibraryBuilder::default().build(&pinned())?;
    let loaded = CilImage::from_mem(image.into_bytes())?;
    let root: &Root = loaded.metadata_root();

    let names: Vec<&str> = root
        .stream_headers
        .iter()
        .map(|header| header.name.as_str())
        .collect();
    assert_eq!(names, ["#Strings", "#US", "#GUID", "#Blob", "#~"]);
    for header in &root.stream_headers {
        assert_eq!(header.offset % 4, 0, "{}", header.name);
        assert_eq!(header.size % 4, 0, "{}", header.name);
    }

    let cor20 = loaded.cor20header();
    assert_eq!(cor20.major_runtime_version, 2);
    assert_eq!(cor20.minor_runtime_version, 5);
    assert_eq!(cor20.entry_point_token, 0);
    Ok(())
}

/// Names and the message flow through to the loaded image.
#[test]
fn test_custom_library() -> Result<()> {
    let spec = pinned()
        .assembly_name("Greetings")
        .root_namespace("Greetings.Core")
        .type_name("Greeter")
        .method_name("SayHello")
        .message("Grüße aus Rust");
    let image = LibraryBuilder::default().build(&spec)?;

    let module = ReferenceRuntime::new().load_bytes(image.into_bytes())?;
    let greeter = module.resolve_type("Greetings.Core.Greeter")?;
    let method = greeter.find_method("SayHello")?;
    let invocation = greeter.construct()?.invoke(&method)?;
    assert_eq!(invocation.output, vec!["Grüße aus Rust".to_string()]);
    Ok(())
}
