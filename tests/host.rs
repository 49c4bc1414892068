//! Integration tests against an installed Mono or .NET toolchain.
//!
//! Each test compiles the reflection harness on first use and skips itself when no toolchain
//! is installed, so the suite stays green on machines without one.

use dotforge::{file::pe::Characteristics, prelude::*, runtime::Toolchain};
use std::{path::PathBuf, sync::OnceLock};

const MVID: uguid::Guid = uguid::guid!("a4c2e0f8-1b3d-4f5a-8c7e-9d0b2a4c6e8f");

/// The shared host runtime, or `None` when the machine has no usable toolchain.
fn host() -> Option<&'static HostRuntime> {
    static HOST: OnceLock<Option<HostRuntime>> = OnceLock::new();
    HOST.get_or_init(|| match HostRuntime::new() {
        Ok(runtime) => Some(runtime),
        Err(Error::RuntimeUnavailable(reason)) => {
            println!("skipping host tests: {}", reason);
            None
        }
        Err(e) => panic!("unexpected error setting up the host: {}", e),
    })
    .as_ref()
}

fn write_library(dir: &tempfile::TempDir, config: ImageConfig) -> Result<PathBuf> {
    let path = dir.path().join("SampleLib.dll");
    LibraryBuilder::new(config)
        .build(&LibrarySpec::default().mvid(MvidPolicy::Fixed(MVID)))?
        .write_to_file(&path)?;
    Ok(path)
}

/// The host loads the image, finds the type and method, and sees the message once.
#[test]
fn test_host_invokes_sample_method() -> Result<()> {
    let Some(host) = host() else {
        return Ok(());
    };

    let dir = tempfile::tempdir()?;
    let path = write_library(&dir, ImageConfig::default())?;

    let invocation = run_method(host, &path, "SampleLib.TestClass", "TestMethod")?;
    assert_eq!(invocation.output, vec![DEFAULT_MESSAGE.to_string()]);
    Ok(())
}

/// The .NET loader agrees with the reference runtime on an image without `EXECUTABLE_IMAGE`.
///
/// Mono's loader doesn't check the flag, so only the `dotnet` toolchain is asked.
#[test]
fn test_host_rejects_missing_executable_image() -> Result<()> {
    let Some(host) = host() else {
        return Ok(());
    };
    if host.toolchain() != Toolchain::DotNet {
        println!("skipping: {} does not check EXECUTABLE_IMAGE", host.toolchain().name());
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let path = write_library(
        &dir,
        ImageConfig::default().characteristics(Characteristics::DLL),
    )?;

    assert!(matches!(host.load(&path), Err(Error::LoadRejected(_))));
    assert!(matches!(
        ReferenceRuntime::new().load(&path),
        Err(Error::LoadRejected(_))
    ));
    Ok(())
}

/// Console lines that look like harness sentinels stay part of the output.
#[test]
fn test_host_sentinel_lookalikes_are_output() -> Result<()> {
    let Some(host) = host() else {
        return Ok(());
    };

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("SampleLib.dll");
    LibraryBuilder::default()
        .build(
            &LibrarySpec::default()
                .message("@@OK early")
                .mvid(MvidPolicy::Fixed(MVID)),
        )?
        .write_to_file(&path)?;

    let invocation = run_method(host, &path, "SampleLib.TestClass", "TestMethod")?;
    assert_eq!(invocation.output, vec!["@@OK early".to_string()]);
    Ok(())
}

/// Lookups that fail are reported as such, not as load failures.
#[test]
fn test_host_lookup_failures() -> Result<()> {
    let Some(host) = host() else {
        return Ok(());
    };

    let dir = tempfile::tempdir()?;
    let path = write_library(&dir, ImageConfig::default())?;
    let module = host.load(&path)?;

    assert!(matches!(
        module.resolve_type("SampleLib.Missing"),
        Err(Error::TypeNotFound(_))
    ));

    let test_class = module.resolve_type("SampleLib.TestClass")?;
    assert!(matches!(
        test_class.find_method("Missing"),
        Err(Error::MethodNotFound(_))
    ));

    let instance = test_class.construct()?;
    assert!(instance.construction_output().is_empty());
    Ok(())
}
