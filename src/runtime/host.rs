//! A runtime backed by an installed Mono or .NET toolchain.
//!
//! [`HostRuntime::new`] compiles a small reflection harness once. Every step then runs the
//! harness in a fresh process with `<mode> <path> [type] [method]`; the harness performs the
//! reflection calls up to `mode` and reports the outcome on stdout with sentinel lines, which
//! [`parse_harness_output`] maps back onto [`crate::Error`]. Sentinels start with a random
//! marker drawn per run, so console output of the invoked code can't be mistaken for one.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use log::{debug, warn};
use tempfile::TempDir;

use crate::{
    runtime::{
        Invocation, LoadedModule, MethodHandle, RuntimeInstance, RuntimeLoader, RuntimeType,
        Value,
    },
    Error, Result,
};

/// C# source of the reflection harness
pub const HARNESS_SOURCE: &str = r#"using System;
using System.IO;
using System.Reflection;
using System.Text;

public static class Harness
{
    static readonly string Marker = Environment.GetEnvironmentVariable("DOTFORGE_HARNESS_MARKER") ?? "@@";

    static string Describe(Exception e)
    {
        while (e is TargetInvocationException && e.InnerException != null)
            e = e.InnerException;
        return (e.GetType().Name + ": " + e.Message).Replace("\r", " ").Replace("\n", " ");
    }

    static int Fail(string sentinel, string message)
    {
        Console.WriteLine(Marker + sentinel + " " + message);
        return 1;
    }

    public static int Main(string[] args)
    {
        Console.OutputEncoding = new UTF8Encoding(false);
        if (args.Length < 2)
            return Fail("INVOKE_FAILED", "usage: <mode> <path> [type] [method]");

        string mode = args[0];
        Assembly assembly;
        try { assembly = Assembly.LoadFile(Path.GetFullPath(args[1])); }
        catch (Exception e) { return Fail("LOAD_REJECTED", Describe(e)); }
        if (mode == "load") { Console.WriteLine(Marker + "OK"); return 0; }

        Type type;
        try { type = assembly.GetType(args[2]); }
        catch (Exception e) { return Fail("LOAD_REJECTED", Describe(e)); }
        if (type == null) return Fail("TYPE_MISSING", args[2]);
        if (mode == "type") { Console.WriteLine(Marker + "OK"); return 0; }

        MethodInfo method = null;
        if (mode == "method" || mode == "invoke")
        {
            try { method = type.GetMethod(args[3]); }
            catch (Exception e) { return Fail("METHOD_MISSING", Describe(e)); }
            if (method == null) return Fail("METHOD_MISSING", args[3]);
            if (mode == "method") { Console.WriteLine(Marker + "OK"); return 0; }
        }

        if (type.IsAbstract || type.IsInterface)
            return Fail("INVOKE_FAILED", "MissingMethodException: Cannot create an abstract class '" + type.FullName + "'");
        if (type.GetConstructor(Type.EmptyTypes) == null)
            return Fail("METHOD_MISSING", "No parameterless constructor defined for type '" + type.FullName + "'");

        object instance;
        Console.WriteLine(Marker + "BEGIN");
        try { instance = Activator.CreateInstance(type); }
        catch (Exception e) { return Fail("INVOKE_FAILED", Describe(e)); }
        if (mode == "construct") { Console.WriteLine(Marker + "OK"); return 0; }

        object result;
        Console.WriteLine(Marker + "BEGIN");
        try { result = method.Invoke(instance, null); }
        catch (Exception e) { return Fail("INVOKE_FAILED", Describe(e)); }
        if (method.ReturnType != typeof(void))
        {
            if (result == null) Console.WriteLine(Marker + "NULL");
            else if (result is string) Console.WriteLine(Marker + "STRING " + ((string)result).Replace("\r", " ").Replace("\n", " "));
            else Console.WriteLine(Marker + "OBJECT " + result.GetType().FullName);
        }
        Console.WriteLine(Marker + "OK");
        return 0;
    }
}
"#;

const HARNESS_NAME: &str = "DotforgeHarness";

/// Environment variable the harness reads its sentinel marker from
pub const MARKER_VARIABLE: &str = "DOTFORGE_HARNESS_MARKER";

/// A sentinel marker no console line is expected to start with
fn fresh_marker() -> Result<String> {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes)
        .map_err(|error| Error::RuntimeUnavailable(format!("no random marker: {}", error)))?;

    let mut marker = String::from("@@");
    for byte in bytes {
        marker.push_str(&format!("{:02x}", byte));
    }
    marker.push(':');
    Ok(marker)
}

fn available(program: &str, arg: &str) -> bool {
    Command::new(program)
        .arg(arg)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() && !stderr.trim().is_empty() {
        format!("stdout: {}\nstderr: {}", stdout.trim(), stderr.trim())
    } else if !stdout.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}

/// An installed toolchain able to compile and run the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolchain {
    /// The `mono` runtime with `mcs` or `csc`
    Mono {
        /// Compiler executable
        compiler: &'static str,
    },
    /// The `dotnet` SDK
    DotNet,
}

impl Toolchain {
    /// The first usable toolchain, preferring `dotnet`
    #[must_use]
    pub fn detect() -> Option<Toolchain> {
        if available("dotnet", "--version") {
            return Some(Toolchain::DotNet);
        }

        if available("mono", "--version") {
            if available("mcs", "--version") {
                return Some(Toolchain::Mono { compiler: "mcs" });
            }
            if available("csc", "/help") {
                return Some(Toolchain::Mono { compiler: "csc" });
            }
        }

        None
    }

    /// Short name for diagnostics
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Toolchain::Mono { compiler } => *compiler,
            Toolchain::DotNet => "dotnet",
        }
    }

    fn compile(&self, dir: &Path) -> Result<PathBuf> {
        let source = dir.join(format!("{}.cs", HARNESS_NAME));
        fs::write(&source, HARNESS_SOURCE)?;

        let (output, entry) = match self {
            Toolchain::Mono { compiler } => {
                let entry = dir.join(format!("{}.exe", HARNESS_NAME));
                let (out_flag, platform_flag) = if *compiler == "csc" {
                    ("/out:", "/platform:anycpu")
                } else {
                    ("-out:", "-platform:anycpu")
                };

                let output = Command::new(compiler)
                    .arg(format!("{}{}", out_flag, entry.display()))
                    .arg(platform_flag)
                    .arg(&source)
                    .output()
                    .map_err(|e| {
                        Error::RuntimeUnavailable(format!("failed to execute {}: {}", compiler, e))
                    })?;
                (output, entry)
            }
            Toolchain::DotNet => {
                let project = format!(
                    r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>net8.0</TargetFramework>
    <AssemblyName>{}</AssemblyName>
    <ImplicitUsings>disable</ImplicitUsings>
    <Nullable>disable</Nullable>
  </PropertyGroup>
</Project>"#,
                    HARNESS_NAME
                );
                fs::write(dir.join(format!("{}.csproj", HARNESS_NAME)), project)?;

                let output = Command::new("dotnet")
                    .arg("build")
                    .arg("--configuration")
                    .arg("Release")
                    .current_dir(dir)
                    .output()
                    .map_err(|e| {
                        Error::RuntimeUnavailable(format!("failed to execute dotnet build: {}", e))
                    })?;
                let entry = dir
                    .join("bin/Release/net8.0")
                    .join(format!("{}.dll", HARNESS_NAME));
                (output, entry)
            }
        };

        if !output.status.success() || !entry.exists() {
            return Err(Error::RuntimeUnavailable(format!(
                "{} could not compile the harness: {}",
                self.name(),
                combined_output(&output)
            )));
        }

        Ok(entry)
    }

    fn command(&self, entry: &Path) -> Command {
        let mut command = match self {
            Toolchain::Mono { .. } => Command::new("mono"),
            Toolchain::DotNet => Command::new("dotnet"),
        };
        command.arg(entry);
        command
    }
}

/// Map the stdout of one harness run using `marker` onto its outcome
///
/// Lines after the last `BEGIN` sentinel up to `OK` are console output of the final step. A failure
/// sentinel becomes the matching error; a run without any sentinel is reported as
/// [`Error::InvocationFailed`] carrying `stderr`.
///
/// # Errors
/// Returns the error the harness reported.
pub fn parse_harness_output(marker: &str, stdout: &str, stderr: &str) -> Result<Invocation> {
    let mut invocation = Invocation::default();

    for line in stdout.lines() {
        let line = line.trim_end_matches('\r');
        let Some(sentinel) = line.strip_prefix(marker) else {
            invocation.output.push(line.to_string());
            continue;
        };

        let (kind, message) = match sentinel.split_once(' ') {
            Some((kind, message)) => (kind, message.to_string()),
            None => (sentinel, String::new()),
        };
        match kind {
            "BEGIN" => invocation = Invocation::default(),
            "OK" => return Ok(invocation),
            "NULL" => invocation.value = Some(Value::Null),
            "STRING" => invocation.value = Some(Value::String(message)),
            "OBJECT" => invocation.value = Some(Value::Object(message)),
            "LOAD_REJECTED" => return Err(Error::LoadRejected(message)),
            "TYPE_MISSING" => return Err(Error::TypeNotFound(message)),
            "METHOD_MISSING" => return Err(Error::MethodNotFound(message)),
            "INVOKE_FAILED" => return Err(Error::InvocationFailed(message)),
            _ => invocation.output.push(line.to_string()),
        }
    }

    let stderr = stderr.trim();
    Err(Error::InvocationFailed(if stderr.is_empty() {
        "the harness exited without a result".to_string()
    } else {
        stderr.to_string()
    }))
}

#[derive(Debug)]
struct Harness {
    toolchain: Toolchain,
    entry: PathBuf,
    // Holds the compiled harness
    _dir: TempDir,
}

impl Harness {
    fn run(&self, mode: &str, path: &Path, names: &[&str]) -> Result<Invocation> {
        let marker = fresh_marker()?;
        let mut command = self.toolchain.command(&self.entry);
        command.arg(mode).arg(path);
        command.args(names);
        command.env(MARKER_VARIABLE, &marker);

        debug!("{} {} {} {:?}", self.toolchain.name(), mode, path.display(), names);
        let output = command.output().map_err(|e| {
            Error::RuntimeUnavailable(format!("failed to run {}: {}", self.toolchain.name(), e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let result = parse_harness_output(&marker, &stdout, &stderr);
        if result.is_ok() && !output.status.success() {
            warn!("harness reported success but exited with {}", output.status);
        }
        result
    }
}

/// Loads and runs images with an installed toolchain
#[derive(Debug, Clone)]
pub struct HostRuntime {
    harness: Arc<Harness>,
}

impl HostRuntime {
    /// Detect a toolchain and compile the harness with it
    ///
    /// # Errors
    /// Returns [`Error::RuntimeUnavailable`] if no toolchain is installed or the harness fails
    /// to compile.
    pub fn new() -> Result<Self> {
        match Toolchain::detect() {
            Some(toolchain) => Self::with_toolchain(toolchain),
            None => Err(Error::RuntimeUnavailable(
                "neither mono with mcs or csc nor dotnet was found".to_string(),
            )),
        }
    }

    /// Compile the harness with `toolchain`
    ///
    /// # Errors
    /// Returns [`Error::RuntimeUnavailable`] if the harness fails to compile.
    pub fn with_toolchain(toolchain: Toolchain) -> Result<Self> {
        let dir = TempDir::new()?;
        let entry = toolchain.compile(dir.path())?;
        debug!("harness compiled with {} to {}", toolchain.name(), entry.display());

        Ok(HostRuntime {
            harness: Arc::new(Harness {
                toolchain,
                entry,
                _dir: dir,
            }),
        })
    }

    /// The toolchain in use
    #[must_use]
    pub fn toolchain(&self) -> Toolchain {
        self.harness.toolchain
    }
}

impl RuntimeLoader for HostRuntime {
    type Module = HostModule;

    fn load(&self, path: &Path) -> Result<HostModule> {
        let path = fs::canonicalize(path)?;
        self.harness.run("load", &path, &[])?;
        Ok(HostModule {
            harness: Arc::clone(&self.harness),
            path,
        })
    }
}

/// An image accepted by the host loader
#[derive(Debug, Clone)]
pub struct HostModule {
    harness: Arc<Harness>,
    path: PathBuf,
}

impl LoadedModule for HostModule {
    type Type = HostType;

    fn resolve_type(&self, name: &str) -> Result<HostType> {
        self.harness.run("type", &self.path, &[name])?;
        Ok(HostType {
            harness: Arc::clone(&self.harness),
            path: self.path.clone(),
            name: name.to_string(),
        })
    }
}

/// A type resolved by the host
#[derive(Debug, Clone)]
pub struct HostType {
    harness: Arc<Harness>,
    path: PathBuf,
    name: String,
}

impl RuntimeType for HostType {
    type Instance = HostInstance;

    fn name(&self) -> &str {
        &self.name
    }

    fn find_method(&self, name: &str) -> Result<MethodHandle> {
        self.harness.run("method", &self.path, &[&self.name, name])?;
        Ok(MethodHandle {
            declaring_type: self.name.clone(),
            name: name.to_string(),
            token: None,
        })
    }

    fn construct(&self) -> Result<HostInstance> {
        let invocation = self.harness.run("construct", &self.path, &[&self.name])?;
        Ok(HostInstance {
            harness: Arc::clone(&self.harness),
            path: self.path.clone(),
            type_name: self.name.clone(),
            construction_output: invocation.output,
        })
    }
}

/// An instance created by the host
///
/// The host holds no process between steps, so each [`RuntimeInstance::invoke`] constructs a
/// fresh instance before calling the method.
#[derive(Debug, Clone)]
pub struct HostInstance {
    harness: Arc<Harness>,
    path: PathBuf,
    type_name: String,
    construction_output: Vec<String>,
}

impl HostInstance {
    /// Lines the constructor wrote
    #[must_use]
    pub fn construction_output(&self) -> &[String] {
        &self.construction_output
    }
}

impl RuntimeInstance for HostInstance {
    fn invoke(&mut self, method: &MethodHandle) -> Result<Invocation> {
        if method.declaring_type != self.type_name {
            return Err(Error::InvocationFailed(format!(
                "TargetException: Object of type '{}' does not match target type '{}'",
                self.type_name, method.declaring_type
            )));
        }
        self.harness
            .run("invoke", &self.path, &[&self.type_name, &method.name])
    }
}
