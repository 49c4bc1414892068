//! Composes a complete class library with one type and one method.
//!
//! [`LibraryBuilder`] emits, in order: the `Module` and `Assembly` rows, a corlib
//! `AssemblyRef`, `TypeRef`s for `System.Object` and `System.Console`, a `MemberRef` for
//! `Console::WriteLine(string)`, the shared `instance void()` signature and the
//! `Object::.ctor` `MemberRef`, both method bodies, the two `MethodDef`s, then `<Module>` and the
//! user type. The produced type looks like this in C#:
//!
//! ```csharp
//! namespace SampleLib {
//!     public class TestClass {
//!         public void TestMethod() => System.Console.WriteLine("Hello world from serialized assembly!");
//!     }
//! }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use dotforge::cilassembly::{LibraryBuilder, LibrarySpec, MvidPolicy};
//!
//! let spec = LibrarySpec::default().mvid(MvidPolicy::ContentHash);
//! let image = LibraryBuilder::default().build(&spec)?;
//! assert_eq!(image, LibraryBuilder::default().build(&spec)?);
//! # Ok::<(), dotforge::Error>(())
//! ```

use log::debug;
use sha1::{Digest, Sha1};

use crate::{
    assembly::Instruction,
    cilassembly::{FrozenMetadata, Image, ImageAssembler, ImageConfig, MetadataBuilder},
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion},
        signatures::{SignatureMethod, TypeSignature},
        tables::{AssemblyHashAlgorithm, MethodAttributes, MethodImplAttributes, TypeAttributes},
        validation::MODULE_TYPE_NAME,
    },
    Error, Result,
};

/// Literal the default library prints
pub const DEFAULT_MESSAGE: &str = "Hello world from serialized assembly!";

/// Name of instance constructors
pub const CONSTRUCTOR_NAME: &str = ".ctor";

/// How the module version identifier is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvidPolicy {
    /// Use this exact value
    Fixed(uguid::Guid),
    /// A fresh random (version 4) GUID for every build
    Random,
    /// A version 4 shaped GUID derived from a SHA-1 of the library description, so equal
    /// descriptions produce byte identical images
    ContentHash,
}

/// Description of the library to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySpec {
    /// Simple assembly name; the module is named `<assembly_name>.dll`
    pub assembly_name: String,
    /// Namespace of the type
    pub root_namespace: String,
    /// Name of the type
    pub type_name: String,
    /// Name of the instance method
    pub method_name: String,
    /// Line the method prints
    pub message: String,
    /// Assembly version
    pub version: AssemblyVersion,
    /// Identity of the core library `System.Object` and `System.Console` resolve through
    pub corlib: AssemblyIdentity,
    /// Module version identifier policy
    pub mvid: MvidPolicy,
}

impl Default for LibrarySpec {
    fn default() -> Self {
        LibrarySpec {
            assembly_name: "SampleLib".to_string(),
            root_namespace: "SampleLib".to_string(),
            type_name: "TestClass".to_string(),
            method_name: "TestMethod".to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            version: AssemblyVersion::new(1, 0, 0, 0),
            corlib: AssemblyIdentity::mscorlib(),
            mvid: MvidPolicy::Random,
        }
    }
}

impl LibrarySpec {
    /// Set the assembly name
    #[must_use]
    pub fn assembly_name(mut self, name: impl Into<String>) -> Self {
        self.assembly_name = name.into();
        self
    }

    /// Set the namespace of the type
    #[must_use]
    pub fn root_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.root_namespace = namespace.into();
        self
    }

    /// Set the type name
    #[must_use]
    pub fn type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = name.into();
        self
    }

    /// Set the method name
    #[must_use]
    pub fn method_name(mut self, name: impl Into<String>) -> Self {
        self.method_name = name.into();
        self
    }

    /// Set the printed line
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the assembly version
    #[must_use]
    pub fn version(mut self, version: AssemblyVersion) -> Self {
        self.version = version;
        self
    }

    /// Reference a different core library
    #[must_use]
    pub fn corlib(mut self, corlib: AssemblyIdentity) -> Self {
        self.corlib = corlib;
        self
    }

    /// Set the MVID policy
    #[must_use]
    pub fn mvid(mut self, mvid: MvidPolicy) -> Self {
        self.mvid = mvid;
        self
    }

    /// Namespace qualified type name, as reflection looks it up
    #[must_use]
    pub fn qualified_type_name(&self) -> String {
        if self.root_namespace.is_empty() {
            self.type_name.clone()
        } else {
            format!("{}.{}", self.root_namespace, self.type_name)
        }
    }

    /// File name of the module
    #[must_use]
    pub fn module_name(&self) -> String {
        format!("{}.dll", self.assembly_name)
    }

    fn check(&self) -> Result<()> {
        for (what, value) in [
            ("assembly name", &self.assembly_name),
            ("type name", &self.type_name),
            ("method name", &self.method_name),
            ("corlib name", &self.corlib.name),
        ] {
            if value.is_empty() {
                return Err(Error::Error(format!("The {} must not be empty", what)));
            }
            if value.contains('\0') {
                return Err(Error::Error(format!("The {} contains a NUL character", what)));
            }
        }
        if self.root_namespace.contains('\0') {
            return Err(Error::Error("The namespace contains a NUL character".to_string()));
        }
        if self.type_name == MODULE_TYPE_NAME {
            return Err(Error::Error(format!("{} is reserved", MODULE_TYPE_NAME)));
        }
        if self.method_name == CONSTRUCTOR_NAME {
            return Err(Error::Error(format!(
                "{} is taken by the constructor",
                CONSTRUCTOR_NAME
            )));
        }
        Ok(())
    }

    /// The MVID this description builds with
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if the system random source fails.
    pub fn resolve_mvid(&self) -> Result<uguid::Guid> {
        let mut bytes = [0u8; 16];
        match self.mvid {
            MvidPolicy::Fixed(mvid) => return Ok(mvid),
            MvidPolicy::Random => getrandom::getrandom(&mut bytes)
                .map_err(|error| Error::Error(format!("No random MVID available: {}", error)))?,
            MvidPolicy::ContentHash => {
                let mut hasher = Sha1::new();
                for field in [
                    self.assembly_name.as_str(),
                    self.root_namespace.as_str(),
                    self.type_name.as_str(),
                    self.method_name.as_str(),
                    self.message.as_str(),
                ] {
                    hasher.update(field.as_bytes());
                    hasher.update([0u8]);
                }
                hasher.update(self.version.to_string().as_bytes());
                hasher.update([0u8]);
                hasher.update(self.corlib.to_string().as_bytes());

                bytes.copy_from_slice(&hasher.finalize()[..16]);
            }
        }

        // Version 4, RFC 4122 variant; byte 7 is the high byte of the little endian time_hi
        bytes[7] = (bytes[7] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Ok(uguid::Guid::from_bytes(bytes))
    }
}

/// Builds the library a [`LibrarySpec`] describes
#[derive(Debug, Clone, Default)]
pub struct LibraryBuilder {
    assembler: ImageAssembler,
}

impl LibraryBuilder {
    /// A builder writing headers from `config`
    #[must_use]
    pub fn new(config: ImageConfig) -> Self {
        LibraryBuilder {
            assembler: ImageAssembler::new(config),
        }
    }

    /// Emit and freeze the metadata of `spec`
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] for an invalid description, or the first heap, table or
    /// consistency error.
    pub fn metadata(&self, spec: &LibrarySpec) -> Result<FrozenMetadata> {
        spec.check()?;
        let mvid = spec.resolve_mvid()?;
        let mut metadata = MetadataBuilder::new();

        metadata.add_module(&spec.module_name(), mvid)?;
        metadata.add_assembly(
            &AssemblyIdentity::new(&spec.assembly_name, spec.version),
            AssemblyHashAlgorithm::SHA1,
        )?;

        let corlib = metadata.add_assembly_reference(&spec.corlib)?;
        let object = metadata.add_type_reference(corlib, "System", "Object")?;
        let console = metadata.add_type_reference(corlib, "System", "Console")?;

        let write_line_signature = metadata.get_or_add_method_signature(
            &SignatureMethod::static_method(TypeSignature::Void, vec![TypeSignature::String]),
        )?;
        let write_line = metadata.add_member_reference(console, "WriteLine", write_line_signature)?;

        // `.ctor` and the method share `instance void()`
        let parameterless = metadata
            .get_or_add_method_signature(&SignatureMethod::instance(TypeSignature::Void, vec![]))?;
        let object_ctor = metadata.add_member_reference(object, CONSTRUCTOR_NAME, parameterless)?;

        let ctor_body = metadata.add_method_body(&[
            Instruction::Ldarg(0),
            Instruction::Call(object_ctor),
            Instruction::Ret,
        ])?;

        let message = metadata.get_or_add_user_string(&spec.message)?;
        let method_body = metadata.add_method_body(&[
            Instruction::Ldstr(message.token()),
            Instruction::Call(write_line),
            Instruction::Ret,
        ])?;

        let field_list = metadata.next_field_row();
        let method_list = metadata.next_method_row();

        metadata.add_method_definition(
            MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG,
            MethodImplAttributes::IL | MethodImplAttributes::MANAGED,
            &spec.method_name,
            parameterless,
            Some(method_body),
        )?;
        metadata.add_method_definition(
            MethodAttributes::PUBLIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
            MethodImplAttributes::IL | MethodImplAttributes::MANAGED,
            CONSTRUCTOR_NAME,
            parameterless,
            Some(ctor_body),
        )?;

        metadata.add_type_definition(
            TypeAttributes::empty(),
            "",
            MODULE_TYPE_NAME,
            None,
            field_list,
            method_list,
        )?;
        metadata.add_type_definition(
            TypeAttributes::CLASS
                | TypeAttributes::PUBLIC
                | TypeAttributes::AUTO_LAYOUT
                | TypeAttributes::BEFORE_FIELD_INIT,
            &spec.root_namespace,
            &spec.type_name,
            Some(object),
            field_list,
            method_list,
        )?;

        debug!(
            "library {} emitted with MVID {}",
            spec.qualified_type_name(),
            mvid
        );
        metadata.freeze()
    }

    /// Emit, freeze and assemble the library `spec` describes
    ///
    /// # Errors
    /// See [`LibraryBuilder::metadata`] and [`ImageAssembler::assemble`].
    pub fn build(&self, spec: &LibrarySpec) -> Result<Image> {
        let metadata = self.metadata(spec)?;
        self.assembler.assemble(&metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        streams::{BlobIndex, StringIndex},
        tables::TableId,
        token::Token,
    };

    const MVID: uguid::Guid = uguid::guid!("0f6e2d1c-3b4a-4958-8776-a5b4c3d2e1f0");

    fn pinned() -> LibrarySpec {
        LibrarySpec::default().mvid(MvidPolicy::Fixed(MVID))
    }

    #[test]
    fn emission_order() {
        let metadata = LibraryBuilder::default().metadata(&pinned()).unwrap();
        let tables = metadata.tables();

        assert_eq!(tables.row_count(TableId::Module), 1);
        assert_eq!(tables.row_count(TableId::Assembly), 1);
        assert_eq!(tables.row_count(TableId::AssemblyRef), 1);
        assert_eq!(tables.row_count(TableId::TypeRef), 2);
        assert_eq!(tables.row_count(TableId::MemberRef), 2);
        assert_eq!(tables.row_count(TableId::MethodDef), 2);
        assert_eq!(tables.row_count(TableId::TypeDef), 2);
        assert_eq!(tables.row_count(TableId::StandAloneSig), 0);

        let methods = tables.method_defs();
        assert_eq!(
            metadata.strings().get(StringIndex(methods[0].row.name)),
            Some("TestMethod")
        );
        assert_eq!(methods[0].row.flags, 0x0086);
        assert_eq!(methods[0].body_offset, Some(8));
        assert_eq!(methods[1].row.flags, 0x1886);
        assert_eq!(methods[1].body_offset, Some(0));
        assert_eq!(methods[0].row.signature, methods[1].row.signature);
        assert_eq!(
            metadata.blobs().get(BlobIndex(methods[1].row.signature)),
            Some(&[0x20, 0x00, 0x01][..])
        );

        let types = tables.type_defs();
        assert_eq!((types[0].field_list, types[0].method_list), (1, 1));
        assert_eq!((types[1].field_list, types[1].method_list), (1, 1));
        assert_eq!(types[1].flags, 0x0010_0001);
        assert_eq!(types[1].extends.token(), Token::new(0x0100_0001));
    }

    #[test]
    fn method_bodies() {
        let metadata = LibraryBuilder::default().metadata(&pinned()).unwrap();
        let bodies = metadata.method_bodies().as_bytes();

        // ldarg.0; call MemberRef 2; ret
        let ctor: &[u8] = &[0x1E, 0x02, 0x28, 0x02, 0x00, 0x00, 0x0A, 0x2A];
        assert_eq!(&bodies[..8], ctor);

        // ldstr 0x70000001; call MemberRef 1; ret
        let method: &[u8] = &[
            0x2E, 0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A,
        ];
        assert_eq!(&bodies[8..], method);
    }

    #[test]
    fn pinned_builds_are_identical() {
        let builder = LibraryBuilder::default();
        assert_eq!(builder.build(&pinned()).unwrap(), builder.build(&pinned()).unwrap());
    }

    #[test]
    fn mvid_policies() {
        assert_eq!(pinned().resolve_mvid().unwrap(), MVID);

        let hashed = LibrarySpec::default().mvid(MvidPolicy::ContentHash);
        let first = hashed.resolve_mvid().unwrap();
        assert_eq!(first, hashed.resolve_mvid().unwrap());
        assert_ne!(first, hashed.clone().message("other").resolve_mvid().unwrap());

        let bytes = first.to_bytes();
        assert_eq!(bytes[7] >> 4, 4);
        assert_eq!(bytes[8] & 0xC0, 0x80);

        let random = LibrarySpec::default();
        assert_ne!(random.resolve_mvid().unwrap(), random.resolve_mvid().unwrap());
    }

    #[test]
    fn rejects_bad_descriptions() {
        let builder = LibraryBuilder::default();
        assert!(builder.build(&pinned().type_name("")).is_err());
        assert!(builder.build(&pinned().type_name(MODULE_TYPE_NAME)).is_err());
        assert!(builder.build(&pinned().method_name(CONSTRUCTOR_NAME)).is_err());
        assert!(builder.build(&pinned().assembly_name("Sample\0Lib")).is_err());
    }

    #[test]
    fn names() {
        let spec = pinned();
        assert_eq!(spec.qualified_type_name(), "SampleLib.TestClass");
        assert_eq!(spec.module_name(), "SampleLib.dll");
        assert_eq!(spec.root_namespace("").qualified_type_name(), "TestClass");
    }
}
