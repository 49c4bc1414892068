//! The accumulate-then-freeze entry point for building metadata.
//!
//! [`MetadataBuilder`] owns the four heaps, the [`TableBuilder`] and the
//! [`MethodBodyStream`]. Every `add_*` call interns its strings and blobs and appends one row,
//! handing back a token that later rows and instructions refer to. Once everything is added,
//! [`MetadataBuilder::freeze`] runs the consistency pass and produces an immutable
//! [`FrozenMetadata`], the only input the image writer accepts.

use log::debug;

use crate::{
    assembly::{Instruction, StackEffect, StackEffectResolver},
    cilassembly::{methods::MethodBodyStream, validation::check_consistency},
    metadata::{
        identity::{AssemblyIdentity, Identity},
        signatures::{encode_method_signature, SignatureMethod, SignatureParser},
        streams::{
            BlobHeapBuilder, BlobIndex, GuidHeapBuilder, GuidIndex, StringIndex,
            StringsHeapBuilder, UserStringIndex, UserStringsHeapBuilder,
        },
        tables::{
            AssemblyFlags, AssemblyRaw, AssemblyRefRaw, CodedIndex, CodedIndexType, MemberRefRaw,
            MethodAttributes, MethodDefRaw, MethodImplAttributes, ModuleRaw, StandAloneSigRaw,
            TableBuilder, TableId, TypeAttributes, TypeDefRaw, TypeRefRaw,
        },
        token::Token,
        validation::MODULE_TYPE_NAME,
    },
    Error, Result,
};

/// Resolves the stack effect of `call` operands from the signatures already added.
pub struct SignatureResolver<'a> {
    tables: &'a TableBuilder,
    blobs: &'a BlobHeapBuilder,
}

impl<'a> SignatureResolver<'a> {
    /// Resolve against `tables`, reading signatures out of `blobs`
    #[must_use]
    pub fn new(tables: &'a TableBuilder, blobs: &'a BlobHeapBuilder) -> Self {
        SignatureResolver { tables, blobs }
    }
}

impl StackEffectResolver for SignatureResolver<'_> {
    fn call_effect(&self, target: Token) -> Result<StackEffect> {
        let index = (target.row() as usize).checked_sub(1);
        let signature = match target.table_id() {
            Some(TableId::MethodDef) => index
                .and_then(|index| self.tables.method_defs().get(index))
                .map(|entry| entry.row.signature),
            Some(TableId::MemberRef) => index
                .and_then(|index| self.tables.member_refs().get(index))
                .map(|row| row.signature),
            _ => None,
        };

        let Some(signature) = signature else {
            return Err(Error::InvalidInstruction(format!(
                "call target {} does not exist",
                target
            )));
        };

        let Some(blob) = self.blobs.get(BlobIndex(signature)) else {
            return Err(Error::InvalidInstruction(format!(
                "call target {} has no signature",
                target
            )));
        };

        let method = SignatureParser::new(blob).parse_method_signature()?;
        Ok(StackEffect {
            pops: method.stack_pops(),
            pushes: method.stack_pushes(),
        })
    }
}

/// Accumulates heaps, rows and method bodies for one image.
///
/// ```rust
/// use dotforge::cilassembly::MetadataBuilder;
/// use dotforge::metadata::identity::{AssemblyIdentity, AssemblyVersion};
///
/// let mut metadata = MetadataBuilder::new();
/// let module = metadata.add_module("SampleLib.dll", uguid::guid!("2b7d8cfa-5c5e-4d5c-9d4f-6a1f0e2b3c4d"))?;
/// assert_eq!(module.row(), 1);
///
/// let corlib = metadata.add_assembly_reference(&AssemblyIdentity::mscorlib())?;
/// let object = metadata.add_type_reference(corlib, "System", "Object")?;
/// assert_eq!(object.value(), 0x0100_0001);
/// # Ok::<(), dotforge::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    strings: StringsHeapBuilder,
    userstrings: UserStringsHeapBuilder,
    guids: GuidHeapBuilder,
    blobs: BlobHeapBuilder,
    tables: TableBuilder,
    bodies: MethodBodyStream,
}

impl MetadataBuilder {
    /// Empty heaps, tables and body stream
    #[must_use]
    pub fn new() -> Self {
        MetadataBuilder {
            strings: StringsHeapBuilder::new(),
            userstrings: UserStringsHeapBuilder::new(),
            guids: GuidHeapBuilder::new(),
            blobs: BlobHeapBuilder::new(),
            tables: TableBuilder::new(),
            bodies: MethodBodyStream::new(),
        }
    }

    /// Intern an identifier in `#Strings`
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] if the heap is full.
    pub fn get_or_add_string(&mut self, value: &str) -> Result<StringIndex> {
        self.strings.intern(value)
    }

    /// Intern a literal in `#US`
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] if the heap is full.
    pub fn get_or_add_user_string(&mut self, value: &str) -> Result<UserStringIndex> {
        self.userstrings.intern(value)
    }

    /// Intern a GUID in `#GUID`
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] if the heap is full.
    pub fn get_or_add_guid(&mut self, guid: uguid::Guid) -> Result<GuidIndex> {
        self.guids.intern(guid)
    }

    /// Intern a blob in `#Blob`
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] if the heap is full.
    pub fn get_or_add_blob(&mut self, value: &[u8]) -> Result<BlobIndex> {
        self.blobs.intern(value)
    }

    /// Encode and intern a method signature
    ///
    /// # Errors
    /// Returns an encoding error for an invalid signature, or
    /// [`crate::Error::HeapOverflow`].
    pub fn get_or_add_method_signature(&mut self, signature: &SignatureMethod) -> Result<BlobIndex> {
        let blob = encode_method_signature(signature)?;
        self.blobs.intern(&blob)
    }

    /// Add the `Module` row
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if a module was already added.
    pub fn add_module(&mut self, name: &str, mvid: uguid::Guid) -> Result<Token> {
        let name = self.strings.intern(name)?;
        let mvid = self.guids.intern(mvid)?;

        self.tables.add_module(ModuleRaw {
            generation: 0,
            name: name.value(),
            mvid: mvid.value(),
            encid: 0,
            encbaseid: 0,
        })
    }

    /// Add the `Assembly` row describing the image itself
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if an assembly was already added.
    pub fn add_assembly(&mut self, identity: &AssemblyIdentity, hash_alg_id: u32) -> Result<Token> {
        let name = self.strings.intern(&identity.name)?;
        let culture = self.strings.intern(identity.culture.as_deref().unwrap_or(""))?;

        let (flags, public_key) = match &identity.public_key {
            Some(Identity::PubKey(key)) => (AssemblyFlags::PUBLIC_KEY, self.blobs.intern(key)?),
            Some(Identity::Token(_)) => {
                return Err(Error::Error(
                    "an Assembly row needs the full public key, not a token".to_string(),
                ))
            }
            None => (AssemblyFlags::empty(), BlobIndex(0)),
        };

        self.tables.add_assembly(AssemblyRaw {
            hash_alg_id,
            major_version: identity.version.major,
            minor_version: identity.version.minor,
            build_number: identity.version.build,
            revision_number: identity.version.revision,
            flags: flags.bits(),
            public_key: public_key.value(),
            name: name.value(),
            culture: culture.value(),
        })
    }

    /// Add an `AssemblyRef` row
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] or [`crate::Error::InvalidTableOrder`].
    pub fn add_assembly_reference(&mut self, identity: &AssemblyIdentity) -> Result<Token> {
        let name = self.strings.intern(&identity.name)?;
        let culture = self.strings.intern(identity.culture.as_deref().unwrap_or(""))?;

        let (flags, public_key_or_token) = match &identity.public_key {
            Some(Identity::PubKey(key)) => (AssemblyFlags::PUBLIC_KEY, self.blobs.intern(key)?),
            Some(Identity::Token(token)) => (AssemblyFlags::empty(), self.blobs.intern(token)?),
            None => (AssemblyFlags::empty(), BlobIndex(0)),
        };

        self.tables.add_assembly_ref(AssemblyRefRaw {
            major_version: identity.version.major,
            minor_version: identity.version.minor,
            build_number: identity.version.build,
            revision_number: identity.version.revision,
            flags: flags.bits(),
            public_key_or_token: public_key_or_token.value(),
            name: name.value(),
            culture: culture.value(),
            hash_value: 0,
        })
    }

    /// Add a `TypeRef` row resolved through `scope`
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if `scope` doesn't exist yet, or an error
    /// if it isn't a resolution scope.
    pub fn add_type_reference(&mut self, scope: Token, namespace: &str, name: &str) -> Result<Token> {
        let resolution_scope = CodedIndex::from_token(scope, CodedIndexType::ResolutionScope)?;
        let type_namespace = self.strings.intern(namespace)?;
        let type_name = self.strings.intern(name)?;

        self.tables.add_type_ref(TypeRefRaw {
            resolution_scope,
            type_name: type_name.value(),
            type_namespace: type_namespace.value(),
        })
    }

    /// Add a `TypeDef` row
    ///
    /// The first type must be `<Module>` in the global namespace, and no later type may take
    /// that name. `field_list` and `method_list` are the first `Field` and `MethodDef` rows the
    /// type owns.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] for a misplaced `<Module>`, decreasing
    /// member lists or a base type that doesn't exist yet.
    pub fn add_type_definition(
        &mut self,
        flags: TypeAttributes,
        namespace: &str,
        name: &str,
        extends: Option<Token>,
        field_list: u32,
        method_list: u32,
    ) -> Result<Token> {
        let is_module_type = namespace.is_empty() && name == MODULE_TYPE_NAME;
        let first = self.tables.type_defs().is_empty();
        if first != is_module_type {
            return Err(Error::InvalidTableOrder {
                table: TableId::TypeDef.name(),
                message: if first {
                    format!("the first type must be {}, not {}", MODULE_TYPE_NAME, name)
                } else {
                    format!("{} must be the first type", MODULE_TYPE_NAME)
                },
            });
        }

        let extends = match extends {
            Some(base) => CodedIndex::from_token(base, CodedIndexType::TypeDefOrRef)?,
            None => CodedIndex::null(),
        };
        let type_namespace = self.strings.intern(namespace)?;
        let type_name = self.strings.intern(name)?;

        self.tables.add_type_def(TypeDefRaw {
            flags: flags.bits(),
            type_name: type_name.value(),
            type_namespace: type_namespace.value(),
            extends,
            field_list,
            method_list,
        })
    }

    /// Add a `MethodDef` row whose body sits at `body_offset` in the method body stream
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] or [`crate::Error::InvalidTableOrder`].
    pub fn add_method_definition(
        &mut self,
        flags: MethodAttributes,
        impl_flags: MethodImplAttributes,
        name: &str,
        signature: BlobIndex,
        body_offset: Option<u32>,
    ) -> Result<Token> {
        let name = self.strings.intern(name)?;
        let param_list = self.tables.row_count(TableId::Param) + 1;

        self.tables.add_method_def(
            MethodDefRaw {
                rva: 0,
                impl_flags: impl_flags.bits(),
                flags: flags.bits(),
                name: name.value(),
                signature: signature.value(),
                param_list,
            },
            body_offset,
        )
    }

    /// Add a `MemberRef` row on `parent`
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if `parent` doesn't exist yet, or an
    /// error if it can't own member references.
    pub fn add_member_reference(
        &mut self,
        parent: Token,
        name: &str,
        signature: BlobIndex,
    ) -> Result<Token> {
        let class = CodedIndex::from_token(parent, CodedIndexType::MemberRefParent)?;
        let name = self.strings.intern(name)?;

        self.tables.add_member_ref(MemberRefRaw {
            class,
            name: name.value(),
            signature: signature.value(),
        })
    }

    /// Add a `StandAloneSig` row
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if the table is full.
    pub fn add_standalone_signature(&mut self, signature: BlobIndex) -> Result<Token> {
        self.tables.add_standalone_sig(StandAloneSigRaw {
            signature: signature.value(),
        })
    }

    /// Encode a body without locals into the method body stream, returning its offset
    ///
    /// Call operands must already exist, their signatures decide the stack depth.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidInstruction`] if the instructions don't encode.
    pub fn add_method_body(&mut self, instructions: &[Instruction]) -> Result<u32> {
        let resolver = SignatureResolver::new(&self.tables, &self.blobs);
        self.bodies.encode(instructions, &resolver)
    }

    /// A resolver over the rows and signatures added so far
    #[must_use]
    pub fn resolver(&self) -> SignatureResolver<'_> {
        SignatureResolver::new(&self.tables, &self.blobs)
    }

    /// The first `MethodDef` row a type defined next would own
    #[must_use]
    pub fn next_method_row(&self) -> u32 {
        self.tables.row_count(TableId::MethodDef) + 1
    }

    /// The first `Field` row a type defined next would own
    #[must_use]
    pub fn next_field_row(&self) -> u32 {
        self.tables.row_count(TableId::Field) + 1
    }

    /// The `#Strings` heap
    #[must_use]
    pub fn strings(&self) -> &StringsHeapBuilder {
        &self.strings
    }

    /// The `#US` heap
    #[must_use]
    pub fn userstrings(&self) -> &UserStringsHeapBuilder {
        &self.userstrings
    }

    /// The `#GUID` heap
    #[must_use]
    pub fn guids(&self) -> &GuidHeapBuilder {
        &self.guids
    }

    /// The `#Blob` heap
    #[must_use]
    pub fn blobs(&self) -> &BlobHeapBuilder {
        &self.blobs
    }

    /// The tables
    #[must_use]
    pub fn tables(&self) -> &TableBuilder {
        &self.tables
    }

    /// The method body stream
    #[must_use]
    pub fn method_bodies(&self) -> &MethodBodyStream {
        &self.bodies
    }

    pub(crate) fn method_bodies_mut(&mut self) -> &mut MethodBodyStream {
        &mut self.bodies
    }

    /// Close the builder, checking every cross reference
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] naming the first inconsistency: a missing
    /// `Module` row, a misplaced `<Module>` type, a dangling heap reference or row index, or a
    /// body offset outside the stream.
    pub fn freeze(self) -> Result<FrozenMetadata> {
        check_consistency(&self)?;

        debug!(
            "metadata frozen: {} types, {} methods, {} member refs, {} bytes of IL",
            self.tables.row_count(TableId::TypeDef),
            self.tables.row_count(TableId::MethodDef),
            self.tables.row_count(TableId::MemberRef),
            self.bodies.len()
        );

        Ok(FrozenMetadata {
            strings: self.strings,
            userstrings: self.userstrings,
            guids: self.guids,
            blobs: self.blobs,
            tables: self.tables,
            bodies: self.bodies,
        })
    }
}

/// Metadata that passed the consistency pass and can no longer change
#[derive(Debug, Clone)]
pub struct FrozenMetadata {
    strings: StringsHeapBuilder,
    userstrings: UserStringsHeapBuilder,
    guids: GuidHeapBuilder,
    blobs: BlobHeapBuilder,
    tables: TableBuilder,
    bodies: MethodBodyStream,
}

impl FrozenMetadata {
    /// The `#Strings` heap
    #[must_use]
    pub fn strings(&self) -> &StringsHeapBuilder {
        &self.strings
    }

    /// The `#US` heap
    #[must_use]
    pub fn userstrings(&self) -> &UserStringsHeapBuilder {
        &self.userstrings
    }

    /// The `#GUID` heap
    #[must_use]
    pub fn guids(&self) -> &GuidHeapBuilder {
        &self.guids
    }

    /// The `#Blob` heap
    #[must_use]
    pub fn blobs(&self) -> &BlobHeapBuilder {
        &self.blobs
    }

    /// The tables
    #[must_use]
    pub fn tables(&self) -> &TableBuilder {
        &self.tables
    }

    /// The method body stream
    #[must_use]
    pub fn method_bodies(&self) -> &MethodBodyStream {
        &self.bodies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        identity::AssemblyVersion,
        signatures::TypeSignature,
        tables::AssemblyHashAlgorithm,
    };

    const MVID: uguid::Guid = uguid::guid!("0f6e2d1c-3b4a-4958-8776-a5b4c3d2e1f0");

    fn with_references() -> (MetadataBuilder, Token, Token) {
        let mut metadata = MetadataBuilder::new();
        metadata.add_module("SampleLib.dll", MVID).unwrap();
        let corlib = metadata
            .add_assembly_reference(&AssemblyIdentity::mscorlib())
            .unwrap();
        let object = metadata
            .add_type_reference(corlib, "System", "Object")
            .unwrap();
        let console = metadata
            .add_type_reference(corlib, "System", "Console")
            .unwrap();
        (metadata, object, console)
    }

    #[test]
    fn single_row_tables_are_row_one() {
        let mut metadata = MetadataBuilder::new();
        let module = metadata.add_module("SampleLib.dll", MVID).unwrap();
        let assembly = metadata
            .add_assembly(
                &AssemblyIdentity::new("SampleLib", AssemblyVersion::new(1, 0, 0, 0)),
                AssemblyHashAlgorithm::SHA1,
            )
            .unwrap();

        assert_eq!(module, Token::new(0x0000_0001));
        assert_eq!(assembly, Token::new(0x2000_0001));
        assert!(metadata.add_module("Other.dll", MVID).is_err());
    }

    #[test]
    fn shared_signature_blob() {
        let (mut metadata, object, _) = with_references();

        let ctor = SignatureMethod::instance(TypeSignature::Void, vec![]);
        let first = metadata.get_or_add_method_signature(&ctor).unwrap();
        let second = metadata.get_or_add_method_signature(&ctor).unwrap();
        assert_eq!(first, second);

        let member = metadata.add_member_reference(object, ".ctor", first).unwrap();
        assert_eq!(member, Token::new(0x0A00_0001));
        assert_eq!(metadata.blobs().get(first), Some(&[0x20, 0x00, 0x01][..]));
    }

    #[test]
    fn module_type_first() {
        let (mut metadata, object, _) = with_references();

        let err = metadata
            .add_type_definition(TypeAttributes::PUBLIC, "SampleLib", "TestClass", Some(object), 1, 1)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTableOrder { .. }));

        let module_type = metadata
            .add_type_definition(TypeAttributes::empty(), "", MODULE_TYPE_NAME, None, 1, 1)
            .unwrap();
        assert_eq!(module_type.row(), 1);

        assert!(metadata
            .add_type_definition(TypeAttributes::empty(), "", MODULE_TYPE_NAME, None, 1, 1)
            .is_err());
    }

    #[test]
    fn call_effects_from_signatures() {
        let (mut metadata, object, console) = with_references();

        let write_line = SignatureMethod::static_method(TypeSignature::Void, vec![TypeSignature::String]);
        let write_line = metadata.get_or_add_method_signature(&write_line).unwrap();
        let write_line = metadata
            .add_member_reference(console, "WriteLine", write_line)
            .unwrap();

        let ctor = SignatureMethod::instance(TypeSignature::Void, vec![]);
        let ctor = metadata.get_or_add_method_signature(&ctor).unwrap();
        let object_ctor = metadata.add_member_reference(object, ".ctor", ctor).unwrap();

        let resolver = metadata.resolver();
        assert_eq!(
            resolver.call_effect(write_line).unwrap(),
            StackEffect { pops: 1, pushes: 0 }
        );
        assert_eq!(
            resolver.call_effect(object_ctor).unwrap(),
            StackEffect { pops: 1, pushes: 0 }
        );
        assert!(resolver.call_effect(Token::new(0x0A00_0009)).is_err());
        assert!(resolver.call_effect(Token::new(0x0A00_0000)).is_err());
        assert!(resolver.call_effect(Token::new(0x0600_0001)).is_err());
    }

    #[test]
    fn freeze_requires_module() {
        let metadata = MetadataBuilder::new();
        assert!(matches!(
            metadata.freeze(),
            Err(Error::AssemblyFailure { .. })
        ));
    }
}
