//! An in-process runtime over [`CilImage`].
//!
//! Loading applies the loader's structural rules through [`CilImage`]. Execution is a small
//! stack interpreter for the instructions [`crate::assembly::Instruction`] covers. Calls into
//! the image recurse; calls to external members only succeed for the intrinsics
//! `System.Object::.ctor()` and `System.Console::WriteLine`, whose output is captured rather than
//! printed. Anything else throws the way a host would, as
//! [`crate::Error::InvocationFailed`].

use std::{path::Path, sync::Arc};

use log::debug;

use crate::{
    assembly::{decode_stream, Instruction},
    cilassembly::CONSTRUCTOR_NAME,
    metadata::{
        cilimage::CilImage,
        signatures::{SignatureMethod, SignatureParser, TypeSignature},
        tables::{
            attributes::METHOD_ACCESS_MASK, MemberRefRaw, MethodAttributes, MethodDefRaw, TableId,
            TypeAttributes, TypeDefRaw, TypeRefRaw,
        },
        token::Token,
    },
    runtime::{
        Invocation, LoadedModule, MethodHandle, RuntimeInstance, RuntimeLoader, RuntimeType,
        Value,
    },
    Error, Result,
};

/// Nesting depth at which a call chain is treated as a stack overflow
pub const MAX_CALL_DEPTH: usize = 64;

fn invalid_program(message: impl std::fmt::Display) -> Error {
    Error::InvocationFailed(format!("InvalidProgramException: {}", message))
}

/// Loads images with [`CilImage`] and runs them with an interpreter
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceRuntime;

impl ReferenceRuntime {
    /// A new runtime
    #[must_use]
    pub fn new() -> Self {
        ReferenceRuntime
    }

    /// Load an image held in memory
    ///
    /// # Errors
    /// Returns [`crate::Error::LoadRejected`] for an image the loader would refuse.
    pub fn load_bytes(&self, data: Vec<u8>) -> Result<ReferenceModule> {
        Ok(ReferenceModule {
            image: Arc::new(CilImage::from_mem(data)?),
        })
    }
}

impl RuntimeLoader for ReferenceRuntime {
    type Module = ReferenceModule;

    fn load(&self, path: &Path) -> Result<ReferenceModule> {
        let image = CilImage::from_file(path)?;
        debug!("loaded {}", path.display());
        Ok(ReferenceModule {
            image: Arc::new(image),
        })
    }
}

/// An image loaded by [`ReferenceRuntime`]
#[derive(Clone)]
pub struct ReferenceModule {
    image: Arc<CilImage>,
}

impl ReferenceModule {
    /// The loaded image
    #[must_use]
    pub fn image(&self) -> &CilImage {
        &self.image
    }
}

impl LoadedModule for ReferenceModule {
    type Type = ReferenceType;

    fn resolve_type(&self, name: &str) -> Result<ReferenceType> {
        let tables = self.image.tables();
        let Some(types) = tables.table::<TypeDefRaw>() else {
            return Err(Error::TypeNotFound(name.to_string()));
        };
        let strings = self.image.strings();

        // Row 1 is <Module>, which reflection never hands out
        for row in 2..=types.row_count() {
            let Some(type_def) = types.get(row) else {
                continue;
            };

            let namespace = strings.get(type_def.type_namespace as usize)?;
            let type_name = strings.get(type_def.type_name as usize)?;
            let qualified = if namespace.is_empty() {
                type_name.to_string()
            } else {
                format!("{}.{}", namespace, type_name)
            };
            if qualified != name {
                continue;
            }

            let methods_end = match types.get(row + 1) {
                Some(next) => next.method_list,
                None => tables.row_count(TableId::MethodDef) + 1,
            };
            return Ok(ReferenceType {
                image: Arc::clone(&self.image),
                name: qualified,
                flags: TypeAttributes::from_bits_retain(type_def.flags),
                methods: (type_def.method_list, methods_end),
            });
        }

        Err(Error::TypeNotFound(name.to_string()))
    }
}

/// A type of a [`ReferenceModule`]
#[derive(Clone)]
pub struct ReferenceType {
    image: Arc<CilImage>,
    name: String,
    flags: TypeAttributes,
    methods: (u32, u32),
}

impl ReferenceType {
    /// Public methods of the type named `name`, with their rows and signatures
    fn find_public(&self, name: &str) -> Result<Option<(u32, SignatureMethod)>> {
        let Some(methods) = self.image.tables().table::<MethodDefRaw>() else {
            return Ok(None);
        };

        for row in self.methods.0..self.methods.1 {
            let Some(method) = methods.get(row) else {
                continue;
            };
            if method.flags & METHOD_ACCESS_MASK != MethodAttributes::PUBLIC.bits() {
                continue;
            }
            if self.image.strings().get(method.name as usize)? != name {
                continue;
            }

            let signature = SignatureParser::new(self.image.blobs().get(method.signature as usize)?)
                .parse_method_signature()?;
            return Ok(Some((row, signature)));
        }

        Ok(None)
    }
}

impl RuntimeType for ReferenceType {
    type Instance = ReferenceInstance;

    fn name(&self) -> &str {
        &self.name
    }

    fn find_method(&self, name: &str) -> Result<MethodHandle> {
        if name == CONSTRUCTOR_NAME {
            return Err(Error::MethodNotFound(format!("{}::{}", self.name, name)));
        }

        match self.find_public(name)? {
            Some((row, _)) => Ok(MethodHandle {
                declaring_type: self.name.clone(),
                name: name.to_string(),
                token: Some(Token::from_parts(TableId::MethodDef, row)),
            }),
            None => Err(Error::MethodNotFound(format!("{}::{}", self.name, name))),
        }
    }

    fn construct(&self) -> Result<ReferenceInstance> {
        if self
            .flags
            .intersects(TypeAttributes::ABSTRACT | TypeAttributes::INTERFACE)
        {
            return Err(Error::InvocationFailed(format!(
                "MissingMethodException: Cannot create an abstract class '{}'",
                self.name
            )));
        }

        let constructor = self.find_public(CONSTRUCTOR_NAME)?.filter(|(_, signature)| {
            signature.has_this && signature.params.is_empty()
        });
        let Some((row, _)) = constructor else {
            return Err(Error::MethodNotFound(format!(
                "No parameterless constructor defined for type '{}'",
                self.name
            )));
        };

        let this = Value::Object(self.name.clone());
        let mut evaluator = Evaluator::new(&self.image);
        evaluator.execute(row, vec![this.clone()])?;

        Ok(ReferenceInstance {
            image: Arc::clone(&self.image),
            type_name: self.name.clone(),
            this,
            construction_output: evaluator.output,
        })
    }
}

/// An instance created by [`ReferenceType::construct`]
pub struct ReferenceInstance {
    image: Arc<CilImage>,
    type_name: String,
    this: Value,
    construction_output: Vec<String>,
}

impl ReferenceInstance {
    /// Lines the constructor wrote
    #[must_use]
    pub fn construction_output(&self) -> &[String] {
        &self.construction_output
    }
}

impl RuntimeInstance for ReferenceInstance {
    fn invoke(&mut self, method: &MethodHandle) -> Result<Invocation> {
        if method.declaring_type != self.type_name {
            return Err(Error::InvocationFailed(format!(
                "TargetException: Object of type '{}' does not match target type '{}'",
                self.type_name, method.declaring_type
            )));
        }
        let Some(token) = method.token.filter(|token| token.table_id() == Some(TableId::MethodDef))
        else {
            return Err(Error::InvocationFailed(format!(
                "TargetException: {} has no method definition",
                method.name
            )));
        };

        let mut evaluator = Evaluator::new(&self.image);
        let signature = evaluator.method_signature(token.row())?;
        if !signature.params.is_empty() {
            return Err(Error::InvocationFailed(format!(
                "TargetParameterCountException: {} expects {} parameters",
                method.name,
                signature.params.len()
            )));
        }

        let args = if signature.has_this {
            vec![self.this.clone()]
        } else {
            Vec::new()
        };
        let value = evaluator.execute(token.row(), args)?;

        Ok(Invocation {
            output: evaluator.output,
            value,
        })
    }
}

struct Evaluator<'a> {
    image: &'a CilImage,
    output: Vec<String>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    fn new(image: &'a CilImage) -> Self {
        Evaluator {
            image,
            output: Vec::new(),
            depth: 0,
        }
    }

    fn method_def(&self, row: u32) -> Result<MethodDefRaw> {
        self.image
            .tables()
            .table::<MethodDefRaw>()
            .and_then(|methods| methods.get(row))
            .ok_or_else(|| invalid_program(format!("MethodDef row {} does not exist", row)))
    }

    fn signature(&self, blob: u32) -> Result<SignatureMethod> {
        let data = self.image.blobs().get(blob as usize)?;
        SignatureParser::new(data).parse_method_signature()
    }

    fn method_signature(&self, row: u32) -> Result<SignatureMethod> {
        self.signature(self.method_def(row)?.signature)
    }

    fn execute(&mut self, row: u32, args: Vec<Value>) -> Result<Option<Value>> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::InvocationFailed(
                "StackOverflowException: call depth exceeded".to_string(),
            ));
        }

        let image = self.image;
        let method = self.method_def(row)?;
        let signature = self.signature(method.signature)?;
        if method.rva == 0 {
            return Err(Error::InvocationFailed(format!(
                "MissingMethodException: MethodDef row {} has no body",
                row
            )));
        }

        let (body, code) = image.method_body(method.rva).map_err(invalid_program)?;
        let instructions = decode_stream(code).map_err(invalid_program)?;

        self.depth += 1;
        let result = self.run(&instructions, body.max_stack, &signature, &args);
        self.depth -= 1;
        result
    }

    fn run(
        &mut self,
        instructions: &[Instruction],
        max_stack: usize,
        signature: &SignatureMethod,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let mut stack: Vec<Value> = Vec::new();

        for instruction in instructions {
            match instruction {
                Instruction::Nop => {}
                Instruction::Ldarg(index) => {
                    let Some(value) = args.get(usize::from(*index)) else {
                        return Err(invalid_program(format!("ldarg {} out of range", index)));
                    };
                    stack.push(value.clone());
                }
                Instruction::Ldstr(token) => {
                    if !token.is_user_string() {
                        return Err(invalid_program(format!("ldstr operand {}", token)));
                    }
                    let Some(userstrings) = self.image.userstrings() else {
                        return Err(invalid_program("ldstr without a #US heap"));
                    };
                    let value = userstrings
                        .get(token.row() as usize)
                        .map_err(invalid_program)?;
                    stack.push(Value::String(value));
                }
                Instruction::Call(token) => self.call(*token, &mut stack)?,
                Instruction::Ret => {
                    let value = if signature.return_type == TypeSignature::Void {
                        None
                    } else {
                        Some(stack.pop().ok_or_else(|| invalid_program("ret on an empty stack"))?)
                    };
                    if !stack.is_empty() {
                        return Err(invalid_program(format!(
                            "{} values left on the stack at ret",
                            stack.len()
                        )));
                    }
                    return Ok(value);
                }
            }

            if stack.len() > max_stack {
                return Err(invalid_program(format!(
                    "stack depth {} exceeds max stack {}",
                    stack.len(),
                    max_stack
                )));
            }
        }

        Err(invalid_program("control falls off the end of the method"))
    }

    fn pop_args(stack: &mut Vec<Value>, count: usize) -> Result<Vec<Value>> {
        if stack.len() < count {
            return Err(invalid_program("call pops more values than the stack holds"));
        }
        Ok(stack.split_off(stack.len() - count))
    }

    fn call(&mut self, target: Token, stack: &mut Vec<Value>) -> Result<()> {
        match target.table_id() {
            Some(TableId::MethodDef) => {
                let signature = self.method_signature(target.row())?;
                let args = Self::pop_args(stack, signature.stack_pops() as usize)?;
                if let Some(value) = self.execute(target.row(), args)? {
                    stack.push(value);
                }
                Ok(())
            }
            Some(TableId::MemberRef) => self.call_external(target.row(), stack),
            _ => Err(invalid_program(format!("call operand {}", target))),
        }
    }

    fn call_external(&mut self, row: u32, stack: &mut Vec<Value>) -> Result<()> {
        let image = self.image;
        let Some(member) = image
            .tables()
            .table::<MemberRefRaw>()
            .and_then(|members| members.get(row))
        else {
            return Err(invalid_program(format!("MemberRef row {} does not exist", row)));
        };

        let strings = image.strings();
        let name = strings.get(member.name as usize)?;
        let signature = self.signature(member.signature)?;

        let (namespace, type_name) = match member.class.tag {
            TableId::TypeRef => {
                let Some(type_ref) = image
                    .tables()
                    .table::<TypeRefRaw>()
                    .and_then(|types| types.get(member.class.row))
                else {
                    return Err(invalid_program(format!(
                        "TypeRef row {} does not exist",
                        member.class.row
                    )));
                };
                (
                    strings.get(type_ref.type_namespace as usize)?,
                    strings.get(type_ref.type_name as usize)?,
                )
            }
            other => {
                return Err(Error::InvocationFailed(format!(
                    "MissingMethodException: {} parent {} is not supported",
                    name,
                    other.name()
                )))
            }
        };

        let args = Self::pop_args(stack, signature.stack_pops() as usize)?;
        let void = signature.return_type == TypeSignature::Void;

        match (namespace, type_name, name) {
            ("System", "Object", CONSTRUCTOR_NAME)
                if signature.has_this && signature.params.is_empty() && void =>
            {
                Ok(())
            }
            ("System", "Console", "WriteLine") if !signature.has_this && void => {
                match (signature.params.as_slice(), args.as_slice()) {
                    ([], []) => self.output.push(String::new()),
                    ([TypeSignature::String], [Value::String(line)]) => {
                        self.output.push(line.clone());
                    }
                    ([TypeSignature::String], [Value::Null]) => self.output.push(String::new()),
                    _ => {
                        return Err(Error::InvocationFailed(format!(
                            "MissingMethodException: Method not found: {}.{}::{}({:?})",
                            namespace, type_name, name, signature.params
                        )))
                    }
                }
                Ok(())
            }
            _ => Err(Error::InvocationFailed(format!(
                "MissingMethodException: Method not found: {}.{}::{}",
                namespace, type_name, name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cilassembly::{
            ImageAssembler, LibraryBuilder, LibrarySpec, MetadataBuilder, MvidPolicy,
            DEFAULT_MESSAGE,
        },
        metadata::{
            identity::{AssemblyIdentity, AssemblyVersion},
            tables::{AssemblyHashAlgorithm, MethodImplAttributes},
        },
    };

    const MVID: uguid::Guid = uguid::guid!("0f6e2d1c-3b4a-4958-8776-a5b4c3d2e1f0");

    fn module(spec: &LibrarySpec) -> ReferenceModule {
        let image = LibraryBuilder::default().build(spec).unwrap();
        ReferenceRuntime::new().load_bytes(image.into_bytes()).unwrap()
    }

    fn sample() -> LibrarySpec {
        LibrarySpec::default().mvid(MvidPolicy::Fixed(MVID))
    }

    #[test]
    fn invokes_sample_method() {
        let module = module(&sample());
        let test_class = module.resolve_type("SampleLib.TestClass").unwrap();
        assert_eq!(test_class.name(), "SampleLib.TestClass");

        let method = test_class.find_method("TestMethod").unwrap();
        assert_eq!(method.token, Some(Token::new(0x0600_0001)));

        let mut instance = test_class.construct().unwrap();
        assert!(instance.construction_output().is_empty());

        let invocation = instance.invoke(&method).unwrap();
        assert_eq!(invocation.output, vec![DEFAULT_MESSAGE.to_string()]);
        assert_eq!(invocation.value, None);

        // Every call runs the body again
        assert_eq!(instance.invoke(&method).unwrap().output.len(), 1);
    }

    #[test]
    fn lookups_fail_like_reflection() {
        let module = module(&sample());

        assert!(matches!(
            module.resolve_type("SampleLib.Missing"),
            Err(Error::TypeNotFound(_))
        ));
        assert!(matches!(
            module.resolve_type("<Module>"),
            Err(Error::TypeNotFound(_))
        ));
        assert!(matches!(
            module.resolve_type("TestClass"),
            Err(Error::TypeNotFound(_))
        ));

        let test_class = module.resolve_type("SampleLib.TestClass").unwrap();
        assert!(matches!(
            test_class.find_method("Missing"),
            Err(Error::MethodNotFound(_))
        ));
        assert!(matches!(
            test_class.find_method(CONSTRUCTOR_NAME),
            Err(Error::MethodNotFound(_))
        ));
    }

    #[test]
    fn foreign_method_handle() {
        let module = module(&sample());
        let test_class = module.resolve_type("SampleLib.TestClass").unwrap();
        let mut instance = test_class.construct().unwrap();

        let foreign = MethodHandle {
            declaring_type: "Other.Type".to_string(),
            name: "TestMethod".to_string(),
            token: Some(Token::new(0x0600_0001)),
        };
        assert!(matches!(
            instance.invoke(&foreign),
            Err(Error::InvocationFailed(_))
        ));
    }

    #[test]
    fn custom_names_and_message() {
        let spec = sample()
            .root_namespace("Demo")
            .type_name("Greeter")
            .method_name("Greet")
            .message("ahoj");
        let module = module(&spec);

        let greeter = module.resolve_type("Demo.Greeter").unwrap();
        let greet = greeter.find_method("Greet").unwrap();
        let invocation = greeter.construct().unwrap().invoke(&greet).unwrap();
        assert_eq!(invocation.output, vec!["ahoj".to_string()]);
    }

    #[test]
    fn constructor_handle_runs_again() {
        let module = module(&sample());
        let test_class = module.resolve_type("SampleLib.TestClass").unwrap();
        let method = test_class.find_method("TestMethod").unwrap();
        let mut instance = test_class.construct().unwrap();

        let ctor = MethodHandle {
            token: Some(Token::new(0x0600_0002)),
            ..method
        };
        assert!(instance.invoke(&ctor).unwrap().output.is_empty());
    }

    fn custom_module(
        body: impl FnOnce(&mut MetadataBuilder, Token) -> Vec<Instruction>,
    ) -> ReferenceModule {
        let mut metadata = MetadataBuilder::new();
        metadata.add_module("Custom.dll", MVID).unwrap();
        metadata
            .add_assembly(
                &AssemblyIdentity::new("Custom", AssemblyVersion::new(1, 0, 0, 0)),
                AssemblyHashAlgorithm::SHA1,
            )
            .unwrap();
        let corlib = metadata
            .add_assembly_reference(&AssemblyIdentity::mscorlib())
            .unwrap();
        let object = metadata
            .add_type_reference(corlib, "System", "Object")
            .unwrap();
        let console = metadata
            .add_type_reference(corlib, "System", "Console")
            .unwrap();

        let parameterless = metadata
            .get_or_add_method_signature(&SignatureMethod::instance(TypeSignature::Void, vec![]))
            .unwrap();
        let object_ctor = metadata
            .add_member_reference(object, CONSTRUCTOR_NAME, parameterless)
            .unwrap();
        let ctor_body = metadata
            .add_method_body(&[
                Instruction::Ldarg(0),
                Instruction::Call(object_ctor),
                Instruction::Ret,
            ])
            .unwrap();

        let instructions = body(&mut metadata, console);
        let run_body = metadata.add_method_body(&instructions).unwrap();

        let method_list = metadata.next_method_row();
        metadata
            .add_method_definition(
                MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG,
                MethodImplAttributes::IL | MethodImplAttributes::MANAGED,
                "Run",
                parameterless,
                Some(run_body),
            )
            .unwrap();
        metadata
            .add_method_definition(
                MethodAttributes::PUBLIC
                    | MethodAttributes::HIDE_BY_SIG
                    | MethodAttributes::SPECIAL_NAME
                    | MethodAttributes::RT_SPECIAL_NAME,
                MethodImplAttributes::IL | MethodImplAttributes::MANAGED,
                CONSTRUCTOR_NAME,
                parameterless,
                Some(ctor_body),
            )
            .unwrap();
        metadata
            .add_type_definition(TypeAttributes::empty(), "", "<Module>", None, 1, method_list)
            .unwrap();
        metadata
            .add_type_definition(
                TypeAttributes::PUBLIC | TypeAttributes::BEFORE_FIELD_INIT,
                "Custom",
                "Runner",
                Some(object),
                1,
                method_list,
            )
            .unwrap();

        let image = ImageAssembler::default()
            .assemble(&metadata.freeze().unwrap())
            .unwrap();
        ReferenceRuntime::new().load_bytes(image.into_bytes()).unwrap()
    }

    fn run(module: &ReferenceModule) -> Result<Invocation> {
        let runner = module.resolve_type("Custom.Runner")?;
        let method = runner.find_method("Run")?;
        runner.construct()?.invoke(&method)
    }

    #[test]
    fn unknown_external_member_throws() {
        let module = custom_module(|metadata, console| {
            let signature = metadata
                .get_or_add_method_signature(&SignatureMethod::static_method(
                    TypeSignature::Void,
                    vec![],
                ))
                .unwrap();
            let beep = metadata
                .add_member_reference(console, "Beep", signature)
                .unwrap();
            vec![Instruction::Call(beep), Instruction::Ret]
        });

        match run(&module) {
            Err(Error::InvocationFailed(message)) => {
                assert!(message.starts_with("MissingMethodException"), "{}", message);
                assert!(message.contains("System.Console::Beep"), "{}", message);
            }
            other => panic!("unexpected {:?}", other.map(|invocation| invocation.output)),
        }
    }

    #[test]
    fn parameterless_write_line_prints_empty_line() {
        let module = custom_module(|metadata, console| {
            let signature = metadata
                .get_or_add_method_signature(&SignatureMethod::static_method(
                    TypeSignature::Void,
                    vec![],
                ))
                .unwrap();
            let write_line = metadata
                .add_member_reference(console, "WriteLine", signature)
                .unwrap();
            vec![
                Instruction::Call(write_line),
                Instruction::Nop,
                Instruction::Call(write_line),
                Instruction::Ret,
            ]
        });

        let invocation = run(&module).unwrap();
        assert_eq!(invocation.output, vec![String::new(), String::new()]);
    }
}
