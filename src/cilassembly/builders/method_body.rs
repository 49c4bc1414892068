//! Method body builder for creating CIL method implementations.
//!
//! [`MethodBodyBuilder`] collects instructions, optional locals and an optional stack size, and
//! appends the encoded body to the method body stream of a [`MetadataBuilder`]. It picks the
//! tiny header whenever ECMA-335 §II.25.4.2 allows it and falls back to the fat header for
//! locals, deep stacks or long code.

use crate::{
    assembly::{Instruction, InstructionEncoder},
    cilassembly::MetadataBuilder,
    metadata::signatures::{encode_local_var_signature, SignatureLocalVariables, TypeSignature},
    Error, Result,
};

/// Builder for one method body.
///
/// # Examples
///
/// ```rust
/// use dotforge::assembly::Instruction;
/// use dotforge::cilassembly::{MetadataBuilder, MethodBodyBuilder};
///
/// let mut metadata = MetadataBuilder::new();
/// let offset = MethodBodyBuilder::new()
///     .arguments(1)
///     .instruction(Instruction::Nop)
///     .instruction(Instruction::Ret)
///     .build(&mut metadata)?;
///
/// assert_eq!(offset, 0);
/// assert_eq!(metadata.method_bodies().as_bytes(), &[0x0A, 0x00, 0x2A]);
/// # Ok::<(), dotforge::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MethodBodyBuilder {
    max_stack: Option<u16>,
    init_locals: bool,
    locals: Vec<TypeSignature>,
    arguments: Option<u16>,
    instructions: Vec<Instruction>,
}

impl MethodBodyBuilder {
    /// An empty body with zero-initialized locals and a derived stack size
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_stack: None,
            init_locals: true,
            locals: Vec::new(),
            arguments: None,
            instructions: Vec::new(),
        }
    }

    /// Set the maximum stack depth instead of deriving it
    ///
    /// The value may not be lower than the depth the instructions reach.
    #[must_use]
    pub fn max_stack(mut self, stack_size: u16) -> Self {
        self.max_stack = Some(stack_size);
        self
    }

    /// Add a local variable; locals force a fat header
    #[must_use]
    pub fn local(mut self, local_type: TypeSignature) -> Self {
        self.locals.push(local_type);
        self
    }

    /// Set whether locals are zero-initialized
    #[must_use]
    pub fn init_locals(mut self, init: bool) -> Self {
        self.init_locals = init;
        self
    }

    /// Number of arguments the method takes, `this` included, to range check `ldarg`
    #[must_use]
    pub fn arguments(mut self, count: u16) -> Self {
        self.arguments = Some(count);
        self
    }

    /// Append one instruction
    #[must_use]
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Append several instructions
    #[must_use]
    pub fn instructions(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.instructions.extend(instructions);
        self
    }

    /// Encode the body into `metadata`'s method body stream and return its offset
    ///
    /// Locals are encoded into a `StandAloneSig` row whose token goes into the fat header.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidInstruction`] if the instructions don't encode or the
    /// explicit stack size is too small, or a heap or table error from adding the locals.
    pub fn build(self, metadata: &mut MetadataBuilder) -> Result<u32> {
        let MethodBodyBuilder {
            max_stack,
            init_locals,
            locals,
            arguments,
            instructions,
        } = self;

        let mut encoder = match arguments {
            Some(count) => InstructionEncoder::with_arguments(count),
            None => InstructionEncoder::new(),
        };
        encoder.emit_all(&instructions, &metadata.resolver())?;
        let (code, derived_stack) = encoder.finish()?;

        let max_stack = match max_stack {
            Some(explicit) if explicit < derived_stack => {
                return Err(Error::InvalidInstruction(format!(
                    "max_stack {} is below the {} slots the body needs",
                    explicit, derived_stack
                )))
            }
            Some(explicit) => explicit,
            None => derived_stack,
        };

        let local_var_sig_token = if locals.is_empty() {
            0
        } else {
            let signature = encode_local_var_signature(&SignatureLocalVariables { locals })?;
            let signature = metadata.get_or_add_blob(&signature)?;
            metadata.add_standalone_signature(signature)?.value()
        };

        metadata.method_bodies_mut().append(
            &code,
            max_stack,
            local_var_sig_token,
            init_locals && local_var_sig_token != 0,
        )
    }
}

impl Default for MethodBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
