use log::trace;

use crate::{
    assembly::{opcodes, Instruction},
    metadata::{tables::TableId, token::Token},
    Error, Result,
};

/// How a call changes the evaluation stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackEffect {
    /// Slots popped, `this` included
    pub pops: u32,
    /// Slots pushed
    pub pushes: u32,
}

/// Looks up the stack effect of a call target.
///
/// Implemented by whatever owns the signatures the call tokens refer to.
pub trait StackEffectResolver {
    /// The stack effect of calling `target`
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidInstruction`] if `target` doesn't name a known method.
    fn call_effect(&self, target: Token) -> Result<StackEffect>;
}

/// Encodes instructions into CIL bytes while tracking the evaluation stack.
///
/// Tokens are written as 4 byte little-endian operands. The maximum depth reached becomes the
/// body's `max_stack` unless the caller overrides it. Without branches the only valid shape is
/// straight-line code ending in a single `ret`.
#[derive(Debug, Default)]
pub struct InstructionEncoder {
    code: Vec<u8>,
    depth: u32,
    max_depth: u32,
    returned: bool,
    argument_count: Option<u16>,
}

impl InstructionEncoder {
    /// An encoder that accepts any argument index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An encoder for a method taking `count` arguments, `this` included
    #[must_use]
    pub fn with_arguments(count: u16) -> Self {
        InstructionEncoder {
            argument_count: Some(count),
            ..Self::default()
        }
    }

    fn push(&mut self, slots: u32) {
        self.depth += slots;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn pop(&mut self, slots: u32, instruction: &Instruction) -> Result<()> {
        if self.depth < slots {
            return Err(Error::InvalidInstruction(format!(
                "{} needs {} stack slots, {} available",
                instruction, slots, self.depth
            )));
        }

        self.depth -= slots;
        Ok(())
    }

    /// Encode one instruction
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidInstruction`] for code after `ret`, an argument index out
    /// of range, a token of the wrong kind, a stack underflow or an unbalanced `ret`.
    pub fn emit<R: StackEffectResolver + ?Sized>(
        &mut self,
        instruction: &Instruction,
        resolver: &R,
    ) -> Result<()> {
        if self.returned {
            return Err(Error::InvalidInstruction(format!(
                "{} follows ret",
                instruction
            )));
        }

        match *instruction {
            Instruction::Nop => self.code.push(opcodes::NOP),
            Instruction::Ldarg(index) => {
                if let Some(count) = self.argument_count {
                    if index >= count {
                        return Err(Error::InvalidInstruction(format!(
                            "{} is out of range for {} arguments",
                            instruction, count
                        )));
                    }
                }

                match index {
                    0 => self.code.push(opcodes::LDARG_0),
                    1 => self.code.push(opcodes::LDARG_1),
                    2 => self.code.push(opcodes::LDARG_2),
                    3 => self.code.push(opcodes::LDARG_3),
                    4..=0xFF => {
                        self.code.push(opcodes::LDARG_S);
                        self.code.extend_from_slice(&index.to_le_bytes()[..1]);
                    }
                    _ => {
                        self.code.push(opcodes::PREFIX_FE);
                        self.code.push(opcodes::LDARG_FE);
                        self.code.extend_from_slice(&index.to_le_bytes());
                    }
                }
                self.push(1);
            }
            Instruction::Ldstr(token) => {
                if !token.is_user_string() || token.row() == 0 {
                    return Err(Error::InvalidInstruction(format!(
                        "ldstr operand {} is not a user string token",
                        token
                    )));
                }

                self.code.push(opcodes::LDSTR);
                self.code.extend_from_slice(&token.value().to_le_bytes());
                self.push(1);
            }
            Instruction::Call(token) => {
                match token.table_id() {
                    Some(TableId::MethodDef | TableId::MemberRef) => {}
                    _ => {
                        return Err(Error::InvalidInstruction(format!(
                            "call operand {} is not a MethodDef or MemberRef token",
                            token
                        )))
                    }
                }

                let effect = resolver.call_effect(token)?;
                self.pop(effect.pops, instruction)?;
                self.code.push(opcodes::CALL);
                self.code.extend_from_slice(&token.value().to_le_bytes());
                self.push(effect.pushes);
            }
            Instruction::Ret => {
                if self.depth > 1 {
                    return Err(Error::InvalidInstruction(format!(
                        "ret with {} values on the stack",
                        self.depth
                    )));
                }

                self.code.push(opcodes::RET);
                self.depth = 0;
                self.returned = true;
            }
        }

        trace!("encoded {} (depth {})", instruction, self.depth);
        Ok(())
    }

    /// Encode a sequence of instructions
    ///
    /// # Errors
    /// See [`InstructionEncoder::emit`].
    pub fn emit_all<R: StackEffectResolver + ?Sized>(
        &mut self,
        instructions: &[Instruction],
        resolver: &R,
    ) -> Result<()> {
        for instruction in instructions {
            self.emit(instruction, resolver)?;
        }
        Ok(())
    }

    /// Bytes emitted so far
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// The code and the maximum stack depth reached
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidInstruction`] if the code doesn't end in `ret`.
    pub fn finish(self) -> Result<(Vec<u8>, u16)> {
        if !self.returned {
            return Err(Error::InvalidInstruction(
                "method body does not end with ret".to_string(),
            ));
        }

        let max_stack = u16::try_from(self.max_depth).map_err(|_| {
            Error::InvalidInstruction(format!("stack depth {} is too large", self.max_depth))
        })?;

        Ok((self.code, max_stack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl StackEffectResolver for Fixed {
        fn call_effect(&self, target: Token) -> Result<StackEffect> {
            match target.value() {
                // instance void .ctor()
                0x0A00_0002 => Ok(StackEffect { pops: 1, pushes: 0 }),
                // void WriteLine(string)
                0x0A00_0001 => Ok(StackEffect { pops: 1, pushes: 0 }),
                // string Concat(string, string)
                0x0A00_0003 => Ok(StackEffect { pops: 2, pushes: 1 }),
                _ => Err(Error::InvalidInstruction(format!("unknown {}", target))),
            }
        }
    }

    #[test]
    fn ctor_body() {
        let mut encoder = InstructionEncoder::with_arguments(1);
        encoder
            .emit_all(
                &[
                    Instruction::Ldarg(0),
                    Instruction::Call(Token::new(0x0A00_0002)),
                    Instruction::Ret,
                ],
                &Fixed,
            )
            .unwrap();

        let (code, max_stack) = encoder.finish().unwrap();
        assert_eq!(code, vec![0x02, 0x28, 0x02, 0x00, 0x00, 0x0A, 0x2A]);
        assert_eq!(max_stack, 1);
    }

    #[test]
    fn print_body() {
        let mut encoder = InstructionEncoder::new();
        encoder
            .emit_all(
                &[
                    Instruction::Ldstr(Token::user_string(1)),
                    Instruction::Call(Token::new(0x0A00_0001)),
                    Instruction::Ret,
                ],
                &Fixed,
            )
            .unwrap();

        assert_eq!(encoder.code_size(), 11);
        let (code, max_stack) = encoder.finish().unwrap();
        assert_eq!(
            code,
            vec![0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A]
        );
        assert_eq!(max_stack, 1);
    }

    #[test]
    fn deterministic() {
        let program = [
            Instruction::Nop,
            Instruction::Ldstr(Token::user_string(1)),
            Instruction::Ldstr(Token::user_string(0x20)),
            Instruction::Call(Token::new(0x0A00_0003)),
            Instruction::Call(Token::new(0x0A00_0001)),
            Instruction::Ret,
        ];

        let encode = || {
            let mut encoder = InstructionEncoder::new();
            encoder.emit_all(&program, &Fixed).unwrap();
            encoder.finish().unwrap()
        };

        let (first, max_stack) = encode();
        let (second, _) = encode();
        assert_eq!(first, second);
        assert_eq!(max_stack, 2);
    }

    #[test]
    fn argument_forms() {
        let mut encoder = InstructionEncoder::new();
        encoder
            .emit_all(
                &[
                    Instruction::Ldarg(3),
                    Instruction::Ldarg(4),
                    Instruction::Ldarg(0x1234),
                ],
                &Fixed,
            )
            .unwrap();
        assert_eq!(encoder.code_size(), 1 + 2 + 4);
        assert_eq!(encoder.code, vec![0x05, 0x0E, 0x04, 0xFE, 0x09, 0x34, 0x12]);
    }

    #[test]
    fn invalid_sequences() {
        let mut encoder = InstructionEncoder::with_arguments(1);
        assert!(encoder.emit(&Instruction::Ldarg(1), &Fixed).is_err());

        let mut encoder = InstructionEncoder::new();
        assert!(encoder
            .emit(&Instruction::Call(Token::new(0x0A00_0001)), &Fixed)
            .is_err());

        let mut encoder = InstructionEncoder::new();
        assert!(encoder
            .emit(&Instruction::Ldstr(Token::new(0x0A00_0001)), &Fixed)
            .is_err());
        assert!(encoder
            .emit(&Instruction::Call(Token::new(0x0200_0001)), &Fixed)
            .is_err());

        let mut encoder = InstructionEncoder::new();
        encoder.emit(&Instruction::Ldarg(0), &Fixed).unwrap();
        encoder.emit(&Instruction::Ldarg(0), &Fixed).unwrap();
        assert!(encoder.emit(&Instruction::Ret, &Fixed).is_err());

        let mut encoder = InstructionEncoder::new();
        encoder.emit(&Instruction::Ret, &Fixed).unwrap();
        assert!(encoder.emit(&Instruction::Nop, &Fixed).is_err());

        let mut encoder = InstructionEncoder::new();
        encoder.emit(&Instruction::Nop, &Fixed).unwrap();
        assert!(encoder.finish().is_err());
    }
}
