use std::fmt;

use crate::metadata::token::Token;

/// Opcode bytes of the supported instructions
#[allow(missing_docs)]
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const LDARG_0: u8 = 0x02;
    pub const LDARG_1: u8 = 0x03;
    pub const LDARG_2: u8 = 0x04;
    pub const LDARG_3: u8 = 0x05;
    pub const LDARG_S: u8 = 0x0E;
    pub const CALL: u8 = 0x28;
    pub const RET: u8 = 0x2A;
    pub const LDSTR: u8 = 0x72;
    /// Prefix of the two byte opcodes
    pub const PREFIX_FE: u8 = 0xFE;
    /// Second byte of `ldarg` after [`PREFIX_FE`]
    pub const LDARG_FE: u8 = 0x09;
}

/// A CIL instruction with its operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `nop`
    Nop,
    /// Load argument `n`; `ldarg.0` is `this` for instance methods
    Ldarg(u16),
    /// Load the `#US` literal named by a `0x70` token
    Ldstr(Token),
    /// Call the `MethodDef` or `MemberRef` named by the token
    Call(Token),
    /// Return from the method
    Ret,
}

impl Instruction {
    /// Mnemonic of the form that will be emitted
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Nop => "nop",
            Instruction::Ldarg(0) => "ldarg.0",
            Instruction::Ldarg(1) => "ldarg.1",
            Instruction::Ldarg(2) => "ldarg.2",
            Instruction::Ldarg(3) => "ldarg.3",
            Instruction::Ldarg(index) if *index <= 0xFF => "ldarg.s",
            Instruction::Ldarg(_) => "ldarg",
            Instruction::Ldstr(_) => "ldstr",
            Instruction::Call(_) => "call",
            Instruction::Ret => "ret",
        }
    }

    /// Encoded size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Instruction::Nop | Instruction::Ret => 1,
            Instruction::Ldarg(0..=3) => 1,
            Instruction::Ldarg(4..=0xFF) => 2,
            Instruction::Ldarg(_) => 4,
            Instruction::Ldstr(_) | Instruction::Call(_) => 5,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Ldarg(index) if *index > 3 => write!(f, "{} {}", self.mnemonic(), index),
            Instruction::Ldstr(token) | Instruction::Call(token) => {
                write!(f, "{} {}", self.mnemonic(), token)
            }
            _ => write!(f, "{}", self.mnemonic()),
        }
    }
}
