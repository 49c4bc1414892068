//! CIL instruction encoding and decoding.
//!
//! The instruction set is the subset a constructor and a simple method body need: argument
//! loads, string literal loads, calls and returns, plus `nop`. Argument loads pick their
//! shortest form automatically.
//!
//! - [`Instruction`] - one instruction with its operand
//! - [`InstructionEncoder`] - emits bytes and tracks the evaluation stack depth
//! - [`decode_instruction`] / [`decode_stream`] - turn bytes back into instructions
//!
//! ```rust
//! use dotforge::assembly::{decode_stream, Instruction};
//! use dotforge::metadata::token::Token;
//!
//! let code = [0x02, 0x28, 0x03, 0x00, 0x00, 0x0A, 0x2A];
//! let instructions = decode_stream(&code)?;
//!
//! assert_eq!(
//!     instructions,
//!     vec![
//!         Instruction::Ldarg(0),
//!         Instruction::Call(Token::new(0x0A00_0003)),
//!         Instruction::Ret,
//!     ]
//! );
//! # Ok::<(), dotforge::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::{InstructionEncoder, StackEffect, StackEffectResolver};
pub use instruction::{opcodes, Instruction};
