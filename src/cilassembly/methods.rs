//! The method body stream: every encoded body of an image, back to back.
//!
//! Bodies are appended in call order and identified by their offset in the stream. Tiny bodies
//! are byte aligned; fat bodies start on a 4 byte boundary (ECMA-335 §II.25.4.5). The stream is
//! placed in `.text` directly after the CLI header, so a body's RVA is the stream's RVA plus
//! its offset.

use log::trace;

use crate::{
    assembly::{Instruction, InstructionEncoder, StackEffectResolver},
    metadata::method::encode_method_body_header,
    utils::pad_to,
    Error, Result,
};

/// Accumulates encoded method bodies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodBodyStream {
    data: Vec<u8>,
}

impl MethodBodyStream {
    /// An empty stream
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `instructions` as a body without locals, returning its offset
    ///
    /// The header is tiny when the code and the derived stack depth allow it.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidInstruction`] if the instructions don't encode.
    pub fn encode<R: StackEffectResolver + ?Sized>(
        &mut self,
        instructions: &[Instruction],
        resolver: &R,
    ) -> Result<u32> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_all(instructions, resolver)?;
        let (code, max_stack) = encoder.finish()?;

        self.append(&code, max_stack, 0, false)
    }

    /// Append already encoded `code` with a header built from the other arguments
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] for an invalid header combination or a stream that
    /// outgrows 32-bit offsets.
    pub fn append(
        &mut self,
        code: &[u8],
        max_stack: u16,
        local_var_sig_token: u32,
        init_locals: bool,
    ) -> Result<u32> {
        let code_size = u32::try_from(code.len())
            .map_err(|_| Error::Error(format!("Method body of {} bytes is too large", code.len())))?;
        let header = encode_method_body_header(code_size, max_stack, local_var_sig_token, init_locals)?;

        if header.len() > 1 {
            pad_to(&mut self.data, 4);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| Error::Error("Method body stream exceeds 4 GiB".to_string()))?;
        self.data.extend_from_slice(&header);
        self.data.extend_from_slice(code);

        trace!(
            "method body at 0x{:X}: {} byte header, {} bytes of code",
            offset,
            header.len(),
            code.len()
        );
        Ok(offset)
    }

    /// Whether `offset` is the start of a body inside the stream
    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        (offset as usize) < self.data.len()
    }

    /// The encoded stream
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Stream size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no body was appended
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::StackEffect,
        metadata::token::Token,
    };

    struct Effects;

    impl StackEffectResolver for Effects {
        fn call_effect(&self, target: Token) -> Result<StackEffect> {
            match target.value() {
                // Object::.ctor
                0x0A00_0002 => Ok(StackEffect { pops: 1, pushes: 0 }),
                // Console::WriteLine(string)
                0x0A00_0001 => Ok(StackEffect { pops: 1, pushes: 0 }),
                _ => Err(Error::InvalidInstruction(format!("unknown {}", target))),
            }
        }
    }

    #[test]
    fn ctor_and_method() {
        let mut stream = MethodBodyStream::new();

        let ctor = stream
            .encode(
                &[
                    Instruction::Ldarg(0),
                    Instruction::Call(Token::new(0x0A00_0002)),
                    Instruction::Ret,
                ],
                &Effects,
            )
            .unwrap();
        assert_eq!(ctor, 0);
        assert_eq!(
            stream.as_bytes(),
            &[0x1E, 0x02, 0x28, 0x02, 0x00, 0x00, 0x0A, 0x2A]
        );

        let method = stream
            .encode(
                &[
                    Instruction::Ldstr(Token::user_string(1)),
                    Instruction::Call(Token::new(0x0A00_0001)),
                    Instruction::Ret,
                ],
                &Effects,
            )
            .unwrap();
        assert_eq!(method, 8);
        assert_eq!(stream.as_bytes()[8], (11 << 2) | 2);
        assert_eq!(stream.len(), 8 + 12);
        assert!(stream.contains(method));
        assert!(!stream.contains(20));
    }

    #[test]
    fn encoding_is_deterministic() {
        let body = [
            Instruction::Nop,
            Instruction::Ldstr(Token::user_string(1)),
            Instruction::Call(Token::new(0x0A00_0001)),
            Instruction::Ret,
        ];

        let mut first = MethodBodyStream::new();
        let mut second = MethodBodyStream::new();
        first.encode(&body, &Effects).unwrap();
        second.encode(&body, &Effects).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn fat_bodies_are_aligned() {
        let mut stream = MethodBodyStream::new();
        stream.append(&[0x2A], 1, 0, false).unwrap();

        let offset = stream.append(&[0x2A], 16, 0, false).unwrap();
        assert_eq!(offset, 4);
        assert_eq!(stream.len(), 4 + 12 + 1);
        assert_eq!(&stream.as_bytes()[..2], &[0x06, 0x2A]);
        assert_eq!(&stream.as_bytes()[2..4], &[0, 0]);
        // Flags 0x3003, max stack 16, code size 1, no locals
        assert_eq!(
            &stream.as_bytes()[4..16],
            &[0x03, 0x30, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn rejects_bad_code() {
        let mut stream = MethodBodyStream::new();
        assert!(stream.encode(&[Instruction::Ldarg(0)], &Effects).is_err());
        assert!(stream
            .encode(&[Instruction::Call(Token::new(0x0A00_0009)), Instruction::Ret], &Effects)
            .is_err());
        assert!(stream.is_empty());
    }
}
