use crate::{
    assembly::{opcodes, Instruction},
    file::parser::Parser,
    metadata::token::Token,
    Error::NotSupported,
    Result,
};

/// Decode the instruction at the parser's position
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] for a truncated operand and
/// [`crate::Error::NotSupported`] for opcodes outside the supported set.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let first_byte = parser.read_le::<u8>()?;

    let instruction = match first_byte {
        opcodes::NOP => Instruction::Nop,
        opcodes::LDARG_0 => Instruction::Ldarg(0),
        opcodes::LDARG_1 => Instruction::Ldarg(1),
        opcodes::LDARG_2 => Instruction::Ldarg(2),
        opcodes::LDARG_3 => Instruction::Ldarg(3),
        opcodes::LDARG_S => Instruction::Ldarg(u16::from(parser.read_le::<u8>()?)),
        opcodes::LDSTR => Instruction::Ldstr(Token::new(parser.read_le::<u32>()?)),
        opcodes::CALL => Instruction::Call(Token::new(parser.read_le::<u32>()?)),
        opcodes::RET => Instruction::Ret,
        opcodes::PREFIX_FE => {
            let second_byte = parser.read_le::<u8>()?;
            if second_byte != opcodes::LDARG_FE {
                return Err(NotSupported);
            }

            Instruction::Ldarg(parser.read_le::<u16>()?)
        }
        _ => return Err(NotSupported),
    };

    Ok(instruction)
}

/// Decode a complete code block
///
/// # Errors
/// See [`decode_instruction`].
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_body() {
        let code = [
            0x00, 0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A,
        ];

        assert_eq!(
            decode_stream(&code).unwrap(),
            vec![
                Instruction::Nop,
                Instruction::Ldstr(Token::new(0x7000_0001)),
                Instruction::Call(Token::new(0x0A00_0001)),
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn argument_forms() {
        let code = [0x05, 0x0E, 0x04, 0xFE, 0x09, 0x34, 0x12];
        assert_eq!(
            decode_stream(&code).unwrap(),
            vec![
                Instruction::Ldarg(3),
                Instruction::Ldarg(4),
                Instruction::Ldarg(0x1234),
            ]
        );
    }

    #[test]
    fn unsupported_and_truncated() {
        // ldc.i4.1
        assert!(matches!(decode_stream(&[0x17]), Err(NotSupported)));
        // ceq
        assert!(matches!(decode_stream(&[0xFE, 0x01]), Err(NotSupported)));
        assert!(decode_stream(&[0x28, 0x01, 0x00]).is_err());
        assert!(decode_stream(&[0x0E]).is_err());
    }
}
