use crate::{
    metadata::{
        signatures::{
            SignatureField, SignatureLocalVariables, SignatureMethod, TypeSignature,
            CALLING_CONVENTION, ELEMENT_TYPE, SIGNATURE_HEADER,
        },
        tables::{CodedIndex, CodedIndexType},
        token::Token,
    },
    utils::write_compressed_uint,
    Error, Result,
};

fn encode_type_token(token: Token, buffer: &mut Vec<u8>) -> Result<()> {
    let coded = CodedIndex::from_token(token, CodedIndexType::TypeDefOrRef)?
        .encode(CodedIndexType::TypeDefOrRef)?;
    write_compressed_uint(coded, buffer)
}

fn count(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::Error(format!("Too many {} in signature: {}", what, len)))
}

/// Append the encoding of a single type
///
/// # Errors
/// Returns [`crate::Error::Error`] if a class or value type token is not a `TypeDef`, `TypeRef`
/// or `TypeSpec`.
pub fn encode_type_signature(signature: &TypeSignature, buffer: &mut Vec<u8>) -> Result<()> {
    match signature {
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::I => buffer.push(ELEMENT_TYPE::I),
        TypeSignature::U => buffer.push(ELEMENT_TYPE::U),
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            encode_type_token(*token, buffer)?;
        }
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            encode_type_token(*token, buffer)?;
        }
    }

    Ok(())
}

/// Encode a method signature: calling convention, parameter count, return type, parameters
///
/// # Errors
/// Returns [`crate::Error::Error`] if a parameter is `void` or a type token is invalid.
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    let mut calling_convention = CALLING_CONVENTION::DEFAULT;
    if signature.has_this {
        calling_convention |= CALLING_CONVENTION::HASTHIS;
    }
    if signature.explicit_this {
        calling_convention |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    buffer.push(calling_convention);

    write_compressed_uint(count(signature.params.len(), "parameters")?, &mut buffer)?;

    encode_type_signature(&signature.return_type, &mut buffer)?;
    for param in &signature.params {
        if *param == TypeSignature::Void {
            return Err(Error::Error("void is not a valid parameter type".to_string()));
        }
        encode_type_signature(param, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encode a field signature
///
/// # Errors
/// Returns [`crate::Error::Error`] for a `void` field or an invalid type token.
pub fn encode_field_signature(signature: &SignatureField) -> Result<Vec<u8>> {
    if signature.base == TypeSignature::Void {
        return Err(Error::Error("void is not a valid field type".to_string()));
    }

    let mut buffer = vec![SIGNATURE_HEADER::FIELD];
    encode_type_signature(&signature.base, &mut buffer)?;

    Ok(buffer)
}

/// Encode a local variable signature
///
/// # Errors
/// Returns [`crate::Error::Error`] for an empty or `void` local list or an invalid type token.
pub fn encode_local_var_signature(signature: &SignatureLocalVariables) -> Result<Vec<u8>> {
    if signature.locals.is_empty() {
        return Err(Error::Error(
            "a local variable signature needs at least one local".to_string(),
        ));
    }

    let mut buffer = vec![SIGNATURE_HEADER::LOCAL_SIG];
    write_compressed_uint(count(signature.locals.len(), "locals")?, &mut buffer)?;
    for local in &signature.locals {
        if *local == TypeSignature::Void {
            return Err(Error::Error("void is not a valid local type".to_string()));
        }
        encode_type_signature(local, &mut buffer)?;
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::TableId;

    #[test]
    fn write_line_and_ctor() {
        let write_line =
            SignatureMethod::static_method(TypeSignature::Void, vec![TypeSignature::String]);
        assert_eq!(
            encode_method_signature(&write_line).unwrap(),
            vec![0x00, 0x01, 0x01, 0x0E]
        );

        let ctor = SignatureMethod::instance(TypeSignature::Void, vec![]);
        assert_eq!(encode_method_signature(&ctor).unwrap(), vec![0x20, 0x00, 0x01]);
    }

    #[test]
    fn deterministic() {
        let signature = SignatureMethod::instance(
            TypeSignature::I4,
            vec![TypeSignature::String, TypeSignature::Object, TypeSignature::R8],
        );

        let first = encode_method_signature(&signature).unwrap();
        let second = encode_method_signature(&signature.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![0x20, 0x03, 0x08, 0x0E, 0x1C, 0x0D]);
    }

    #[test]
    fn class_tokens() {
        let object = Token::from_parts(TableId::TypeRef, 1);
        let mut buffer = Vec::new();
        encode_type_signature(&TypeSignature::Class(object), &mut buffer).unwrap();
        assert_eq!(buffer, vec![0x12, 0x05]);

        let local = Token::from_parts(TableId::TypeDef, 2);
        let mut buffer = Vec::new();
        encode_type_signature(&TypeSignature::ValueType(local), &mut buffer).unwrap();
        assert_eq!(buffer, vec![0x11, 0x08]);

        let mut buffer = Vec::new();
        let method = Token::from_parts(TableId::MethodDef, 1);
        assert!(encode_type_signature(&TypeSignature::Class(method), &mut buffer).is_err());
    }

    #[test]
    fn field_and_locals() {
        assert_eq!(
            encode_field_signature(&SignatureField {
                base: TypeSignature::String
            })
            .unwrap(),
            vec![0x06, 0x0E]
        );
        assert!(encode_field_signature(&SignatureField {
            base: TypeSignature::Void
        })
        .is_err());

        let locals = SignatureLocalVariables {
            locals: vec![TypeSignature::I4, TypeSignature::String],
        };
        assert_eq!(
            encode_local_var_signature(&locals).unwrap(),
            vec![0x07, 0x02, 0x08, 0x0E]
        );
        assert!(encode_local_var_signature(&SignatureLocalVariables::default()).is_err());
    }

    #[test]
    fn void_parameter() {
        let signature =
            SignatureMethod::static_method(TypeSignature::Void, vec![TypeSignature::Void]);
        assert!(encode_method_signature(&signature).is_err());
    }
}
