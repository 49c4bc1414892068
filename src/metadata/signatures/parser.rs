use crate::{
    file::parser::Parser,
    metadata::signatures::{
        SignatureField, SignatureLocalVariables, SignatureMethod, TypeSignature,
        CALLING_CONVENTION, ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Error::NotSupported,
    Result,
};

/// Decodes signature blobs back into their typed form.
///
/// Only the subset [`TypeSignature`] models is accepted; generic, vararg and modifier-laden
/// signatures are [`crate::Error::NotSupported`].
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
}

impl<'a> SignatureParser<'a> {
    /// Create a parser over a signature blob
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
        }
    }

    fn parse_type(&mut self) -> Result<TypeSignature> {
        let current_byte = self.parser.read_le::<u8>()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(TypeSignature::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSignature::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSignature::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSignature::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSignature::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSignature::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSignature::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSignature::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSignature::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSignature::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSignature::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSignature::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSignature::R8),
            ELEMENT_TYPE::STRING => Ok(TypeSignature::String),
            ELEMENT_TYPE::OBJECT => Ok(TypeSignature::Object),
            ELEMENT_TYPE::I => Ok(TypeSignature::I),
            ELEMENT_TYPE::U => Ok(TypeSignature::U),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSignature::ValueType(
                self.parser.read_compressed_token()?,
            )),
            ELEMENT_TYPE::CLASS => Ok(TypeSignature::Class(self.parser.read_compressed_token()?)),
            _ => Err(NotSupported),
        }
    }

    /// Parse a method signature
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a truncated blob and
    /// [`crate::Error::NotSupported`] outside the modeled subset.
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let convention_byte = self.parser.read_le::<u8>()?;
        if convention_byte & CALLING_CONVENTION::KIND_MASK != CALLING_CONVENTION::DEFAULT
            || convention_byte & CALLING_CONVENTION::GENERIC != 0
        {
            return Err(NotSupported);
        }

        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_type()?;

        let mut params = Vec::new();
        for _ in 0..param_count {
            let param = self.parse_type()?;
            if param == TypeSignature::Void {
                return Err(malformed_error!("void parameter in method signature"));
            }
            params.push(param);
        }

        Ok(SignatureMethod {
            has_this: convention_byte & CALLING_CONVENTION::HASTHIS != 0,
            explicit_this: convention_byte & CALLING_CONVENTION::EXPLICITTHIS != 0,
            return_type,
            params,
        })
    }

    /// Parse a field signature
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob is not a field signature.
    pub fn parse_field_signature(&mut self) -> Result<SignatureField> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        Ok(SignatureField {
            base: self.parse_type()?,
        })
    }

    /// Parse a local variable signature
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob is not a local variable signature.
    pub fn parse_local_var_signature(&mut self) -> Result<SignatureLocalVariables> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "SignatureLocalVariables - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;
        let mut locals = Vec::new();
        for _ in 0..count {
            locals.push(self.parse_type()?);
        }

        Ok(SignatureLocalVariables { locals })
    }
}
