use crate::metadata::token::Token;

/// The element types a signature can describe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSignature {
    /// `void`, only valid as a return type
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `int8`
    I1,
    /// `unsigned int8`
    U1,
    /// `int16`
    I2,
    /// `unsigned int16`
    U2,
    /// `int32`
    I4,
    /// `unsigned int32`
    U4,
    /// `int64`
    I8,
    /// `unsigned int64`
    U8,
    /// `float32`
    R4,
    /// `float64`
    R8,
    /// `string`
    String,
    /// `object`
    Object,
    /// `native int`
    I,
    /// `native unsigned int`
    U,
    /// A reference type named by a `TypeDef`, `TypeRef` or `TypeSpec` token
    Class(Token),
    /// A value type named by a `TypeDef`, `TypeRef` or `TypeSpec` token
    ValueType(Token),
}

/// A method signature, as stored for `MethodDef` and method `MemberRef` rows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureMethod {
    /// Instance method, `this` is passed implicitly
    pub has_this: bool,
    /// `this` appears as the first explicit parameter
    pub explicit_this: bool,
    /// Return type
    pub return_type: TypeSignature,
    /// Parameter types in order, `this` excluded
    pub params: Vec<TypeSignature>,
}

impl SignatureMethod {
    /// A static method signature
    #[must_use]
    pub fn static_method(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        SignatureMethod {
            has_this: false,
            explicit_this: false,
            return_type,
            params,
        }
    }

    /// An instance method signature
    #[must_use]
    pub fn instance(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        SignatureMethod {
            has_this: true,
            explicit_this: false,
            return_type,
            params,
        }
    }

    /// Number of stack slots a call pops, `this` included
    #[must_use]
    pub fn stack_pops(&self) -> u32 {
        // Signatures are bounded by the blob heap, far below u32::MAX parameters
        let params = self.params.len() as u32;
        if self.has_this && !self.explicit_this {
            params + 1
        } else {
            params
        }
    }

    /// Number of stack slots a call pushes
    #[must_use]
    pub fn stack_pushes(&self) -> u32 {
        u32::from(self.return_type != TypeSignature::Void)
    }
}

/// A field signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureField {
    /// The field type
    pub base: TypeSignature,
}

/// A local variable signature, as referenced by a fat method header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureLocalVariables {
    /// Local types in slot order
    pub locals: Vec<TypeSignature>,
}
