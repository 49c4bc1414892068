use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Error, Result,
};

/// The coded index kinds used by the supported tables (ECMA-335 §II.24.2.6).
///
/// A coded index packs a table tag into the low bits and the row into the rest, so a single
/// column can refer to one of several tables.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef` or `TypeSpec` - used by `TypeDef.Extends` and signatures
    TypeDefOrRef,
    /// `TypeDef`, `TypeRef`, `ModuleRef`, `MethodDef` or `TypeSpec` - `MemberRef.Class`
    MemberRefParent,
    /// `Module`, `ModuleRef`, `AssemblyRef` or `TypeRef` - `TypeRef.ResolutionScope`
    ResolutionScope,
}

impl CodedIndexType {
    /// The tables in tag order
    #[must_use]
    pub fn tables(&self) -> &'static [TableId] {
        match self {
            CodedIndexType::TypeDefOrRef => {
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec]
            }
            CodedIndexType::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndexType::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
        }
    }

    /// Number of low bits holding the tag
    #[must_use]
    pub fn tag_bits(&self) -> u8 {
        match self {
            CodedIndexType::TypeDefOrRef | CodedIndexType::ResolutionScope => 2,
            CodedIndexType::MemberRefParent => 3,
        }
    }

    /// Name as used in diagnostics
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CodedIndexType::TypeDefOrRef => "TypeDefOrRef",
            CodedIndexType::MemberRefParent => "MemberRefParent",
            CodedIndexType::ResolutionScope => "ResolutionScope",
        }
    }
}

/// A reference to a row in one of the tables a [`CodedIndexType`] allows.
///
/// Row 0 is the null reference; it encodes to 0 regardless of the tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CodedIndex {
    /// The table being referenced
    pub tag: TableId,
    /// 1-based row in `tag`, 0 for null
    pub row: u32,
}

impl CodedIndex {
    /// Refer to `row` of `tag`
    #[must_use]
    pub fn new(tag: TableId, row: u32) -> Self {
        CodedIndex { tag, row }
    }

    /// The null reference, as used by `<Module>`'s `Extends`
    #[must_use]
    pub fn null() -> Self {
        CodedIndex {
            tag: TableId::TypeDef,
            row: 0,
        }
    }

    /// Build a coded index from a token
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if the token's table is not allowed by `kind`.
    pub fn from_token(token: Token, kind: CodedIndexType) -> Result<Self> {
        match token.table_id() {
            Some(tag) if kind.tables().contains(&tag) => Ok(CodedIndex {
                tag,
                row: token.row(),
            }),
            _ => Err(Error::Error(format!(
                "Token {} can not be used as a {} coded index",
                token,
                kind.name()
            ))),
        }
    }

    /// Whether this is the null reference
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row == 0
    }

    /// The token of the referenced row
    #[must_use]
    pub fn token(&self) -> Token {
        Token::from_parts(self.tag, self.row)
    }

    /// Pack into the `(row << tag_bits) | tag` column value
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `tag` is not one of `kind`'s tables, or the row does
    /// not fit beside the tag.
    pub fn encode(&self, kind: CodedIndexType) -> Result<u32> {
        if self.is_null() {
            return Ok(0);
        }

        let Some(tag) = kind.tables().iter().position(|table| *table == self.tag) else {
            return Err(Error::Error(format!(
                "{} is not a valid {} target",
                self.tag.name(),
                kind.name()
            )));
        };

        let bits = kind.tag_bits();
        if self.row > (u32::MAX >> bits) {
            return Err(Error::Error(format!(
                "Row {} does not fit a {} coded index",
                self.row,
                kind.name()
            )));
        }

        Ok((self.row << bits) | tag as u32)
    }

    /// Unpack a column value
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a tag `kind` doesn't define.
    pub fn decode(value: u32, kind: CodedIndexType) -> Result<Self> {
        let bits = kind.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;

        match kind.tables().get(tag) {
            Some(table) => Ok(CodedIndex { tag: *table, row }),
            None => Err(malformed_error!(
                "Invalid {} coded index tag - {}",
                kind.name(),
                tag
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_resolution_scope() {
        let scope = CodedIndex::new(TableId::AssemblyRef, 1);
        assert_eq!(scope.encode(CodedIndexType::ResolutionScope).unwrap(), 0x06);
    }

    #[test]
    fn encode_member_ref_parent() {
        // TypeRef row 2 -> (2 << 3) | 1
        let parent = CodedIndex::new(TableId::TypeRef, 2);
        assert_eq!(parent.encode(CodedIndexType::MemberRefParent).unwrap(), 0x11);
    }

    #[test]
    fn encode_type_def_or_ref() {
        let extends = CodedIndex::new(TableId::TypeRef, 1);
        assert_eq!(extends.encode(CodedIndexType::TypeDefOrRef).unwrap(), 0x05);
        assert_eq!(
            CodedIndex::null()
                .encode(CodedIndexType::TypeDefOrRef)
                .unwrap(),
            0
        );
    }

    #[test]
    fn encode_wrong_table() {
        let bad = CodedIndex::new(TableId::MethodDef, 1);
        assert!(bad.encode(CodedIndexType::ResolutionScope).is_err());
    }

    #[test]
    fn decode() {
        let index = CodedIndex::decode(0x11, CodedIndexType::MemberRefParent).unwrap();
        assert_eq!(index, CodedIndex::new(TableId::TypeRef, 2));

        let index = CodedIndex::decode(0x06, CodedIndexType::ResolutionScope).unwrap();
        assert_eq!(index, CodedIndex::new(TableId::AssemblyRef, 1));

        // Tag 3 is unused for TypeDefOrRef
        assert!(CodedIndex::decode(0x07, CodedIndexType::TypeDefOrRef).is_err());
        // Tags 5..7 are unused for MemberRefParent
        assert!(CodedIndex::decode(0x0D, CodedIndexType::MemberRefParent).is_err());
    }

    #[test]
    fn from_token() {
        let index = CodedIndex::from_token(Token::new(0x0100_0002), CodedIndexType::MemberRefParent)
            .unwrap();
        assert_eq!(index.tag, TableId::TypeRef);
        assert_eq!(index.row, 2);
        assert_eq!(index.token(), Token::new(0x0100_0002));

        assert!(
            CodedIndex::from_token(Token::new(0x2300_0001), CodedIndexType::TypeDefOrRef).is_err()
        );
        assert!(CodedIndex::from_token(Token::user_string(1), CodedIndexType::TypeDefOrRef).is_err());
    }
}
