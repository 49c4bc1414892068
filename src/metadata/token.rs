//! Metadata tokens.
//!
//! A token is the 32-bit handle CIL uses to refer to metadata: the high byte selects a table
//! (or `0x70` for the `#US` heap) and the low 24 bits hold a 1-based row index (or a heap
//! offset). `0x06000002` is MethodDef row 2, `0x70000001` is the user string at offset 1.

use std::fmt;

use crate::metadata::tables::TableId;

/// Table byte of a token referring into the `#US` heap
pub const USER_STRING_TABLE: u8 = 0x70;

/// A metadata token - table in the high byte, row or heap offset in the low 24 bits
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token for `row` of `table`
    ///
    /// Only the low 24 bits of `row` are kept.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Create an `ldstr` operand for the `#US` entry at `offset`
    #[must_use]
    pub fn user_string(offset: u32) -> Self {
        Token((u32::from(USER_STRING_TABLE) << 24) | (offset & 0x00FF_FFFF))
    }

    /// Raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Table byte
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Row index (or heap offset for user string tokens)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// The table this token refers to, if it is a known metadata table
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_id(self.table())
    }

    /// Whether this token refers into the `#US` heap
    #[must_use]
    pub fn is_user_string(&self) -> bool {
        self.table() == USER_STRING_TABLE
    }

    /// Whether the token value is zero
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
