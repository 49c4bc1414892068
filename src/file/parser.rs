//! Cursor-style reader over a byte slice.
//!
//! [`Parser`] keeps a position into borrowed data and offers the primitive reads the metadata
//! structures are made of: little-endian integers, compressed integers and tokens, raw byte
//! runs and NUL-terminated strings. Every read is bounds checked.

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    utils::read_compressed_uint,
    Error::OutOfBounds,
    Result,
};

/// A bounds-checked reader with a current position
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser positioned at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying data is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether there are bytes left after the current position
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move to an absolute position
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Skip `step` bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if that would move past the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(OutOfBounds),
        }
    }

    /// Current position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Look at the next byte without consuming it
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data.get(self.position).copied().ok_or(OutOfBounds)
    }

    /// Skip forward to the next multiple of `alignment`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding runs past the end of the data.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a little-endian `T`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data is left.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read an ECMA-335 compressed unsigned integer
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] for truncated or
    /// invalid encodings.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let (value, consumed) = read_compressed_uint(self.data, self.position)?;
        self.position += consumed;
        Ok(value)
    }

    /// Read a compressed `TypeDefOrRef` coded token, as used inside signatures
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid table tag.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        let table_index = compressed_token >> 2;

        Ok(Token::new(table + table_index))
    }

    /// Read `len` raw bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data is left.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..self.position])
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if there is no terminator, or
    /// [`crate::Error::Malformed`] if the bytes aren't UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.position..];
        let Some(end) = rest.iter().position(|&byte| byte == 0) else {
            return Err(OutOfBounds);
        };

        let value = std::str::from_utf8(&rest[..end])
            .map_err(|_| malformed_error!("Invalid UTF-8 string at offset {}", self.position))?;
        self.position += end + 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_le::<u16>().unwrap(), 0x0201);
        assert_eq!(parser.pos(), 2);
        assert_eq!(parser.peek_byte().unwrap(), 0x03);
        assert_eq!(parser.read_le::<u32>().unwrap(), 0x0605_0403);
        assert!(!parser.has_more_data());
        assert!(parser.read_le::<u8>().is_err());
    }

    #[test]
    fn compressed() {
        let data = [0x03, 0xAE, 0x57, 0xC0, 0x00, 0x40, 0x00];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_compressed_uint().unwrap(), 0x03);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x2E57);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x4000);
        assert_eq!(parser.pos(), 7);
    }

    #[test]
    fn compressed_token() {
        // TypeRef row 2 -> (2 << 2) | 1
        let data = [0x09, 0x08, 0x03];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0100_0002));
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0200_0002));
        assert!(parser.read_compressed_token().is_err());
    }

    #[test]
    fn strings_and_alignment() {
        let data = b"#~\0\0#Strings\0\0\0\0";
        let mut parser = Parser::new(data);

        assert_eq!(parser.read_string_utf8().unwrap(), "#~");
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        assert_eq!(parser.read_string_utf8().unwrap(), "#Strings");
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 16);

        let mut unterminated = Parser::new(b"abc");
        assert!(unterminated.read_string_utf8().is_err());
    }

    #[test]
    fn bytes_and_seek() {
        let data = [1, 2, 3, 4];
        let mut parser = Parser::new(&data);

        parser.seek(1).unwrap();
        assert_eq!(parser.read_bytes(2).unwrap(), &[2, 3]);
        assert!(parser.read_bytes(2).is_err());
        assert!(parser.seek(5).is_err());
        assert!(parser.advance_by(usize::MAX).is_err());
    }
}
