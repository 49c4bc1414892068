use strum::{EnumCount, EnumIter};

/// Identifiers of the metadata tables this crate reads and writes.
///
/// The discriminant is the table number from ECMA-335 §II.22, which is also the bit position in
/// the `#~` stream's `Valid` vector and the high byte of a token. Variants are declared in
/// ascending order so iterating them yields the order tables are laid out in the stream.
///
/// `Field`, `Param`, `ModuleRef` and `TypeSpec` never receive rows; they exist because coded
/// indices and member lists refer to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
#[repr(u8)]
pub enum TableId {
    /// `Module` - 0x00
    Module = 0x00,
    /// `TypeRef` - 0x01
    TypeRef = 0x01,
    /// `TypeDef` - 0x02
    TypeDef = 0x02,
    /// `Field` - 0x04
    Field = 0x04,
    /// `MethodDef` - 0x06
    MethodDef = 0x06,
    /// `Param` - 0x08
    Param = 0x08,
    /// `MemberRef` - 0x0A
    MemberRef = 0x0A,
    /// `StandAloneSig` - 0x11
    StandAloneSig = 0x11,
    /// `ModuleRef` - 0x1A
    ModuleRef = 0x1A,
    /// `TypeSpec` - 0x1B
    TypeSpec = 0x1B,
    /// `Assembly` - 0x20
    Assembly = 0x20,
    /// `AssemblyRef` - 0x23
    AssemblyRef = 0x23,
}

impl TableId {
    /// Look up a table by its number
    #[must_use]
    pub fn from_id(id: u8) -> Option<TableId> {
        match id {
            0x00 => Some(TableId::Module),
            0x01 => Some(TableId::TypeRef),
            0x02 => Some(TableId::TypeDef),
            0x04 => Some(TableId::Field),
            0x06 => Some(TableId::MethodDef),
            0x08 => Some(TableId::Param),
            0x0A => Some(TableId::MemberRef),
            0x11 => Some(TableId::StandAloneSig),
            0x1A => Some(TableId::ModuleRef),
            0x1B => Some(TableId::TypeSpec),
            0x20 => Some(TableId::Assembly),
            0x23 => Some(TableId::AssemblyRef),
            _ => None,
        }
    }

    /// Bit of this table in the `Valid` / `Sorted` vectors
    #[must_use]
    pub fn mask(self) -> u64 {
        1u64 << (self as u8)
    }

    /// Table name as used in diagnostics
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TableId::Module => "Module",
            TableId::TypeRef => "TypeRef",
            TableId::TypeDef => "TypeDef",
            TableId::Field => "Field",
            TableId::MethodDef => "MethodDef",
            TableId::Param => "Param",
            TableId::MemberRef => "MemberRef",
            TableId::StandAloneSig => "StandAloneSig",
            TableId::ModuleRef => "ModuleRef",
            TableId::TypeSpec => "TypeSpec",
            TableId::Assembly => "Assembly",
            TableId::AssemblyRef => "AssemblyRef",
        }
    }
}

/// Number of table ids a `Valid` vector can describe
pub const MAX_TABLE_ID: usize = 64;
