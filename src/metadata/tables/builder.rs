use log::trace;

use crate::{
    file::io::write_le,
    metadata::{
        streams::{SORTED_TABLES, TABLES_MAJOR_VERSION, TABLES_MINOR_VERSION},
        tables::{
            AssemblyRaw, AssemblyRefRaw, CodedIndex, MemberRefRaw, MethodDefRaw, ModuleRaw,
            RowWritable, StandAloneSigRaw, TableId, TableInfo, TypeDefRaw, TypeRefRaw,
        },
        token::Token,
    },
    Error, Result,
};

/// Largest row index a token can carry
const MAX_ROWS: usize = 0x00FF_FFFF;

/// A `MethodDef` row together with the position of its body in the IL stream.
///
/// The row's `rva` is left at 0 while building; it is computed from `body_offset` when the
/// tables are written, once the RVA of the IL stream is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDefEntry {
    /// The row, `rva` ignored
    pub row: MethodDefRaw,
    /// Offset of the body in the method body stream, `None` for methods without a body
    pub body_offset: Option<u32>,
}

/// Accumulates the rows of every table an image carries.
///
/// Rows are appended in call order and identified by 1-based row indices, handed back as
/// tokens. The builder only enforces what can be known at append time: single-row tables stay
/// single, references point to rows that already exist, and `TypeDef` member lists never go
/// backwards. Everything else is checked when the metadata is frozen.
#[derive(Clone, Debug, Default)]
pub struct TableBuilder {
    module: Option<ModuleRaw>,
    type_refs: Vec<TypeRefRaw>,
    type_defs: Vec<TypeDefRaw>,
    method_defs: Vec<MethodDefEntry>,
    member_refs: Vec<MemberRefRaw>,
    standalone_sigs: Vec<StandAloneSigRaw>,
    assembly: Option<AssemblyRaw>,
    assembly_refs: Vec<AssemblyRefRaw>,
}

fn next_row(table: TableId, current: usize) -> Result<u32> {
    if current >= MAX_ROWS {
        return Err(Error::InvalidTableOrder {
            table: table.name(),
            message: format!("table is full with {} rows", current),
        });
    }

    // Bounded by MAX_ROWS above
    let row = (current + 1) as u32;
    trace!("{}: appending row {}", table.name(), row);
    Ok(row)
}

impl TableBuilder {
    /// An empty set of tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the single `Module` row
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if a module row already exists.
    pub fn add_module(&mut self, row: ModuleRaw) -> Result<Token> {
        if self.module.is_some() {
            return Err(Error::InvalidTableOrder {
                table: TableId::Module.name(),
                message: "an image carries exactly one Module row".to_string(),
            });
        }

        let index = next_row(TableId::Module, 0)?;
        self.module = Some(row);
        Ok(Token::from_parts(TableId::Module, index))
    }

    /// Set the single `Assembly` row
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if an assembly row already exists.
    pub fn add_assembly(&mut self, row: AssemblyRaw) -> Result<Token> {
        if self.assembly.is_some() {
            return Err(Error::InvalidTableOrder {
                table: TableId::Assembly.name(),
                message: "an image carries at most one Assembly row".to_string(),
            });
        }

        let index = next_row(TableId::Assembly, 0)?;
        self.assembly = Some(row);
        Ok(Token::from_parts(TableId::Assembly, index))
    }

    /// Append an `AssemblyRef` row
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if the table is full.
    pub fn add_assembly_ref(&mut self, row: AssemblyRefRaw) -> Result<Token> {
        let index = next_row(TableId::AssemblyRef, self.assembly_refs.len())?;
        self.assembly_refs.push(row);
        Ok(Token::from_parts(TableId::AssemblyRef, index))
    }

    /// Append a `TypeRef` row
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if the resolution scope doesn't exist yet.
    pub fn add_type_ref(&mut self, row: TypeRefRaw) -> Result<Token> {
        self.require_existing(TableId::TypeRef, &row.resolution_scope, "resolution scope")?;

        let index = next_row(TableId::TypeRef, self.type_refs.len())?;
        self.type_refs.push(row);
        Ok(Token::from_parts(TableId::TypeRef, index))
    }

    /// Append a `TypeDef` row
    ///
    /// A base type from `TypeRef` must already exist; `TypeDef` bases may be defined later and
    /// are checked on freeze.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if a member list starts before the
    /// previous row's, or a list start is 0.
    pub fn add_type_def(&mut self, row: TypeDefRaw) -> Result<Token> {
        if row.field_list == 0 || row.method_list == 0 {
            return Err(Error::InvalidTableOrder {
                table: TableId::TypeDef.name(),
                message: "member lists are 1-based".to_string(),
            });
        }

        if let Some(previous) = self.type_defs.last() {
            if row.field_list < previous.field_list || row.method_list < previous.method_list {
                return Err(Error::InvalidTableOrder {
                    table: TableId::TypeDef.name(),
                    message: format!(
                        "member lists must not decrease (field {} after {}, method {} after {})",
                        row.field_list, previous.field_list, row.method_list, previous.method_list
                    ),
                });
            }
        }

        if row.extends.tag == TableId::TypeRef {
            self.require_existing(TableId::TypeDef, &row.extends, "base type")?;
        }

        let index = next_row(TableId::TypeDef, self.type_defs.len())?;
        self.type_defs.push(row);
        Ok(Token::from_parts(TableId::TypeDef, index))
    }

    /// Append a `MethodDef` row whose body sits at `body_offset` in the method body stream
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if the table is full.
    pub fn add_method_def(&mut self, row: MethodDefRaw, body_offset: Option<u32>) -> Result<Token> {
        let index = next_row(TableId::MethodDef, self.method_defs.len())?;
        self.method_defs.push(MethodDefEntry { row, body_offset });
        Ok(Token::from_parts(TableId::MethodDef, index))
    }

    /// Append a `MemberRef` row
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if the parent doesn't exist yet.
    pub fn add_member_ref(&mut self, row: MemberRefRaw) -> Result<Token> {
        if row.class.is_null() {
            return Err(Error::InvalidTableOrder {
                table: TableId::MemberRef.name(),
                message: "member reference without a parent".to_string(),
            });
        }
        self.require_existing(TableId::MemberRef, &row.class, "parent")?;

        let index = next_row(TableId::MemberRef, self.member_refs.len())?;
        self.member_refs.push(row);
        Ok(Token::from_parts(TableId::MemberRef, index))
    }

    /// Append a `StandAloneSig` row, as referenced by fat method headers with locals
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTableOrder`] if the table is full.
    pub fn add_standalone_sig(&mut self, row: StandAloneSigRaw) -> Result<Token> {
        let index = next_row(TableId::StandAloneSig, self.standalone_sigs.len())?;
        self.standalone_sigs.push(row);
        Ok(Token::from_parts(TableId::StandAloneSig, index))
    }

    fn require_existing(
        &self,
        table: TableId,
        target: &CodedIndex,
        what: &str,
    ) -> Result<()> {
        if target.is_null() || self.contains(target.token()) {
            return Ok(());
        }

        Err(Error::InvalidTableOrder {
            table: table.name(),
            message: format!(
                "{} {} row {} does not exist yet",
                what,
                target.tag.name(),
                target.row
            ),
        })
    }

    /// Number of rows in `table`
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        let count = match table {
            TableId::Module => usize::from(self.module.is_some()),
            TableId::TypeRef => self.type_refs.len(),
            TableId::TypeDef => self.type_defs.len(),
            TableId::MethodDef => self.method_defs.len(),
            TableId::MemberRef => self.member_refs.len(),
            TableId::StandAloneSig => self.standalone_sigs.len(),
            TableId::Assembly => usize::from(self.assembly.is_some()),
            TableId::AssemblyRef => self.assembly_refs.len(),
            TableId::Field | TableId::Param | TableId::ModuleRef | TableId::TypeSpec => 0,
        };

        // Appends stop at MAX_ROWS
        count as u32
    }

    /// Whether `token` names an existing row
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        match token.table_id() {
            Some(table) => token.row() >= 1 && token.row() <= self.row_count(table),
            None => false,
        }
    }

    /// The `Module` row
    #[must_use]
    pub fn module(&self) -> Option<&ModuleRaw> {
        self.module.as_ref()
    }

    /// The `Assembly` row
    #[must_use]
    pub fn assembly(&self) -> Option<&AssemblyRaw> {
        self.assembly.as_ref()
    }

    /// `AssemblyRef` rows in order
    #[must_use]
    pub fn assembly_refs(&self) -> &[AssemblyRefRaw] {
        &self.assembly_refs
    }

    /// `TypeRef` rows in order
    #[must_use]
    pub fn type_refs(&self) -> &[TypeRefRaw] {
        &self.type_refs
    }

    /// `TypeDef` rows in order
    #[must_use]
    pub fn type_defs(&self) -> &[TypeDefRaw] {
        &self.type_defs
    }

    /// `MethodDef` rows in order
    #[must_use]
    pub fn method_defs(&self) -> &[MethodDefEntry] {
        &self.method_defs
    }

    /// `MemberRef` rows in order
    #[must_use]
    pub fn member_refs(&self) -> &[MemberRefRaw] {
        &self.member_refs
    }

    /// `StandAloneSig` rows in order
    #[must_use]
    pub fn standalone_sigs(&self) -> &[StandAloneSigRaw] {
        &self.standalone_sigs
    }

    /// Column widths for the current row counts and `heap_sizes`
    #[must_use]
    pub fn table_info(&self, heap_sizes: u8) -> TableInfo {
        TableInfo::new(self.present_tables(), heap_sizes)
    }

    fn present_tables(&self) -> Vec<(TableId, u32)> {
        [
            TableId::Module,
            TableId::TypeRef,
            TableId::TypeDef,
            TableId::MethodDef,
            TableId::MemberRef,
            TableId::StandAloneSig,
            TableId::Assembly,
            TableId::AssemblyRef,
        ]
        .into_iter()
        .map(|table| (table, self.row_count(table)))
        .filter(|(_, rows)| *rows > 0)
        .collect()
    }

    /// Serialize the `#~` stream
    ///
    /// `il_rva` is the RVA of the first byte of the method body stream; each `MethodDef` with a
    /// body gets `il_rva + body_offset` as its RVA. The output is not padded.
    ///
    /// # Errors
    /// Returns [`crate::Error::AssemblyFailure`] if a method RVA overflows, or an encoding
    /// error if a column value doesn't fit.
    pub fn write(&self, heap_sizes: u8, il_rva: u32) -> Result<Vec<u8>> {
        let present = self.present_tables();
        let info = TableInfo::new(present.iter().copied(), heap_sizes);

        let mut valid = 0u64;
        for (table, _) in &present {
            valid |= table.mask();
        }

        let mut data = Vec::new();
        write_le(&mut data, 0u32);
        write_le(&mut data, TABLES_MAJOR_VERSION);
        write_le(&mut data, TABLES_MINOR_VERSION);
        write_le(&mut data, heap_sizes);
        write_le(&mut data, 1u8);
        write_le(&mut data, valid);
        write_le(&mut data, SORTED_TABLES);
        for (_, rows) in &present {
            write_le(&mut data, *rows);
        }

        if let Some(module) = &self.module {
            module.row_write(&mut data, &info)?;
        }
        for row in &self.type_refs {
            row.row_write(&mut data, &info)?;
        }
        for row in &self.type_defs {
            row.row_write(&mut data, &info)?;
        }
        for entry in &self.method_defs {
            let rva = match entry.body_offset {
                Some(offset) => il_rva.checked_add(offset).ok_or_else(|| {
                    assembly_error!("Method body offset 0x{:X} overflows the image", offset)
                })?,
                None => 0,
            };

            let row = MethodDefRaw {
                rva,
                ..entry.row.clone()
            };
            row.row_write(&mut data, &info)?;
        }
        for row in &self.member_refs {
            row.row_write(&mut data, &info)?;
        }
        for row in &self.standalone_sigs {
            row.row_write(&mut data, &info)?;
        }
        if let Some(assembly) = &self.assembly {
            assembly.row_write(&mut data, &info)?;
        }
        for row in &self.assembly_refs {
            row.row_write(&mut data, &info)?;
        }

        Ok(data)
    }
}
