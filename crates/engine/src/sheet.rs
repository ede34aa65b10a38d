use serde::{Deserialize, Serialize};

use crate::column::{normalize_name, Column};
use crate::error::ValidationError;
use crate::period::{parse_number, Period, PeriodTable, SubrowRecord};
use crate::validation::{validate_column_definition, validate_columns};

/// A sheet: ordered columns plus the dated periods that fill them.
///
/// Deserializing goes through [`Sheet::from_parts`], so a stored sheet is
/// validated like a published one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SheetParts")]
pub struct Sheet {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    columns: Vec<Column>,
    #[serde(default)]
    table: PeriodTable,
}

#[derive(Deserialize)]
struct SheetParts {
    id: String,
    name: String,
    #[serde(default)]
    group: Option<String>,
    columns: Vec<Column>,
    #[serde(default)]
    table: PeriodTable,
}

impl TryFrom<SheetParts> for Sheet {
    type Error = ValidationError;

    fn try_from(parts: SheetParts) -> Result<Self, Self::Error> {
        let mut sheet = Self::from_parts(parts.id, parts.name, parts.columns, parts.table)?;
        sheet.group = parts.group;
        Ok(sheet)
    }
}

impl Sheet {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            group: None,
            columns: Vec::new(),
            table: PeriodTable::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Build a sheet from a published column set. The set is validated as a
    /// whole (names, ranges, cycles) before anything is kept.
    pub fn from_parts(
        id: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<Column>,
        table: PeriodTable,
    ) -> Result<Self, ValidationError> {
        validate_columns(&columns)?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            group: None,
            columns,
            table,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Exact name lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Lookup ignoring case and `-`/`_`/space differences.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        let wanted = normalize_name(name);
        self.columns.iter().position(|c| normalize_name(&c.name) == wanted)
    }

    pub fn date_column(&self) -> Option<usize> {
        self.columns.iter().position(Column::is_date)
    }

    pub fn table(&self) -> &PeriodTable {
        &self.table
    }

    pub fn period_count(&self) -> usize {
        self.table.len()
    }

    /// Append a column after validating it. Nothing changes on error.
    pub fn add_column(&mut self, def: Column) -> Result<usize, ValidationError> {
        let column = validate_column_definition(def, &self.columns)?;
        log::debug!("sheet '{}': added {} column '{}'", self.name, column.kind, column.name);
        self.columns.push(column);
        Ok(self.columns.len() - 1)
    }

    pub fn set_hidden(&mut self, index: usize, hidden: bool) -> Result<(), ValidationError> {
        let column = self.columns.get_mut(index).ok_or(ValidationError::UnknownColumn(index))?;
        column.hidden = hidden;
        Ok(())
    }

    /// Soft delete: the position stays so formulas keep their meaning.
    pub fn set_deleted(&mut self, index: usize, deleted: bool) -> Result<(), ValidationError> {
        let column = self.columns.get_mut(index).ok_or(ValidationError::UnknownColumn(index))?;
        column.deleted = deleted;
        Ok(())
    }

    pub fn insert_period(&mut self, period: Period) -> Result<usize, ValidationError> {
        self.table.insert(period)
    }

    /// Load-path insert: replaces an existing period with the same date.
    pub fn upsert_period(&mut self, period: Period) -> usize {
        self.table.upsert(period)
    }

    /// Update a stored cell from entry-form text. Blank input clears it.
    pub fn set_value(&mut self, period: usize, column: usize, input: &str) -> Result<(), ValidationError> {
        self.check_editable(column)?;
        let row = self.table.get_mut(period).ok_or(ValidationError::UnknownPeriod(period))?;
        match parse_number(input) {
            Some(value) => row.set_value(column, value),
            None if input.trim().is_empty() => {
                row.clear_value(column);
            }
            // Non-numeric text counts as 0, like the entry form.
            None => row.set_value(column, 0.0),
        }
        Ok(())
    }

    /// Replace a stored cell's subrow ledger.
    pub fn set_subrows(
        &mut self,
        period: usize,
        column: usize,
        records: Vec<SubrowRecord>,
    ) -> Result<(), ValidationError> {
        self.check_editable(column)?;
        let col = &self.columns[column];
        if let Some(config) = &col.subrows {
            crate::aggregate::check_required_fields(&col.name, config, &records)?;
        } else {
            return Err(ValidationError::EmptySubrowFields { column: col.name.clone() });
        }
        let row = self.table.get_mut(period).ok_or(ValidationError::UnknownPeriod(period))?;
        row.set_subrows(column, records);
        Ok(())
    }

    pub(crate) fn check_editable(&self, column: usize) -> Result<(), ValidationError> {
        let col = self.columns.get(column).ok_or(ValidationError::UnknownColumn(column))?;
        if !col.accepts_entry() {
            return Err(ValidationError::ColumnNotEditable { column: col.name.clone() });
        }
        Ok(())
    }
}
