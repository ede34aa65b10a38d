//! Sheet metadata as published by the sheet-definition service.
//!
//! The wire shape is camelCase JSON with per-attribute string arrays for the
//! data and a parallel list of per-row subrow maps. Conversion produces typed
//! columns and a period table; the flags on each attribute pick the kind with
//! this precedence: `derived`, then a linked sheet, then `recurrentCheck`,
//! else Independent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column::{Column, ColumnKind, FieldType, Formula, Recurrence, SheetLink, SubrowConfig, SubrowField};
use crate::error::ValidationError;
use crate::period::{parse_date, parse_number, Period, PeriodTable, SubrowRecord};
use crate::sheet::Sheet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormulaMeta {
    pub addition_indices: Vec<usize>,
    pub subtraction_indices: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecurrentMeta {
    pub is_recurrent: bool,
    pub recurrent_reference_indice: Option<usize>,
    pub recurrence_fed_status: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkMeta {
    pub sheet_object_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubrowColumnMeta {
    pub name: String,
    /// `"number"`; anything else is treated as text.
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubrowsMeta {
    pub subrows_enabled: bool,
    pub subrow_columns: Vec<SubrowColumnMeta>,
    pub aggregate_field: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeMeta {
    pub name: String,
    pub derived: bool,
    pub formula: Option<FormulaMeta>,
    pub recurrent_check: Option<RecurrentMeta>,
    pub linked_from: Option<LinkMeta>,
    pub has_subrows: bool,
    pub subrows_config: Option<SubrowsMeta>,
    pub is_hidden: bool,
    pub is_deleted: bool,
    /// Cell text per row. Numbers and nulls are accepted too.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Value>,
}

impl AttributeMeta {
    pub fn kind(&self) -> Result<ColumnKind, ValidationError> {
        if self.derived {
            let formula = self.formula.clone().unwrap_or_default();
            return Ok(ColumnKind::Derived(Formula::new(
                formula.addition_indices,
                formula.subtraction_indices,
            )));
        }
        if let Some(sheet_id) = self.linked_from.as_ref().and_then(|l| l.sheet_object_id.as_ref()) {
            return Ok(ColumnKind::Referenced(SheetLink { sheet_id: sheet_id.clone() }));
        }
        if let Some(check) = self.recurrent_check.as_ref().filter(|c| c.is_recurrent) {
            let reference_index = check
                .recurrent_reference_indice
                .ok_or_else(|| ValidationError::MissingRecurrenceReference { column: self.name.clone() })?;
            return Ok(ColumnKind::Recurrent(Recurrence {
                reference_index,
                fed_for_current_period: check.recurrence_fed_status,
            }));
        }
        Ok(ColumnKind::Independent)
    }

    pub fn subrow_config(&self) -> Result<Option<SubrowConfig>, ValidationError> {
        let Some(config) = self.subrows_config.as_ref().filter(|c| self.has_subrows && c.subrows_enabled) else {
            return Ok(None);
        };
        let aggregate_field = config
            .aggregate_field
            .clone()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| ValidationError::UnknownAggregateField {
                column: self.name.clone(),
                field: String::new(),
            })?;
        let fields = config
            .subrow_columns
            .iter()
            .map(|c| SubrowField {
                name: c.name.clone(),
                field_type: if c.field_type.eq_ignore_ascii_case("number") {
                    FieldType::Number
                } else {
                    FieldType::Text
                },
                required: c.required,
            })
            .collect();
        Ok(Some(SubrowConfig::new(fields, aggregate_field)))
    }

    pub fn to_column(&self) -> Result<Column, ValidationError> {
        let mut column = Column::new(self.name.clone(), self.kind()?);
        column.subrows = self.subrow_config()?;
        column.hidden = self.is_hidden;
        column.deleted = self.is_deleted;
        Ok(column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetMeta {
    #[serde(rename = "_id")]
    pub id: String,
    pub sheet_name: String,
    pub group_name: Option<String>,
    pub attributes: Vec<AttributeMeta>,
}

impl SheetMeta {
    pub fn to_columns(&self) -> Result<Vec<Column>, ValidationError> {
        self.attributes.iter().map(AttributeMeta::to_column).collect()
    }
}

/// Per-row extras. `subrows` is keyed by column index as a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowMeta {
    pub subrows: BTreeMap<String, Vec<SubrowRecord>>,
}

/// A sheet definition plus its stored data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetDocument {
    #[serde(flatten)]
    pub meta: SheetMeta,
    pub rows: Vec<RowMeta>,
}

impl SheetDocument {
    /// Validate the column set and load the data into a period table.
    pub fn into_sheet(self) -> Result<Sheet, ValidationError> {
        let columns = self.meta.to_columns()?;
        let table = load_table(&self.meta.attributes, &columns, &self.rows)?;
        let mut sheet = Sheet::from_parts(self.meta.id, self.meta.sheet_name, columns, table)?;
        sheet.group = self.meta.group_name;
        log::debug!(
            "loaded sheet '{}': {} columns, {} periods",
            sheet.name,
            sheet.columns().len(),
            sheet.period_count()
        );
        Ok(sheet)
    }
}

fn load_table(
    attributes: &[AttributeMeta],
    columns: &[Column],
    rows: &[RowMeta],
) -> Result<PeriodTable, ValidationError> {
    let Some(date_index) = columns.iter().position(Column::is_date) else {
        if attributes.iter().all(|a| a.data.is_empty()) && rows.is_empty() {
            return Ok(PeriodTable::new());
        }
        return Err(ValidationError::MissingDateColumn);
    };
    let dates = &attributes[date_index].data;
    let expected = dates.len();
    for (attr, column) in attributes.iter().zip(columns) {
        if attr.data.len() > expected {
            return Err(ValidationError::RaggedData {
                column: column.name.clone(),
                expected,
                found: attr.data.len(),
            });
        }
    }

    let mut periods = Vec::with_capacity(expected);
    for (row, raw_date) in dates.iter().enumerate() {
        let text = cell_text(raw_date);
        let date = parse_date(&text).ok_or(ValidationError::InvalidDate(text))?;
        let mut period = Period::new(date);
        for (index, (attr, column)) in attributes.iter().zip(columns).enumerate() {
            if !stores_raw_value(column) {
                continue;
            }
            if let Some(value) = attr.data.get(row).and_then(|v| parse_number(&cell_text(v))) {
                period.set_value(index, value);
            }
        }
        if let Some(extras) = rows.get(row) {
            for (key, records) in &extras.subrows {
                match key.parse::<usize>() {
                    Ok(index) if index < columns.len() => period.set_subrows(index, records.clone()),
                    _ => log::warn!("row {row}: ignoring subrows for unknown column '{key}'"),
                }
            }
        }
        periods.push(period);
    }
    PeriodTable::from_periods(periods)
}

/// Stored data for computed columns, and for auto-fed recurrent columns,
/// is a cached rendering and is recomputed on load.
fn stores_raw_value(column: &Column) -> bool {
    !column.is_date() && column.accepts_entry()
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
