//! Staging for a new period before it is saved.
//!
//! A draft holds the values typed into the entry form. Its date must be
//! after every stored period; it previews through the resolver as the
//! newest period, without touching the sheet, and commits into the period
//! table as a new row.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::aggregate::{check_required_fields, ledger_total};
use crate::column::ColumnKind;
use crate::error::{FormulaError, ValidationError};
use crate::period::{parse_number, Period, SubrowRecord};
use crate::resolve::{CrossSheetSource, Resolver};
use crate::sheet::Sheet;

/// Resolved values for the draft row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftPreview {
    pub values: Vec<f64>,
    pub flagged: BTreeMap<usize, FormulaError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodDraft {
    period: Period,
}

impl PeriodDraft {
    pub fn new(date: NaiveDate) -> Self {
        Self { period: Period::new(date) }
    }

    pub fn date(&self) -> NaiveDate {
        self.period.date
    }

    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Record typed input for an editable column. Blank clears it;
    /// non-numeric text counts as 0.
    pub fn set_input(&mut self, sheet: &Sheet, column: usize, input: &str) -> Result<(), ValidationError> {
        sheet.check_editable(column)?;
        match parse_number(input) {
            Some(value) => self.period.set_value(column, value),
            None if input.trim().is_empty() => {
                self.period.clear_value(column);
            }
            None => self.period.set_value(column, 0.0),
        }
        Ok(())
    }

    /// Replace the ledger for a column. Returns its running total.
    ///
    /// Required fields are checked at commit, not here, so a half-filled
    /// ledger can still show a total.
    pub fn set_subrows(
        &mut self,
        sheet: &Sheet,
        column: usize,
        records: Vec<SubrowRecord>,
    ) -> Result<f64, ValidationError> {
        sheet.check_editable(column)?;
        let col = &sheet.columns()[column];
        let Some(config) = &col.subrows else {
            return Err(ValidationError::EmptySubrowFields { column: col.name.clone() });
        };
        let total = ledger_total(config, &records);
        self.period.set_subrows(column, records);
        Ok(total)
    }

    pub fn subrow_running_total(&self, sheet: &Sheet, column: usize) -> f64 {
        match sheet.column(column).and_then(|c| c.subrows.as_ref()) {
            Some(config) => ledger_total(config, self.period.subrows(column)),
            None => 0.0,
        }
    }

    /// Same date as a stored period is a duplicate; an earlier one is
    /// rejected since the preview would not match the committed row.
    pub fn check_date(&self, sheet: &Sheet) -> Result<(), ValidationError> {
        let date = self.period.date;
        if sheet.table().position_of(date).is_some() {
            return Err(ValidationError::DuplicatePeriod(date));
        }
        match sheet.table().last_date() {
            Some(latest) if date < latest => Err(ValidationError::DraftNotLatest { date, latest }),
            _ => Ok(()),
        }
    }

    /// Add `amount` on top of the column's current value for the draft
    /// (the carried-forward value unless already overridden). The sum
    /// becomes the draft's override and is returned.
    pub fn add_to_recurrent(
        &mut self,
        sheet: &Sheet,
        column: usize,
        amount: f64,
        source: &dyn CrossSheetSource,
    ) -> Result<f64, ValidationError> {
        let col = sheet.column(column).ok_or(ValidationError::UnknownColumn(column))?;
        if !matches!(col.kind, ColumnKind::Recurrent(_)) {
            return Err(ValidationError::NotRecurrent { column: col.name.clone() });
        }
        sheet.check_editable(column)?;
        self.check_date(sheet)?;

        let current = Resolver::with_draft(sheet, &self.period, source).resolve(column, sheet.period_count())?;
        let value = current + amount;
        // a ledger would shadow the scalar override
        self.period.set_subrows(column, Vec::new());
        self.period.set_value(column, value);
        Ok(value)
    }

    pub fn check_required(&self, sheet: &Sheet) -> Result<(), ValidationError> {
        for (&column, records) in &self.period.subrows {
            let Some(col) = sheet.column(column) else {
                return Err(ValidationError::UnknownColumn(column));
            };
            if let Some(config) = &col.subrows {
                check_required_fields(&col.name, config, records)?;
            }
        }
        Ok(())
    }

    /// Every column resolved for the draft row, layered after the stored
    /// periods. Stored data is not modified.
    pub fn preview(&self, sheet: &Sheet, source: &dyn CrossSheetSource) -> Result<DraftPreview, ValidationError> {
        self.check_date(sheet)?;
        let resolver = Resolver::with_draft(sheet, &self.period, source);
        let index = sheet.period_count();
        let mut preview = DraftPreview::default();
        for column in 0..sheet.columns().len() {
            match resolver.resolve(column, index) {
                Ok(value) => preview.values.push(value),
                Err(err) => {
                    preview.values.push(0.0);
                    preview.flagged.insert(column, err);
                }
            }
        }
        Ok(preview)
    }

    /// Save into the sheet. Returns the new period's index.
    pub fn commit(self, sheet: &mut Sheet) -> Result<usize, ValidationError> {
        self.check_date(sheet)?;
        self.check_required(sheet)?;
        let date = self.period.date;
        let index = sheet.insert_period(self.period)?;
        log::info!("sheet '{}': committed period {date}", sheet.name);
        Ok(index)
    }
}
