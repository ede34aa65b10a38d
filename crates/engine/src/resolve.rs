//! Value resolution.
//!
//! `Resolver` computes the effective value of a (column, period) pair by
//! column kind. It never mutates the sheet. A draft period can be layered
//! after the stored ones so the entry form can preview derived values.
//!
//! Cycle detection runs per top-level call: the (column, period) pairs on
//! the current path are tracked and a revisit is a `FormulaError::Cycle`.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::aggregate::ledger_total;
use crate::column::{Column, ColumnKind};
use crate::error::FormulaError;
use crate::period::Period;
use crate::sheet::Sheet;

/// Key under which another sheet publishes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceKey<'a> {
    pub sheet_id: &'a str,
    pub column: usize,
    pub period: usize,
    pub date: NaiveDate,
}

/// Supplies values for Referenced columns. The resolver only passes them
/// through; `None` resolves to 0.
pub trait CrossSheetSource {
    fn value(&self, key: &ReferenceKey<'_>) -> Option<f64>;
}

/// Source with no data. Every Referenced cell is 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferences;

impl CrossSheetSource for NoReferences {
    fn value(&self, _key: &ReferenceKey<'_>) -> Option<f64> {
        None
    }
}

/// One entry of a reference file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub sheet_id: String,
    pub column: usize,
    pub date: NaiveDate,
    pub value: f64,
}

/// In-memory source keyed by (linked sheet, column, date).
///
/// Dates rather than period indices identify rows, so the map stays valid
/// when the linked sheet gains periods.
#[derive(Debug, Clone, Default)]
pub struct ReferenceMap {
    values: HashMap<(String, usize, NaiveDate), f64>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sheet_id: impl Into<String>, column: usize, date: NaiveDate, value: f64) {
        self.values.insert((sheet_id.into(), column, date), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<ReferenceEntry> for ReferenceMap {
    fn from_iter<I: IntoIterator<Item = ReferenceEntry>>(iter: I) -> Self {
        let mut map = Self::new();
        for entry in iter {
            map.insert(entry.sheet_id, entry.column, entry.date, entry.value);
        }
        map
    }
}

impl CrossSheetSource for ReferenceMap {
    fn value(&self, key: &ReferenceKey<'_>) -> Option<f64> {
        self.values
            .get(&(key.sheet_id.to_string(), key.column, key.date))
            .copied()
    }
}

/// Stored periods plus an optional unsaved draft at the end.
#[derive(Debug, Clone, Copy)]
pub struct PeriodsView<'a> {
    stored: &'a [Period],
    draft: Option<&'a Period>,
}

impl<'a> PeriodsView<'a> {
    pub fn new(stored: &'a [Period]) -> Self {
        Self { stored, draft: None }
    }

    pub fn with_draft(stored: &'a [Period], draft: &'a Period) -> Self {
        Self { stored, draft: Some(draft) }
    }

    pub fn len(&self) -> usize {
        self.stored.len() + usize::from(self.draft.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&'a Period> {
        if index < self.stored.len() {
            self.stored.get(index)
        } else if index == self.stored.len() {
            self.draft
        } else {
            None
        }
    }

    /// Index of the draft period, when one is layered.
    pub fn draft_index(&self) -> Option<usize> {
        self.draft.map(|_| self.stored.len())
    }
}

/// Every cell of a sheet, resolved for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSheet {
    /// `values[period][column]`.
    pub values: Vec<Vec<f64>>,
    /// Columns whose stored data failed to resolve, with the first error.
    pub flagged: BTreeMap<usize, FormulaError>,
}

impl ResolvedSheet {
    pub fn value(&self, column: usize, period: usize) -> Option<f64> {
        self.values.get(period).and_then(|row| row.get(column)).copied()
    }

    pub fn column(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().map(move |row| row.get(column).copied().unwrap_or(0.0))
    }

    pub fn is_flagged(&self, column: usize) -> bool {
        self.flagged.contains_key(&column)
    }
}

#[derive(Default)]
struct Pass {
    path: Vec<(usize, usize)>,
    on_path: FxHashSet<(usize, usize)>,
    memo: FxHashMap<(usize, usize), f64>,
}

pub struct Resolver<'a> {
    columns: &'a [Column],
    periods: PeriodsView<'a>,
    source: &'a dyn CrossSheetSource,
}

impl<'a> Resolver<'a> {
    pub fn new(columns: &'a [Column], periods: PeriodsView<'a>, source: &'a dyn CrossSheetSource) -> Self {
        Self { columns, periods, source }
    }

    pub fn for_sheet(sheet: &'a Sheet, source: &'a dyn CrossSheetSource) -> Self {
        Self::new(sheet.columns(), PeriodsView::new(sheet.table().periods()), source)
    }

    /// Same stored data with a draft period layered after it.
    pub fn with_draft(sheet: &'a Sheet, draft: &'a Period, source: &'a dyn CrossSheetSource) -> Self {
        Self::new(
            sheet.columns(),
            PeriodsView::with_draft(sheet.table().periods(), draft),
            source,
        )
    }

    pub fn columns(&self) -> &'a [Column] {
        self.columns
    }

    pub fn periods(&self) -> PeriodsView<'a> {
        self.periods
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn resolve(&self, column: usize, period: usize) -> Result<f64, FormulaError> {
        let mut pass = Pass::default();
        self.eval(column, period, &mut pass)
    }

    /// One column over a span of periods, sharing a memo across the span.
    pub fn resolve_column(&self, column: usize, periods: Range<usize>) -> Result<Vec<f64>, FormulaError> {
        let mut pass = Pass::default();
        periods.map(|period| self.eval(column, period, &mut pass)).collect()
    }

    /// Entered value for a cell: the subrow ledger sum when the column has
    /// subrows and the ledger is non-empty, else the stored scalar.
    pub fn raw_value(&self, column: usize, period: usize) -> Option<f64> {
        let row = self.periods.get(period)?;
        let col = self.columns.get(column)?;
        if let Some(config) = &col.subrows {
            let ledger = row.subrows(column);
            if !ledger.is_empty() {
                return Some(ledger_total(config, ledger));
            }
        }
        row.value(column)
    }

    /// Aggregate-field sum over a cell's ledger. 0 without subrows.
    pub fn subrow_total(&self, column: usize, period: usize) -> f64 {
        match (self.columns.get(column), self.periods.get(period)) {
            (Some(Column { subrows: Some(config), .. }), Some(row)) => {
                ledger_total(config, row.subrows(column))
            }
            _ => 0.0,
        }
    }

    /// Resolve every cell, memoized across the whole call.
    ///
    /// A cell that fails resolves to 0 and its column is flagged.
    pub fn resolve_sheet(&self) -> ResolvedSheet {
        let mut pass = Pass::default();
        let mut resolved = ResolvedSheet {
            values: Vec::with_capacity(self.periods.len()),
            flagged: BTreeMap::new(),
        };
        for period in 0..self.periods.len() {
            let mut row = Vec::with_capacity(self.columns.len());
            for column in 0..self.columns.len() {
                pass.path.clear();
                pass.on_path.clear();
                match self.eval(column, period, &mut pass) {
                    Ok(value) => row.push(value),
                    Err(err) => {
                        if !resolved.flagged.contains_key(&column) {
                            log::warn!(
                                "column '{}' flagged: {err}",
                                self.columns[column].name
                            );
                            resolved.flagged.insert(column, err);
                        }
                        row.push(0.0);
                    }
                }
            }
            resolved.values.push(row);
        }
        log::debug!(
            "resolved {} periods x {} columns, {} flagged",
            resolved.values.len(),
            self.columns.len(),
            resolved.flagged.len()
        );
        resolved
    }

    fn eval(&self, column: usize, period: usize, pass: &mut Pass) -> Result<f64, FormulaError> {
        let len = self.columns.len();
        let col = self
            .columns
            .get(column)
            .ok_or(FormulaError::UnknownColumn { index: column, len })?;
        if period >= self.periods.len() {
            return Err(FormulaError::UnknownPeriod { index: period, len: self.periods.len() });
        }
        if let Some(value) = pass.memo.get(&(column, period)) {
            return Ok(*value);
        }
        if col.is_date() {
            return Ok(0.0);
        }

        let key = (column, period);
        if !pass.on_path.insert(key) {
            let start = pass.path.iter().position(|k| *k == key).unwrap_or(0);
            let mut columns: Vec<usize> = pass.path[start..].iter().map(|(c, _)| *c).collect();
            columns.push(column);
            return Err(FormulaError::Cycle { columns });
        }
        pass.path.push(key);

        let result = self.eval_kind(column, col, period, pass);

        pass.path.pop();
        pass.on_path.remove(&key);
        let value = result?;
        pass.memo.insert(key, value);
        Ok(value)
    }

    fn eval_kind(&self, column: usize, col: &Column, period: usize, pass: &mut Pass) -> Result<f64, FormulaError> {
        let len = self.columns.len();
        match &col.kind {
            ColumnKind::Independent => Ok(self.raw_value(column, period).unwrap_or(0.0)),
            ColumnKind::Derived(formula) => {
                let mut sum = 0.0;
                for &index in &formula.additions {
                    if index >= len {
                        return Err(FormulaError::IndexOutOfRange { column, index, len });
                    }
                    sum += self.eval(index, period, pass)?;
                }
                for &index in &formula.subtractions {
                    if index >= len {
                        return Err(FormulaError::IndexOutOfRange { column, index, len });
                    }
                    sum -= self.eval(index, period, pass)?;
                }
                Ok(sum)
            }
            ColumnKind::Recurrent(recurrence) => {
                if period == 0 {
                    return Ok(0.0);
                }
                if let Some(value) = self.raw_value(column, period) {
                    return Ok(value);
                }
                let index = recurrence.reference_index;
                if index >= len {
                    return Err(FormulaError::IndexOutOfRange { column, index, len });
                }
                self.eval(index, period - 1, pass)
            }
            ColumnKind::Referenced(link) => {
                let Some(row) = self.periods.get(period) else {
                    return Ok(0.0);
                };
                let key = ReferenceKey {
                    sheet_id: &link.sheet_id,
                    column,
                    period,
                    date: row.date,
                };
                Ok(self.source.value(&key).unwrap_or(0.0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{SubrowConfig, SubrowField};
    use crate::period::{SubrowRecord, SubrowValue};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn periods(rows: &[&[(usize, f64)]]) -> Vec<Period> {
        rows.iter()
            .enumerate()
            .map(|(i, values)| {
                let mut p = Period::new(d(i as u32 + 1));
                for (col, v) in values.iter() {
                    p.set_value(*col, *v);
                }
                p
            })
            .collect()
    }

    #[test]
    fn derived_sums_same_period() {
        let cols = vec![
            Column::independent("Date"),
            Column::independent("A"),
            Column::independent("B"),
            Column::derived("C", vec![1, 2], vec![]),
        ];
        let rows = periods(&[&[(1, 10.0), (2, 5.0)], &[(1, 3.0), (2, 2.0)]]);
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &NoReferences);
        assert_eq!(r.resolve(3, 0), Ok(15.0));
        assert_eq!(r.resolve(3, 1), Ok(5.0));
        assert_eq!(r.resolve(0, 0), Ok(0.0));
    }

    #[test]
    fn recurrent_copies_previous_reference() {
        let cols = vec![
            Column::independent("Date"),
            Column::independent("A"),
            Column::recurrent("R", 1, false),
        ];
        let rows = periods(&[&[(1, 10.0)], &[(1, 3.0)], &[(1, 7.0), (2, 99.0)]]);
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &NoReferences);
        assert_eq!(r.resolve(2, 0), Ok(0.0));
        assert_eq!(r.resolve(2, 1), Ok(10.0));
        // override wins
        assert_eq!(r.resolve(2, 2), Ok(99.0));
    }

    #[test]
    fn recurrence_through_derived_terminates() {
        // closing = opening + in; opening carries previous closing
        let cols = vec![
            Column::independent("Date"),
            Column::recurrent("opening", 3, false),
            Column::independent("in"),
            Column::derived("closing", vec![1, 2], vec![]),
        ];
        let mut rows = periods(&[&[(2, 4.0)], &[(2, 6.0)], &[(2, 1.0)]]);
        rows[0].set_value(1, 20.0);
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &NoReferences);
        // period 0 override is ignored: no prior period
        assert_eq!(r.resolve(3, 0), Ok(4.0));
        assert_eq!(r.resolve(3, 1), Ok(10.0));
        assert_eq!(r.resolve(3, 2), Ok(11.0));
    }

    #[test]
    fn cycle_is_an_error_not_a_hang() {
        let cols = vec![
            Column::independent("Date"),
            Column::derived("X", vec![2], vec![]),
            Column::derived("Y", vec![1], vec![]),
        ];
        let rows = periods(&[&[]]);
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &NoReferences);
        assert_eq!(r.resolve(1, 0), Err(FormulaError::Cycle { columns: vec![1, 2, 1] }));
    }

    #[test]
    fn out_of_range_and_unknown_inputs() {
        let cols = vec![Column::independent("Date"), Column::derived("bad", vec![7], vec![])];
        let rows = periods(&[&[]]);
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &NoReferences);
        assert_eq!(
            r.resolve(1, 0),
            Err(FormulaError::IndexOutOfRange { column: 1, index: 7, len: 2 })
        );
        assert_eq!(r.resolve(5, 0), Err(FormulaError::UnknownColumn { index: 5, len: 2 }));
        assert_eq!(r.resolve(1, 3), Err(FormulaError::UnknownPeriod { index: 3, len: 1 }));
    }

    #[test]
    fn ledger_is_authoritative() {
        let cols = vec![
            Column::independent("Date"),
            Column::independent("used").with_subrows(SubrowConfig::new(
                vec![SubrowField::text("item"), SubrowField::number("qty")],
                "qty",
            )),
        ];
        let mut a = SubrowRecord::new();
        a.insert("qty".into(), SubrowValue::Number(2.0));
        let mut b = SubrowRecord::new();
        b.insert("qty".into(), SubrowValue::Text("oops".into()));
        let mut c = SubrowRecord::new();
        c.insert("qty".into(), SubrowValue::Number(5.0));
        let rows = vec![Period::new(d(1)).with_value(1, 100.0).with_subrows(1, vec![a, b, c])];
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &NoReferences);
        assert_eq!(r.resolve(1, 0), Ok(7.0));
        assert_eq!(r.subrow_total(1, 0), 7.0);
    }

    #[test]
    fn referenced_passes_through() {
        let cols = vec![Column::independent("Date"), Column::referenced("transfer", "sheet-9")];
        let rows = periods(&[&[], &[]]);
        let mut refs = ReferenceMap::new();
        refs.insert("sheet-9", 1, d(2), 42.0);
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &refs);
        assert_eq!(r.resolve(1, 0), Ok(0.0));
        assert_eq!(r.resolve(1, 1), Ok(42.0));
    }

    #[test]
    fn resolve_sheet_flags_broken_columns() {
        let cols = vec![
            Column::independent("Date"),
            Column::independent("A"),
            Column::derived("X", vec![3], vec![]),
            Column::derived("Y", vec![2], vec![]),
        ];
        let rows = periods(&[&[(1, 1.0)], &[(1, 2.0)]]);
        let r = Resolver::new(&cols, PeriodsView::new(&rows), &NoReferences);
        let resolved = r.resolve_sheet();
        assert_eq!(resolved.value(1, 1), Some(2.0));
        assert_eq!(resolved.value(2, 0), Some(0.0));
        assert!(resolved.is_flagged(2));
        assert!(resolved.is_flagged(3));
        assert!(!resolved.is_flagged(1));
    }

    #[test]
    fn draft_layers_after_stored() {
        let cols = vec![
            Column::independent("Date"),
            Column::independent("A"),
            Column::recurrent("R", 1, false),
        ];
        let rows = periods(&[&[(1, 10.0)]]);
        let draft = Period::new(d(9)).with_value(1, 4.0);
        let view = PeriodsView::with_draft(&rows, &draft);
        assert_eq!(view.draft_index(), Some(1));
        let r = Resolver::new(&cols, view, &NoReferences);
        assert_eq!(r.resolve(2, 1), Ok(10.0));
        assert_eq!(r.resolve(1, 1), Ok(4.0));
    }
}
