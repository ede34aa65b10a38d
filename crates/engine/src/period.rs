//! Period table: the dated rows of a sheet.
//!
//! Invariants:
//! - periods are sorted by date ascending
//! - dates are unique within a table
//! - `raw_values` holds entered numbers only (Independent columns, and
//!   Recurrent columns when an override was fed); computed columns never
//!   store values here

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One field value inside a subrow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubrowValue {
    Number(f64),
    Text(String),
}

impl SubrowValue {
    /// Numeric reading with entry-form leniency: text that parses counts,
    /// anything else is 0.
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Number(n) if n.is_finite() => *n,
            Self::Number(_) => 0.0,
            Self::Text(s) => parse_number(s).unwrap_or(0.0),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Number(_) => false,
            Self::Text(s) => s.trim().is_empty(),
        }
    }
}

impl From<f64> for SubrowValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for SubrowValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One itemized entry of a cell's sub-ledger.
pub type SubrowRecord = BTreeMap<String, SubrowValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub date: NaiveDate,
    #[serde(default)]
    pub raw_values: BTreeMap<usize, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subrows: BTreeMap<usize, Vec<SubrowRecord>>,
}

impl Period {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, raw_values: BTreeMap::new(), subrows: BTreeMap::new() }
    }

    pub fn with_value(mut self, column: usize, value: f64) -> Self {
        self.set_value(column, value);
        self
    }

    pub fn with_subrows(mut self, column: usize, records: Vec<SubrowRecord>) -> Self {
        self.set_subrows(column, records);
        self
    }

    pub fn value(&self, column: usize) -> Option<f64> {
        self.raw_values.get(&column).copied()
    }

    pub fn set_value(&mut self, column: usize, value: f64) {
        self.raw_values.insert(column, value);
    }

    pub fn clear_value(&mut self, column: usize) -> Option<f64> {
        self.raw_values.remove(&column)
    }

    pub fn subrows(&self, column: usize) -> &[SubrowRecord] {
        self.subrows.get(&column).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace the ledger for a column. An empty ledger removes it.
    pub fn set_subrows(&mut self, column: usize, records: Vec<SubrowRecord>) {
        if records.is_empty() {
            self.subrows.remove(&column);
        } else {
            self.subrows.insert(column, records);
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Period>", into = "Vec<Period>")]
pub struct PeriodTable {
    periods: Vec<Period>,
}

impl TryFrom<Vec<Period>> for PeriodTable {
    type Error = ValidationError;

    fn try_from(periods: Vec<Period>) -> Result<Self, Self::Error> {
        Self::from_periods(periods)
    }
}

impl From<PeriodTable> for Vec<Period> {
    fn from(table: PeriodTable) -> Self {
        table.periods
    }
}

impl PeriodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from periods in any order. Duplicate dates are rejected.
    pub fn from_periods(periods: Vec<Period>) -> Result<Self, ValidationError> {
        let mut table = Self::new();
        for period in periods {
            table.insert(period)?;
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Period> {
        self.periods.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Period> {
        self.periods.get_mut(index)
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn iter(&self) -> impl Iterator<Item = &Period> {
        self.periods.iter()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.periods.last().map(|p| p.date)
    }

    pub fn position_of(&self, date: NaiveDate) -> Option<usize> {
        self.periods.binary_search_by_key(&date, |p| p.date).ok()
    }

    /// Insert keeping date order. Returns the index the period landed at.
    pub fn insert(&mut self, period: Period) -> Result<usize, ValidationError> {
        match self.periods.binary_search_by_key(&period.date, |p| p.date) {
            Ok(_) => Err(ValidationError::DuplicatePeriod(period.date)),
            Err(index) => {
                self.periods.insert(index, period);
                Ok(index)
            }
        }
    }

    /// Insert, or replace the period with the same date.
    pub fn upsert(&mut self, period: Period) -> usize {
        match self.periods.binary_search_by_key(&period.date, |p| p.date) {
            Ok(index) => {
                self.periods[index] = period;
                index
            }
            Err(index) => {
                self.periods.insert(index, period);
                index
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Period> {
        if index < self.periods.len() {
            Some(self.periods.remove(index))
        } else {
            None
        }
    }

    /// Indices of periods within the range (contiguous because dates are sorted).
    pub fn range_indices(&self, range: &DateRange) -> Range<usize> {
        let start = self.periods.partition_point(|p| p.date < range.start);
        let end = self.periods.partition_point(|p| p.date <= range.end);
        start..end.max(start)
    }
}

/// Lenient numeric parse for entered values.
///
/// Accepts surrounding whitespace and trailing junk after a numeric prefix
/// (`"12 kg"` is 12). A comma ends the prefix, so `"1,250"` is 1. Blank,
/// non-numeric and non-finite input is `None`.
pub fn parse_number(input: &str) -> Option<f64> {
    let cleaned = input.trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = cleaned.parse::<f64>() {
        return value.is_finite().then_some(value);
    }
    let prefix_len = numeric_prefix_len(&cleaned);
    if prefix_len == 0 {
        return None;
    }
    cleaned[..prefix_len].parse::<f64>().ok().filter(|v| v.is_finite())
}

fn numeric_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'-' || bytes[i] == b'+') {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    let mantissa = &s[digits_start..i];
    if mantissa.is_empty() || mantissa == "." {
        return 0;
    }
    // Optional exponent, only kept when followed by digits.
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'-' || bytes[j] == b'+') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    i
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %b %Y", "%d-%m-%Y", "%d/%m/%Y", "%e %b %Y"];

/// Parse a period date as written by the sheet service or the entry form.
///
/// ISO timestamps are accepted and truncated to the date.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    // "2025-01-15T00:00:00.000Z"
    trimmed
        .get(..10)
        .filter(|_| trimmed.as_bytes().get(10) == Some(&b'T'))
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn insert_keeps_date_order() {
        let mut table = PeriodTable::new();
        table.insert(Period::new(d(2025, 1, 3))).unwrap();
        table.insert(Period::new(d(2025, 1, 1))).unwrap();
        let idx = table.insert(Period::new(d(2025, 1, 2))).unwrap();
        assert_eq!(idx, 1);
        let dates: Vec<_> = table.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![d(2025, 1, 1), d(2025, 1, 2), d(2025, 1, 3)]);
    }

    #[test]
    fn duplicate_date_rejected() {
        let mut table = PeriodTable::new();
        table.insert(Period::new(d(2025, 1, 1))).unwrap();
        let err = table.insert(Period::new(d(2025, 1, 1))).unwrap_err();
        assert_eq!(err, ValidationError::DuplicatePeriod(d(2025, 1, 1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn upsert_replaces_same_date() {
        let mut table = PeriodTable::new();
        table.insert(Period::new(d(2025, 1, 1)).with_value(1, 5.0)).unwrap();
        let idx = table.upsert(Period::new(d(2025, 1, 1)).with_value(1, 9.0));
        assert_eq!(idx, 0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().value(1), Some(9.0));
    }

    #[test]
    fn range_indices_are_inclusive() {
        let table = PeriodTable::from_periods(
            (1..=5).map(|day| Period::new(d(2025, 1, day))).collect(),
        )
        .unwrap();
        assert_eq!(table.range_indices(&DateRange::new(d(2025, 1, 2), d(2025, 1, 4))), 1..4);
        assert_eq!(table.range_indices(&DateRange::new(d(2024, 1, 1), d(2024, 12, 31))), 0..0);
        assert_eq!(table.range_indices(&DateRange::new(d(2025, 1, 4), d(2025, 1, 2))), 1..4);
    }

    #[test]
    fn empty_ledger_removes_entry() {
        let mut period = Period::new(d(2025, 1, 1));
        let mut record = SubrowRecord::new();
        record.insert("qty".into(), SubrowValue::Number(2.0));
        period.set_subrows(1, vec![record]);
        assert_eq!(period.subrows(1).len(), 1);
        period.set_subrows(1, Vec::new());
        assert!(period.subrows(1).is_empty());
        assert!(period.subrows.is_empty());
    }

    #[test]
    fn parse_number_is_lenient() {
        assert_eq!(parse_number("12"), Some(12.0));
        assert_eq!(parse_number("  3.5 "), Some(3.5));
        assert_eq!(parse_number("1,250"), Some(1.0));
        assert_eq!(parse_number(",5"), None);
        assert_eq!(parse_number("12 kg"), Some(12.0));
        assert_eq!(parse_number("-4e2"), Some(-400.0));
        assert_eq!(parse_number("7e"), Some(7.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn parse_date_formats() {
        assert_eq!(parse_date("2025-01-15"), Some(d(2025, 1, 15)));
        assert_eq!(parse_date("15 Jan 2025"), Some(d(2025, 1, 15)));
        assert_eq!(parse_date("5 Jan 2025"), Some(d(2025, 1, 5)));
        assert_eq!(parse_date("15-01-2025"), Some(d(2025, 1, 15)));
        assert_eq!(parse_date("2025-01-15T10:00:00.000Z"), Some(d(2025, 1, 15)));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn subrow_value_numeric_reading() {
        assert_eq!(SubrowValue::Number(2.5).as_number(), 2.5);
        assert_eq!(SubrowValue::Text("4".into()).as_number(), 4.0);
        assert_eq!(SubrowValue::Text("n/a".into()).as_number(), 0.0);
    }
}
