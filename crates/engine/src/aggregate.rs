//! Column totals, subrow ledger totals and the per-sheet stock summary.
//!
//! Totals always sum resolved cell values. A Derived column's total is
//! never computed from the totals of its operands.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::column::{Column, SubrowConfig};
use crate::error::{FormulaError, ValidationError};
use crate::period::{DateRange, SubrowRecord};
use crate::resolve::{CrossSheetSource, ResolvedSheet, Resolver};
use crate::sheet::Sheet;

/// Label shown in place of a number for the date column's total.
pub const DATE_TOTAL_LABEL: &str = "Total";

pub const DEFAULT_OPENING_COLUMN: &str = "opening-stock";
pub const DEFAULT_CLOSING_COLUMN: &str = "closing-stock";

/// Sum of the aggregate field across a ledger. Text and blanks count as 0.
pub fn ledger_total(config: &SubrowConfig, records: &[SubrowRecord]) -> f64 {
    records
        .iter()
        .filter_map(|record| record.get(&config.aggregate_field))
        .map(|value| value.as_number())
        .sum()
}

/// Every required field must be present and non-blank in every record.
pub fn check_required_fields(
    column: &str,
    config: &SubrowConfig,
    records: &[SubrowRecord],
) -> Result<(), ValidationError> {
    for (row, record) in records.iter().enumerate() {
        for field in config.fields.iter().filter(|f| f.required) {
            let present = record.get(&field.name).is_some_and(|v| !v.is_blank());
            if !present {
                return Err(ValidationError::MissingRequiredSubrowField {
                    column: column.to_string(),
                    field: field.name.clone(),
                    row,
                });
            }
        }
    }
    Ok(())
}

/// Σ of resolved values over every period.
pub fn total(resolver: &Resolver<'_>, column: usize) -> Result<f64, FormulaError> {
    Ok(resolver
        .resolve_column(column, 0..resolver.period_count())?
        .into_iter()
        .sum())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTotal {
    pub column: usize,
    pub name: String,
    pub total: f64,
    pub is_date: bool,
    /// Set when the column failed to resolve. Failed cells count as 0 in
    /// `total`; the periods that resolved still add up.
    pub error: Option<FormulaError>,
}

impl ColumnTotal {
    /// Text for a totals row.
    pub fn display(&self) -> String {
        if self.is_date {
            DATE_TOTAL_LABEL.to_string()
        } else {
            format_number(self.total)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTotals {
    pub columns: Vec<ColumnTotal>,
}

impl ColumnTotals {
    pub fn get(&self, column: usize) -> Option<&ColumnTotal> {
        self.columns.get(column)
    }

    pub fn by_name(&self, name: &str) -> Option<&ColumnTotal> {
        self.columns.iter().find(|t| t.name == name)
    }

    pub fn flagged(&self) -> impl Iterator<Item = &ColumnTotal> {
        self.columns.iter().filter(|t| t.error.is_some())
    }
}

/// Totals for every column over all periods.
pub fn totals(resolver: &Resolver<'_>) -> ColumnTotals {
    let resolved = resolver.resolve_sheet();
    column_totals(resolver.columns(), &resolved, 0..resolved.values.len())
}

/// Totals for every column over a span of an already resolved sheet.
pub fn column_totals(columns: &[Column], resolved: &ResolvedSheet, periods: Range<usize>) -> ColumnTotals {
    let periods = periods.start.min(resolved.values.len())..periods.end.min(resolved.values.len());
    let columns = columns
        .iter()
        .enumerate()
        .map(|(index, col)| {
            let error = resolved.flagged.get(&index).cloned();
            let total = if col.is_date() {
                0.0
            } else {
                resolved.values[periods.clone()]
                    .iter()
                    .map(|row| row.get(index).copied().unwrap_or(0.0))
                    .sum()
            };
            ColumnTotal {
                column: index,
                name: col.name.clone(),
                total,
                is_date: col.is_date(),
                error,
            }
        })
        .collect();
    ColumnTotals { columns }
}

/// Which columns carry opening and closing stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockColumns {
    pub opening: String,
    pub closing: String,
}

impl Default for StockColumns {
    fn default() -> Self {
        Self {
            opening: DEFAULT_OPENING_COLUMN.to_string(),
            closing: DEFAULT_CLOSING_COLUMN.to_string(),
        }
    }
}

/// Per-sheet stock figures, as published by the bulk fetch and consumed by
/// reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetStockRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_id: Option<String>,
    pub sheet_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub opening_stock_total: f64,
    pub closing_stock_total: f64,
    pub has_stock_columns: bool,
    pub opening_count: usize,
    pub closing_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_column_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_column_name: Option<String>,
}

/// Opening stock at the first period in range, closing stock at the last.
///
/// Counts are the periods in range with a non-zero value. A sheet missing
/// either stock column reports zeros with `has_stock_columns = false`.
pub fn stock_summary(
    sheet: &Sheet,
    source: &dyn CrossSheetSource,
    stock: &StockColumns,
    range: Option<&DateRange>,
) -> SheetStockRecord {
    let mut record = SheetStockRecord {
        sheet_id: Some(sheet.id.clone()),
        sheet_name: sheet.name.clone(),
        group_name: sheet.group.clone(),
        ..SheetStockRecord::default()
    };
    let (Some(opening), Some(closing)) = (sheet.find_column(&stock.opening), sheet.find_column(&stock.closing))
    else {
        log::debug!("sheet '{}' has no stock columns", sheet.name);
        return record;
    };
    record.has_stock_columns = true;
    record.opening_column_name = Some(sheet.columns()[opening].name.clone());
    record.closing_column_name = Some(sheet.columns()[closing].name.clone());

    let span = match range {
        Some(range) => sheet.table().range_indices(range),
        None => 0..sheet.period_count(),
    };
    if span.is_empty() {
        return record;
    }

    let resolver = Resolver::for_sheet(sheet, source);
    let opening_values = column_or_zeros(&resolver, sheet, opening, span.clone());
    let closing_values = column_or_zeros(&resolver, sheet, closing, span);

    record.opening_stock_total = opening_values.first().copied().unwrap_or(0.0);
    record.closing_stock_total = closing_values.last().copied().unwrap_or(0.0);
    record.opening_count = opening_values.iter().filter(|v| **v != 0.0).count();
    record.closing_count = closing_values.iter().filter(|v| **v != 0.0).count();
    record
}

fn column_or_zeros(resolver: &Resolver<'_>, sheet: &Sheet, column: usize, span: Range<usize>) -> Vec<f64> {
    let len = span.len();
    resolver.resolve_column(column, span).unwrap_or_else(|err| {
        log::warn!(
            "sheet '{}': column '{}' failed to resolve, using 0: {err}",
            sheet.name,
            sheet.columns()[column].name
        );
        vec![0.0; len]
    })
}

/// Render a total without a trailing `.0` for whole numbers.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{value:.4}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::SubrowField;
    use crate::period::{Period, SubrowValue};
    use crate::resolve::{NoReferences, PeriodsView};
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, day).unwrap()
    }

    fn stock_sheet() -> Sheet {
        let columns = vec![
            Column::independent("Date"),
            Column::recurrent("opening-stock", 4, false),
            Column::independent("received"),
            Column::independent("sold"),
            Column::derived("closing-stock", vec![1, 2], vec![3]),
        ];
        let mut sheet = Sheet::from_parts("s1", "Bar", columns, Default::default()).unwrap();
        for (day, received, sold) in [(1, 50.0, 10.0), (2, 0.0, 15.0), (3, 20.0, 5.0)] {
            sheet
                .insert_period(Period::new(d(day)).with_value(2, received).with_value(3, sold))
                .unwrap();
        }
        sheet
    }

    #[test]
    fn totals_sum_resolved_values() {
        let sheet = stock_sheet();
        let resolver = Resolver::for_sheet(&sheet, &NoReferences);
        let totals = totals(&resolver);
        // closing: 40, 25, 40
        assert_eq!(totals.by_name("closing-stock").unwrap().total, 105.0);
        // opening: 0, 40, 25
        assert_eq!(totals.by_name("opening-stock").unwrap().total, 65.0);
        assert_eq!(total(&resolver, 4), Ok(105.0));
        let date = totals.get(0).unwrap();
        assert!(date.is_date);
        assert_eq!(date.display(), "Total");
    }

    #[test]
    fn flagged_column_keeps_resolved_periods() {
        // X and Y form a cycle; R carries X forward, so it only fails after
        // its first period and where no override is stored.
        let columns = vec![
            Column::independent("Date"),
            Column::derived("X", vec![2], vec![]),
            Column::derived("Y", vec![1], vec![]),
            Column::recurrent("R", 1, false),
        ];
        let periods = vec![
            Period::new(d(1)),
            Period::new(d(2)).with_value(3, 7.0),
            Period::new(d(3)),
        ];
        let resolver = Resolver::new(&columns, PeriodsView::new(&periods), &NoReferences);
        let totals = totals(&resolver);
        let carried = totals.get(3).unwrap();
        assert!(matches!(carried.error, Some(FormulaError::Cycle { .. })));
        assert_eq!(carried.total, 7.0);
        assert_eq!(totals.get(1).unwrap().total, 0.0);
        assert_eq!(totals.flagged().count(), 3);
    }

    #[test]
    fn stock_summary_uses_first_and_last_period() {
        let sheet = stock_sheet();
        let record = stock_summary(&sheet, &NoReferences, &StockColumns::default(), None);
        assert!(record.has_stock_columns);
        assert_eq!(record.opening_stock_total, 0.0);
        assert_eq!(record.closing_stock_total, 40.0);
        assert_eq!(record.opening_count, 2);
        assert_eq!(record.closing_count, 3);

        let range = DateRange::new(d(2), d(2));
        let record = stock_summary(&sheet, &NoReferences, &StockColumns::default(), Some(&range));
        assert_eq!(record.opening_stock_total, 40.0);
        assert_eq!(record.closing_stock_total, 25.0);
    }

    #[test]
    fn stock_summary_without_columns() {
        let mut sheet = Sheet::new("s2", "Office");
        sheet.add_column(Column::independent("Date")).unwrap();
        let record = stock_summary(&sheet, &NoReferences, &StockColumns::default(), None);
        assert!(!record.has_stock_columns);
        assert_eq!(record.sheet_name, "Office");
        assert_eq!(record.opening_column_name, None);
    }

    #[test]
    fn required_fields_and_ledger_total() {
        let config = SubrowConfig::new(
            vec![SubrowField::text("item").required(), SubrowField::number("qty")],
            "qty",
        );
        let mut a = SubrowRecord::new();
        a.insert("item".into(), SubrowValue::Text("milk".into()));
        a.insert("qty".into(), SubrowValue::Number(1.5));
        let mut b = SubrowRecord::new();
        b.insert("item".into(), SubrowValue::Text("  ".into()));
        b.insert("qty".into(), SubrowValue::Text("2".into()));
        assert_eq!(ledger_total(&config, &[a.clone(), b.clone()]), 3.5);
        assert!(check_required_fields("used", &config, &[a.clone()]).is_ok());
        assert_eq!(
            check_required_fields("used", &config, &[a, b]),
            Err(ValidationError::MissingRequiredSubrowField {
                column: "used".into(),
                field: "item".into(),
                row: 1,
            })
        );
    }

    #[test]
    fn format_number_trims() {
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-0.125), "-0.125");
    }
}
