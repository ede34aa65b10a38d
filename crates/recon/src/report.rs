//! Export table for a reconciliation.

use std::io::Write;

use serde::Serialize;

use stocksheet_engine::aggregate::format_number;

use crate::error::ReconError;
use crate::filter::{SheetFilter, SortConfig, UNGROUPED};
use crate::model::{CountField, ReconSheet, VarianceTotals};
use crate::session::ReconSession;

pub const HEADERS: [&str; 8] = [
    "Sheet Name",
    "Group",
    "Opening Stock",
    "Recon Opening",
    "Opening Difference",
    "Closing Stock",
    "Recon Closing",
    "Closing Difference",
];

/// Label in the sheet-name cell of the totals row.
pub const TOTALS_LABEL: &str = "Total";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub sheet_name: String,
    pub group: String,
    pub opening_stock: f64,
    pub recon_opening: f64,
    pub opening_difference: f64,
    pub closing_stock: f64,
    pub recon_closing: f64,
    pub closing_difference: f64,
}

impl ReportRow {
    fn from_sheet(sheet: &ReconSheet, group: Option<&str>) -> Self {
        Self {
            sheet_name: sheet.name().to_string(),
            group: group.unwrap_or(UNGROUPED).to_string(),
            opening_stock: sheet.total(CountField::Opening),
            recon_opening: sheet.counted(CountField::Opening),
            opening_difference: sheet.opening_difference,
            closing_stock: sheet.total(CountField::Closing),
            recon_closing: sheet.counted(CountField::Closing),
            closing_difference: sheet.closing_difference,
        }
    }

    fn cells(&self) -> [String; 8] {
        [
            self.sheet_name.clone(),
            self.group.clone(),
            format_number(self.opening_stock),
            format_number(self.recon_opening),
            format_number(self.opening_difference),
            format_number(self.closing_stock),
            format_number(self.recon_closing),
            format_number(self.closing_difference),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub rows: Vec<ReportRow>,
    pub totals: VarianceTotals,
}

impl Report {
    /// One row per filtered, sorted sheet.
    pub fn build(session: &ReconSession, filter: &SheetFilter, sort: &SortConfig) -> Self {
        let view = session.view(filter, sort);
        let rows = view
            .iter()
            .map(|sheet| ReportRow::from_sheet(sheet, session.group_of(sheet)))
            .collect();
        let totals = view.into_iter().collect();
        Self { rows, totals }
    }

    pub fn totals_row(&self) -> ReportRow {
        ReportRow {
            sheet_name: TOTALS_LABEL.to_string(),
            group: String::new(),
            opening_stock: self.totals.opening_stock,
            recon_opening: self.totals.recon_opening,
            opening_difference: self.totals.opening_difference,
            closing_stock: self.totals.closing_stock,
            recon_closing: self.totals.recon_closing,
            closing_difference: self.totals.closing_difference,
        }
    }

    /// Header, one line per row, then the totals row.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), ReconError> {
        let mut writer = csv::Writer::from_writer(out);
        let export = |e: csv::Error| ReconError::Export(e.to_string());
        writer.write_record(HEADERS).map_err(export)?;
        for row in &self.rows {
            writer.write_record(row.cells()).map_err(export)?;
        }
        writer.write_record(self.totals_row().cells()).map_err(export)?;
        writer.flush().map_err(|e| ReconError::Export(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceSnapshot;
    use chrono::Utc;
    use stocksheet_engine::aggregate::SheetStockRecord;

    fn session() -> ReconSession {
        let sheets = vec![
            SheetStockRecord {
                sheet_name: "Kitchen".into(),
                group_name: Some("Back".into()),
                opening_stock_total: 40.0,
                closing_stock_total: 30.0,
                ..Default::default()
            },
            SheetStockRecord {
                sheet_name: "Bar".into(),
                opening_stock_total: 12.5,
                closing_stock_total: 10.0,
                ..Default::default()
            },
        ];
        let mut session = ReconSession::start_fresh(SourceSnapshot::new(sheets, Utc::now()));
        session.set_counted("Bar", CountField::Closing, "9").unwrap();
        session
    }

    #[test]
    fn rows_are_grouped_and_totalled() {
        let report = Report::build(&session(), &SheetFilter::all(), &SortConfig::default());
        let names: Vec<&str> = report.rows.iter().map(|r| r.sheet_name.as_str()).collect();
        assert_eq!(names, vec!["Kitchen", "Bar"]);
        assert_eq!(report.rows[1].group, "Ungrouped");
        assert_eq!(report.rows[1].closing_difference, -1.0);
        assert_eq!(report.totals.opening_stock, 52.5);
        assert_eq!(report.totals_row().sheet_name, "Total");
    }

    #[test]
    fn csv_has_header_rows_and_totals() {
        let report = Report::build(&session(), &SheetFilter::all().with_search("bar"), &SortConfig::default());
        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Sheet Name,Group,Opening Stock,Recon Opening,Opening Difference,Closing Stock,Recon Closing,Closing Difference"
        );
        assert_eq!(lines[1], "Bar,Ungrouped,12.5,0,0,10,9,-1");
        assert_eq!(lines[2], "Total,,12.5,0,0,10,9,-1");
        assert_eq!(lines.len(), 3);
    }
}
