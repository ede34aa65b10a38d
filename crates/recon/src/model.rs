use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stocksheet_engine::aggregate::SheetStockRecord;
use stocksheet_engine::ingest::{IngestState, IngestSummary};
use stocksheet_engine::period::{parse_number, DateRange};

// ---------------------------------------------------------------------------
// Counted values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountField {
    Opening,
    Closing,
}

impl CountField {
    pub fn label(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Closing => "closing",
        }
    }
}

impl std::str::FromStr for CountField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opening" | "open" => Ok(Self::Opening),
            "closing" | "close" => Ok(Self::Closing),
            other => Err(format!("unknown count field '{other}' (expected opening or closing)")),
        }
    }
}

/// One sheet in a reconciliation, in the persisted progress shape.
///
/// Counts are kept exactly as typed; their numeric reading is lenient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconSheet {
    #[serde(flatten)]
    pub record: SheetStockRecord,
    #[serde(default)]
    pub recon_opening_stock: String,
    #[serde(default)]
    pub recon_closing_stock: String,
    #[serde(default)]
    pub opening_difference: f64,
    #[serde(default)]
    pub closing_difference: f64,
}

impl ReconSheet {
    /// Counts empty, variances 0.
    pub fn fresh(record: SheetStockRecord) -> Self {
        Self {
            record,
            recon_opening_stock: String::new(),
            recon_closing_stock: String::new(),
            opening_difference: 0.0,
            closing_difference: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.sheet_name
    }

    pub fn total(&self, field: CountField) -> f64 {
        match field {
            CountField::Opening => self.record.opening_stock_total,
            CountField::Closing => self.record.closing_stock_total,
        }
    }

    pub fn counted_input(&self, field: CountField) -> &str {
        match field {
            CountField::Opening => &self.recon_opening_stock,
            CountField::Closing => &self.recon_closing_stock,
        }
    }

    /// Blank or non-numeric input reads as 0.
    pub fn counted(&self, field: CountField) -> f64 {
        parse_number(self.counted_input(field)).unwrap_or(0.0)
    }

    pub fn variance(&self, field: CountField) -> f64 {
        match field {
            CountField::Opening => self.opening_difference,
            CountField::Closing => self.closing_difference,
        }
    }

    /// Store the input verbatim and recompute that side's variance.
    pub fn set_count(&mut self, field: CountField, input: &str) {
        match field {
            CountField::Opening => self.recon_opening_stock = input.to_string(),
            CountField::Closing => self.recon_closing_stock = input.to_string(),
        }
        let variance = self.counted(field) - self.total(field);
        match field {
            CountField::Opening => self.opening_difference = variance,
            CountField::Closing => self.closing_difference = variance,
        }
    }
}

// ---------------------------------------------------------------------------
// Source snapshot
// ---------------------------------------------------------------------------

/// Group membership from sheet metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetGroupInfo {
    pub sheet_name: String,
    #[serde(default)]
    pub group_name: Option<String>,
}

/// Everything a reconciliation was seeded from. Persisted alongside the
/// progress so an interrupted session can be re-seeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub sheets: Vec<SheetStockRecord>,
    #[serde(default)]
    pub summary: Option<IngestSummary>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub meta_data: Vec<SheetGroupInfo>,
}

impl SourceSnapshot {
    pub fn new(sheets: Vec<SheetStockRecord>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sheets,
            summary: None,
            date_range: None,
            timestamp,
            meta_data: Vec::new(),
        }
    }

    /// Capture a finished (or partial) bulk fetch.
    pub fn from_ingest(state: &IngestState, date_range: Option<DateRange>, timestamp: DateTime<Utc>) -> Self {
        let meta_data = state
            .sheets
            .iter()
            .map(|s| SheetGroupInfo {
                sheet_name: s.sheet_name.clone(),
                group_name: s.group_name.clone(),
            })
            .collect();
        Self {
            sheets: state.sheets.clone(),
            summary: state.summary.clone(),
            date_range,
            timestamp,
            meta_data,
        }
    }

    pub fn with_meta(mut self, meta_data: Vec<SheetGroupInfo>) -> Self {
        self.meta_data = meta_data;
        self
    }

    pub fn group_of(&self, sheet_name: &str) -> Option<&str> {
        self.meta_data
            .iter()
            .find(|m| m.sheet_name == sheet_name)
            .and_then(|m| m.group_name.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Sums over a set of sheets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VarianceTotals {
    pub sheets: usize,
    pub opening_stock: f64,
    pub recon_opening: f64,
    pub opening_difference: f64,
    pub closing_stock: f64,
    pub recon_closing: f64,
    pub closing_difference: f64,
}

impl VarianceTotals {
    pub fn add(&mut self, sheet: &ReconSheet) {
        self.sheets += 1;
        self.opening_stock += sheet.total(CountField::Opening);
        self.recon_opening += sheet.counted(CountField::Opening);
        self.opening_difference += sheet.opening_difference;
        self.closing_stock += sheet.total(CountField::Closing);
        self.recon_closing += sheet.counted(CountField::Closing);
        self.closing_difference += sheet.closing_difference;
    }
}

impl<'a> FromIterator<&'a ReconSheet> for VarianceTotals {
    fn from_iter<I: IntoIterator<Item = &'a ReconSheet>>(iter: I) -> Self {
        let mut totals = Self::default();
        for sheet in iter {
            totals.add(sheet);
        }
        totals
    }
}

/// Stock rollup for one group of sheets.
///
/// `variance` is closing minus opening across the group; percentages are
/// 0 when their base is 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTotals {
    pub group_name: String,
    pub total_opening: f64,
    pub total_closing: f64,
    pub variance: f64,
    pub variance_percentage: f64,
    /// Sheets with stock columns.
    pub active_sheets: usize,
    pub total_sheets: usize,
    pub completion_rate: f64,
    pub average_stock: f64,
}

impl GroupTotals {
    pub fn new(group_name: impl Into<String>) -> Self {
        Self { group_name: group_name.into(), ..Default::default() }
    }

    pub fn add(&mut self, sheet: &ReconSheet) {
        self.total_opening += sheet.total(CountField::Opening);
        self.total_closing += sheet.total(CountField::Closing);
        self.total_sheets += 1;
        if sheet.record.has_stock_columns {
            self.active_sheets += 1;
        }
        self.variance = self.total_closing - self.total_opening;
        self.variance_percentage = if self.total_opening > 0.0 {
            self.variance / self.total_opening * 100.0
        } else {
            0.0
        };
        self.completion_rate = self.active_sheets as f64 / self.total_sheets as f64 * 100.0;
        self.average_stock = self.total_closing / self.total_sheets as f64;
    }
}
