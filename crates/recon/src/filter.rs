//! Which sheets are in view, and in what order.
//!
//! Filtering decides what `aggregate_variance` and the report sum over, so
//! it is part of the result, not just presentation. Changing a filter never
//! touches counts.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use ordered_float::OrderedFloat;

use crate::model::{CountField, ReconSheet};

/// Group label for sheets without one.
pub const UNGROUPED: &str = "Ungrouped";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GroupFilter {
    #[default]
    All,
    Named(String),
}

impl GroupFilter {
    /// `"all"` (any case) or empty selects every group.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Named(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetFilter {
    /// Case-insensitive substring of the sheet name.
    pub search: String,
    pub group: GroupFilter,
    /// Explicit selection. `None` selects every sheet.
    pub selected: Option<BTreeSet<String>>,
}

impl SheetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_group(mut self, group: GroupFilter) -> Self {
        self.group = group;
        self
    }

    pub fn with_selected<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// `group` is the sheet's group from metadata, if it has one.
    pub fn matches(&self, sheet: &ReconSheet, group: Option<&str>) -> bool {
        let name = sheet.name();
        if !name.to_lowercase().contains(&self.search.to_lowercase()) {
            return false;
        }
        if let Some(selected) = &self.selected {
            if !selected.contains(name) {
                return false;
            }
        }
        match &self.group {
            GroupFilter::All => true,
            GroupFilter::Named(wanted) => group == Some(wanted.as_str()),
        }
    }
}

/// Numeric columns a reconciliation can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    OpeningStockTotal,
    ReconOpeningStock,
    OpeningDifference,
    ClosingStockTotal,
    ReconClosingStock,
    ClosingDifference,
    OpeningCount,
    ClosingCount,
}

impl NumericField {
    pub fn value(self, sheet: &ReconSheet) -> f64 {
        match self {
            Self::OpeningStockTotal => sheet.total(CountField::Opening),
            Self::ReconOpeningStock => sheet.counted(CountField::Opening),
            Self::OpeningDifference => sheet.opening_difference,
            Self::ClosingStockTotal => sheet.total(CountField::Closing),
            Self::ReconClosingStock => sheet.counted(CountField::Closing),
            Self::ClosingDifference => sheet.closing_difference,
            Self::OpeningCount => sheet.record.opening_count as f64,
            Self::ClosingCount => sheet.record.closing_count as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Case-insensitive.
    SheetName,
    Number(NumericField),
}

impl std::str::FromStr for SortKey {
    type Err = String;

    /// Accepts the persisted field names (`openingStockTotal`) and their
    /// kebab-case forms (`opening-stock-total`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s.chars().filter(|c| *c != '-' && *c != '_').collect::<String>().to_lowercase();
        let field = match key.as_str() {
            "sheetname" | "name" => return Ok(Self::SheetName),
            "openingstocktotal" | "openingstock" => NumericField::OpeningStockTotal,
            "reconopeningstock" | "reconopening" => NumericField::ReconOpeningStock,
            "openingdifference" => NumericField::OpeningDifference,
            "closingstocktotal" | "closingstock" => NumericField::ClosingStockTotal,
            "reconclosingstock" | "reconclosing" => NumericField::ReconClosingStock,
            "closingdifference" => NumericField::ClosingDifference,
            "openingcount" => NumericField::OpeningCount,
            "closingcount" => NumericField::ClosingCount,
            _ => return Err(format!("unknown sort key '{s}'")),
        };
        Ok(Self::Number(field))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortConfig {
    pub key: Option<SortKey>,
    pub direction: SortDirection,
}

impl SortConfig {
    pub fn by(key: SortKey, direction: SortDirection) -> Self {
        Self { key: Some(key), direction }
    }

    /// Clicking a header: the same key flips ascending to descending,
    /// anything else starts ascending.
    pub fn toggle(&mut self, key: SortKey) {
        self.direction = if self.key == Some(key) && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        self.key = Some(key);
    }

    fn compare(&self, a: &ReconSheet, b: &ReconSheet) -> Ordering {
        let ordering = match self.key {
            None => return Ordering::Equal,
            Some(SortKey::SheetName) => a.name().to_lowercase().cmp(&b.name().to_lowercase()),
            Some(SortKey::Number(field)) => OrderedFloat(field.value(a)).cmp(&OrderedFloat(field.value(b))),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Stable sort: by group name first (missing group is [`UNGROUPED`]), then
/// by the configured key within a group.
pub fn sort_sheets<'a, G>(sheets: &mut [&'a ReconSheet], group_of: G, config: &SortConfig)
where
    G: Fn(&'a ReconSheet) -> Option<&'a str>,
{
    sheets.sort_by(|a, b| {
        let ga = group_of(*a).unwrap_or(UNGROUPED);
        let gb = group_of(*b).unwrap_or(UNGROUPED);
        ga.cmp(gb).then_with(|| config.compare(a, b))
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    /// 1-based, clamped into range.
    pub page: usize,
    pub total_pages: usize,
}

/// Slice out one page. Page numbers are 1-based; out-of-range pages are
/// clamped, and an empty input yields page 1 of 0.
pub fn paginate<T>(items: &[T], page_size: usize, page: usize) -> Page<'_, T> {
    let page_size = page_size.max(1);
    let total_pages = items.len().div_ceil(page_size);
    let page = page.clamp(1, total_pages.max(1));
    let start = ((page - 1) * page_size).min(items.len());
    let end = (start + page_size).min(items.len());
    Page { items: &items[start..end], page, total_pages }
}
