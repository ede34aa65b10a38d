//! Column model: one attribute of a sheet.
//!
//! Columns are addressed by position. Positions are append-only: hiding or
//! deleting a column sets a flag, it never shifts the indices that formulas
//! and recurrences point at.

use serde::{Deserialize, Serialize};

/// Signed sum over other columns of the same period.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Formula {
    #[serde(default)]
    pub additions: Vec<usize>,
    #[serde(default)]
    pub subtractions: Vec<usize>,
}

impl Formula {
    pub fn new(additions: Vec<usize>, subtractions: Vec<usize>) -> Self {
        Self { additions, subtractions }
    }

    /// Every operand index, additions first.
    pub fn operands(&self) -> impl Iterator<Item = usize> + '_ {
        self.additions.iter().chain(self.subtractions.iter()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.subtractions.is_empty()
    }
}

/// Carry the referenced column's value forward from the previous period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub reference_index: usize,
    /// When set, the value is fed automatically and the entry form locks it.
    #[serde(default)]
    pub fed_for_current_period: bool,
}

/// Values come from another sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetLink {
    pub sheet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    Independent,
    Derived(Formula),
    Recurrent(Recurrence),
    Referenced(SheetLink),
}

impl ColumnKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Derived(_) => "derived",
            Self::Recurrent(_) => "recurrent",
            Self::Referenced(_) => "referenced",
        }
    }

    /// Derived and Referenced values are never typed in by a user.
    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Derived(_) | Self::Referenced(_))
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubrowField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl SubrowField {
    pub fn number(name: impl Into<String>) -> Self {
        Self { name: name.into(), field_type: FieldType::Number, required: false }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self { name: name.into(), field_type: FieldType::Text, required: false }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Itemized sub-ledger attached to each cell of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubrowConfig {
    pub fields: Vec<SubrowField>,
    pub aggregate_field: String,
}

impl SubrowConfig {
    pub fn new(fields: Vec<SubrowField>, aggregate_field: impl Into<String>) -> Self {
        Self { fields, aggregate_field: aggregate_field.into() }
    }

    pub fn field(&self, name: &str) -> Option<&SubrowField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subrows: Option<SubrowConfig>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self { name: name.into(), kind, subrows: None, hidden: false, deleted: false }
    }

    pub fn independent(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Independent)
    }

    pub fn derived(name: impl Into<String>, additions: Vec<usize>, subtractions: Vec<usize>) -> Self {
        Self::new(name, ColumnKind::Derived(Formula::new(additions, subtractions)))
    }

    pub fn recurrent(name: impl Into<String>, reference_index: usize, fed_for_current_period: bool) -> Self {
        Self::new(
            name,
            ColumnKind::Recurrent(Recurrence { reference_index, fed_for_current_period }),
        )
    }

    pub fn referenced(name: impl Into<String>, sheet_id: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Referenced(SheetLink { sheet_id: sheet_id.into() }))
    }

    pub fn with_subrows(mut self, config: SubrowConfig) -> Self {
        self.subrows = Some(config);
        self
    }

    /// The period key column. Holds dates, never numbers.
    pub fn is_date(&self) -> bool {
        self.name.trim().eq_ignore_ascii_case("date")
    }

    /// Whether the period entry form accepts a typed value for this column.
    pub fn accepts_entry(&self) -> bool {
        match &self.kind {
            ColumnKind::Independent => !self.is_date(),
            ColumnKind::Recurrent(r) => !r.fed_for_current_period,
            ColumnKind::Derived(_) | ColumnKind::Referenced(_) => false,
        }
    }

    /// Columns this one reads within the same period.
    ///
    /// Recurrent references point at the previous period and are not listed.
    pub fn same_period_dependencies(&self) -> Vec<usize> {
        match &self.kind {
            ColumnKind::Derived(formula) => formula.operands().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        !self.hidden && !self.deleted
    }

    /// Human label: `opening-stock` becomes `Opening Stock`.
    pub fn display_name(&self) -> String {
        self.name
            .split(['-', '_'])
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Normalize a column name for loose matching (`Opening Stock` == `opening-stock`).
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}
