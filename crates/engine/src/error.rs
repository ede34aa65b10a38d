use std::fmt;

use chrono::NaiveDate;

/// Failure while resolving a Derived or Recurrent chain.
///
/// During validation this blocks publishing the column set. During
/// resolution of stored data the caller decides: the full-sheet path
/// (`Resolver::resolve_sheet`) turns it into a 0 and flags the column.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaError {
    /// The requested column does not exist.
    UnknownColumn { index: usize, len: usize },
    /// The requested period does not exist.
    UnknownPeriod { index: usize, len: usize },
    /// A formula or recurrence references a column index past the end.
    IndexOutOfRange { column: usize, index: usize, len: usize },
    /// A column (transitively) depends on itself within one period.
    /// `columns` lists the path, first element repeated at the end.
    Cycle { columns: Vec<usize> },
}

impl FormulaError {
    /// The column that the error should be reported against.
    pub fn column(&self) -> Option<usize> {
        match self {
            Self::UnknownColumn { index, .. } => Some(*index),
            Self::UnknownPeriod { .. } => None,
            Self::IndexOutOfRange { column, .. } => Some(*column),
            Self::Cycle { columns } => columns.first().copied(),
        }
    }
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownColumn { index, len } => {
                write!(f, "column {index} does not exist (sheet has {len} columns)")
            }
            Self::UnknownPeriod { index, len } => {
                write!(f, "period {index} does not exist (sheet has {len} periods)")
            }
            Self::IndexOutOfRange { column, index, len } => write!(
                f,
                "column {column} references column {index}, but the sheet has {len} columns"
            ),
            Self::Cycle { columns } => {
                let path: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
                if columns.len() == 2 {
                    write!(f, "column {} references itself", columns[0])
                } else {
                    write!(f, "circular reference: {}", path.join(" → "))
                }
            }
        }
    }
}

impl std::error::Error for FormulaError {}

/// Rejected user or admin input. Reported inline, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyName,
    DuplicateName(String),
    EmptyFormula { column: String },
    FormulaIndexOutOfRange { column: String, index: usize, len: usize },
    DuplicateFormulaIndex { column: String, index: usize },
    OverlappingFormula { column: String, index: usize },
    MissingRecurrenceReference { column: String },
    RecurrenceOutOfRange { column: String, index: usize, len: usize },
    /// Recurrent reference points at a Recurrent or Referenced column.
    ChainedRecurrence { column: String, reference: String },
    EmptySheetLink { column: String },
    SubrowsOnComputedColumn { column: String },
    EmptySubrowFields { column: String },
    DuplicateSubrowField { column: String, field: String },
    UnknownAggregateField { column: String, field: String },
    NonNumericAggregateField { column: String, field: String },
    MissingRequiredSubrowField { column: String, field: String, row: usize },
    UnknownColumn(usize),
    UnknownPeriod(usize),
    ColumnNotEditable { column: String },
    DuplicatePeriod(NaiveDate),
    /// A new period must come after every stored one.
    DraftNotLatest { date: NaiveDate, latest: NaiveDate },
    NotRecurrent { column: String },
    InvalidDate(String),
    /// Sheet data arrived without a column named `date`.
    MissingDateColumn,
    /// Data row count disagrees with the date column.
    RaggedData { column: String, expected: usize, found: usize },
    /// Publishing a column set failed cycle/range checks.
    Formula(FormulaError),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "column name must not be empty"),
            Self::DuplicateName(name) => write!(f, "column name '{name}' is already in use"),
            Self::EmptyFormula { column } => {
                write!(f, "derived column '{column}' has no addition or subtraction columns")
            }
            Self::FormulaIndexOutOfRange { column, index, len } => write!(
                f,
                "derived column '{column}': index {index} is out of range (only {len} columns exist)"
            ),
            Self::DuplicateFormulaIndex { column, index } => {
                write!(f, "derived column '{column}': index {index} is listed twice")
            }
            Self::OverlappingFormula { column, index } => write!(
                f,
                "derived column '{column}': index {index} is both added and subtracted"
            ),
            Self::MissingRecurrenceReference { column } => {
                write!(f, "recurrent column '{column}' has no reference column")
            }
            Self::RecurrenceOutOfRange { column, index, len } => write!(
                f,
                "recurrent column '{column}': reference {index} is out of range (only {len} columns exist)"
            ),
            Self::ChainedRecurrence { column, reference } => write!(
                f,
                "recurrent column '{column}' cannot reference '{reference}' (recurrent or referenced)"
            ),
            Self::EmptySheetLink { column } => {
                write!(f, "referenced column '{column}' has no linked sheet")
            }
            Self::SubrowsOnComputedColumn { column } => {
                write!(f, "column '{column}' is computed and cannot carry subrows")
            }
            Self::EmptySubrowFields { column } => {
                write!(f, "column '{column}': subrows need at least one field")
            }
            Self::DuplicateSubrowField { column, field } => {
                write!(f, "column '{column}': subrow field '{field}' is defined twice")
            }
            Self::UnknownAggregateField { column, field } => {
                write!(f, "column '{column}': aggregate field '{field}' is not a subrow field")
            }
            Self::NonNumericAggregateField { column, field } => {
                write!(f, "column '{column}': aggregate field '{field}' must be a number field")
            }
            Self::MissingRequiredSubrowField { column, field, row } => write!(
                f,
                "column '{column}': subrow {} is missing required field '{field}'",
                row + 1
            ),
            Self::UnknownColumn(index) => write!(f, "column {index} does not exist"),
            Self::UnknownPeriod(index) => write!(f, "period {index} does not exist"),
            Self::ColumnNotEditable { column } => {
                write!(f, "column '{column}' is computed and cannot be edited")
            }
            Self::DuplicatePeriod(date) => write!(f, "a period for {date} already exists"),
            Self::DraftNotLatest { date, latest } => write!(
                f,
                "new period {date} must be after the latest stored period {latest}"
            ),
            Self::NotRecurrent { column } => write!(f, "column '{column}' is not recurrent"),
            Self::InvalidDate(value) => write!(f, "cannot parse date '{value}'"),
            Self::MissingDateColumn => write!(f, "sheet has data but no 'date' column"),
            Self::RaggedData { column, expected, found } => write!(
                f,
                "column '{column}' has {found} values, expected {expected}"
            ),
            Self::Formula(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<FormulaError> for ValidationError {
    fn from(err: FormulaError) -> Self {
        Self::Formula(err)
    }
}
