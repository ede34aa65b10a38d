//! Column definition validation (admin mutation path).
//!
//! Two entry points:
//! - [`validate_column_definition`] checks one new column against the
//!   columns that already exist. Columns are append-only, so a new Derived
//!   column can only point at earlier positions and cannot close a cycle.
//! - [`validate_columns`] checks a whole published column set, where
//!   indices may point anywhere, and runs cycle detection over the
//!   same-period dependency edges.
//!
//! Name uniqueness is case-sensitive: "Qty" and "qty" are distinct columns.
//! Nothing is committed here; callers push the returned column themselves.

use std::collections::HashSet;

use crate::column::{Column, ColumnKind, FieldType, SubrowConfig};
use crate::error::{FormulaError, ValidationError};

/// Validate a new column appended after `existing`.
pub fn validate_column_definition(
    def: Column,
    existing: &[Column],
) -> Result<Column, ValidationError> {
    check_name(&def, existing.iter())?;
    check_kind(&def, existing, None)?;
    check_subrows(&def)?;
    Ok(def)
}

/// Validate a complete column set before publishing it.
pub fn validate_columns(columns: &[Column]) -> Result<(), ValidationError> {
    for (index, column) in columns.iter().enumerate() {
        let others = columns
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != index)
            .map(|(_, c)| c);
        check_name(column, others)?;
        check_kind(column, columns, Some(index))?;
        check_subrows(column)?;
    }
    if let Some(cycle) = find_cycle(columns) {
        return Err(FormulaError::Cycle { columns: cycle }.into());
    }
    Ok(())
}

fn check_name<'a>(
    def: &Column,
    others: impl Iterator<Item = &'a Column>,
) -> Result<(), ValidationError> {
    if def.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let mut others = others;
    if others.any(|c| c.name == def.name) {
        return Err(ValidationError::DuplicateName(def.name.clone()));
    }
    Ok(())
}

/// `self_index` is `Some` when `def` is itself a member of `columns`.
fn check_kind(
    def: &Column,
    columns: &[Column],
    self_index: Option<usize>,
) -> Result<(), ValidationError> {
    let len = columns.len();
    match &def.kind {
        ColumnKind::Independent => Ok(()),
        ColumnKind::Derived(formula) => {
            if formula.is_empty() {
                return Err(ValidationError::EmptyFormula { column: def.name.clone() });
            }
            for index in formula.operands() {
                if index >= len {
                    return Err(ValidationError::FormulaIndexOutOfRange {
                        column: def.name.clone(),
                        index,
                        len,
                    });
                }
                if Some(index) == self_index {
                    return Err(FormulaError::Cycle { columns: vec![index, index] }.into());
                }
            }
            check_unique_indices(&def.name, &formula.additions)?;
            check_unique_indices(&def.name, &formula.subtractions)?;
            let additions: HashSet<usize> = formula.additions.iter().copied().collect();
            if let Some(&index) = formula.subtractions.iter().find(|i| additions.contains(i)) {
                return Err(ValidationError::OverlappingFormula { column: def.name.clone(), index });
            }
            Ok(())
        }
        ColumnKind::Recurrent(recurrence) => {
            let index = recurrence.reference_index;
            let Some(target) = columns.get(index) else {
                return Err(ValidationError::RecurrenceOutOfRange {
                    column: def.name.clone(),
                    index,
                    len,
                });
            };
            if matches!(target.kind, ColumnKind::Recurrent(_) | ColumnKind::Referenced(_)) {
                return Err(ValidationError::ChainedRecurrence {
                    column: def.name.clone(),
                    reference: target.name.clone(),
                });
            }
            Ok(())
        }
        ColumnKind::Referenced(link) => {
            if link.sheet_id.trim().is_empty() {
                return Err(ValidationError::EmptySheetLink { column: def.name.clone() });
            }
            Ok(())
        }
    }
}

fn check_unique_indices(column: &str, indices: &[usize]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for &index in indices {
        if !seen.insert(index) {
            return Err(ValidationError::DuplicateFormulaIndex { column: column.to_string(), index });
        }
    }
    Ok(())
}

fn check_subrows(def: &Column) -> Result<(), ValidationError> {
    let Some(config) = &def.subrows else {
        return Ok(());
    };
    if def.kind.is_computed() {
        return Err(ValidationError::SubrowsOnComputedColumn { column: def.name.clone() });
    }
    check_subrow_config(&def.name, config)
}

fn check_subrow_config(column: &str, config: &SubrowConfig) -> Result<(), ValidationError> {
    if config.fields.is_empty() {
        return Err(ValidationError::EmptySubrowFields { column: column.to_string() });
    }
    let mut seen = HashSet::new();
    for field in &config.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(ValidationError::DuplicateSubrowField {
                column: column.to_string(),
                field: field.name.clone(),
            });
        }
    }
    match config.field(&config.aggregate_field) {
        None => Err(ValidationError::UnknownAggregateField {
            column: column.to_string(),
            field: config.aggregate_field.clone(),
        }),
        Some(field) if field.field_type != FieldType::Number => {
            Err(ValidationError::NonNumericAggregateField {
                column: column.to_string(),
                field: field.name.clone(),
            })
        }
        Some(_) => Ok(()),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// First cycle found over same-period dependency edges, as a closed path
/// (`[a, b, a]`). Out-of-range edges are ignored here; range checks report them.
pub fn find_cycle(columns: &[Column]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; columns.len()];
    let mut path = Vec::new();
    for start in 0..columns.len() {
        if marks[start] == Mark::Unvisited {
            if let Some(cycle) = visit(columns, start, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    columns: &[Column],
    node: usize,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    marks[node] = Mark::InProgress;
    path.push(node);
    for dep in columns[node].same_period_dependencies() {
        if dep >= columns.len() {
            continue;
        }
        match marks[dep] {
            Mark::InProgress => {
                let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(columns, dep, marks, path) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }
    path.pop();
    marks[node] = Mark::Done;
    None
}
