//! `stocksheet show|totals|validate|summary|draft|ingest`

use std::path::Path;

use serde::Serialize;

use stocksheet_config::Settings;
use stocksheet_engine::aggregate::{column_totals, format_number, stock_summary, ColumnTotals, StockColumns};
use stocksheet_engine::draft::PeriodDraft;
use stocksheet_engine::ingest::{IngestState, Ingestor};
use stocksheet_engine::metadata::SheetDocument;
use stocksheet_engine::period::{parse_number, SubrowRecord};
use stocksheet_engine::resolve::{CrossSheetSource, NoReferences, ReferenceEntry, ReferenceMap, Resolver};
use stocksheet_engine::sheet::Sheet;

use crate::exit_codes::{EXIT_SHEET_DRAFT, EXIT_SHEET_FLAGGED, EXIT_STREAM_SKIPPED};
use crate::util::render_table;
use crate::{parse_date_arg, print_json, read_input, read_json, CliError, RangeArgs, RefsArgs};

// ============================================================================
// Loading
// ============================================================================

pub(crate) fn load_sheet(path: &Path) -> Result<Sheet, CliError> {
    let doc: SheetDocument = read_json(path)?;
    doc.into_sheet()
        .map_err(|e| CliError::invalid(format!("{}: {e}", path.display())))
}

fn load_refs(args: &RefsArgs) -> Result<Box<dyn CrossSheetSource>, CliError> {
    match &args.refs {
        None => Ok(Box::new(NoReferences)),
        Some(path) => {
            let entries: Vec<ReferenceEntry> = read_json(path)?;
            let map: ReferenceMap = entries.into_iter().collect();
            log::debug!("loaded {} reference values from {}", map.len(), path.display());
            Ok(Box::new(map))
        }
    }
}

/// Non-zero exit after output when any column was flagged.
fn flagged_error(totals: &ColumnTotals) -> Result<(), CliError> {
    let flagged: Vec<String> = totals
        .flagged()
        .filter_map(|t| t.error.as_ref().map(|e| format!("{}: {e}", t.name)))
        .collect();
    if flagged.is_empty() {
        return Ok(());
    }
    Err(CliError::with_code(EXIT_SHEET_FLAGGED, flagged.join("; "))
        .with_hint("failed cells of flagged columns resolve to 0; fix the formula and reload"))
}

// ============================================================================
// show
// ============================================================================

#[derive(Serialize)]
struct ShowRow {
    date: String,
    values: Vec<f64>,
}

#[derive(Serialize)]
struct ShowOutput {
    sheet: String,
    columns: Vec<String>,
    rows: Vec<ShowRow>,
    totals: Vec<Option<f64>>,
    flagged: Vec<String>,
}

pub(crate) fn cmd_show(path: &Path, refs: &RefsArgs, all: bool, width: usize, json: bool) -> Result<(), CliError> {
    let sheet = load_sheet(path)?;
    let source = load_refs(refs)?;
    let resolver = Resolver::for_sheet(&sheet, source.as_ref());
    let resolved = resolver.resolve_sheet();
    let totals = column_totals(sheet.columns(), &resolved, 0..resolved.values.len());

    let shown: Vec<usize> = sheet
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| all || c.is_visible())
        .map(|(i, _)| i)
        .collect();
    let dates: Vec<String> = sheet.table().iter().map(|p| p.date.to_string()).collect();

    if json {
        let output = ShowOutput {
            sheet: sheet.name.clone(),
            columns: shown.iter().map(|&i| sheet.columns()[i].name.clone()).collect(),
            rows: resolved
                .values
                .iter()
                .zip(&dates)
                .map(|(row, date)| ShowRow {
                    date: date.clone(),
                    values: shown.iter().map(|&i| row[i]).collect(),
                })
                .collect(),
            totals: shown
                .iter()
                .map(|&i| {
                    let total = &totals.columns[i];
                    (!total.is_date).then_some(total.total)
                })
                .collect(),
            flagged: resolved.flagged.keys().map(|&i| sheet.columns()[i].name.clone()).collect(),
        };
        print_json(&output)?;
        return flagged_error(&totals);
    }

    let headers: Vec<String> = shown
        .iter()
        .map(|&i| {
            let col = &sheet.columns()[i];
            if resolved.is_flagged(i) {
                format!("{}!", col.display_name())
            } else {
                col.display_name()
            }
        })
        .collect();
    let mut rows: Vec<Vec<String>> = resolved
        .values
        .iter()
        .zip(&dates)
        .map(|(row, date)| {
            shown
                .iter()
                .map(|&i| if sheet.columns()[i].is_date() { date.clone() } else { format_number(row[i]) })
                .collect()
        })
        .collect();
    rows.push(shown.iter().map(|&i| totals.columns[i].display()).collect());

    println!("{} ({} periods)", sheet.name, sheet.period_count());
    print!("{}", render_table(&headers, &rows, width.max(4)));
    flagged_error(&totals)
}

// ============================================================================
// totals
// ============================================================================

#[derive(Serialize)]
struct TotalOutput {
    column: String,
    kind: &'static str,
    total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub(crate) fn cmd_totals(path: &Path, refs: &RefsArgs, range: &RangeArgs, json: bool) -> Result<(), CliError> {
    let sheet = load_sheet(path)?;
    let source = load_refs(refs)?;
    let span = match range.range()? {
        Some(range) => sheet.table().range_indices(&range),
        None => 0..sheet.period_count(),
    };
    let resolved = Resolver::for_sheet(&sheet, source.as_ref()).resolve_sheet();
    let totals = column_totals(sheet.columns(), &resolved, span.clone());

    let visible = totals
        .columns
        .iter()
        .filter(|t| !t.is_date && sheet.columns()[t.column].is_visible());

    if json {
        let output: Vec<TotalOutput> = visible
            .map(|t| TotalOutput {
                column: t.name.clone(),
                kind: sheet.columns()[t.column].kind.label(),
                total: t.total,
                error: t.error.as_ref().map(ToString::to_string),
            })
            .collect();
        print_json(&output)?;
    } else {
        println!("{}: {} of {} periods", sheet.name, span.len(), sheet.period_count());
        let headers = vec!["Column".to_string(), "Kind".to_string(), "Total".to_string()];
        let rows: Vec<Vec<String>> = visible
            .map(|t| {
                let total = match &t.error {
                    Some(_) => "error".to_string(),
                    None => t.display(),
                };
                vec![
                    sheet.columns()[t.column].display_name(),
                    sheet.columns()[t.column].kind.label().to_string(),
                    total,
                ]
            })
            .collect();
        print!("{}", render_table(&headers, &rows, 32));
    }
    flagged_error(&totals)
}

// ============================================================================
// validate
// ============================================================================

pub(crate) fn cmd_validate(path: &Path) -> Result<(), CliError> {
    let sheet = load_sheet(path)?;
    let computed = sheet.columns().iter().filter(|c| c.kind.is_computed()).count();
    println!(
        "ok: '{}' has {} columns ({} computed) and {} periods",
        sheet.name,
        sheet.columns().len(),
        computed,
        sheet.period_count()
    );
    Ok(())
}

// ============================================================================
// summary
// ============================================================================

pub(crate) fn cmd_summary(
    path: &Path,
    refs: &RefsArgs,
    range: &RangeArgs,
    opening: Option<String>,
    closing: Option<String>,
    settings: &Settings,
    json: bool,
) -> Result<(), CliError> {
    let sheet = load_sheet(path)?;
    let source = load_refs(refs)?;
    let stock = StockColumns {
        opening: opening.unwrap_or_else(|| settings.opening_column.clone()),
        closing: closing.unwrap_or_else(|| settings.closing_column.clone()),
    };
    let range = range.range()?;
    let record = stock_summary(&sheet, source.as_ref(), &stock, range.as_ref());

    if json {
        return print_json(&record);
    }
    if !record.has_stock_columns {
        println!("{}: no '{}'/'{}' columns", record.sheet_name, stock.opening, stock.closing);
        return Ok(());
    }
    println!("{}", record.sheet_name);
    println!(
        "  opening stock  {:>12}  ({} non-zero periods)",
        format_number(record.opening_stock_total),
        record.opening_count
    );
    println!(
        "  closing stock  {:>12}  ({} non-zero periods)",
        format_number(record.closing_stock_total),
        record.closing_count
    );
    Ok(())
}

// ============================================================================
// draft
// ============================================================================

fn split_assignment<'a>(arg: &'a str, flag: &str) -> Result<(&'a str, &'a str), CliError> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim(), v))
        .ok_or_else(|| CliError::args(format!("{flag} expects COLUMN=VALUE, got '{arg}'")))
}

/// Column by name (loose match) or by position.
fn column_arg(sheet: &Sheet, name: &str) -> Result<usize, CliError> {
    sheet
        .find_column(name)
        .or_else(|| name.parse::<usize>().ok().filter(|i| *i < sheet.columns().len()))
        .ok_or_else(|| CliError::args(format!("no column '{name}' in '{}'", sheet.name)))
}

fn draft_error(err: impl std::fmt::Display) -> CliError {
    CliError::with_code(EXIT_SHEET_DRAFT, err.to_string())
}

#[derive(Serialize)]
struct DraftOutput {
    date: String,
    values: Vec<(String, f64)>,
    flagged: Vec<String>,
    committed: bool,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_draft(
    path: &Path,
    date: &str,
    set: &[String],
    subrows: &[String],
    add: &[String],
    refs: &RefsArgs,
    commit: bool,
    json: bool,
) -> Result<(), CliError> {
    let mut sheet = load_sheet(path)?;
    let source = load_refs(refs)?;
    let mut draft = PeriodDraft::new(parse_date_arg(date)?);

    for arg in set {
        let (name, value) = split_assignment(arg, "--set")?;
        let column = column_arg(&sheet, name)?;
        draft.set_input(&sheet, column, value).map_err(draft_error)?;
    }
    for arg in subrows {
        let (name, ledger) = split_assignment(arg, "--subrows")?;
        let column = column_arg(&sheet, name)?;
        let records: Vec<SubrowRecord> = serde_json::from_str(ledger)
            .map_err(|e| CliError::parse(format!("--subrows {name}: {e}")))?;
        let running = draft.set_subrows(&sheet, column, records).map_err(draft_error)?;
        log::info!("{name}: running total {}", format_number(running));
    }
    for arg in add {
        let (name, amount) = split_assignment(arg, "--add")?;
        let column = column_arg(&sheet, name)?;
        let amount = parse_number(amount)
            .ok_or_else(|| CliError::args(format!("--add {name}: '{amount}' is not a number")))?;
        let value = draft
            .add_to_recurrent(&sheet, column, amount, source.as_ref())
            .map_err(draft_error)?;
        log::info!("{name}: now {}", format_number(value));
    }

    let preview = draft.preview(&sheet, source.as_ref()).map_err(draft_error)?;
    let output = DraftOutput {
        date: draft.date().to_string(),
        values: sheet
            .columns()
            .iter()
            .zip(&preview.values)
            .filter(|(c, _)| c.is_visible() && !c.is_date())
            .map(|(c, v)| (c.name.clone(), *v))
            .collect(),
        flagged: preview.flagged.keys().map(|&i| sheet.columns()[i].name.clone()).collect(),
        committed: commit,
    };

    let mut after = None;
    if commit {
        draft.commit(&mut sheet).map_err(draft_error)?;
        let resolved = Resolver::for_sheet(&sheet, source.as_ref()).resolve_sheet();
        after = Some(column_totals(sheet.columns(), &resolved, 0..resolved.values.len()));
    }

    if json {
        print_json(&output)?;
    } else {
        println!("{} @ {}", sheet.name, output.date);
        for (name, value) in &output.values {
            println!("  {:<20} {:>12}", name, format_number(*value));
        }
        if let Some(totals) = &after {
            println!("committed; totals now:");
            for total in totals.columns.iter().filter(|t| !t.is_date && sheet.columns()[t.column].is_visible()) {
                println!("  {:<20} {:>12}", total.name, total.display());
            }
        }
    }
    if !output.flagged.is_empty() {
        return Err(CliError::with_code(EXIT_SHEET_FLAGGED, format!("flagged: {}", output.flagged.join(", "))));
    }
    Ok(())
}

// ============================================================================
// ingest
// ============================================================================

pub(crate) fn ingest_stream(stream: &str) -> Result<IngestState, CliError> {
    let text = read_input(stream)?;
    let mut ingestor = Ingestor::new();
    // feed in lines so progress can be logged as it would arrive
    for chunk in text.split_inclusive('\n') {
        if ingestor.feed(chunk) > 0 {
            if let Some(progress) = ingestor.state().progress {
                log::debug!("ingest: {}/{}", progress.processed, progress.total);
            }
        }
    }
    let state = ingestor.finish();
    if state.skipped > 0 {
        log::warn!("{} unparsable stream lines skipped", state.skipped);
    }
    Ok(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestOutput<'a> {
    sheets: &'a [stocksheet_engine::aggregate::SheetStockRecord],
    summary: Option<&'a stocksheet_engine::ingest::IngestSummary>,
    complete: bool,
    skipped: usize,
}

pub(crate) fn cmd_ingest(stream: &str, strict: bool, json: bool) -> Result<(), CliError> {
    let state = ingest_stream(stream)?;

    if json {
        print_json(&IngestOutput {
            sheets: &state.sheets,
            summary: state.summary.as_ref(),
            complete: state.is_complete(),
            skipped: state.skipped,
        })?;
    } else {
        let headers = ["Sheet", "Group", "Opening", "Closing"].map(String::from).to_vec();
        let rows: Vec<Vec<String>> = state
            .sheets
            .iter()
            .map(|s| {
                vec![
                    s.sheet_name.clone(),
                    s.group_name.clone().unwrap_or_default(),
                    format_number(s.opening_stock_total),
                    format_number(s.closing_stock_total),
                ]
            })
            .collect();
        print!("{}", render_table(&headers, &rows, 32));
        let totals = match &state.summary {
            Some(summary) => summary.aggregate_totals,
            None => state.running_totals(),
        };
        println!(
            "{} sheets{}: opening {}, closing {}, difference {}",
            state.sheets.len(),
            if state.is_complete() { "" } else { " (stream incomplete)" },
            format_number(totals.total_opening_stock),
            format_number(totals.total_closing_stock),
            format_number(totals.stock_difference),
        );
    }

    if strict && state.skipped > 0 {
        let first = state.errors.first().map(|e| format!(": {e}")).unwrap_or_default();
        return Err(CliError::with_code(
            EXIT_STREAM_SKIPPED,
            format!("{} lines skipped{first}", state.skipped),
        ));
    }
    Ok(())
}
