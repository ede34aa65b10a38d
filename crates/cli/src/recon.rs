//! `stocksheet recon`: counted vs computed stock, persisted between runs.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;

use stocksheet_config::{Settings, StoreBackend};
use stocksheet_engine::aggregate::format_number;
use stocksheet_recon::filter::{paginate, GroupFilter, SortDirection, SortKey};
use stocksheet_recon::report::Report;
use stocksheet_recon::store::{JsonDirStore, KeyValueStore, MemoryStore, SqliteStore, PROGRESS_KEY};
use stocksheet_recon::{
    CountField, GroupTotals, PersistenceError, ReconError, ReconSession, SheetFilter, SortConfig, SourceSnapshot,
};

use crate::exit_codes::{EXIT_IO, EXIT_RECON_INPUT};
use crate::sheet::ingest_stream;
use crate::util::render_table;
use crate::{print_json, CliError, RangeArgs};

/// Where progress is kept. Defaults come from settings.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Store directory (default: recon.storeDir setting)
    #[arg(long, global = true, value_name = "DIR")]
    store_dir: Option<PathBuf>,

    /// memory, json or sqlite (default: recon.backend setting)
    #[arg(long, global = true)]
    backend: Option<StoreBackend>,
}

/// Which sheets a listing, total or export covers.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Case-insensitive substring of the sheet name
    #[arg(long, default_value = "")]
    search: String,

    /// Group name, or "all"
    #[arg(long, default_value = "all")]
    group: String,

    /// Only these sheets. Repeatable.
    #[arg(long = "sheet", value_name = "NAME")]
    sheets: Vec<String>,

    /// Sort key within each group (sheetName, openingStockTotal, closingDifference, ...)
    #[arg(long)]
    sort: Option<SortKey>,

    /// Sort descending
    #[arg(long)]
    desc: bool,
}

impl FilterArgs {
    fn filter(&self) -> SheetFilter {
        let filter = SheetFilter::all()
            .with_search(self.search.clone())
            .with_group(GroupFilter::parse(&self.group));
        if self.sheets.is_empty() {
            filter
        } else {
            filter.with_selected(self.sheets.iter().cloned())
        }
    }

    fn sort(&self) -> SortConfig {
        SortConfig {
            key: self.sort,
            direction: if self.desc { SortDirection::Desc } else { SortDirection::Asc },
        }
    }
}

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Seed a reconciliation from a streamed bulk fetch
    #[command(after_help = "\
Refuses to replace a reconciliation in progress unless --force is given.

Examples:
  stocksheet recon start stock.sse --from 2025-03-01 --to 2025-03-31
  stocksheet recon --backend sqlite start stock.sse --force")]
    Start {
        /// SSE text file, or - for stdin
        stream: String,

        /// Date range the totals were computed over (recorded only)
        #[command(flatten)]
        range: RangeArgs,

        /// Discard any saved progress
        #[arg(long)]
        force: bool,
    },

    /// Record a counted value for a sheet
    #[command(after_help = "\
The value is kept exactly as typed; text that does not start with a number
counts as 0.

Examples:
  stocksheet recon count 'Main Bar' closing 92
  stocksheet recon count Kitchen opening '41.5'")]
    Count {
        /// Sheet name
        sheet: String,

        /// opening or closing
        field: CountField,

        /// Counted value
        value: String,
    },

    /// List sheets with totals, counts and variance, then a per-group rollup
    #[command(after_help = "\
Examples:
  stocksheet recon status
  stocksheet recon status --group Front --sort closingDifference --desc
  stocksheet recon status --search bar --page 2 --json")]
    Status {
        #[command(flatten)]
        filter: FilterArgs,

        /// Page to show (rows per page from settings)
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        json: bool,
    },

    /// Write the variance report as CSV
    #[command(after_help = "\
Examples:
  stocksheet recon export -o recon.csv
  stocksheet recon export --group Back --sort sheetName")]
    Export {
        #[command(flatten)]
        filter: FilterArgs,

        /// Output file (omit for stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Save progress and close the reconciliation
    Save,

    /// Discard the reconciliation and its saved source
    Clear,
}

pub fn cmd_recon(cmd: ReconCommands, store_args: &StoreArgs, settings: &Settings) -> Result<(), CliError> {
    let mut store = open_store(store_args, settings)?;
    match cmd {
        ReconCommands::Start { stream, range, force } => cmd_start(store.as_mut(), &stream, &range, force),
        ReconCommands::Count { sheet, field, value } => cmd_count(store.as_mut(), &sheet, field, &value),
        ReconCommands::Status { filter, page, json } => {
            cmd_status(store.as_ref(), &filter, page, settings.rows_per_page, json)
        }
        ReconCommands::Export { filter, output } => cmd_export(store.as_ref(), &filter, output),
        ReconCommands::Save => cmd_save(store.as_mut()),
        ReconCommands::Clear => cmd_clear(store.as_mut()),
    }
}

fn open_store(args: &StoreArgs, settings: &Settings) -> Result<Box<dyn KeyValueStore>, CliError> {
    let dir = args.store_dir.clone().unwrap_or_else(|| settings.effective_store_dir());
    let backend = args.backend.unwrap_or(settings.backend);
    log::debug!("recon store: {backend:?} at {}", dir.display());
    Ok(match backend {
        StoreBackend::Memory => {
            log::warn!("memory store: progress is not kept after this command");
            Box::new(MemoryStore::new())
        }
        StoreBackend::Json => Box::new(JsonDirStore::new(dir.join("recon"))),
        StoreBackend::Sqlite => Box::new(
            SqliteStore::open(&dir.join("recon.db")).map_err(|e| CliError::recon(ReconError::Persistence(e)))?,
        ),
    })
}

/// Continue the saved reconciliation. Nothing saved is an error here.
fn resume(store: &dyn KeyValueStore) -> Result<ReconSession, CliError> {
    let restored = ReconSession::restore(store);
    if restored.session.sheets().is_empty() {
        let err = restored.warning.unwrap_or(PersistenceError::Missing(PROGRESS_KEY));
        return Err(CliError::recon(ReconError::Persistence(err)));
    }
    if let Some(warning) = &restored.warning {
        eprintln!("warning: {warning}");
    }
    Ok(restored.session)
}

fn persist(session: &ReconSession, store: &mut dyn KeyValueStore) -> Result<(), CliError> {
    session.persist(store).map_err(|e| CliError::recon(e.into()))
}

// ============================================================================
// start
// ============================================================================

fn cmd_start(store: &mut dyn KeyValueStore, stream: &str, range: &RangeArgs, force: bool) -> Result<(), CliError> {
    let existing = ReconSession::restore(store).session;
    if !existing.sheets().is_empty() && !force {
        return Err(CliError::with_code(
            EXIT_RECON_INPUT,
            format!("a reconciliation of {} sheets is in progress", existing.sheets().len()),
        )
        .with_hint("continue it with `stocksheet recon status`, or pass --force to replace it"));
    }

    let range = range.range()?;
    let state = ingest_stream(stream)?;
    if !state.is_complete() {
        eprintln!("warning: stream ended before its summary; using {} sheets received", state.sheets.len());
    }
    let session = ReconSession::start_fresh(SourceSnapshot::from_ingest(&state, range, Utc::now()));
    persist(&session, store)?;

    println!(
        "started reconciliation of {} sheets in {} groups",
        session.sheets().len(),
        session.groups().len()
    );
    if state.skipped > 0 {
        println!("({} stream lines skipped)", state.skipped);
    }
    Ok(())
}

// ============================================================================
// count
// ============================================================================

fn cmd_count(store: &mut dyn KeyValueStore, sheet: &str, field: CountField, value: &str) -> Result<(), CliError> {
    let mut session = resume(store)?;
    session
        .set_counted(sheet, field, value)
        .map_err(|e| CliError::recon(e.into()))?;
    persist(&session, store)?;

    if let Some(s) = session.sheet(sheet) {
        println!(
            "{} {}: total {}, counted {}, difference {}",
            s.name(),
            field.label(),
            format_number(s.total(field)),
            format_number(s.counted(field)),
            format_number(s.variance(field)),
        );
    }
    Ok(())
}

// ============================================================================
// status
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput<'a> {
    state: String,
    page: usize,
    total_pages: usize,
    sheets: Vec<&'a stocksheet_recon::ReconSheet>,
    totals: stocksheet_recon::model::VarianceTotals,
    groups: Vec<GroupTotals>,
}

fn cmd_status(
    store: &dyn KeyValueStore,
    filter_args: &FilterArgs,
    page: usize,
    rows_per_page: usize,
    json: bool,
) -> Result<(), CliError> {
    let session = resume(store)?;
    let filter = filter_args.filter();
    let view = session.view(&filter, &filter_args.sort());
    let totals = session.aggregate_variance(&filter);
    let groups = session.group_totals(&filter);
    let page = paginate(&view, rows_per_page, page);

    if json {
        return print_json(&StatusOutput {
            state: session.state().to_string(),
            page: page.page,
            total_pages: page.total_pages,
            sheets: page.items.to_vec(),
            totals,
            groups,
        });
    }

    let headers = ["Sheet", "Group", "Opening", "Counted", "Diff", "Closing", "Counted", "Diff"]
        .map(String::from)
        .to_vec();
    let mut rows: Vec<Vec<String>> = page
        .items
        .iter()
        .map(|s| {
            vec![
                s.name().to_string(),
                session.group_of(s).unwrap_or(stocksheet_recon::filter::UNGROUPED).to_string(),
                format_number(s.total(CountField::Opening)),
                s.counted_input(CountField::Opening).to_string(),
                format_number(s.opening_difference),
                format_number(s.total(CountField::Closing)),
                s.counted_input(CountField::Closing).to_string(),
                format_number(s.closing_difference),
            ]
        })
        .collect();
    rows.push(vec![
        format!("Total ({})", totals.sheets),
        String::new(),
        format_number(totals.opening_stock),
        format_number(totals.recon_opening),
        format_number(totals.opening_difference),
        format_number(totals.closing_stock),
        format_number(totals.recon_closing),
        format_number(totals.closing_difference),
    ]);
    print!("{}", render_table(&headers, &rows, 24));
    if page.total_pages > 1 {
        println!("page {} of {}", page.page, page.total_pages);
    }

    let headers = ["Group", "Sheets", "Active", "Opening", "Closing", "Variance", "Variance %", "Avg Stock"]
        .map(String::from)
        .to_vec();
    let rows: Vec<Vec<String>> = groups
        .iter()
        .map(|g| {
            vec![
                g.group_name.clone(),
                g.total_sheets.to_string(),
                format!("{:.0}%", g.completion_rate),
                format_number(g.total_opening),
                format_number(g.total_closing),
                format_number(g.variance),
                format!("{:.1}%", g.variance_percentage),
                format_number(g.average_stock),
            ]
        })
        .collect();
    println!();
    print!("{}", render_table(&headers, &rows, 24));
    Ok(())
}

// ============================================================================
// export / save / clear
// ============================================================================

fn cmd_export(store: &dyn KeyValueStore, filter_args: &FilterArgs, output: Option<PathBuf>) -> Result<(), CliError> {
    let session = resume(store)?;
    let report = Report::build(&session, &filter_args.filter(), &filter_args.sort());
    match output {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .map_err(|e| CliError::with_code(EXIT_IO, format!("cannot write {}: {e}", path.display())))?;
            report.write_csv(file).map_err(CliError::recon)?;
            eprintln!("wrote {} rows to {}", report.rows.len(), path.display());
        }
        None => report.write_csv(std::io::stdout().lock()).map_err(CliError::recon)?,
    }
    Ok(())
}

fn cmd_save(store: &mut dyn KeyValueStore) -> Result<(), CliError> {
    let mut session = resume(store)?;
    session.save_and_exit(store).map_err(|e| CliError::recon(e.into()))?;
    println!("saved reconciliation of {} sheets", session.sheets().len());
    Ok(())
}

fn cmd_clear(store: &mut dyn KeyValueStore) -> Result<(), CliError> {
    let mut session = ReconSession::restore(store).session;
    session.clear(store).map_err(|e| CliError::recon(e.into()))?;
    println!("reconciliation cleared");
    Ok(())
}
