// Stocksheet CLI - headless sheet computation and stock reconciliation

mod exit_codes;
mod recon;
mod sheet;
mod util;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use stocksheet_config::Settings;
use stocksheet_engine::period::{parse_date, DateRange};
use stocksheet_recon::ReconError;

use exit_codes::{recon_exit_code, EXIT_IO, EXIT_PARSE, EXIT_SHEET_INVALID, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "stocksheet")]
#[command(about = "Periodic stock sheets: computed columns, totals and reconciliation (headless)")]
#[command(long_version = long_version())]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Settings file (default: <config dir>/stocksheet/settings.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every period with all columns resolved
    #[command(after_help = "\
Examples:
  stocksheet show store.sheet.json
  stocksheet show store.sheet.json --refs links.json
  stocksheet show store.sheet.json --all --json | jq '.rows[0]'")]
    Show {
        /// Sheet document (metadata + data) as JSON
        sheet: PathBuf,

        #[command(flatten)]
        refs: RefsArgs,

        /// Include hidden and deleted columns
        #[arg(long)]
        all: bool,

        /// Maximum column width in the text table
        #[arg(long, default_value_t = 16)]
        width: usize,

        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Column totals over all periods (or a date range)
    #[command(after_help = "\
Exit code 11 means at least one column failed to resolve; its failed cells \
count as 0 in the total and the error is printed.

Examples:
  stocksheet totals store.sheet.json
  stocksheet totals store.sheet.json --from 2025-01-01 --to 2025-01-31
  stocksheet totals store.sheet.json --refs links.json --json")]
    Totals {
        sheet: PathBuf,

        #[command(flatten)]
        refs: RefsArgs,

        #[command(flatten)]
        range: RangeArgs,

        #[arg(long)]
        json: bool,
    },

    /// Check column definitions and stored data without computing
    #[command(after_help = "\
Examples:
  stocksheet validate store.sheet.json")]
    Validate {
        sheet: PathBuf,
    },

    /// Opening/closing stock record for one sheet
    #[command(after_help = "\
Opening stock is read at the first period in range, closing stock at the last.

Examples:
  stocksheet summary store.sheet.json --from 2025-01-01 --to 2025-01-31
  stocksheet summary store.sheet.json --opening open --closing close --json")]
    Summary {
        sheet: PathBuf,

        #[command(flatten)]
        refs: RefsArgs,

        #[command(flatten)]
        range: RangeArgs,

        /// Opening stock column (default from settings)
        #[arg(long)]
        opening: Option<String>,

        /// Closing stock column (default from settings)
        #[arg(long)]
        closing: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Preview (and optionally commit) a new period
    #[command(after_help = "\
Only entry columns accept values: independent columns, and recurrent columns
that are not fed automatically. Subrow ledgers are given as a JSON array.
The date must be after the sheet's latest period.

Examples:
  stocksheet draft store.sheet.json --date 2025-01-05 --set received=12
  stocksheet draft store.sheet.json --date 2025-01-05 \\
      --subrows 'used=[{\"item\":\"flour\",\"qty\":4}]'
  stocksheet draft store.sheet.json --date 2025-01-05 --add carried=4
  stocksheet draft store.sheet.json --date 2025-01-05 --set received=12 --commit")]
    Draft {
        sheet: PathBuf,

        /// Date of the new period
        #[arg(long)]
        date: String,

        /// Column value, as COLUMN=VALUE. Repeatable.
        #[arg(long, value_name = "COLUMN=VALUE")]
        set: Vec<String>,

        /// Subrow ledger, as COLUMN=JSON. Repeatable.
        #[arg(long, value_name = "COLUMN=JSON")]
        subrows: Vec<String>,

        /// Add an amount to a recurrent column's carried value, as COLUMN=AMOUNT.
        #[arg(long, value_name = "COLUMN=AMOUNT")]
        add: Vec<String>,

        #[command(flatten)]
        refs: RefsArgs,

        /// Commit the draft and print the new totals
        #[arg(long)]
        commit: bool,

        #[arg(long)]
        json: bool,
    },

    /// Read a streamed bulk fetch and print its sheet records
    #[command(after_help = "\
Unparsable lines are skipped and counted. With --strict, any skipped line
exits with code 5 after printing.

Examples:
  stocksheet ingest stock.sse
  stocksheet ingest stock.sse --json > snapshot.json")]
    Ingest {
        /// SSE text file, or - for stdin
        stream: String,

        /// Fail if any line was skipped
        #[arg(long)]
        strict: bool,

        #[arg(long)]
        json: bool,
    },

    /// Reconcile computed stock totals against counted values
    Recon {
        #[command(flatten)]
        store: recon::StoreArgs,

        #[command(subcommand)]
        command: recon::ReconCommands,
    },
}

/// Values of referenced columns, keyed by linked sheet, column and date.
#[derive(Args, Debug, Clone, Default)]
pub struct RefsArgs {
    /// JSON array of {sheetId, column, date, value}
    #[arg(long, value_name = "FILE")]
    refs: Option<PathBuf>,
}

/// Inclusive date range. Either bound may be left open.
#[derive(Args, Debug, Clone, Default)]
pub struct RangeArgs {
    /// First date in range
    #[arg(long)]
    from: Option<String>,

    /// Last date in range
    #[arg(long)]
    to: Option<String>,
}

impl RangeArgs {
    pub fn range(&self) -> Result<Option<DateRange>, CliError> {
        if self.from.is_none() && self.to.is_none() {
            return Ok(None);
        }
        let start = self.from.as_deref().map(parse_date_arg).transpose()?.unwrap_or(NaiveDate::MIN);
        let end = self.to.as_deref().map(parse_date_arg).transpose()?.unwrap_or(NaiveDate::MAX);
        if start > end {
            return Err(CliError::args(format!("--from {start} is after --to {end}")));
        }
        Ok(Some(DateRange::new(start, end)))
    }
}

pub fn parse_date_arg(value: &str) -> Result<NaiveDate, CliError> {
    parse_date(value).ok_or_else(|| {
        CliError::args(format!("invalid date '{value}'"))
            .with_hint("use YYYY-MM-DD, DD-MM-YYYY or '5 Jan 2025'")
    })
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            "\nengine:  stocksheet-engine ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   debug",
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            "\nengine:  stocksheet-engine ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   release",
        )
    }
}

fn load_settings(path: Option<&Path>) -> Settings {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

/// RUST_LOG wins over the settings file.
fn init_logging(settings: &Settings) {
    let env = env_logger::Env::default().default_filter_or(settings.log_level.as_str());
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref());
    init_logging(&settings);

    let result = match cli.command {
        None => {
            // No subcommand = show help
            eprintln!("Usage: stocksheet <command> [options]");
            eprintln!("       stocksheet --help for more information");
            Ok(())
        }
        Some(Commands::Show { sheet: path, refs, all, width, json }) => sheet::cmd_show(&path, &refs, all, width, json),
        Some(Commands::Totals { sheet: path, refs, range, json }) => sheet::cmd_totals(&path, &refs, &range, json),
        Some(Commands::Validate { sheet: path }) => sheet::cmd_validate(&path),
        Some(Commands::Summary { sheet: path, refs, range, opening, closing, json }) => {
            sheet::cmd_summary(&path, &refs, &range, opening, closing, &settings, json)
        }
        Some(Commands::Draft { sheet: path, date, set, subrows, add, refs, commit, json }) => {
            sheet::cmd_draft(&path, &date, &set, &subrows, &add, &refs, commit, json)
        }
        Some(Commands::Ingest { stream, strict, json }) => sheet::cmd_ingest(&stream, strict, json),
        Some(Commands::Recon { store, command }) => recon::cmd_recon(command, &store, &settings),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self { code: EXIT_PARSE, message: msg.into(), hint: None }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self { code: EXIT_SHEET_INVALID, message: msg.into(), hint: None }
    }

    pub fn with_code(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    /// Create error from a reconciliation error with the proper exit code.
    pub fn recon(err: ReconError) -> Self {
        let code = recon_exit_code(&err);
        let hint = match &err {
            ReconError::Persistence(stocksheet_recon::PersistenceError::Missing(_)) => {
                Some("start one with `stocksheet recon start <stream>`".to_string())
            }
            ReconError::Validation(stocksheet_recon::ValidationError::UnknownSheet(_)) => {
                Some("`stocksheet recon status` lists the sheets".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Read a whole file, or stdin for `-`.
pub fn read_input(path: &str) -> Result<String, CliError> {
    if path == "-" {
        let mut text = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut text)
            .map_err(|e| CliError::io(format!("cannot read stdin: {e}")))?;
        return Ok(text);
    }
    std::fs::read_to_string(path).map_err(|e| CliError::io(format!("cannot read {path}: {e}")))
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| CliError::parse(format!("{}: {e}", path.display())))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::with_code(exit_codes::EXIT_ERROR, format!("JSON serialization error: {e}")))?;
    println!("{text}");
    Ok(())
}
