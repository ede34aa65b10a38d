//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | input            | Reading and parsing input files          |
//! | 10-19   | sheet            | Column validation and formula errors     |
//! | 20-29   | recon            | Reconciliation session and store codes   |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use stocksheet_recon::{PersistenceError, ReconError};

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Input (3-9)
// =============================================================================

/// Cannot read or write a file.
pub const EXIT_IO: u8 = 3;

/// Input file is not valid JSON for its expected shape.
pub const EXIT_PARSE: u8 = 4;

/// Stream had unparsable lines (only with --strict).
pub const EXIT_STREAM_SKIPPED: u8 = 5;

// =============================================================================
// Sheet (10-19)
// =============================================================================

/// Column definitions or stored data rejected.
pub const EXIT_SHEET_INVALID: u8 = 10;

/// A column failed to resolve (cycle or out-of-range index).
/// Values are still printed; the exit code reports the flag.
pub const EXIT_SHEET_FLAGGED: u8 = 11;

/// Draft input rejected (locked column, duplicate date, missing field).
pub const EXIT_SHEET_DRAFT: u8 = 12;

// =============================================================================
// Recon (20-29)
// =============================================================================

/// No reconciliation in progress (nothing saved, nothing to continue).
pub const EXIT_RECON_NONE: u8 = 20;

/// Count rejected (unknown sheet, session closed).
pub const EXIT_RECON_INPUT: u8 = 21;

/// Store read/write failure or corrupt saved blob.
pub const EXIT_RECON_STORE: u8 = 22;

/// Report export failed.
pub const EXIT_RECON_EXPORT: u8 = 23;

// =============================================================================
// Error mapping
// =============================================================================

/// Map a reconciliation error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::Validation(_) => EXIT_RECON_INPUT,
        ReconError::Persistence(PersistenceError::Missing(_)) => EXIT_RECON_NONE,
        ReconError::Persistence(_) => EXIT_RECON_STORE,
        ReconError::Export(_) => EXIT_RECON_EXPORT,
    }
}
