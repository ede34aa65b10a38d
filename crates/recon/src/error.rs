use std::fmt;

use crate::session::SessionState;

/// Bad input to a reconciliation session. Reported inline, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// No sheet with this name is in the session.
    UnknownSheet(String),
    /// Counts cannot change after save-and-exit or clear.
    SessionClosed(SessionState),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSheet(name) => write!(f, "no sheet named '{name}' in this reconciliation"),
            Self::SessionClosed(SessionState::Cleared) => {
                write!(f, "reconciliation was cleared; start a new one")
            }
            Self::SessionClosed(state) => {
                write!(f, "reconciliation is {state}; restore it before editing")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Saved-session problems. Callers fall back to an empty session.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceError {
    /// Nothing stored under this key.
    Missing(&'static str),
    /// Stored blob did not decode.
    Corrupt { key: &'static str, reason: String },
    /// The store itself failed (I/O, SQLite).
    Store(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "no saved data under '{key}'"),
            Self::Corrupt { key, reason } => write!(f, "saved data under '{key}' is corrupt: {reason}"),
            Self::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

#[derive(Debug)]
pub enum ReconError {
    Validation(ValidationError),
    Persistence(PersistenceError),
    /// Writing the report failed.
    Export(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Persistence(err) => write!(f, "{err}"),
            Self::Export(msg) => write!(f, "export error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}

impl From<ValidationError> for ReconError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<PersistenceError> for ReconError {
    fn from(err: PersistenceError) -> Self {
        Self::Persistence(err)
    }
}
