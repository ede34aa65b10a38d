//! Reconciliation session lifecycle.
//!
//! ```text
//! Fresh ──set_counted──▶ Editing ──save_and_exit──▶ SavedAndExited
//!   │                      │                              │
//!   └──────clear───────────┴──────────clear───────────────┴──▶ Cleared
//! ```
//!
//! A saved session is continued by `restore`-ing it from the store.
//! `Cleared` is terminal.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{PersistenceError, ValidationError};
use crate::filter::{sort_sheets, SheetFilter, SortConfig, UNGROUPED};
use crate::model::{CountField, GroupTotals, ReconSheet, SourceSnapshot, VarianceTotals};
use crate::store::{KeyValueStore, PROGRESS_KEY, SOURCE_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Editing,
    SavedAndExited,
    Cleared,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fresh => "fresh",
            Self::Editing => "editing",
            Self::SavedAndExited => "saved",
            Self::Cleared => "cleared",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconSession {
    state: SessionState,
    sheets: Vec<ReconSheet>,
    source: Option<SourceSnapshot>,
}

/// Result of [`ReconSession::restore`]. The session is always usable;
/// `warning` says what was missing or unreadable.
#[derive(Debug, Clone, PartialEq)]
pub struct Restored {
    pub session: ReconSession,
    pub warning: Option<PersistenceError>,
}

impl ReconSession {
    /// Seed from a snapshot: counts empty, variances 0.
    pub fn start_fresh(source: SourceSnapshot) -> Self {
        let sheets = source.sheets.iter().cloned().map(ReconSheet::fresh).collect();
        Self {
            state: SessionState::Fresh,
            sheets,
            source: Some(source),
        }
    }

    /// No sheets, no source.
    pub fn empty() -> Self {
        Self {
            state: SessionState::Fresh,
            sheets: Vec::new(),
            source: None,
        }
    }

    /// Load saved progress. Never fails: unreadable or missing data falls
    /// back to the saved source (re-seeded fresh) or to an empty session.
    pub fn restore(store: &dyn KeyValueStore) -> Restored {
        let source = match read_blob::<SourceSnapshot>(store, SOURCE_KEY) {
            Ok(source) => source,
            Err(err) => {
                log::warn!("ignoring saved reconciliation source: {err}");
                None
            }
        };
        let (sheets, warning) = match read_blob::<Vec<ReconSheet>>(store, PROGRESS_KEY) {
            Ok(Some(sheets)) => (Some(sheets), None),
            Ok(None) => (None, Some(PersistenceError::Missing(PROGRESS_KEY))),
            Err(err) => (None, Some(err)),
        };

        let session = match (sheets, source) {
            (Some(sheets), source) => {
                log::info!("restored reconciliation with {} sheets", sheets.len());
                Self {
                    state: SessionState::Editing,
                    sheets,
                    source,
                }
            }
            (None, Some(source)) => {
                log::info!("no saved progress; re-seeding from saved source");
                Self::start_fresh(source)
            }
            (None, None) => Self::empty(),
        };
        if let Some(err) = &warning {
            log::warn!("restore: {err}");
        }
        Restored { session, warning }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sheets(&self) -> &[ReconSheet] {
        &self.sheets
    }

    pub fn source(&self) -> Option<&SourceSnapshot> {
        self.source.as_ref()
    }

    pub fn sheet(&self, name: &str) -> Option<&ReconSheet> {
        self.sheets.iter().find(|s| s.name() == name)
    }

    /// Group from sheet metadata, falling back to the sheet record.
    pub fn group_of<'a>(&'a self, sheet: &'a ReconSheet) -> Option<&'a str> {
        self.source
            .as_ref()
            .and_then(|s| s.group_of(sheet.name()))
            .or(sheet.record.group_name.as_deref())
    }

    /// Distinct group names, sorted.
    pub fn groups(&self) -> Vec<String> {
        let groups: BTreeSet<&str> = self.sheets.iter().filter_map(|s| self.group_of(s)).collect();
        groups.into_iter().map(String::from).collect()
    }

    /// Distinct sheet names, sorted.
    pub fn sheet_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.sheets.iter().map(|s| s.name()).collect();
        names.into_iter().map(String::from).collect()
    }

    /// Record a count as typed. Every sheet with this name is updated.
    pub fn set_counted(&mut self, sheet_name: &str, field: CountField, input: &str) -> Result<(), ValidationError> {
        if matches!(self.state, SessionState::SavedAndExited | SessionState::Cleared) {
            return Err(ValidationError::SessionClosed(self.state));
        }
        let mut found = false;
        for sheet in self.sheets.iter_mut().filter(|s| s.name() == sheet_name) {
            sheet.set_count(field, input);
            found = true;
        }
        if !found {
            return Err(ValidationError::UnknownSheet(sheet_name.to_string()));
        }
        log::debug!("{sheet_name}: {} count set to '{input}'", field.label());
        self.state = SessionState::Editing;
        Ok(())
    }

    /// Sheets passing the filter, sorted by group then `sort`.
    pub fn view(&self, filter: &SheetFilter, sort: &SortConfig) -> Vec<&ReconSheet> {
        let mut view: Vec<&ReconSheet> = self
            .sheets
            .iter()
            .filter(|s| filter.matches(s, self.group_of(s)))
            .collect();
        sort_sheets(&mut view, |s| self.group_of(s), sort);
        view
    }

    /// Sums over exactly the filtered sheets.
    pub fn aggregate_variance(&self, filter: &SheetFilter) -> VarianceTotals {
        self.sheets
            .iter()
            .filter(|s| filter.matches(s, self.group_of(s)))
            .collect()
    }

    /// Per-group stock rollup over the filtered sheets, by group name.
    /// Sheets without a group land in [`UNGROUPED`].
    pub fn group_totals(&self, filter: &SheetFilter) -> Vec<GroupTotals> {
        let mut groups: BTreeMap<&str, GroupTotals> = BTreeMap::new();
        for sheet in self.sheets.iter().filter(|s| filter.matches(s, self.group_of(s))) {
            let name = self.group_of(sheet).unwrap_or(UNGROUPED);
            groups.entry(name).or_insert_with(|| GroupTotals::new(name)).add(sheet);
        }
        groups.into_values().collect()
    }

    /// Write both blobs.
    pub fn persist(&self, store: &mut dyn KeyValueStore) -> Result<(), PersistenceError> {
        if self.state == SessionState::Cleared {
            return Ok(());
        }
        store.set(PROGRESS_KEY, &to_json(&self.sheets)?)?;
        if let Some(source) = &self.source {
            store.set(SOURCE_KEY, &to_json(source)?)?;
        }
        Ok(())
    }

    pub fn save_and_exit(&mut self, store: &mut dyn KeyValueStore) -> Result<(), PersistenceError> {
        if self.state == SessionState::Cleared {
            return Ok(());
        }
        store.set(PROGRESS_KEY, &to_json(&self.sheets)?)?;
        self.state = SessionState::SavedAndExited;
        log::info!("reconciliation saved ({} sheets)", self.sheets.len());
        Ok(())
    }

    /// Remove both blobs and drop all data.
    pub fn clear(&mut self, store: &mut dyn KeyValueStore) -> Result<(), PersistenceError> {
        store.remove(PROGRESS_KEY)?;
        store.remove(SOURCE_KEY)?;
        self.sheets.clear();
        self.source = None;
        self.state = SessionState::Cleared;
        log::info!("reconciliation cleared");
        Ok(())
    }
}

fn read_blob<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &'static str,
) -> Result<Option<T>, PersistenceError> {
    let Some(text) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|err| PersistenceError::Corrupt { key, reason: err.to_string() })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|e| PersistenceError::Store(e.to_string()))
}

/// A session that writes both blobs after every count change.
pub struct AutosaveSession<'s> {
    session: ReconSession,
    store: &'s mut dyn KeyValueStore,
}

impl<'s> AutosaveSession<'s> {
    pub fn new(session: ReconSession, store: &'s mut dyn KeyValueStore) -> Self {
        Self { session, store }
    }

    pub fn session(&self) -> &ReconSession {
        &self.session
    }

    /// A failed write is logged; the in-memory change stands.
    pub fn set_counted(&mut self, sheet_name: &str, field: CountField, input: &str) -> Result<(), ValidationError> {
        self.session.set_counted(sheet_name, field, input)?;
        if let Err(err) = self.session.persist(self.store) {
            log::warn!("autosave failed: {err}");
        }
        Ok(())
    }

    pub fn save_and_exit(mut self) -> Result<ReconSession, PersistenceError> {
        self.session.save_and_exit(self.store)?;
        Ok(self.session)
    }

    pub fn clear(mut self) -> Result<ReconSession, PersistenceError> {
        self.session.clear(self.store)?;
        Ok(self.session)
    }

    pub fn into_inner(self) -> ReconSession {
        self.session
    }
}
