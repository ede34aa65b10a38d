//! `stocksheet-recon`: counted vs computed stock totals.
//!
//! Seeds a session from per-sheet stock records, tracks typed counts and
//! their variance, and persists progress through an injected key-value
//! store. No CLI dependencies.

pub mod error;
pub mod filter;
pub mod model;
pub mod report;
pub mod session;
pub mod store;

pub use error::{PersistenceError, ReconError, ValidationError};
pub use filter::{GroupFilter, SheetFilter, SortConfig};
pub use model::{CountField, GroupTotals, ReconSheet, SourceSnapshot, VarianceTotals};
pub use session::{ReconSession, Restored, SessionState};
pub use store::KeyValueStore;
