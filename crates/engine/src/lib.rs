pub mod aggregate;
pub mod column;
pub mod draft;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod period;
pub mod resolve;
pub mod sheet;
pub mod validation;

pub use error::{FormulaError, ValidationError};
