//! FILENAME: persistence/src/lib.rs
//! PURPOSE: Workbook persistence layer (JSON contents format).
//! CONTEXT: Loads and saves workbook *contents*, never evaluated values,
//! so a loaded workbook re-derives every formula value through the engine's
//! update driver.

pub mod error;
pub mod json;

pub use error::PersistenceError;
pub use json::{load_workbook, save_workbook};
