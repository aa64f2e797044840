//! FILENAME: engine/src/error.rs
//! PURPOSE: Structural error categories for the public workbook API.
//! CONTEXT: These are errors raised to the *caller* for invalid API input
//! (bad locations, unknown sheets, bad sort specs). Errors that live inside
//! cells (#REF!, #DIV/0!, ...) are values, not Err variants; see cell.rs.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sheet not found: {0}")]
    NotFound(String),

    #[error("Index out of range: {0}")]
    OutOfRange(usize),

    #[error("Sheet name invalid or not unique: {0}")]
    Conflict(String),
}
