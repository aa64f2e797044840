//! FILENAME: persistence/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid workbook shape: {0}")]
    Shape(String),

    #[error("Invalid cell location: {0}")]
    InvalidLocation(String),

    #[error("Workbook error: {0}")]
    Workbook(#[from] engine::WorkbookError),
}
