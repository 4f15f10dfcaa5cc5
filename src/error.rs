use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SalesEngineError {
    #[error("Workbook not found: {0}")]
    WorkbookNotFound(PathBuf),

    #[error("Unable to read workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Workbook {0} contains no worksheets")]
    EmptyWorkbook(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Engine has been shut down")]
    ShutDown,

    #[cfg(feature = "watch")]
    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SalesEngineError>;
