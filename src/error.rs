use std::path::Path;

use thiserror::Error;

pub type SheetResult<T> = Result<T, SheetError>;

/// Severity code shared by every engine failure ("operation failed").
pub const OPERATION_FAILED: u16 = 500;

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Error unable to read file: `{0}`")]
    FileNotReadable(String),

    #[error("Unable to write to: `{0}`")]
    FileNotWritable(String),

    #[error("Unable to identify a reader for this file: `{0}`")]
    FormatUnrecognized(String),

    #[error("You tried to set a sheet active by the out of bounds index: {index}. The actual number of sheets is {count}.")]
    SheetIndexOutOfBounds { index: usize, count: usize },

    #[error("Cells longer than header row. Row:{0}")]
    ColumnMismatch(usize),

    #[error("Unknown type: `{0}`")]
    UnknownOutputType(String),

    #[error("Unable to save the spreadsheet. Set the filePath first.")]
    NoFilePath,

    #[error("Invalid or empty CSV String")]
    EmptyInput,

    #[error("Issue with cell `{address}` value of `{value}`")]
    CellWrite { address: String, value: String },

    #[error("{0}")]
    UnderlyingFormat(String),

    #[error("Spreadsheet unavailable after a failed load: {0}")]
    NotLoaded(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SheetError {
    pub fn not_readable(path: &Path) -> Self {
        SheetError::FileNotReadable(path.display().to_string())
    }

    pub fn not_writable(path: &Path) -> Self {
        SheetError::FileNotWritable(path.display().to_string())
    }

    pub fn cell_write(address: impl Into<String>, value: impl ToString) -> Self {
        SheetError::CellWrite {
            address: address.into(),
            value: value.to_string(),
        }
    }

    /// Wrap a container parser failure raised while loading `path`.
    pub fn load_failed(path: &Path, reason: impl std::fmt::Display) -> Self {
        SheetError::UnderlyingFormat(format!(
            "Error when loading excel file: Error: `{}`. File: `{}`",
            reason,
            path.display()
        ))
    }

    /// Wrap an encoder failure raised while producing `kind` output.
    pub fn encode_failed(kind: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        SheetError::UnderlyingFormat(format!(
            "Error when encoding {} output: `{}`",
            kind, reason
        ))
    }

    /// Every failure maps to the same severity class.
    pub fn code(&self) -> u16 {
        OPERATION_FAILED
    }
}
