//! Error types for walbridge-ingest

use thiserror::Error;

/// Failure to encode an event as a protocol line.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineError {
    #[error("Table name must not be empty")]
    EmptyTable,

    #[error("Line for table '{0}' has no fields")]
    NoFields(String),

    #[error("Invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("Invalid value for tag '{0}': line breaks are not allowed")]
    InvalidTagValue(String),

    #[error("Field '{0}' is not a finite number")]
    NonFinite(String),

    #[error("Unsupported value for field '{0}'")]
    UnsupportedValue(String),
}

pub type LineResult<T> = Result<T, LineError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Line error: {0}")]
    Line(#[from] LineError),

    #[error("Transmission error: {0}")]
    Transmission(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
