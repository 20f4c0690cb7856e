//! Error types for walbridge-sync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Schema error for table '{table}': {message}")]
    Schema { table: String, message: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Unknown location '{0}' (only 'main' is served)")]
    UnknownLocation(String),

    #[error("Decode error in column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("Watcher for table '{0}' terminated unexpectedly")]
    Watcher(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is worth a resubscription by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Query(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
