//! Common types for walbridge-sync

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::BridgeError;

/// Name of the only location served per table.
pub const MAIN_LOCATION: &str = "main";

/// Identifies a logical table by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    name: String,
}

impl TableKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for TableKey {
    fn from(name: &str) -> Self {
        TableKey::new(name)
    }
}

/// Identifies a physical partition of a table. Tables are not partitioned,
/// so the only valid key is [`LocationKey::main`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationKey {
    id: String,
}

impl LocationKey {
    pub fn main() -> Self {
        Self {
            id: MAIN_LOCATION.to_string(),
        }
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_main(&self) -> bool {
        self.id == MAIN_LOCATION
    }
}

impl Default for LocationKey {
    fn default() -> Self {
        Self::main()
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Column name and type as reported by the store's metadata tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreColumn {
    pub name: String,
    pub data_type: String,
}

impl StoreColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// One entry of the store's write-ahead transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalTransaction {
    pub txn: i64,
    /// Rows committed by the transaction, when the log records it.
    pub row_count: Option<u64>,
}

/// Aggregate view of a table's transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalSummary {
    /// Highest transaction id, `None` when the log is empty.
    pub last_txn: Option<i64>,
    pub transactions: u64,
    /// Number of transactions that carry a row count.
    pub counted: u64,
    pub total_rows: u64,
}

impl WalSummary {
    /// True when every transaction carries a row count, so `total_rows` is the table size.
    pub fn row_counts_complete(&self) -> bool {
        self.transactions > 0 && self.counted == self.transactions
    }
}

/// Column metadata of a query result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
}

/// Tabular result of a textual query: column names plus a row list.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    #[serde(default)]
    pub columns: Vec<QueryColumn>,
    #[serde(default)]
    pub dataset: Vec<Vec<serde_json::Value>>,
}

impl ResultSet {
    pub fn new(columns: &[(&str, &str)], dataset: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, data_type)| QueryColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                })
                .collect(),
            dataset,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Values of one named column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&serde_json::Value>, BridgeError> {
        let idx = self.column_index(name).ok_or_else(|| {
            BridgeError::Query(format!("result set has no column '{}'", name))
        })?;
        self.dataset
            .iter()
            .map(|row| {
                row.get(idx).ok_or_else(|| {
                    BridgeError::Query(format!("short row in result set for column '{}'", name))
                })
            })
            .collect()
    }
}

/// Row range selection used by the column pager. Both variants select the
/// half-open 1-based range `(after, upto]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWindow {
    /// Dense sequence assigned by `ROW_NUMBER() OVER (ORDER BY order_by)`.
    RowNumber { order_by: String, after: u64, upto: u64 },
    /// Persistent monotonic row identity.
    RowId { after: u64, upto: u64 },
}

impl RowWindow {
    pub fn bounds(&self) -> (u64, u64) {
        match self {
            RowWindow::RowNumber { after, upto, .. } | RowWindow::RowId { after, upto } => {
                (*after, *upto)
            }
        }
    }
}

/// Which windowing technique the pager uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingStrategy {
    RowNumber,
    RowId,
    /// Row identity when the table exposes one, row numbering otherwise.
    #[default]
    Auto,
}

impl std::str::FromStr for PagingStrategy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "row-number" | "row_number" | "rownumber" => Ok(PagingStrategy::RowNumber),
            "row-id" | "row_id" | "rowid" => Ok(PagingStrategy::RowId),
            "auto" => Ok(PagingStrategy::Auto),
            other => Err(BridgeError::Config(format!(
                "unknown paging strategy '{}'",
                other
            ))),
        }
    }
}

/// How a growth watcher learns about new rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Transaction log row counts are summed into the running total.
    RowCounts,
    /// Transaction ids signal change; the size comes from a full count.
    TxnSignal,
    /// No transaction log; the full count is polled.
    CountPolling,
}

/// Notification delivered to a size subscriber.
#[derive(Debug)]
pub enum SizeEvent {
    /// The table grew to the given row count.
    Grew(u64),
    /// The watcher terminated; no further events follow.
    Failed(BridgeError),
}

/// Configuration for growth watchers
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Sleep between transaction log polls
    pub idle_interval: Duration,
    /// Bound on joining a replaced or stopped watcher
    pub join_timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(50),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Configuration for column paging
#[derive(Debug, Clone)]
pub struct PagerConfig {
    /// Column defining the table's row order
    pub order_by: String,
    pub strategy: PagingStrategy,
    /// Upper bound on rows returned by a single fetch
    pub page_size: usize,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            order_by: "timestamp".to_string(),
            strategy: PagingStrategy::Auto,
            page_size: 64_000,
        }
    }
}

/// Configuration for the provider facade
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub watch: WatchConfig,
    pub pager: PagerConfig,
}
