//! # Adapter and Provider Traits
//!
//! The read side is layered so that every piece above the wire can be tested
//! against an in-memory double:
//!
//! - [`QueryEndpoint`] submits a textual query to the store's request/response
//!   endpoint and returns a tabular [`ResultSet`].
//! - [`TableStore`] is the small set of metadata and paging primitives the
//!   bridge needs. [`crate::adapters::SqlTableStore`] implements it on top of
//!   any `QueryEndpoint`; [`crate::mock::MockTableStore`] implements it in memory.
//! - [`TableDataBackend`] is the contract consumed by the downstream analytics
//!   engine. Every call completes exactly once, with either a value or a typed
//!   [`crate::BridgeError`].

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use crate::{
    BridgeResult, LocationKey, LocationSubscription, ResultSet, RowWindow, SizeSubscription,
    StoreColumn, TableKey, TableSchema, WalSummary, WalTransaction,
};

/// Trait for the store's textual query endpoint.
#[async_trait]
pub trait QueryEndpoint: Send + Sync {
    /// Execute one query and return its result set.
    ///
    /// # Errors
    /// Returns [`crate::BridgeError::Query`] on transport failures and on
    /// errors reported by the store.
    async fn execute(&self, sql: &str) -> BridgeResult<ResultSet>;

    /// Lightweight reachability check. Never fails, only reports.
    async fn is_connected(&self) -> bool {
        self.execute("SELECT 1").await.is_ok()
    }
}

/// Trait for the metadata and paging primitives of an append-only store.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Columns of `table` in ordinal order, including any internal row identity.
    /// An unknown table yields an empty list.
    async fn describe_columns(&self, table: &str) -> BridgeResult<Vec<StoreColumn>>;

    /// Summary of the whole transaction log.
    ///
    /// # Errors
    /// Fails when the table has no transaction log (e.g. a non-WAL table).
    async fn wal_summary(&self, table: &str) -> BridgeResult<WalSummary>;

    /// Transactions with id strictly greater than `after`, ascending by id.
    async fn wal_transactions_after(
        &self,
        table: &str,
        after: i64,
    ) -> BridgeResult<Vec<WalTransaction>>;

    /// Full row count.
    async fn row_count(&self, table: &str) -> BridgeResult<u64>;

    /// Raw values of `column` for the rows selected by `window`, in ascending order.
    async fn select_column(
        &self,
        table: &str,
        column: &str,
        window: &RowWindow,
    ) -> BridgeResult<Vec<serde_json::Value>>;
}

/// The backend contract implemented for the analytics engine.
#[async_trait]
pub trait TableDataBackend: Send + Sync {
    /// Portable schema of the table.
    async fn schema(&self, table: &TableKey) -> BridgeResult<TableSchema>;

    /// All locations of the table (always exactly one).
    async fn locations(&self, table: &TableKey) -> BridgeResult<Vec<LocationKey>>;

    /// Current locations plus a handle for location changes (there are none).
    async fn subscribe_locations(
        &self,
        table: &TableKey,
    ) -> BridgeResult<(Vec<LocationKey>, LocationSubscription)>;

    /// Point-in-time row count.
    async fn location_size(&self, table: &TableKey, location: &LocationKey) -> BridgeResult<u64>;

    /// Initial row count plus a stream of growth notifications.
    async fn subscribe_location_size(
        &self,
        table: &TableKey,
        location: &LocationKey,
    ) -> BridgeResult<SizeSubscription>;

    /// Values of `column` for rows `[offset, offset + max_rows)`.
    async fn column_values(
        &self,
        table: &TableKey,
        location: &LocationKey,
        column: &str,
        offset: u64,
        min_rows: usize,
        max_rows: usize,
    ) -> BridgeResult<RecordBatch>;
}
