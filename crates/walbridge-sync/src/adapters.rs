//! # Production Adapter Implementations
//!
//! - [`HttpQueryEndpoint`] talks to the store's HTTP `/exec` endpoint, which
//!   answers each textual query with a JSON document of `columns` and `dataset`.
//! - [`SqlTableStore`] renders the bridge's metadata and paging primitives as
//!   SQL over any [`QueryEndpoint`].
//!
//! Table and column names are validated as identifiers by the callers and
//! double-quoted here; they are never taken from row data.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::schema::ROW_ID_COLUMN;
use crate::{
    BridgeError, BridgeResult, QueryColumn, QueryEndpoint, ResultSet, RowWindow, StoreColumn,
    TableStore, WalSummary, WalTransaction,
};

/// Connection settings for the store's query endpoint
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub http_port: u16,
    pub request_timeout: Duration,
    /// Retries for requests that never reached the store
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            http_port: 9000,
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ExecResponse {
    #[serde(default)]
    columns: Vec<QueryColumn>,
    #[serde(default)]
    dataset: Vec<Vec<Value>>,
    error: Option<String>,
}

/// Query endpoint speaking the store's HTTP `/exec` protocol.
#[derive(Clone)]
pub struct HttpQueryEndpoint {
    client: reqwest::Client,
    exec_url: String,
    max_retries: u32,
}

impl HttpQueryEndpoint {
    pub fn new(config: &StoreConfig) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            exec_url: format!("http://{}:{}/exec", config.host, config.http_port),
            max_retries: config.max_retries,
        })
    }

    pub fn exec_url(&self) -> &str {
        &self.exec_url
    }

    async fn get(&self, sql: &str) -> BridgeResult<String> {
        let mut retry_delay = Duration::from_millis(200);
        let mut attempt = 0;
        loop {
            let result = self
                .client
                .get(&self.exec_url)
                .query(&[("query", sql)])
                .send()
                .await;
            match result {
                Ok(response) => {
                    return response
                        .text()
                        .await
                        .map_err(|e| BridgeError::Query(format!("failed to read response: {}", e)));
                }
                Err(e) if e.is_connect() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Store unreachable at {} (attempt {}): {}, retrying in {:?}",
                        self.exec_url, attempt, e, retry_delay
                    );
                    tokio::time::sleep(retry_delay).await;
                    retry_delay *= 2;
                }
                Err(e) => return Err(BridgeError::Query(format!("request failed: {}", e))),
            }
        }
    }
}

#[async_trait]
impl QueryEndpoint for HttpQueryEndpoint {
    async fn execute(&self, sql: &str) -> BridgeResult<ResultSet> {
        debug!("exec: {}", sql);
        let body = self.get(sql).await?;
        parse_exec_response(&body)
    }
}

/// Parse an `/exec` response body. An empty body (DDL) is an empty result set.
pub fn parse_exec_response(body: &str) -> BridgeResult<ResultSet> {
    if body.trim().is_empty() {
        return Ok(ResultSet::default());
    }
    let response: ExecResponse = serde_json::from_str(body)
        .map_err(|e| BridgeError::Query(format!("invalid response JSON: {}", e)))?;
    if let Some(error) = response.error {
        return Err(BridgeError::Query(error));
    }
    Ok(ResultSet {
        columns: response.columns,
        dataset: response.dataset,
    })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn value_u64(value: &Value, what: &str) -> BridgeResult<Option<u64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| BridgeError::Query(format!("{} is not a row count: {}", what, n))),
        other => Err(BridgeError::Query(format!(
            "{} is not a number: {}",
            what, other
        ))),
    }
}

fn value_i64(value: &Value, what: &str) -> BridgeResult<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| BridgeError::Query(format!("{} is not an integer: {}", what, n))),
        other => Err(BridgeError::Query(format!(
            "{} is not a number: {}",
            what, other
        ))),
    }
}

fn single_row<'a>(result: &'a ResultSet, what: &str) -> BridgeResult<&'a Vec<Value>> {
    result
        .dataset
        .first()
        .ok_or_else(|| BridgeError::Query(format!("{} returned no rows", what)))
}

/// [`TableStore`] implemented with SQL over a [`QueryEndpoint`].
pub struct SqlTableStore<E: QueryEndpoint> {
    endpoint: Arc<E>,
}

impl<E: QueryEndpoint> SqlTableStore<E> {
    pub fn new(endpoint: Arc<E>) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    pub fn describe_sql(table: &str) -> String {
        format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = {} ORDER BY ordinal_position",
            quote_literal(table)
        )
    }

    pub fn wal_summary_sql(table: &str) -> String {
        format!(
            "SELECT max(sequencerTxn) AS last_txn, count() AS txns, count(rowCount) AS counted, \
             sum(rowCount) AS total_rows FROM wal_transactions({})",
            quote_literal(table)
        )
    }

    pub fn wal_after_sql(table: &str, after: i64) -> String {
        format!(
            "SELECT sequencerTxn, rowCount FROM wal_transactions({}) \
             WHERE sequencerTxn > {} ORDER BY sequencerTxn",
            quote_literal(table),
            after
        )
    }

    pub fn count_sql(table: &str) -> String {
        format!("SELECT count() AS n FROM {}", quote_ident(table))
    }

    pub fn select_sql(table: &str, column: &str, window: &RowWindow) -> String {
        match window {
            RowWindow::RowNumber {
                order_by,
                after,
                upto,
            } => format!(
                "WITH numbered AS (SELECT {col}, ROW_NUMBER() OVER (ORDER BY {ord}) AS rn FROM {tbl}) \
                 SELECT {col} FROM numbered WHERE rn > {after} AND rn <= {upto} ORDER BY rn",
                col = quote_ident(column),
                ord = quote_ident(order_by),
                tbl = quote_ident(table),
                after = after,
                upto = upto
            ),
            RowWindow::RowId { after, upto } => format!(
                "SELECT {col} FROM {tbl} WHERE {rid} > {after} AND {rid} <= {upto} ORDER BY {rid}",
                col = quote_ident(column),
                tbl = quote_ident(table),
                rid = ROW_ID_COLUMN,
                after = after,
                upto = upto
            ),
        }
    }
}

#[async_trait]
impl<E: QueryEndpoint + 'static> TableStore for SqlTableStore<E> {
    async fn describe_columns(&self, table: &str) -> BridgeResult<Vec<StoreColumn>> {
        let result = self.endpoint.execute(&Self::describe_sql(table)).await?;
        let names = result.column("column_name")?;
        let types = result.column("data_type")?;
        Ok(names
            .into_iter()
            .zip(types)
            .map(|(name, data_type)| {
                StoreColumn::new(
                    name.as_str().unwrap_or_default(),
                    data_type.as_str().unwrap_or_default(),
                )
            })
            .filter(|c| !c.name.is_empty())
            .collect())
    }

    async fn wal_summary(&self, table: &str) -> BridgeResult<WalSummary> {
        let result = self.endpoint.execute(&Self::wal_summary_sql(table)).await?;
        let row = single_row(&result, "wal summary")?;
        let field = |name: &str| -> BridgeResult<&Value> {
            result
                .column_index(name)
                .and_then(|i| row.get(i))
                .ok_or_else(|| BridgeError::Query(format!("wal summary lacks '{}'", name)))
        };
        Ok(WalSummary {
            last_txn: value_i64(field("last_txn")?, "last_txn")?,
            transactions: value_u64(field("txns")?, "txns")?.unwrap_or(0),
            counted: value_u64(field("counted")?, "counted")?.unwrap_or(0),
            total_rows: value_u64(field("total_rows")?, "total_rows")?.unwrap_or(0),
        })
    }

    async fn wal_transactions_after(
        &self,
        table: &str,
        after: i64,
    ) -> BridgeResult<Vec<WalTransaction>> {
        let result = self
            .endpoint
            .execute(&Self::wal_after_sql(table, after))
            .await?;
        let txns = result.column("sequencerTxn")?;
        let counts = result.column("rowCount")?;
        txns.into_iter()
            .zip(counts)
            .map(|(txn, count)| {
                Ok(WalTransaction {
                    txn: value_i64(txn, "sequencerTxn")?.ok_or_else(|| {
                        BridgeError::Query("null transaction id in log".to_string())
                    })?,
                    row_count: value_u64(count, "rowCount")?,
                })
            })
            .collect()
    }

    async fn row_count(&self, table: &str) -> BridgeResult<u64> {
        let result = self.endpoint.execute(&Self::count_sql(table)).await?;
        let row = single_row(&result, "count")?;
        let value = row
            .first()
            .ok_or_else(|| BridgeError::Query("count returned an empty row".to_string()))?;
        Ok(value_u64(value, "count")?.unwrap_or(0))
    }

    async fn select_column(
        &self,
        table: &str,
        column: &str,
        window: &RowWindow,
    ) -> BridgeResult<Vec<Value>> {
        let result = self
            .endpoint
            .execute(&Self::select_sql(table, column, window))
            .await?;
        result
            .dataset
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .next()
                    .ok_or_else(|| BridgeError::Query("empty row in page result".to_string()))
            })
            .collect()
    }
}
