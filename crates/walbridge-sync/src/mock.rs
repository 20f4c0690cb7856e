//! Mock implementations for testing

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::schema::ROW_ID_COLUMN;
use crate::{
    BridgeError, BridgeResult, QueryEndpoint, ResultSet, RowWindow, StoreColumn, TableStore,
    WalSummary, WalTransaction,
};

#[derive(Debug, Clone, Default)]
struct MockTable {
    columns: Vec<StoreColumn>,
    rows: Vec<Vec<Value>>,
    txns: Vec<WalTransaction>,
    wal: bool,
    row_id: bool,
}

impl MockTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// In-memory append-only store with a transaction log per table.
#[derive(Debug, Clone, Default)]
pub struct MockTableStore {
    tables: Arc<RwLock<HashMap<String, MockTable>>>,
    failing: Arc<AtomicBool>,
    queries: Arc<AtomicUsize>,
}

impl MockTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a WAL table exposing a row identity.
    pub fn create_table(&self, name: &str, columns: &[(&str, &str)]) {
        let table = MockTable {
            columns: columns
                .iter()
                .map(|(n, t)| StoreColumn::new(*n, *t))
                .collect(),
            wal: true,
            row_id: true,
            ..Default::default()
        };
        self.tables.write().unwrap().insert(name.to_string(), table);
    }

    pub fn set_wal_enabled(&self, name: &str, enabled: bool) {
        if let Some(t) = self.tables.write().unwrap().get_mut(name) {
            t.wal = enabled;
        }
    }

    pub fn set_row_id(&self, name: &str, exposed: bool) {
        if let Some(t) = self.tables.write().unwrap().get_mut(name) {
            t.row_id = exposed;
        }
    }

    /// Make every store call fail with a query error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of store calls made so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Append rows in one transaction that records its row count.
    pub fn append(&self, name: &str, rows: Vec<Vec<Value>>) -> i64 {
        self.commit(name, rows, true)
    }

    /// Append rows in one transaction whose log entry lacks a row count.
    pub fn append_uncounted(&self, name: &str, rows: Vec<Vec<Value>>) -> i64 {
        self.commit(name, rows, false)
    }

    fn commit(&self, name: &str, rows: Vec<Vec<Value>>, counted: bool) -> i64 {
        let mut tables = self.tables.write().unwrap();
        let table = tables.entry(name.to_string()).or_insert_with(|| MockTable {
            wal: true,
            row_id: true,
            ..Default::default()
        });
        let txn = table.txns.last().map(|t| t.txn + 1).unwrap_or(1);
        let count = rows.len() as u64;
        table.rows.extend(rows);
        if table.wal {
            table.txns.push(WalTransaction {
                txn,
                row_count: counted.then_some(count),
            });
        }
        txn
    }

    /// Declared column names of `name`, or `None` if it does not exist.
    pub fn column_names(&self, name: &str) -> Option<Vec<String>> {
        self.tables
            .read()
            .unwrap()
            .get(name)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
    }

    pub fn rows(&self, name: &str) -> Vec<Vec<Value>> {
        self.tables
            .read()
            .unwrap()
            .get(name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn with_table<T>(&self, name: &str, f: impl FnOnce(&MockTable) -> BridgeResult<T>) -> BridgeResult<T> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Query("mock store failure".to_string()));
        }
        let tables = self.tables.read().unwrap();
        let table = tables
            .get(name)
            .ok_or_else(|| BridgeError::Query(format!("table does not exist [table={}]", name)))?;
        f(table)
    }
}

fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null, Value::Null) => CmpOrdering::Equal,
        (Value::Null, _) => CmpOrdering::Less,
        (_, Value::Null) => CmpOrdering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait]
impl TableStore for MockTableStore {
    async fn describe_columns(&self, table: &str) -> BridgeResult<Vec<StoreColumn>> {
        match self.with_table(table, |t| {
            let mut columns = Vec::with_capacity(t.columns.len() + 1);
            if t.row_id {
                columns.push(StoreColumn::new(ROW_ID_COLUMN, "LONG"));
            }
            columns.extend(t.columns.iter().cloned());
            Ok(columns)
        }) {
            Err(BridgeError::Query(msg)) if msg.starts_with("table does not exist") => Ok(vec![]),
            other => other,
        }
    }

    async fn wal_summary(&self, table: &str) -> BridgeResult<WalSummary> {
        self.with_table(table, |t| {
            if !t.wal {
                return Err(BridgeError::Query(format!("{} is not a WAL table", table)));
            }
            Ok(WalSummary {
                last_txn: t.txns.last().map(|x| x.txn),
                transactions: t.txns.len() as u64,
                counted: t.txns.iter().filter(|x| x.row_count.is_some()).count() as u64,
                total_rows: t.txns.iter().filter_map(|x| x.row_count).sum(),
            })
        })
    }

    async fn wal_transactions_after(
        &self,
        table: &str,
        after: i64,
    ) -> BridgeResult<Vec<WalTransaction>> {
        self.with_table(table, |t| {
            if !t.wal {
                return Err(BridgeError::Query(format!("{} is not a WAL table", table)));
            }
            Ok(t.txns.iter().filter(|x| x.txn > after).copied().collect())
        })
    }

    async fn row_count(&self, table: &str) -> BridgeResult<u64> {
        self.with_table(table, |t| Ok(t.rows.len() as u64))
    }

    async fn select_column(
        &self,
        table: &str,
        column: &str,
        window: &RowWindow,
    ) -> BridgeResult<Vec<Value>> {
        self.with_table(table, |t| {
            let idx = t
                .column_index(column)
                .ok_or_else(|| BridgeError::Query(format!("Invalid column: {}", column)))?;
            let (after, upto) = window.bounds();
            let ordered: Vec<&Vec<Value>> = match window {
                RowWindow::RowId { .. } => t.rows.iter().collect(),
                RowWindow::RowNumber { order_by, .. } => {
                    let key = t.column_index(order_by).ok_or_else(|| {
                        BridgeError::Query(format!("Invalid column: {}", order_by))
                    })?;
                    let mut rows: Vec<&Vec<Value>> = t.rows.iter().collect();
                    rows.sort_by(|a, b| {
                        compare_values(
                            a.get(key).unwrap_or(&Value::Null),
                            b.get(key).unwrap_or(&Value::Null),
                        )
                    });
                    rows
                }
            };
            Ok(ordered
                .into_iter()
                .skip(after as usize)
                .take(upto.saturating_sub(after) as usize)
                .map(|row| row.get(idx).cloned().unwrap_or(Value::Null))
                .collect())
        })
    }
}

/// Query endpoint answering from canned responses keyed by exact query text.
#[derive(Debug, Clone, Default)]
pub struct MockQueryEndpoint {
    responses: Arc<RwLock<HashMap<String, Result<ResultSet, String>>>>,
    executed: Arc<RwLock<Vec<String>>>,
}

impl MockQueryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, sql: impl Into<String>, result: ResultSet) {
        self.responses.write().unwrap().insert(sql.into(), Ok(result));
    }

    pub fn fail(&self, sql: impl Into<String>, message: impl Into<String>) {
        self.responses
            .write()
            .unwrap()
            .insert(sql.into(), Err(message.into()));
    }

    /// Every query executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.read().unwrap().clone()
    }
}

#[async_trait]
impl QueryEndpoint for MockQueryEndpoint {
    async fn execute(&self, sql: &str) -> BridgeResult<ResultSet> {
        self.executed.write().unwrap().push(sql.to_string());
        match self.responses.read().unwrap().get(sql) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(BridgeError::Query(message.clone())),
            None => Err(BridgeError::Query(format!("no canned response for: {}", sql))),
        }
    }
}
