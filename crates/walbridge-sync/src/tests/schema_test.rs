use arrow::datatypes::{DataType, TimeUnit};
use std::sync::Arc;

use super::{trades_store, TRADE_COLUMNS};
use crate::{BridgeError, ColumnType, MockTableStore, SchemaResolver, StoreColumn, TableSchema};

#[test]
fn test_store_type_mapping() {
    let cases = [
        ("TIMESTAMP", ColumnType::Timestamp),
        ("DATE", ColumnType::Timestamp),
        ("DOUBLE", ColumnType::Float64),
        ("FLOAT", ColumnType::Float32),
        ("INT", ColumnType::Int32),
        ("LONG", ColumnType::Int64),
        ("SHORT", ColumnType::Int16),
        ("BYTE", ColumnType::Int8),
        ("BOOLEAN", ColumnType::Boolean),
        ("SYMBOL", ColumnType::String),
        ("STRING", ColumnType::String),
        ("VARCHAR", ColumnType::String),
        ("long", ColumnType::Int64),
        ("GEOHASH(8c)", ColumnType::String),
    ];
    for (raw, expected) in cases {
        assert_eq!(ColumnType::from_store_type(raw), expected, "type {}", raw);
    }
}

#[test]
fn test_timestamps_are_utc_micros() {
    assert_eq!(
        ColumnType::Timestamp.to_arrow(),
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
    );
}

#[test]
fn test_row_id_and_duplicates_are_dropped() {
    let raw = vec![
        StoreColumn::new("_rowid", "LONG"),
        StoreColumn::new("timestamp", "TIMESTAMP"),
        StoreColumn::new("price", "DOUBLE"),
        StoreColumn::new("price", "LONG"),
    ];
    let schema = TableSchema::from_store_columns("t", &raw).unwrap();
    assert!(schema.has_row_id());
    assert_eq!(schema.names().collect::<Vec<_>>(), vec!["timestamp", "price"]);
    assert_eq!(
        schema.column("price").unwrap().column_type,
        ColumnType::Float64
    );
    assert_eq!(schema.to_arrow().fields().len(), 2);
}

#[tokio::test]
async fn test_resolve_preserves_column_order() {
    let resolver = SchemaResolver::new(Arc::new(trades_store(1)));
    let schema = resolver.resolve("trades").await.unwrap();
    let expected: Vec<&str> = TRADE_COLUMNS.iter().map(|(n, _)| *n).collect();
    assert_eq!(schema.names().collect::<Vec<_>>(), expected);
    assert_eq!(schema.column("symbol").unwrap().column_type, ColumnType::String);
}

#[tokio::test]
async fn test_unknown_table_is_a_schema_error() {
    let resolver = SchemaResolver::new(Arc::new(MockTableStore::new()));
    match resolver.resolve("missing").await {
        Err(BridgeError::Schema { table, .. }) => assert_eq!(table, "missing"),
        other => panic!("expected schema error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_table_name_is_rejected_before_querying() {
    let store = Arc::new(MockTableStore::new());
    let resolver = SchemaResolver::new(store.clone());
    let result = resolver.resolve("trades; DROP TABLE trades").await;
    assert!(matches!(result, Err(BridgeError::Schema { .. })));
    assert_eq!(store.query_count(), 0);
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let store = trades_store(1);
    store.set_failing(true);
    let resolver = SchemaResolver::new(Arc::new(store));
    assert!(matches!(
        resolver.resolve("trades").await,
        Err(BridgeError::Query(_))
    ));
}

#[test]
fn test_only_query_failures_are_transient() {
    assert!(BridgeError::Query("connection reset".to_string()).is_transient());
    assert!(!BridgeError::schema("trades", "no columns").is_transient());
    assert!(!BridgeError::Watcher("trades".to_string()).is_transient());
    assert!(!BridgeError::UnknownLocation("p1".to_string()).is_transient());
    assert!(!BridgeError::Config("page_size".to_string()).is_transient());
}
