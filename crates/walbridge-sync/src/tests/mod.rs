//! Tests for walbridge-sync
//!
//! Every test runs against the in-memory store or a canned query endpoint.

use serde_json::{json, Value};

use crate::MockTableStore;

pub mod adapters_test;
pub mod schema_test;
pub mod watcher_test;

/// Columns of the trades table used throughout the tests.
pub const TRADE_COLUMNS: &[(&str, &str)] = &[
    ("timestamp", "TIMESTAMP"),
    ("symbol", "SYMBOL"),
    ("price", "DOUBLE"),
    ("size", "DOUBLE"),
];

/// One trade row with timestamp `second` seconds past midnight.
pub fn trade_row(second: u32, price: f64) -> Vec<Value> {
    json!([
        format!("2024-01-01T00:00:{:02}.000000Z", second),
        "BTC-USD",
        price,
        0.5
    ])
    .as_array()
    .cloned()
    .unwrap_or_default()
}

/// A store holding table `trades` with `n` rows, one transaction per row.
pub fn trades_store(n: u32) -> MockTableStore {
    let store = MockTableStore::new();
    store.create_table("trades", TRADE_COLUMNS);
    for i in 0..n {
        store.append("trades", vec![trade_row(i, 100.0 + i as f64)]);
    }
    store
}
