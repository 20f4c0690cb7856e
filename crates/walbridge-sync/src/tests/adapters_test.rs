use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::{
    parse_exec_response, BridgeError, HttpQueryEndpoint, MockQueryEndpoint, QueryEndpoint,
    ResultSet, RowWindow, SqlTableStore, StoreConfig, TableStore,
};

type Store = SqlTableStore<MockQueryEndpoint>;

fn store() -> (MockQueryEndpoint, Store) {
    let endpoint = MockQueryEndpoint::new();
    let store = SqlTableStore::new(Arc::new(endpoint.clone()));
    (endpoint, store)
}

#[test]
fn test_parse_exec_response() {
    let body = r#"{"query":"x","columns":[{"name":"n","type":"LONG"}],"dataset":[[3]],"count":1}"#;
    let result = parse_exec_response(body).unwrap();
    assert_eq!(result.columns[0].data_type, "LONG");
    assert_eq!(result.dataset, vec![vec![json!(3)]]);

    assert!(parse_exec_response("").unwrap().is_empty());
    assert!(matches!(
        parse_exec_response(r#"{"query":"x","error":"table does not exist","position":14}"#),
        Err(BridgeError::Query(msg)) if msg == "table does not exist"
    ));
    assert!(parse_exec_response("<html>").is_err());
}

#[tokio::test]
async fn test_describe_columns() {
    let (endpoint, store) = store();
    endpoint.respond(
        Store::describe_sql("trades"),
        ResultSet::new(
            &[("column_name", "STRING"), ("data_type", "STRING")],
            vec![
                vec![json!("timestamp"), json!("TIMESTAMP")],
                vec![json!("price"), json!("DOUBLE")],
            ],
        ),
    );
    let columns = store.describe_columns("trades").await.unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[1].name, "price");
    assert_eq!(columns[1].data_type, "DOUBLE");
    assert!(endpoint.executed()[0].contains("table_name = 'trades'"));
}

#[tokio::test]
async fn test_wal_summary_and_transactions() {
    let (endpoint, store) = store();
    endpoint.respond(
        Store::wal_summary_sql("trades"),
        ResultSet::new(
            &[
                ("last_txn", "LONG"),
                ("txns", "LONG"),
                ("counted", "LONG"),
                ("total_rows", "LONG"),
            ],
            vec![vec![json!(7), json!(7), json!(7), json!(120)]],
        ),
    );
    endpoint.respond(
        Store::wal_after_sql("trades", 5),
        ResultSet::new(
            &[("sequencerTxn", "LONG"), ("rowCount", "LONG")],
            vec![vec![json!(6), json!(10)], vec![json!(7), json!(null)]],
        ),
    );

    let summary = store.wal_summary("trades").await.unwrap();
    assert_eq!(summary.last_txn, Some(7));
    assert_eq!(summary.total_rows, 120);
    assert!(summary.row_counts_complete());

    let txns = store.wal_transactions_after("trades", 5).await.unwrap();
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0].row_count, Some(10));
    assert_eq!(txns[1].row_count, None);
    assert_eq!(txns[1].txn, 7);
}

#[tokio::test]
async fn test_empty_log_summary() {
    let (endpoint, store) = store();
    endpoint.respond(
        Store::wal_summary_sql("t"),
        ResultSet::new(
            &[
                ("last_txn", "LONG"),
                ("txns", "LONG"),
                ("counted", "LONG"),
                ("total_rows", "LONG"),
            ],
            vec![vec![json!(null), json!(0), json!(0), json!(null)]],
        ),
    );
    let summary = store.wal_summary("t").await.unwrap();
    assert_eq!(summary.last_txn, None);
    assert!(!summary.row_counts_complete());
}

#[tokio::test]
async fn test_row_count_and_errors() {
    let (endpoint, store) = store();
    endpoint.respond(
        Store::count_sql("trades"),
        ResultSet::new(&[("n", "LONG")], vec![vec![json!(42)]]),
    );
    endpoint.fail(Store::count_sql("gone"), "table does not exist [table=gone]");
    assert_eq!(store.row_count("trades").await.unwrap(), 42);
    assert!(matches!(
        store.row_count("gone").await,
        Err(BridgeError::Query(_))
    ));
}

#[test]
fn test_window_queries() {
    let by_number = Store::select_sql(
        "trades",
        "price",
        &RowWindow::RowNumber {
            order_by: "timestamp".to_string(),
            after: 3,
            upto: 6,
        },
    );
    assert!(by_number.contains("ROW_NUMBER() OVER (ORDER BY \"timestamp\")"));
    assert!(by_number.contains("rn > 3 AND rn <= 6"));
    assert!(!by_number.to_ascii_uppercase().contains("OFFSET"));

    let by_id = Store::select_sql("trades", "price", &RowWindow::RowId { after: 3, upto: 6 });
    assert!(by_id.contains("_rowid > 3 AND _rowid <= 6"));
}

#[tokio::test]
async fn test_select_column_values() {
    let (endpoint, store) = store();
    let window = RowWindow::RowId { after: 0, upto: 2 };
    endpoint.respond(
        Store::select_sql("trades", "price", &window),
        ResultSet::new(&[("price", "DOUBLE")], vec![vec![json!(1.5)], vec![json!(2.5)]]),
    );
    let values = store.select_column("trades", "price", &window).await.unwrap();
    assert_eq!(values, vec![json!(1.5), json!(2.5)]);
}

async fn serve_once(body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut read = 0;
        while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf[read..]).await.unwrap();
            if n == 0 {
                break;
            }
            read += n;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    });
    port
}

#[tokio::test]
async fn test_http_endpoint_round_trip() {
    let port = serve_once(r#"{"columns":[{"name":"count","type":"LONG"}],"dataset":[[9]]}"#).await;
    let endpoint = HttpQueryEndpoint::new(&StoreConfig {
        http_port: port,
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap();
    assert!(endpoint.exec_url().ends_with(&format!(":{}/exec", port)));
    let result = endpoint.execute("SELECT count() FROM trades").await.unwrap();
    assert_eq!(result.column("count").unwrap(), vec![&json!(9)]);
}

#[tokio::test]
async fn test_http_endpoint_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let endpoint = HttpQueryEndpoint::new(&StoreConfig {
        http_port: port,
        max_retries: 0,
        ..Default::default()
    })
    .unwrap();
    assert!(!endpoint.is_connected().await);
}
