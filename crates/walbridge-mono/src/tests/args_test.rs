use clap::Parser;
use std::sync::atomic::Ordering;
use std::time::Duration;
use walbridge_sync::PagingStrategy;

use crate::{setup_signal_handler, Args, Command};

#[test]
fn test_defaults() {
    let args = Args::try_parse_from(["walbridge-mono", "size", "--table", "trades"]).unwrap();
    assert_eq!(
        args.command,
        Command::Size {
            table: "trades".to_string()
        }
    );

    let store = args.store_config();
    assert_eq!(store.http_port, 9000);

    let provider = args.provider_config();
    assert_eq!(provider.watch.idle_interval, Duration::from_millis(50));
    assert_eq!(provider.watch.join_timeout, Duration::from_secs(1));
    assert_eq!(provider.pager.page_size, 64_000);
    assert_eq!(provider.pager.order_by, "timestamp");
    assert_eq!(provider.pager.strategy, PagingStrategy::Auto);

    let writer = args.writer_config();
    assert_eq!(writer.port, 9009);
    assert_eq!(writer.batch_size, 100);
    assert_eq!(writer.queue_capacity, 10_000);
    assert_eq!(writer.reconnect_delay, Duration::from_secs(1));
}

#[test]
fn test_global_flags_after_subcommand() {
    let args = Args::try_parse_from([
        "walbridge-mono",
        "page",
        "--table",
        "trades",
        "--column",
        "price",
        "--max-rows",
        "5",
        "--paging",
        "row-id",
        "--host",
        "db.internal",
    ])
    .unwrap();
    assert_eq!(args.host, "db.internal");
    assert_eq!(args.paging, PagingStrategy::RowId);
    match args.command {
        Command::Page {
            offset, max_rows, ..
        } => assert_eq!((offset, max_rows), (0, 5)),
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_watch_takes_several_tables() {
    let args = Args::try_parse_from([
        "walbridge-mono",
        "watch",
        "--table",
        "trades",
        "--table",
        "orderbooks_compact",
    ])
    .unwrap();
    assert_eq!(
        args.command,
        Command::Watch {
            tables: vec!["trades".to_string(), "orderbooks_compact".to_string()]
        }
    );
    assert!(Args::try_parse_from(["walbridge-mono", "watch"]).is_err());
}

#[test]
fn test_rejects_unknown_paging_strategy() {
    assert!(
        Args::try_parse_from(["walbridge-mono", "ingest", "--paging", "offset"]).is_err()
    );
}

#[test]
fn test_provider_construction_validates_config() {
    let mut args = Args::try_parse_from(["walbridge-mono", "ingest"]).unwrap();
    assert!(args.provider().is_ok());
    args.page_size = 0;
    assert!(args.provider().is_err());
}

#[tokio::test]
async fn test_signal_handler_setup() {
    let shutdown_signal = setup_signal_handler().await;
    assert!(!shutdown_signal.load(Ordering::SeqCst));
}
