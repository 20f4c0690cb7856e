use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use super::{trade_row, trades_store};
use crate::{
    current_size, BridgeError, GrowthWatcher, MockTableStore, SizeEvent, StopSignal, WatchConfig,
    WatchMode, WatchState,
};

const WAIT: Duration = Duration::from_secs(2);

fn fast_config() -> WatchConfig {
    WatchConfig {
        idle_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

struct Running {
    stop: Arc<StopSignal>,
    events: mpsc::UnboundedReceiver<SizeEvent>,
    initial: u64,
    task: tokio::task::JoinHandle<()>,
}

async fn start(store: &MockTableStore) -> Running {
    let stop = Arc::new(StopSignal::new());
    let (tx, events) = mpsc::unbounded_channel();
    let (initial_tx, initial_rx) = oneshot::channel();
    let watcher = GrowthWatcher::new(
        "trades",
        Arc::new(store.clone()),
        fast_config(),
        stop.clone(),
        tx,
    );
    let task = tokio::spawn(watcher.run(initial_tx));
    let initial = initial_rx.await.unwrap().unwrap();
    Running {
        stop,
        events,
        initial,
        task,
    }
}

async fn next_growth(events: &mut mpsc::UnboundedReceiver<SizeEvent>) -> u64 {
    match tokio::time::timeout(WAIT, events.recv()).await {
        Ok(Some(SizeEvent::Grew(n))) => n,
        other => panic!("expected growth, got {:?}", other),
    }
}

#[tokio::test]
async fn test_initial_size_then_growth() {
    let store = trades_store(3);
    let mut running = start(&store).await;
    assert_eq!(running.initial, 3);

    store.append("trades", vec![trade_row(10, 1.0), trade_row(11, 1.0)]);
    assert_eq!(next_growth(&mut running.events).await, 5);

    running.stop.stop();
    tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_growth_is_strictly_increasing() {
    let store = trades_store(0);
    let mut running = start(&store).await;
    assert_eq!(running.initial, 0);

    let mut reported = Vec::new();
    for i in 0..5 {
        store.append("trades", vec![trade_row(i, 1.0)]);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    while reported.last() != Some(&5) {
        reported.push(next_growth(&mut running.events).await);
    }
    assert!(reported.windows(2).all(|w| w[0] < w[1]), "{:?}", reported);
    running.stop.stop();
}

#[tokio::test]
async fn test_growth_reported_within_a_few_intervals() {
    let store = trades_store(1);
    let mut running = start(&store).await;
    let started = Instant::now();
    store.append("trades", vec![trade_row(30, 1.0)]);
    assert_eq!(next_growth(&mut running.events).await, 2);
    assert!(started.elapsed() < Duration::from_millis(500));
    running.stop.stop();
}

#[tokio::test]
async fn test_uncounted_transactions_fall_back_to_full_count() {
    let store = MockTableStore::new();
    store.create_table("trades", super::TRADE_COLUMNS);
    store.append_uncounted("trades", vec![trade_row(0, 1.0), trade_row(1, 1.0)]);
    let mut running = start(&store).await;
    assert_eq!(running.initial, 2);

    store.append_uncounted("trades", vec![trade_row(2, 1.0)]);
    assert_eq!(next_growth(&mut running.events).await, 3);
    running.stop.stop();
}

#[tokio::test]
async fn test_count_polling_without_transaction_log() {
    let store = trades_store(2);
    store.set_wal_enabled("trades", false);
    let mut running = start(&store).await;
    assert_eq!(running.initial, 2);

    store.append("trades", vec![trade_row(5, 1.0)]);
    assert_eq!(next_growth(&mut running.events).await, 3);
    running.stop.stop();
}

#[tokio::test]
async fn test_failure_is_reported_once_and_ends_the_stream() {
    let store = trades_store(1);
    let mut running = start(&store).await;
    store.set_failing(true);

    match tokio::time::timeout(WAIT, running.events.recv()).await {
        Ok(Some(SizeEvent::Failed(BridgeError::Query(_)))) => {}
        other => panic!("expected failure, got {:?}", other),
    }
    let end = tokio::time::timeout(WAIT, running.events.recv()).await.unwrap();
    assert!(end.is_none());
    tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_initialization_failure_goes_to_initial() {
    let store = trades_store(1);
    store.set_failing(true);
    let (tx, _events) = mpsc::unbounded_channel();
    let (initial_tx, initial_rx) = oneshot::channel();
    let watcher = GrowthWatcher::new(
        "trades",
        Arc::new(store),
        fast_config(),
        Arc::new(StopSignal::new()),
        tx,
    );
    tokio::spawn(watcher.run(initial_tx));
    assert!(initial_rx.await.unwrap().is_err());
}

#[tokio::test]
async fn test_poll_once_ignores_smaller_counts() {
    let store = trades_store(2);
    store.set_wal_enabled("trades", false);
    let (tx, _events) = mpsc::unbounded_channel();
    let watcher = GrowthWatcher::new(
        "trades",
        Arc::new(store),
        fast_config(),
        Arc::new(StopSignal::new()),
        tx,
    );
    let mut state = WatchState {
        last_txn: 0,
        last_size: 10,
        mode: WatchMode::CountPolling,
    };
    assert_eq!(watcher.poll_once(&mut state).await.unwrap(), None);
    assert_eq!(state.last_size, 10);
}

#[tokio::test]
async fn test_poll_once_advances_transaction_id() {
    let store = trades_store(2);
    let (tx, _events) = mpsc::unbounded_channel();
    let watcher = GrowthWatcher::new(
        "trades",
        Arc::new(store.clone()),
        fast_config(),
        Arc::new(StopSignal::new()),
        tx,
    );
    let mut state = watcher.initialize().await.unwrap();
    assert_eq!(state.mode, WatchMode::RowCounts);
    assert_eq!((state.last_txn, state.last_size), (2, 2));

    let txn = store.append("trades", vec![trade_row(3, 1.0), trade_row(4, 1.0)]);
    assert_eq!(watcher.poll_once(&mut state).await.unwrap(), Some(4));
    assert_eq!(state.last_txn, txn);
    assert_eq!(watcher.poll_once(&mut state).await.unwrap(), None);
}

#[tokio::test]
async fn test_stop_interrupts_sleep() {
    let stop = Arc::new(StopSignal::new());
    let sleeper = stop.clone();
    let started = Instant::now();
    let task = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(30)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    stop.stop();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(stop.is_stopped());
}

#[tokio::test]
async fn test_current_size_sources() {
    let store = trades_store(4);
    assert_eq!(current_size(&store, "trades").await.unwrap(), 4);
    store.set_wal_enabled("trades", false);
    store.append("trades", vec![trade_row(9, 1.0)]);
    assert_eq!(current_size(&store, "trades").await.unwrap(), 5);
}
