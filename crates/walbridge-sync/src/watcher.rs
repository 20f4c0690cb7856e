//! # Growth Watcher
//!
//! A [`GrowthWatcher`] follows one table's row count by polling the store's
//! write-ahead transaction log instead of scanning the table. It moves through
//! three phases:
//!
//! - **Init**: inspect the transaction log once. When every transaction carries
//!   a row count the running total is their sum ([`WatchMode::RowCounts`]);
//!   when counts are missing the total comes from one full count and
//!   transaction ids are used only to notice change ([`WatchMode::TxnSignal`]);
//!   when the table has no log at all the watcher polls full counts
//!   ([`WatchMode::CountPolling`]). The initial total is handed to the
//!   subscriber before the loop starts.
//! - **Active**: sleep the idle interval, fetch transactions newer than the
//!   last seen id, and emit [`SizeEvent::Grew`] whenever the total exceeds the
//!   last reported value. Reported sizes never decrease.
//! - **Stopped**: entered when the stop signal fires, the subscriber goes away,
//!   or a query fails. A failure is reported once as [`SizeEvent::Failed`];
//!   the loop never retries on its own.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::{BridgeResult, SizeEvent, TableStore, WatchConfig, WatchMode};

/// Cooperative stop flag whose sleeps wake up as soon as it fires.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until stopped, whichever comes first.
    pub async fn sleep(&self, duration: Duration) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = notified => {}
        }
    }
}

/// Mutable tracking state, owned by exactly one watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchState {
    pub last_txn: i64,
    pub last_size: u64,
    pub mode: WatchMode,
}

/// Point-in-time size: the transaction log total when it is complete,
/// otherwise a full count.
pub async fn current_size<S: TableStore + ?Sized>(store: &S, table: &str) -> BridgeResult<u64> {
    match store.wal_summary(table).await {
        Ok(summary) if summary.row_counts_complete() => Ok(summary.total_rows),
        Ok(_) => store.row_count(table).await,
        Err(e) => {
            debug!("Transaction log unavailable for '{}' ({}), counting rows", table, e);
            store.row_count(table).await
        }
    }
}

pub struct GrowthWatcher<S: TableStore> {
    table: String,
    store: Arc<S>,
    config: WatchConfig,
    stop: Arc<StopSignal>,
    events: mpsc::UnboundedSender<SizeEvent>,
}

impl<S: TableStore> GrowthWatcher<S> {
    pub fn new(
        table: impl Into<String>,
        store: Arc<S>,
        config: WatchConfig,
        stop: Arc<StopSignal>,
        events: mpsc::UnboundedSender<SizeEvent>,
    ) -> Self {
        Self {
            table: table.into(),
            store,
            config,
            stop,
            events,
        }
    }

    /// Run all three phases. The initial size (or the failure to obtain it)
    /// is sent on `initial` before any growth event.
    pub async fn run(self, initial: oneshot::Sender<BridgeResult<u64>>) {
        let state = match self.initialize().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Watcher for '{}' failed to initialize: {}", self.table, e);
                let _ = initial.send(Err(e));
                return;
            }
        };
        if initial.send(Ok(state.last_size)).is_err() {
            debug!("Subscriber for '{}' went away before the initial size", self.table);
            return;
        }

        info!(
            "Watching '{}': initial size {}, txn {}, mode {:?}",
            self.table, state.last_size, state.last_txn, state.mode
        );

        match self.watch(state).await {
            Ok(final_state) => info!(
                "Watcher for '{}' stopped at size {} (txn {})",
                self.table, final_state.last_size, final_state.last_txn
            ),
            Err(e) => {
                warn!("Watcher for '{}' terminated: {}", self.table, e);
                let _ = self.events.send(SizeEvent::Failed(e));
            }
        }
    }

    /// Establish the tracking mode and starting totals.
    pub async fn initialize(&self) -> BridgeResult<WatchState> {
        match self.store.wal_summary(&self.table).await {
            Ok(summary) => {
                let last_txn = summary.last_txn.unwrap_or(0);
                if summary.row_counts_complete() {
                    Ok(WatchState {
                        last_txn,
                        last_size: summary.total_rows,
                        mode: WatchMode::RowCounts,
                    })
                } else {
                    let size = self.store.row_count(&self.table).await?;
                    debug!(
                        "Row counts incomplete for '{}' ({} of {} transactions), using count: {}",
                        self.table, summary.counted, summary.transactions, size
                    );
                    Ok(WatchState {
                        last_txn,
                        last_size: size,
                        mode: WatchMode::TxnSignal,
                    })
                }
            }
            Err(e) => {
                info!(
                    "Transaction log unavailable for '{}', polling counts instead: {}",
                    self.table, e
                );
                let size = self.store.row_count(&self.table).await?;
                Ok(WatchState {
                    last_txn: 0,
                    last_size: size,
                    mode: WatchMode::CountPolling,
                })
            }
        }
    }

    async fn watch(&self, mut state: WatchState) -> BridgeResult<WatchState> {
        while !self.stop.is_stopped() {
            self.stop.sleep(self.config.idle_interval).await;
            if self.stop.is_stopped() {
                break;
            }
            if self.events.is_closed() {
                debug!("Subscriber for '{}' dropped, stopping", self.table);
                break;
            }

            if let Some(size) = self.poll_once(&mut state).await? {
                if self.events.send(SizeEvent::Grew(size)).is_err() {
                    debug!("Subscriber for '{}' dropped, stopping", self.table);
                    break;
                }
            }
        }
        Ok(state)
    }

    /// One poll step. Returns the new size when the table grew.
    pub async fn poll_once(&self, state: &mut WatchState) -> BridgeResult<Option<u64>> {
        let candidate = match state.mode {
            WatchMode::CountPolling => self.store.row_count(&self.table).await?,
            WatchMode::RowCounts | WatchMode::TxnSignal => {
                let txns = self
                    .store
                    .wal_transactions_after(&self.table, state.last_txn)
                    .await?;
                let Some(newest) = txns.iter().map(|t| t.txn).max() else {
                    return Ok(None);
                };

                let counted: Option<u64> = txns.iter().map(|t| t.row_count).sum();
                let total = match counted {
                    Some(added) => {
                        state.mode = WatchMode::RowCounts;
                        state.last_size + added
                    }
                    None => {
                        state.mode = WatchMode::TxnSignal;
                        self.store.row_count(&self.table).await?
                    }
                };
                debug!(
                    "'{}': {} new transactions up to txn {}, total {}",
                    self.table,
                    txns.len(),
                    newest,
                    total
                );
                state.last_txn = newest;
                total
            }
        };

        if candidate > state.last_size {
            debug!(
                "'{}' grew {} -> {} (+{})",
                self.table,
                state.last_size,
                candidate,
                candidate - state.last_size
            );
            state.last_size = candidate;
            Ok(Some(candidate))
        } else {
            if candidate < state.last_size {
                debug!(
                    "'{}' reported {} below last size {}, keeping last size",
                    self.table, candidate, state.last_size
                );
            }
            Ok(None)
        }
    }
}
