//! # Backend Registry
//!
//! The registry is the directory of per-table [`BackendInstance`]s and owns
//! every running [`GrowthWatcher`]. It is an explicit object built once by the
//! composition root and shared by `Arc`.
//!
//! Both maps (registry → instance, instance → watcher slot) sit behind
//! `std::sync::Mutex`es that are never held across an `.await`. Replacing a
//! watcher therefore happens in two phases: take the old slot and signal it
//! under the lock, then join it with a bounded timeout after the lock is gone,
//! then start and record the new one.

use futures::FutureExt;
use log::{debug, info, warn};
use std::panic::AssertUnwindSafe;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::watcher::{GrowthWatcher, StopSignal};
use crate::{BridgeError, BridgeResult, SizeEvent, TableKey, TableStore, WatchConfig};

struct WatcherSlot {
    id: u64,
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

/// Per-table backend owning the watcher slot(s) for that table.
pub struct BackendInstance {
    table: String,
    watchers: Mutex<HashMap<String, WatcherSlot>>,
}

impl BackendInstance {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, WatcherSlot>> {
        // A poisoned map is still structurally valid.
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of watcher slots currently recorded.
    pub fn watcher_count(&self) -> usize {
        self.slots().len()
    }

    /// Remove the slot for `table` and signal it to stop.
    fn take_signalled(&self, table: &str) -> Option<WatcherSlot> {
        let slot = self.slots().remove(table);
        if let Some(ref slot) = slot {
            slot.stop.stop();
        }
        slot
    }

    /// Record a slot. A slot displaced by a racing subscription is signalled and returned.
    fn install(&self, table: &str, slot: WatcherSlot) -> Option<WatcherSlot> {
        let displaced = self.slots().insert(table.to_string(), slot);
        if let Some(ref old) = displaced {
            old.stop.stop();
        }
        displaced
    }

    /// Signal and forget the slot for `table` if it still belongs to subscription `id`.
    fn release(&self, table: &str, id: u64) -> bool {
        let mut slots = self.slots();
        match slots.get(table) {
            Some(slot) if slot.id == id => {
                slot.stop.stop();
                slots.remove(table);
                true
            }
            _ => false,
        }
    }

    fn take_all_signalled(&self) -> Vec<(String, WatcherSlot)> {
        let drained: Vec<(String, WatcherSlot)> = self.slots().drain().collect();
        for (table, slot) in &drained {
            slot.stop.stop();
            debug!("Signalled watcher for '{}' to stop", table);
        }
        drained
    }

    /// Stop and join every owned watcher.
    pub async fn stop_all(&self, timeout: Duration) {
        let drained = self.take_all_signalled();
        if !drained.is_empty() {
            info!(
                "Cleaning up {} active watcher(s) for '{}'",
                drained.len(),
                self.table
            );
        }
        for (table, slot) in drained {
            join_bounded(&table, slot.handle, timeout).await;
        }
    }
}

/// Join a signalled watcher, aborting it if it overruns `timeout`.
async fn join_bounded(table: &str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => debug!("Watcher for '{}' stopped cleanly", table),
        Ok(Err(e)) => warn!("Watcher task for '{}' ended abnormally: {}", table, e),
        Err(_) => {
            warn!(
                "Watcher for '{}' didn't stop within {:?}, aborting it",
                table, timeout
            );
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// Decrements the live watcher count when the watcher task ends, however it ends.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle that ends one size subscription.
#[derive(Clone)]
pub struct WatchHandle {
    table: String,
    id: u64,
    stop: Arc<StopSignal>,
    instance: Weak<BackendInstance>,
}

impl WatchHandle {
    /// Signal the watcher to stop. Does not wait for it and never touches a
    /// newer subscription for the same table.
    pub fn unsubscribe(&self) {
        self.stop.stop();
        if let Some(instance) = self.instance.upgrade() {
            if instance.release(&self.table, self.id) {
                info!("Unsubscribed watcher {} for '{}'", self.id, self.table);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

/// A live size subscription: the initial count plus growth notifications.
pub struct SizeSubscription {
    table: TableKey,
    initial: u64,
    updates: mpsc::UnboundedReceiver<SizeEvent>,
    handle: WatchHandle,
}

impl SizeSubscription {
    pub fn table(&self) -> &TableKey {
        &self.table
    }

    /// Row count at the time the subscription was established.
    pub fn initial(&self) -> u64 {
        self.initial
    }

    /// Next notification; `None` once the watcher has stopped.
    pub async fn next(&mut self) -> Option<SizeEvent> {
        self.updates.recv().await
    }

    /// Next notification if one is already queued.
    pub fn try_next(&mut self) -> Option<SizeEvent> {
        self.updates.try_recv().ok()
    }

    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

pub struct BackendRegistry<S: TableStore> {
    store: Arc<S>,
    config: WatchConfig,
    instances: Mutex<HashMap<String, Arc<BackendInstance>>>,
    live: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl<S: TableStore + 'static> BackendRegistry<S> {
    pub fn new(store: Arc<S>, config: WatchConfig) -> Self {
        Self {
            store,
            config,
            instances: Mutex::new(HashMap::new()),
            live: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Arc<BackendInstance>>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The instance for `table`, created on first use. Concurrent callers get the same instance.
    pub fn get_or_create(&self, table: &str) -> Arc<BackendInstance> {
        let mut instances = self.instances();
        if let Some(existing) = instances.get(table) {
            debug!("Reusing backend for table '{}'", table);
            return existing.clone();
        }
        info!("Creating backend for table '{}'", table);
        let instance = Arc::new(BackendInstance::new(table));
        instances.insert(table.to_string(), instance.clone());
        instance
    }

    pub fn get(&self, table: &str) -> Option<Arc<BackendInstance>> {
        self.instances().get(table).cloned()
    }

    /// Names of all registered tables, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances().is_empty()
    }

    /// Watcher tasks that have not yet exited.
    pub fn live_watchers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Start a growth watcher for `table`, replacing any previous one, and
    /// wait for its initial size.
    pub async fn subscribe(&self, table: &TableKey) -> BridgeResult<SizeSubscription> {
        let name = table.name();
        let instance = self.get_or_create(name);

        if let Some(old) = instance.take_signalled(name) {
            info!(
                "Watcher {} already exists for '{}', stopping it first",
                old.id, name
            );
            join_bounded(name, old.handle, self.config.join_timeout).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stop = Arc::new(StopSignal::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (initial_tx, initial_rx) = oneshot::channel();
        let watcher = GrowthWatcher::new(
            name,
            self.store.clone(),
            self.config.clone(),
            stop.clone(),
            events_tx.clone(),
        );

        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live.clone());
        let table_name = name.to_string();
        // The watcher runs inside this one task, so aborting it drops any in-flight query.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            if AssertUnwindSafe(watcher.run(initial_tx))
                .catch_unwind()
                .await
                .is_err()
            {
                warn!("Watcher for '{}' panicked", table_name);
                let _ = events_tx.send(SizeEvent::Failed(BridgeError::Watcher(table_name)));
            }
        });

        if let Some(displaced) = instance.install(
            name,
            WatcherSlot {
                id,
                stop: stop.clone(),
                handle,
            },
        ) {
            warn!(
                "Concurrent subscription for '{}' displaced watcher {}",
                name, displaced.id
            );
            join_bounded(name, displaced.handle, self.config.join_timeout).await;
        }
        info!("Started watcher {} for '{}'", id, name);

        let handle = WatchHandle {
            table: name.to_string(),
            id,
            stop,
            instance: Arc::downgrade(&instance),
        };

        match initial_rx.await {
            Ok(Ok(initial)) => Ok(SizeSubscription {
                table: table.clone(),
                initial,
                updates: events_rx,
                handle,
            }),
            Ok(Err(e)) => {
                handle.unsubscribe();
                Err(e)
            }
            Err(_) => {
                handle.unsubscribe();
                Err(BridgeError::Watcher(name.to_string()))
            }
        }
    }

    /// Stop every watcher of `table`'s instance, then remove the instance.
    pub async fn unregister(&self, table: &str) -> bool {
        let Some(instance) = self.get(table) else {
            return false;
        };
        instance.stop_all(self.config.join_timeout).await;
        let removed = {
            let mut instances = self.instances();
            match instances.get(table) {
                Some(current) if Arc::ptr_eq(current, &instance) => {
                    instances.remove(table);
                    true
                }
                _ => false,
            }
        };
        if removed {
            info!("Unregistered backend for table '{}'", table);
        }
        removed
    }

    /// Stop all watchers across all instances and clear the registry.
    pub async fn cleanup_all(&self) {
        let drained: Vec<Arc<BackendInstance>> = {
            let mut instances = self.instances();
            instances.drain().map(|(_, instance)| instance).collect()
        };
        if drained.is_empty() {
            return;
        }
        info!("Cleaning up all backends ({} tables)", drained.len());
        for instance in drained {
            instance.stop_all(self.config.join_timeout).await;
        }
        info!(
            "All backends cleaned up, {} watcher(s) still live",
            self.live_watchers()
        );
    }
}
