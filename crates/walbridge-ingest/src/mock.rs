//! In-memory transport for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{Connector, IngestError, IngestResult, LineSink};

#[derive(Debug, Default)]
struct Shared {
    payloads: Mutex<Vec<String>>,
    fail_connects: AtomicUsize,
    fail_sends: AtomicUsize,
    connects: AtomicUsize,
}

/// Connector recording every payload it is sent, with injectable failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` sends.
    pub fn fail_next_sends(&self, n: usize) {
        self.shared.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Successful connections so far.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Payloads received, one per batch.
    pub fn payloads(&self) -> Vec<String> {
        self.shared.payloads.lock().unwrap().clone()
    }

    /// Every line received, in order.
    pub fn lines(&self) -> Vec<String> {
        self.payloads()
            .iter()
            .flat_map(|p| p.lines().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct MemorySink {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Sink = MemorySink;

    async fn connect(&self) -> IngestResult<MemorySink> {
        if take_failure(&self.shared.fail_connects) {
            return Err(IngestError::Transmission("connection refused".to_string()));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySink {
            shared: self.shared.clone(),
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[async_trait]
impl LineSink for MemorySink {
    async fn send(&mut self, payload: &[u8]) -> IngestResult<()> {
        if take_failure(&self.shared.fail_sends) {
            return Err(IngestError::Transmission("broken pipe".to_string()));
        }
        self.shared
            .payloads
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }
}
