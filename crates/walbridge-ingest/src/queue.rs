//! Bounded queue of encoded lines between producers and the writer task.

use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Drops are logged once per this many.
pub const DROP_WARN_INTERVAL: u64 = 100;

/// Producer side of the ingest queue. Enqueueing never waits: when the queue
/// is full the line is discarded and counted.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl IngestQueue {
    /// A queue holding at most `capacity` lines, and the receiver the writer drains.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queue one encoded line. Returns false if it was dropped.
    pub fn enqueue(&self, line: String) -> bool {
        match self.tx.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_WARN_INTERVAL == 0 {
                    warn!("Queue full, dropped {} writes", dropped);
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Writer stopped, dropping line");
                false
            }
        }
    }

    /// Lines waiting to be sent.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
