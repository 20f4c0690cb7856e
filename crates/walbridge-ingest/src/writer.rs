//! # Batch Writer
//!
//! A single background task drains the [`IngestQueue`] and sends lines over a
//! persistent connection:
//!
//! 1. Ensure a connection, waiting the reconnect delay after a failed attempt.
//! 2. Wait up to the poll timeout for one line, then take up to a full batch
//!    more without waiting.
//! 3. Concatenate the batch and send it as one write.
//! 4. On a send failure drop the connection, put the batch back on the queue
//!    (lines that no longer fit count as drops) and back off briefly.
//!
//! Producers never see transmission errors. [`IngestHandle::shutdown`] stops
//! the task after one last best-effort drain over the live connection.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::{Connector, IngestQueue, LineEvent, LineResult, LineSink, TcpConnector};

/// Configuration for the batch writer
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub host: String,
    /// Line protocol port
    pub port: u16,
    pub batch_size: usize,
    pub queue_capacity: usize,
    /// Wait after a failed connection attempt
    pub reconnect_delay: Duration,
    /// Back-off after a failed send
    pub retry_backoff: Duration,
    /// Bound on waiting for the first line of a batch
    pub poll_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9009,
            batch_size: 100,
            queue_capacity: 10_000,
            reconnect_delay: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub queued: usize,
    pub dropped: u64,
    pub sent_lines: u64,
    pub sent_batches: u64,
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent_lines: AtomicU64,
    sent_batches: AtomicU64,
    reconnects: AtomicU64,
}

struct BatchWriter<C: Connector> {
    connector: C,
    config: WriterConfig,
    queue: IngestQueue,
    lines: mpsc::Receiver<String>,
    counters: Arc<Counters>,
    shutdown: watch::Receiver<bool>,
    connected_before: bool,
}

impl<C: Connector> BatchWriter<C> {
    /// Shutdown was requested, or the handle is gone.
    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Sleep for `duration` unless shutdown is requested first.
    async fn pause(&mut self, duration: Duration) {
        if self.stopping() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn connect(&mut self) -> Option<C::Sink> {
        match self.connector.connect().await {
            Ok(sink) => {
                if self.connected_before {
                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!("Reconnected to {}", self.connector.describe());
                } else {
                    info!("Connected to {}", self.connector.describe());
                }
                self.connected_before = true;
                Some(sink)
            }
            Err(e) => {
                warn!(
                    "Failed to connect to {}: {}",
                    self.connector.describe(),
                    e
                );
                None
            }
        }
    }

    /// The next batch, or `None` if nothing arrived within the poll timeout.
    async fn next_batch(&mut self) -> Option<Vec<String>> {
        let first = tokio::time::timeout(self.config.poll_timeout, self.lines.recv())
            .await
            .ok()??;
        let mut batch = Vec::with_capacity(self.config.batch_size);
        batch.push(first);
        while batch.len() < self.config.batch_size {
            match self.lines.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    async fn send(&self, sink: &mut C::Sink, batch: &[String]) -> bool {
        let payload = batch.concat();
        match sink.send(payload.as_bytes()).await {
            Ok(()) => {
                self.counters
                    .sent_lines
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                self.counters.sent_batches.fetch_add(1, Ordering::Relaxed);
                debug!("Sent batch of {} lines ({} bytes)", batch.len(), payload.len());
                true
            }
            Err(e) => {
                warn!("Socket error: {}, reconnecting", e);
                false
            }
        }
    }

    async fn run(mut self) {
        info!(
            "Started batch writer (max_queue={}, batch={})",
            self.config.queue_capacity, self.config.batch_size
        );
        let mut sink: Option<C::Sink> = None;

        while !self.stopping() {
            let Some(active) = sink.as_mut() else {
                sink = self.connect().await;
                if sink.is_none() {
                    let delay = self.config.reconnect_delay;
                    self.pause(delay).await;
                }
                continue;
            };

            let Some(batch) = self.next_batch().await else {
                continue;
            };
            if !self.send(active, &batch).await {
                sink = None;
                let requeued = batch
                    .into_iter()
                    .filter(|line| self.queue.enqueue(line.clone()))
                    .count();
                debug!("Re-queued {} lines after a failed send", requeued);
                let backoff = self.config.retry_backoff;
                self.pause(backoff).await;
            }
        }

        if let Some(mut active) = sink {
            self.final_drain(&mut active).await;
        }
        info!(
            "Writer stopped. Dropped {} writes, {} still queued.",
            self.queue.dropped(),
            self.queue.len()
        );
    }

    async fn final_drain(&mut self, sink: &mut C::Sink) {
        loop {
            let mut batch = Vec::with_capacity(self.config.batch_size);
            while batch.len() < self.config.batch_size {
                match self.lines.try_recv() {
                    Ok(line) => batch.push(line),
                    Err(_) => break,
                }
            }
            if batch.is_empty() || !self.send(sink, &batch).await {
                return;
            }
        }
    }
}

/// Producer-facing handle of a running writer.
pub struct IngestHandle {
    queue: IngestQueue,
    counters: Arc<Counters>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IngestHandle {
    /// Start a writer sending over TCP to the configured host and port.
    pub fn start(config: WriterConfig) -> Self {
        let connector = TcpConnector::new(config.host.clone(), config.port);
        Self::with_connector(connector, config)
    }

    /// Start a writer over any connector.
    pub fn with_connector<C: Connector + 'static>(connector: C, config: WriterConfig) -> Self {
        let (queue, lines) = IngestQueue::bounded(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let writer = BatchWriter {
            connector,
            config: WriterConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            queue: queue.clone(),
            lines,
            counters: counters.clone(),
            shutdown: shutdown_rx,
            connected_before: false,
        };
        let task = tokio::spawn(writer.run());
        Self {
            queue,
            counters,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Encode and queue one event. `Ok(false)` means it was dropped.
    pub fn write(&self, event: &LineEvent) -> LineResult<bool> {
        Ok(self.queue.enqueue(event.to_line()?))
    }

    /// Queue an already encoded line.
    pub fn enqueue(&self, line: String) -> bool {
        self.queue.enqueue(line)
    }

    /// Lines are sent continuously, so there is nothing to force out.
    pub async fn flush(&self) {}

    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            queued: self.queue.len(),
            dropped: self.queue.dropped(),
            sent_lines: self.counters.sent_lines.load(Ordering::Relaxed),
            sent_batches: self.counters.sent_batches.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Stop the writer and wait for it. Later calls return the same totals.
    pub async fn shutdown(&self) -> WriterStats {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Writer task ended abnormally: {}", e);
            }
        }
        self.stats()
    }
}
