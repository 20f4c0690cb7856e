//! # Walbridge-Mono: Store Bridge Binary
//!
//! ## OVERVIEW
//!
//! `walbridge-mono` wires both halves of the bridge to a live store:
//!
//! - **Read side**: `HttpQueryEndpoint` → `SqlTableStore` → `WalTableProvider`,
//!   which serves schemas, sizes, growth subscriptions and column pages.
//! - **Write side**: `IngestHandle` over TCP, fed with JSON events from stdin.
//!
//! ## USAGE
//!
//! ```text
//! walbridge-mono schema --table trades
//! walbridge-mono size --table trades
//! walbridge-mono page --table trades --column price --offset 0 --max-rows 10
//! walbridge-mono watch --table trades --table orderbooks_compact
//! cat events.jsonl | walbridge-mono ingest
//! ```
//!
//! Every setting also reads a `WALBRIDGE_*` environment variable.

use anyhow::{anyhow, Result};
use arrow::json::ArrayWriter;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use walbridge_ingest::{EventRecord, IngestHandle, LineEvent, WriterConfig};
use walbridge_sync::{
    HttpQueryEndpoint, LocationKey, PagerConfig, PagingStrategy, ProviderConfig, SizeEvent,
    SqlTableStore, StoreConfig, TableDataBackend, TableKey, WalTableProvider, WatchConfig,
};

#[cfg(test)]
mod tests;

pub type HttpProvider = WalTableProvider<SqlTableStore<HttpQueryEndpoint>>;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Expose store tables as live tables and feed them", long_about = None)]
pub struct Args {
    #[arg(long, env = "WALBRIDGE_HOST", default_value = "127.0.0.1", global = true)]
    pub host: String,
    #[arg(long, env = "WALBRIDGE_HTTP_PORT", default_value_t = 9000, global = true)]
    pub http_port: u16,
    #[arg(long, env = "WALBRIDGE_ILP_PORT", default_value_t = 9009, global = true)]
    pub ilp_port: u16,
    #[arg(
        long,
        env = "WALBRIDGE_IDLE_INTERVAL_MS",
        default_value_t = 50,
        global = true,
        help = "Sleep between transaction log polls"
    )]
    pub idle_interval_ms: u64,
    #[arg(long, env = "WALBRIDGE_JOIN_TIMEOUT_MS", default_value_t = 1000, global = true)]
    pub join_timeout_ms: u64,
    #[arg(long, env = "WALBRIDGE_PAGE_SIZE", default_value_t = 64_000, global = true)]
    pub page_size: usize,
    #[arg(long, env = "WALBRIDGE_ORDER_BY", default_value = "timestamp", global = true)]
    pub order_by: String,
    #[arg(
        long,
        env = "WALBRIDGE_PAGING",
        default_value = "auto",
        global = true,
        help = "Row windowing: auto, row-number or row-id"
    )]
    pub paging: PagingStrategy,
    #[arg(long, env = "WALBRIDGE_REQUEST_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub request_timeout_secs: u64,
    #[arg(long, env = "WALBRIDGE_BATCH_SIZE", default_value_t = 100, global = true)]
    pub batch_size: usize,
    #[arg(long, env = "WALBRIDGE_QUEUE_CAPACITY", default_value_t = 10_000, global = true)]
    pub queue_capacity: usize,
    #[arg(long, env = "WALBRIDGE_RECONNECT_DELAY_MS", default_value_t = 1000, global = true)]
    pub reconnect_delay_ms: u64,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the resolved schema of a table
    Schema {
        #[arg(long)]
        table: String,
    },
    /// Print the current row count of a table
    Size {
        #[arg(long)]
        table: String,
    },
    /// Print one page of a column as JSON
    Page {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 100)]
        max_rows: usize,
    },
    /// Log size changes of tables until interrupted
    Watch {
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
    },
    /// Send JSON events read from stdin, one per line
    Ingest,
}

impl Args {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            host: self.host.clone(),
            http_port: self.http_port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..Default::default()
        }
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            watch: WatchConfig {
                idle_interval: Duration::from_millis(self.idle_interval_ms),
                join_timeout: Duration::from_millis(self.join_timeout_ms),
            },
            pager: PagerConfig {
                order_by: self.order_by.clone(),
                strategy: self.paging,
                page_size: self.page_size,
            },
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            host: self.host.clone(),
            port: self.ilp_port,
            batch_size: self.batch_size,
            queue_capacity: self.queue_capacity,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ..Default::default()
        }
    }

    pub fn provider(&self) -> Result<HttpProvider> {
        let endpoint = Arc::new(HttpQueryEndpoint::new(&self.store_config())?);
        let store = Arc::new(SqlTableStore::new(endpoint));
        Ok(WalTableProvider::new(store, self.provider_config())?)
    }
}

/// Set up signal handling: the first Ctrl-C requests a graceful shutdown,
/// the second exits immediately.
pub async fn setup_signal_handler() -> Arc<AtomicBool> {
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let shutdown_requested_clone = shutdown_requested.clone();

    tokio::spawn(async move {
        loop {
            match signal::ctrl_c().await {
                Ok(()) => {
                    if shutdown_requested_clone.load(Ordering::SeqCst) {
                        warn!("Force exit requested, terminating immediately");
                        std::process::exit(1);
                    }
                    info!("Shutdown signal received, press Ctrl-C again to force exit");
                    shutdown_requested_clone.store(true, Ordering::SeqCst);
                }
                Err(err) => {
                    warn!("Error setting up signal handler: {}", err);
                    break;
                }
            }
        }
    });

    shutdown_requested
}

async fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

pub async fn run(args: Args, shutdown: Arc<AtomicBool>) -> Result<()> {
    match &args.command {
        Command::Schema { table } => {
            let schema = args.provider()?.schema(&TableKey::from(table.as_str())).await?;
            for column in schema.columns() {
                println!("{}\t{:?}", column.name, column.column_type);
            }
        }
        Command::Size { table } => {
            let size = args
                .provider()?
                .location_size(&TableKey::from(table.as_str()), &LocationKey::main())
                .await?;
            println!("{}", size);
        }
        Command::Page {
            table,
            column,
            offset,
            max_rows,
        } => {
            let batch = args
                .provider()?
                .column_values(
                    &TableKey::from(table.as_str()),
                    &LocationKey::main(),
                    column,
                    *offset,
                    0,
                    *max_rows,
                )
                .await?;
            let mut writer = ArrayWriter::new(Vec::new());
            writer.write(&batch)?;
            writer.finish()?;
            println!("{}", String::from_utf8(writer.into_inner())?);
        }
        Command::Watch { tables } => watch(&args, tables, &shutdown).await?,
        Command::Ingest => ingest(&args, &shutdown).await?,
    }
    Ok(())
}

async fn watch(args: &Args, tables: &[String], shutdown: &AtomicBool) -> Result<()> {
    let provider = args.provider()?;
    let mut tasks = Vec::with_capacity(tables.len());
    for name in tables {
        let table = TableKey::from(name.as_str());
        let mut subscription = provider
            .subscribe_location_size(&table, &LocationKey::main())
            .await?;
        info!("'{}' has {} rows", table, subscription.initial());
        tasks.push(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                match event {
                    SizeEvent::Grew(size) => info!("'{}' grew to {} rows", table, size),
                    SizeEvent::Failed(e) => warn!("Watching '{}' failed: {}", table, e),
                }
            }
        }));
    }

    tokio::select! {
        _ = wait_for_shutdown(shutdown) => info!("Stopping watchers"),
        _ = join_watchers(&mut tasks) => warn!("All watchers ended"),
    }
    provider.shutdown().await;
    for task in tasks {
        task.abort();
    }
    Ok(())
}

async fn join_watchers(tasks: &mut [tokio::task::JoinHandle<()>]) {
    for task in tasks.iter_mut() {
        let _ = task.await;
    }
}

async fn ingest(args: &Args, shutdown: &AtomicBool) -> Result<()> {
    let writer = IngestHandle::start(args.writer_config());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut read = 0u64;
    let mut rejected = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = wait_for_shutdown(shutdown) => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        read += 1;
        let event = serde_json::from_str::<EventRecord>(&line)
            .map_err(|e| anyhow!("invalid event JSON: {}", e))
            .and_then(|record| Ok(LineEvent::try_from(record)?));
        if let Err(e) = event.and_then(|event| Ok(writer.write(&event)?)) {
            rejected += 1;
            warn!("Skipping input line {}: {}", read, e);
        }
    }

    let stats = writer.shutdown().await;
    info!("Read {} events, rejected {}", read, rejected);
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}
