use anyhow::Result;
use clap::Parser;
use log::info;
use walbridge_mono::{run, setup_signal_handler, Args};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder().format_timestamp_secs().init();

    let args = Args::parse();
    let shutdown_signal = setup_signal_handler().await;
    info!("Press Ctrl-C to initiate graceful shutdown, Ctrl-C again to force exit");

    run(args, shutdown_signal).await
}
