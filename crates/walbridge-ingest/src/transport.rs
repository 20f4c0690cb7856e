//! Connections the writer sends batches over.

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::IngestResult;

/// An open connection accepting encoded batches.
#[async_trait]
pub trait LineSink: Send {
    /// Transmit one batch in full.
    async fn send(&mut self, payload: &[u8]) -> IngestResult<()>;
}

/// Opens connections for the writer, which reconnects through it after failures.
#[async_trait]
pub trait Connector: Send + Sync {
    type Sink: LineSink + 'static;

    async fn connect(&self) -> IngestResult<Self::Sink>;

    /// Address or name used in log messages.
    fn describe(&self) -> String;
}

/// Plain TCP line protocol connection.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Sink = TcpLineSink;

    async fn connect(&self) -> IngestResult<TcpLineSink> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        debug!("Opened line protocol connection to {}", self.describe());
        Ok(TcpLineSink { stream })
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct TcpLineSink {
    stream: TcpStream,
}

#[async_trait]
impl LineSink for TcpLineSink {
    async fn send(&mut self, payload: &[u8]) -> IngestResult<()> {
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
