//! Line-oriented command stream
//!
//! Reads newline-delimited requests (text or JSON), submits each one to the
//! RPC service and writes the reply as one JSON line. Empty lines and lines
//! starting with `#` are skipped.

use crate::rpc_service::RpcClient;
use anyhow::{Context, Result};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct CommandStream<R, W> {
    client: RpcClient,
    reader: R,
    writer: W,
    stats: CommandStats,
}

impl<R, W> CommandStream<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(client: RpcClient, reader: R, writer: W) -> Self {
        Self {
            client,
            reader,
            writer,
            stats: CommandStats::default(),
        }
    }

    /// Process lines until end of input or until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<CommandStats>
    where
        F: Future<Output = ()>,
    {
        info!("Command stream active, one request per line");
        tokio::pin!(shutdown);
        let mut buffer = String::new();

        loop {
            buffer.clear();

            tokio::select! {
                line = self.reader.read_line(&mut buffer) => {
                    match line {
                        Ok(0) => {
                            info!("End of input reached");
                            break;
                        }
                        Ok(_) => {
                            let command = buffer.trim();
                            if command.is_empty() || command.starts_with('#') {
                                continue;
                            }
                            let command = command.to_string();
                            self.process(&command).await?;
                        }
                        Err(e) => {
                            error!("Failed to read command: {}", e);
                            break;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, leaving command stream");
                    break;
                }
            }
        }

        self.writer.flush().await?;
        Ok(self.stats)
    }

    async fn process(&mut self, command: &str) -> Result<()> {
        let reply = self
            .client
            .call_line(command)
            .await
            .context("RPC service is not running")?;

        self.stats.total += 1;
        if reply.is_ok() {
            self.stats.succeeded += 1;
        } else {
            self.stats.failed += 1;
        }

        let mut line = reply.to_json();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn stats(&self) -> CommandStats {
        self.stats
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
