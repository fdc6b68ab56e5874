//! JointService - one handle over the whole daemon
//!
//! Opens the control board, starts the RPC service and (optionally) the
//! streaming publisher, and tears them down again through [`JointService::shutdown`].

use crate::{
    config::DaemonConfig,
    controller::ControlBoard,
    dispatcher::CommandDispatcher,
    error::Result,
    protocol::{Reply, Request},
    publisher::{PublisherHandle, PublisherStats, StreamingPublisher},
    raw::RawDevice,
    rpc_service::{RpcClient, RpcService},
    sim::SimulatedDevice,
    telemetry::TelemetrySink,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub requests: u64,
    pub publisher: Option<PublisherStats>,
}

pub struct JointService {
    board: ControlBoard,
    dispatcher: Arc<CommandDispatcher>,
    client: RpcClient,
    rpc_shutdown: Arc<AtomicBool>,
    rpc_task: JoinHandle<u64>,
    publisher: Option<PublisherHandle>,
}

impl JointService {
    /// Open the board over `raw` and spawn the service tasks. Telemetry is
    /// only streamed when a sink is given.
    pub fn start(config: &DaemonConfig, raw: Box<dyn RawDevice>, sink: Option<Arc<dyn TelemetrySink>>) -> Result<Self> {
        let board = ControlBoard::open(&config.device, raw)?;

        let dispatcher = Arc::new(CommandDispatcher::new(board.clone()));
        let (rpc, client) = RpcService::channel(Arc::clone(&dispatcher), &config.command);
        let rpc_shutdown = rpc.shutdown_flag();
        let rpc_task = tokio::spawn(rpc.run());

        let publisher = sink.map(|sink| StreamingPublisher::new(board.clone(), sink, &config.publishing).spawn());
        if publisher.is_none() {
            info!("Telemetry disabled");
        }

        Ok(Self {
            board,
            dispatcher,
            client,
            rpc_shutdown,
            rpc_task,
            publisher,
        })
    }

    /// Start over a simulated device built from the `simulation` section
    pub fn start_simulated(config: &DaemonConfig, sink: Option<Arc<dyn TelemetrySink>>) -> Result<Self> {
        let simulation = config.simulation.clone().unwrap_or_default();
        let device = SimulatedDevice::new(config.device.axes, config.device.counter_bits, &simulation);
        Self::start(config, Box::new(device), sink)
    }

    pub fn board(&self) -> &ControlBoard {
        &self.board
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// A client for frontends; the service keeps running while any client lives
    pub fn client(&self) -> RpcClient {
        self.client.clone()
    }

    pub async fn call(&self, request: Request) -> Result<Reply> {
        self.client.call(request).await
    }

    pub async fn execute(&self, line: &str) -> Result<Reply> {
        self.client.call_line(line).await
    }

    /// Stop the publisher, then the RPC service, and report what they did
    pub async fn shutdown(self) -> anyhow::Result<ServiceStats> {
        info!("Shutting down joint service");

        let publisher = match self.publisher {
            Some(handle) => Some(handle.shutdown().await?),
            None => None,
        };

        self.rpc_shutdown.store(true, Ordering::SeqCst);
        drop(self.client);
        let requests = self.rpc_task.await?;

        Ok(ServiceStats { requests, publisher })
    }
}
