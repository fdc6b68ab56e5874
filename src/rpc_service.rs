//! Request/reply service
//!
//! Frontends (stdio, zenoh) hand requests to the service through an
//! [`RpcClient`]; the service answers each one through a oneshot channel.
//! Requests are handled one at a time, in arrival order, so a SET reply is
//! always sent before a later GET reaches the device.

use crate::{
    config::CommandConfig,
    dispatcher::CommandDispatcher,
    error::{JointError, Result},
    protocol::{Reply, Request},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One request in flight. Parse failures travel too so the service can
/// answer them like any other failure.
pub struct Envelope {
    pub request: Result<Request>,
    pub reply_to: oneshot::Sender<Reply>,
}

#[derive(Clone)]
pub struct RpcClient {
    sender: mpsc::Sender<Envelope>,
}

impl RpcClient {
    pub async fn call(&self, request: Request) -> Result<Reply> {
        self.submit(Ok(request)).await
    }

    /// Parse a text or JSON line and submit it. A line that does not parse
    /// still gets a failure reply.
    pub async fn call_line(&self, line: &str) -> Result<Reply> {
        self.submit(Request::parse(line)).await
    }

    async fn submit(&self, request: Result<Request>) -> Result<Reply> {
        let (reply_to, reply) = oneshot::channel();
        self.sender
            .send(Envelope { request, reply_to })
            .await
            .map_err(|_| JointError::ChannelClosed)?;
        reply.await.map_err(|_| JointError::ChannelClosed)
    }
}

pub struct RpcService {
    dispatcher: Arc<CommandDispatcher>,
    receiver: mpsc::Receiver<Envelope>,
    shutdown: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl RpcService {
    pub fn channel(dispatcher: Arc<CommandDispatcher>, config: &CommandConfig) -> (Self, RpcClient) {
        let (sender, receiver) = mpsc::channel(config.queue_depth());
        let service = Self {
            dispatcher,
            receiver,
            shutdown: Arc::new(AtomicBool::new(false)),
            request_timeout: config.request_timeout(),
        };
        (service, RpcClient { sender })
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Serve until the shutdown flag is raised or every client is dropped.
    /// Returns the number of requests answered.
    pub async fn run(mut self) -> u64 {
        info!("RPC service started");
        let mut handled = 0;

        while !self.shutdown.load(Ordering::SeqCst) {
            let envelope = match timeout(POLL_INTERVAL, self.receiver.recv()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    debug!("All RPC clients dropped");
                    break;
                }
                Err(_) => continue,
            };

            let reply = self.handle(envelope.request).await;
            if envelope.reply_to.send(reply).is_err() {
                debug!("Client went away before its reply");
            }
            handled += 1;
        }

        info!("RPC service stopped after {} requests", handled);
        handled
    }

    async fn handle(&self, request: Result<Request>) -> Reply {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                debug!("Unparseable request: {}", e);
                return Reply::failed(&e);
            }
        };

        match timeout(self.request_timeout, self.dispatcher.dispatch(&request)).await {
            Ok(reply) => reply,
            Err(_) => {
                warn!("'{}' exceeded {:?}", request.to_text(), self.request_timeout);
                Reply::failed(&JointError::HardwareTimeout(self.request_timeout))
            }
        }
    }
}
