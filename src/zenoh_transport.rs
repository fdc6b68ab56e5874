//! Zenoh transport
//!
//! Exposes the RPC service as a queryable at `<prefix>/rpc` and publishes
//! telemetry frames to `<prefix>/state`. A query carries its request either
//! as the payload (text or JSON) or as a `q=` / `cmd=` selector parameter.

use crate::{
    error::JointError,
    protocol::Reply,
    rpc_service::RpcClient,
    telemetry::{JointState, TelemetrySink},
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use zenoh::{
    handlers::{RingChannel, RingChannelHandler},
    pubsub::Publisher,
    query::{Query, Queryable},
    Session,
};

pub fn rpc_key(prefix: &str) -> String {
    format!("{}/rpc", prefix)
}

pub fn state_key(prefix: &str) -> String {
    format!("{}/state", prefix)
}

pub async fn open_session() -> Result<Session> {
    zenoh::open(zenoh::Config::default())
        .await
        .map_err(|e| anyhow!("Failed to open Zenoh session: {}", e))
}

/// Extract the request line from a query payload or its selector parameters.
/// The payload wins when it is not blank.
pub fn request_line(payload: Option<&str>, parameters: &str) -> Result<Option<String>> {
    if let Some(payload) = payload {
        let payload = payload.trim();
        if !payload.is_empty() {
            return Ok(Some(payload.to_string()));
        }
    }

    for param in parameters.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            if key == "q" || key == "cmd" {
                let decoded = urlencoding::decode(value).context("Invalid URL encoding in query parameter")?;
                return Ok(Some(decoded.replace('+', " ")));
            }
        }
    }
    Ok(None)
}

/// Answers zenoh queries through the RPC service
pub struct ZenohRpcFrontend {
    session: Arc<Session>,
    key: String,
}

impl ZenohRpcFrontend {
    pub fn new(session: Arc<Session>, prefix: &str) -> Self {
        Self {
            session,
            key: rpc_key(prefix),
        }
    }

    pub async fn serve(self, client: RpcClient) -> Result<()> {
        let queryable = self
            .session
            .declare_queryable(self.key.clone())
            .with(RingChannel::new(50))
            .complete(true)
            .await
            .map_err(|e| anyhow!("Failed to declare queryable '{}': {}", self.key, e))?;

        info!("Serving requests at '{}'", self.key);
        Self::handle_queries(queryable, client).await;
        Ok(())
    }

    async fn handle_queries(queryable: Queryable<RingChannelHandler<Query>>, client: RpcClient) {
        while let Ok(query) = queryable.recv_async().await {
            debug!("Query on {}", query.key_expr());

            let reply = match Self::parse_query(&query) {
                Ok(Some(line)) => match client.call_line(&line).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!("RPC service unavailable: {}", e);
                        Reply::failed(&e)
                    }
                },
                Ok(None) => Reply::failed(&JointError::Protocol("query carries no request".to_string())),
                Err(e) => Reply::failed(&JointError::Protocol(e.to_string())),
            };

            if let Err(e) = query.reply(query.key_expr(), reply.to_json()).await {
                warn!("Failed to send reply: {}", e);
            }
        }
        info!("Queryable closed");
    }

    fn parse_query(query: &Query) -> Result<Option<String>> {
        let payload = match query.payload() {
            Some(payload) => {
                let bytes: Vec<u8> = payload.to_bytes().into();
                Some(String::from_utf8(bytes).context("Invalid UTF-8 in request payload")?)
            }
            None => None,
        };
        request_line(payload.as_deref(), &query.parameters().to_string())
    }
}

/// Publishes frames as JSON to `<prefix>/state`
#[derive(Clone)]
pub struct ZenohTelemetry {
    publisher: Arc<Publisher<'static>>,
    _session: Arc<Session>,
}

impl ZenohTelemetry {
    pub async fn new(session: Arc<Session>, prefix: &str) -> Result<Self> {
        let key = state_key(prefix);
        let publisher = session
            .declare_publisher(key.clone())
            .await
            .map_err(|e| anyhow!("Failed to create publisher '{}': {}", key, e))?;
        info!("Publishing joint state to '{}'", key);
        Ok(Self {
            publisher: Arc::new(publisher),
            _session: session,
        })
    }
}

#[async_trait]
impl TelemetrySink for ZenohTelemetry {
    async fn publish_joint_state(&self, frame: &JointState) -> Result<()> {
        let payload = serde_json::to_vec(frame).context("Failed to serialize joint state")?;
        self.publisher
            .put(payload)
            .await
            .map_err(|e| anyhow!("Failed to publish joint state: {}", e))?;
        Ok(())
    }
}
