//! Telemetry frames and sinks
//!
//! The streaming publisher hands every [`JointState`] frame to a
//! [`TelemetrySink`], so the same loop can print to stdout, fan out
//! in-process, or publish over zenoh.

use crate::controller::JointSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One periodic snapshot of the joint group, logical order, user units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub sequence: u64,
    /// Wall-clock seconds since the Unix epoch
    pub timestamp: f64,
    pub position: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torque: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Vec<f64>>,
}

fn round_to(value: f64, decimal_places: Option<u32>) -> f64 {
    match decimal_places {
        Some(places) => {
            let factor = 10f64.powi(places as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

impl JointState {
    pub fn from_sample(sequence: u64, timestamp: f64, sample: &JointSample, decimal_places: Option<u32>) -> Self {
        let round = |values: &Vec<f64>| values.iter().map(|v| round_to(*v, decimal_places)).collect::<Vec<_>>();
        Self {
            sequence,
            timestamp,
            position: round(&sample.position),
            velocity: sample.velocity.as_ref().map(round),
            torque: sample.torque.as_ref().map(round),
            current: sample.current.as_ref().map(round),
        }
    }
}

/// Destination for telemetry frames
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish_joint_state(&self, frame: &JointState) -> anyhow::Result<()>;
}

/// Discards every frame
#[derive(Debug, Clone, Default)]
pub struct NoOpTelemetry;

#[async_trait]
impl TelemetrySink for NoOpTelemetry {
    async fn publish_joint_state(&self, _frame: &JointState) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Prints frames to stdout as `[STATE] {json}`
#[derive(Debug, Clone, Default)]
pub struct ConsoleTelemetry {
    pub pretty_print: bool,
}

impl ConsoleTelemetry {
    pub fn new() -> Self {
        Self { pretty_print: false }
    }

    pub fn pretty() -> Self {
        Self { pretty_print: true }
    }
}

#[async_trait]
impl TelemetrySink for ConsoleTelemetry {
    async fn publish_joint_state(&self, frame: &JointState) -> anyhow::Result<()> {
        if self.pretty_print {
            println!("[STATE] {}", serde_json::to_string_pretty(frame)?);
        } else {
            println!("[STATE] {}", serde_json::to_string(frame)?);
        }
        Ok(())
    }
}

/// In-process fan-out. Frames are dropped while nobody subscribes.
#[derive(Debug, Clone)]
pub struct BroadcastTelemetry {
    sender: broadcast::Sender<JointState>,
}

impl BroadcastTelemetry {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JointState> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl TelemetrySink for BroadcastTelemetry {
    async fn publish_joint_state(&self, frame: &JointState) -> anyhow::Result<()> {
        // send only fails when there are no receivers
        let _ = self.sender.send(frame.clone());
        Ok(())
    }
}
