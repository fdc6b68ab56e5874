//! jointd - multi-axis actuator control library
//!
//! Puts a uniform, capability-gated command surface in front of a raw
//! joint-group device. Values are converted between user units and device
//! ticks, logical axes are remapped onto hardware axes, and fixed-width
//! position counters are unwrapped into continuous positions.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use jointd::{ConsoleTelemetry, DaemonConfig, JointService, TelemetrySink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DaemonConfig::load_from_path("config/default_config.yaml")?;
//!     let sink: Arc<dyn TelemetrySink> = Arc::new(ConsoleTelemetry::new());
//!     let service = JointService::start_simulated(&config, Some(sink))?;
//!
//!     let reply = service.execute("set refs 0.5 0.0 -0.5").await?;
//!     println!("{}", reply.to_json());
//!     println!("{}", service.execute("get encs").await?.to_json());
//!
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **RawDevice**: the driver seam, hardware axis order and raw ticks
//! - **ControlBoard**: unit conversion, axis remapping and wraparound tracking over a RawDevice
//! - **CommandDispatcher**: GET/SET/CALIBRATE/PARK/STOP requests routed onto the board
//! - **RpcService**: serialised request/reply channel shared by every frontend
//! - **StreamingPublisher**: fixed-rate joint state frames to a TelemetrySink
//! - **JointService**: all of the above behind one start/shutdown handle

pub mod capability;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod publisher;
pub mod raw;
pub mod rpc_service;
pub mod service;
pub mod sim;
pub mod stream;
pub mod telemetry;
pub mod types;
pub mod units;
pub mod winding;

#[cfg(feature = "zenoh-integration")]
pub mod zenoh_transport;

// High-level exports
pub use service::{JointService, ServiceStats};
pub use config::{CommandConfig, DaemonConfig, DeviceConfig, Frontend, PublishingConfig, SimulationConfig};
pub use error::{ErrorKind, JointError, Result};
pub use telemetry::{BroadcastTelemetry, ConsoleTelemetry, JointState, NoOpTelemetry, TelemetrySink};

// Core components
pub use capability::{Capability, CapabilitySet};
pub use controller::{ControlBoard, JointSample};
pub use dispatcher::{CommandDispatcher, Route, ROUTES};
pub use protocol::{ErrorInfo, Opcode, Reply, Request, Status, Target, Value};
pub use publisher::{PublisherHandle, PublisherStats, StreamingPublisher};
pub use raw::RawDevice;
pub use rpc_service::{RpcClient, RpcService};
pub use sim::{SimProbe, SimulatedDevice};
pub use stream::{shutdown_signal, CommandStats, CommandStream};
pub use types::{CalibrationParams, ControlMode, Limits, MoveParameter, Pid, PidKind, QuantityKind};
pub use units::{AxisMap, UnitConversion, UnitMapper, UnitsConfig};
pub use winding::{MotionCounterState, TrackedPosition, WraparoundTracker};

#[cfg(feature = "zenoh-integration")]
pub use zenoh_transport::{ZenohRpcFrontend, ZenohTelemetry};
