//! In-process simulated joint board
//!
//! [`SimulatedDevice`] implements [`RawDevice`] for every capability so the
//! daemon and its tests run without hardware. Position-mode references move
//! the axis immediately; velocity-mode axes integrate their reference,
//! clamped to the velocity limits, over elapsed time. References are in the
//! unwrapped frame even when the counter view wraps. A [`SimProbe`] handle
//! counts raw calls and can inject a one-shot stall.

use crate::{
    capability::{Capability, CapabilitySet},
    config::SimulationConfig,
    error::{JointError, Result},
    raw::{read_capability, write_capability, RawDevice},
    types::{CalibrationParams, ControlMode, Limits, MoveParameter, Pid, PidKind, QuantityKind},
    winding::wrap_counter,
};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Shared view of a simulated device's call counters.
#[derive(Debug, Default)]
pub struct SimProbe {
    reads: AtomicUsize,
    writes: AtomicUsize,
    stall_ms: AtomicU64,
}

impl SimProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.reads() + self.writes()
    }

    /// Delay the next raw call by `duration` in addition to the configured latency.
    pub fn stall_next(&self, duration: Duration) {
        self.stall_ms.store(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct SimAxis {
    position: f64,
    position_ref: f64,
    velocity_ref: f64,
    torque_ref: f64,
    current_ref: f64,
    pwm_ref: f64,
    ref_speed: f64,
    ref_acceleration: f64,
    pids: [Pid; 4],
    limits: Limits,
    velocity_limits: Limits,
    mode: ControlMode,
    amp_enabled: bool,
    max_current: f64,
    calibrated: bool,
    updated: Instant,
}

impl SimAxis {
    fn new(position: f64) -> Self {
        Self {
            position,
            position_ref: position,
            velocity_ref: 0.0,
            torque_ref: 0.0,
            current_ref: 0.0,
            pwm_ref: 0.0,
            ref_speed: 0.0,
            ref_acceleration: 0.0,
            pids: [Pid::default(); 4],
            limits: Limits::new(-1.0e12, 1.0e12),
            velocity_limits: Limits::new(-1.0e12, 1.0e12),
            mode: ControlMode::Position,
            amp_enabled: true,
            max_current: 1000.0,
            calibrated: false,
            updated: Instant::now(),
        }
    }

    fn advance(&mut self) {
        let now = Instant::now();
        if self.mode == ControlMode::Velocity {
            let dt = now.duration_since(self.updated).as_secs_f64();
            self.position = (self.position + self.velocity() * dt).clamp(self.limits.min, self.limits.max);
        }
        self.updated = now;
    }

    fn velocity(&self) -> f64 {
        if self.mode == ControlMode::Velocity {
            self.velocity_ref.clamp(self.velocity_limits.min, self.velocity_limits.max)
        } else {
            0.0
        }
    }
}

pub struct SimulatedDevice {
    axes: Vec<SimAxis>,
    capabilities: CapabilitySet,
    counter_range: Option<f64>,
    latency: Duration,
    remote_variables: BTreeMap<String, Vec<String>>,
    probe: Arc<SimProbe>,
}

impl SimulatedDevice {
    pub fn new(axes: usize, counter_bits: Option<u32>, config: &SimulationConfig) -> Self {
        let axes = (0..axes)
            .map(|axis| SimAxis::new(config.initial_positions.get(axis).copied().unwrap_or(0.0)))
            .collect();

        Self {
            axes,
            capabilities: config.reported_capabilities(),
            counter_range: counter_bits.map(|bits| (1u64 << bits) as f64),
            latency: config.latency(),
            remote_variables: config.remote_variables.clone(),
            probe: Arc::new(SimProbe::default()),
        }
    }

    /// All capabilities, no latency, no wraparound.
    pub fn with_axes(axes: usize) -> Self {
        Self::new(axes, None, &SimulationConfig::default())
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn probe(&self) -> Arc<SimProbe> {
        Arc::clone(&self.probe)
    }

    async fn call(&self, write: bool) {
        if write {
            self.probe.writes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.probe.reads.fetch_add(1, Ordering::SeqCst);
        }

        let stall = Duration::from_millis(self.probe.stall_ms.swap(0, Ordering::SeqCst));
        let delay = self.latency + stall;
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(JointError::Unsupported(capability))
        }
    }

    fn axis(&mut self, axis: usize) -> Result<&mut SimAxis> {
        let count = self.axes.len();
        self.axes.get_mut(axis).ok_or_else(|| JointError::axis_out_of_range(axis, count))
    }

    fn measured(&mut self, kind: QuantityKind, axis: usize) -> Result<f64> {
        let range = self.counter_range;
        let state = self.axis(axis)?;
        state.advance();
        Ok(match kind {
            QuantityKind::Position => match range {
                Some(range) => wrap_counter(state.position, range),
                None => state.position,
            },
            QuantityKind::Velocity => state.velocity(),
            QuantityKind::Acceleration => 0.0,
            QuantityKind::Torque => state.torque_ref,
            QuantityKind::Current => state.current_ref,
            QuantityKind::Pwm => state.pwm_ref,
        })
    }
}

#[async_trait]
impl RawDevice for SimulatedDevice {
    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn axis_count(&self) -> usize {
        self.axes.len()
    }

    async fn get_raw(&mut self, kind: QuantityKind, axis: usize) -> Result<f64> {
        self.call(false).await;
        self.require(read_capability(kind))?;
        self.measured(kind, axis)
    }

    // One bus transaction for the whole group
    async fn get_raw_all(&mut self, kind: QuantityKind, out: &mut [f64]) -> Result<()> {
        self.call(false).await;
        self.require(read_capability(kind))?;
        if out.len() != self.axes.len() {
            return Err(JointError::Range(format!("buffer of {} for {} axes", out.len(), self.axes.len())));
        }
        for (axis, slot) in out.iter_mut().enumerate() {
            *slot = self.measured(kind, axis)?;
        }
        Ok(())
    }

    async fn set_raw(&mut self, kind: QuantityKind, axis: usize, value: f64) -> Result<()> {
        self.call(true).await;
        self.require(write_capability(kind))?;
        let state = self.axis(axis)?;
        state.advance();
        match kind {
            QuantityKind::Position => {
                state.mode = ControlMode::Position;
                state.position_ref = value;
                state.position = value.clamp(state.limits.min, state.limits.max);
            }
            QuantityKind::Velocity | QuantityKind::Acceleration => {
                state.mode = ControlMode::Velocity;
                state.velocity_ref = value;
            }
            QuantityKind::Torque => {
                state.mode = ControlMode::Torque;
                state.torque_ref = value;
            }
            QuantityKind::Current => {
                state.mode = ControlMode::Current;
                state.current_ref = value;
            }
            QuantityKind::Pwm => {
                state.mode = ControlMode::Pwm;
                state.pwm_ref = value;
            }
        }
        debug!("sim axis {} {:?} reference -> {}", axis, kind, value);
        Ok(())
    }

    async fn get_reference_raw(&mut self, kind: QuantityKind, axis: usize) -> Result<f64> {
        self.call(false).await;
        self.require(write_capability(kind))?;
        let state = self.axis(axis)?;
        Ok(match kind {
            QuantityKind::Position => state.position_ref,
            QuantityKind::Velocity | QuantityKind::Acceleration => state.velocity_ref,
            QuantityKind::Torque => state.torque_ref,
            QuantityKind::Current => state.current_ref,
            QuantityKind::Pwm => state.pwm_ref,
        })
    }

    async fn relative_move_raw(&mut self, axis: usize, delta: f64) -> Result<()> {
        self.call(true).await;
        self.require(Capability::PositionControl)?;
        let state = self.axis(axis)?;
        state.advance();
        state.mode = ControlMode::Position;
        state.position_ref += delta;
        state.position = state.position_ref.clamp(state.limits.min, state.limits.max);
        Ok(())
    }

    // Position moves land at once, so only a running velocity move is pending
    async fn check_motion_done(&mut self, axis: usize) -> Result<bool> {
        self.call(false).await;
        self.require(Capability::PositionControl)?;
        let state = self.axis(axis)?;
        state.advance();
        Ok(state.velocity() == 0.0)
    }

    async fn get_move_parameter_raw(&mut self, parameter: MoveParameter, axis: usize) -> Result<f64> {
        self.call(false).await;
        self.require(Capability::PositionControl)?;
        let state = self.axis(axis)?;
        Ok(match parameter {
            MoveParameter::Speed => state.ref_speed,
            MoveParameter::Acceleration => state.ref_acceleration,
        })
    }

    async fn set_move_parameter_raw(&mut self, parameter: MoveParameter, axis: usize, value: f64) -> Result<()> {
        self.call(true).await;
        self.require(Capability::PositionControl)?;
        let state = self.axis(axis)?;
        match parameter {
            MoveParameter::Speed => state.ref_speed = value,
            MoveParameter::Acceleration => state.ref_acceleration = value,
        }
        Ok(())
    }

    async fn get_pid_raw(&mut self, kind: PidKind, axis: usize) -> Result<Pid> {
        self.call(false).await;
        self.require(Capability::Pid)?;
        Ok(self.axis(axis)?.pids[kind as usize])
    }

    async fn set_pid_raw(&mut self, kind: PidKind, axis: usize, pid: Pid) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Pid)?;
        self.axis(axis)?.pids[kind as usize] = pid;
        Ok(())
    }

    async fn get_limits_raw(&mut self, axis: usize) -> Result<Limits> {
        self.call(false).await;
        self.require(Capability::Limits)?;
        Ok(self.axis(axis)?.limits)
    }

    async fn set_limits_raw(&mut self, axis: usize, limits: Limits) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Limits)?;
        self.axis(axis)?.limits = limits;
        Ok(())
    }

    async fn get_velocity_limits_raw(&mut self, axis: usize) -> Result<Limits> {
        self.call(false).await;
        self.require(Capability::Limits)?;
        Ok(self.axis(axis)?.velocity_limits)
    }

    async fn set_velocity_limits_raw(&mut self, axis: usize, limits: Limits) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Limits)?;
        let state = self.axis(axis)?;
        state.advance();
        state.velocity_limits = limits;
        Ok(())
    }

    async fn get_control_mode(&mut self, axis: usize) -> Result<ControlMode> {
        self.call(false).await;
        self.require(Capability::ControlMode)?;
        Ok(self.axis(axis)?.mode)
    }

    async fn set_control_mode(&mut self, axis: usize, mode: ControlMode) -> Result<()> {
        self.call(true).await;
        self.require(Capability::ControlMode)?;
        let state = self.axis(axis)?;
        state.advance();
        state.mode = mode;
        Ok(())
    }

    async fn reset_counter(&mut self, axis: usize) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Encoders)?;
        let state = self.axis(axis)?;
        state.advance();
        state.position = 0.0;
        state.position_ref = 0.0;
        Ok(())
    }

    async fn calibrate(&mut self, axis: usize, params: Option<CalibrationParams>) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Calibration)?;
        let state = self.axis(axis)?;
        state.calibrated = true;
        debug!("sim axis {} calibrated with {:?}", axis, params);
        Ok(())
    }

    async fn is_calibration_done(&mut self, axis: usize) -> Result<bool> {
        self.call(false).await;
        self.require(Capability::Calibration)?;
        Ok(self.axis(axis)?.calibrated)
    }

    async fn park(&mut self, wait: bool) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Calibration)?;
        for state in &mut self.axes {
            state.advance();
            state.mode = ControlMode::Position;
            state.velocity_ref = 0.0;
            state.position_ref = 0.0;
            state.position = 0.0;
        }
        debug!("sim parked (wait: {})", wait);
        Ok(())
    }

    async fn stop(&mut self, axis: usize) -> Result<()> {
        self.call(true).await;
        self.require(Capability::PositionControl)?;
        let state = self.axis(axis)?;
        state.advance();
        state.mode = ControlMode::Position;
        state.velocity_ref = 0.0;
        state.position_ref = state.position;
        Ok(())
    }

    async fn amp_status(&mut self, axis: usize) -> Result<i64> {
        self.call(false).await;
        self.require(Capability::Amplifier)?;
        Ok(i64::from(self.axis(axis)?.amp_enabled))
    }

    async fn enable_amp(&mut self, axis: usize) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Amplifier)?;
        self.axis(axis)?.amp_enabled = true;
        Ok(())
    }

    async fn disable_amp(&mut self, axis: usize) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Amplifier)?;
        let state = self.axis(axis)?;
        state.advance();
        state.amp_enabled = false;
        state.mode = ControlMode::Idle;
        Ok(())
    }

    async fn get_max_current_raw(&mut self, axis: usize) -> Result<f64> {
        self.call(false).await;
        self.require(Capability::Amplifier)?;
        Ok(self.axis(axis)?.max_current)
    }

    async fn set_max_current_raw(&mut self, axis: usize, value: f64) -> Result<()> {
        self.call(true).await;
        self.require(Capability::Amplifier)?;
        self.axis(axis)?.max_current = value;
        Ok(())
    }

    async fn get_remote_variable(&mut self, key: &str) -> Result<Vec<String>> {
        self.call(false).await;
        self.require(Capability::RemoteVariables)?;
        self.remote_variables
            .get(key)
            .cloned()
            .ok_or_else(|| JointError::Hardware(format!("unknown remote variable '{}'", key)))
    }

    async fn set_remote_variable(&mut self, key: &str, values: Vec<String>) -> Result<()> {
        self.call(true).await;
        self.require(Capability::RemoteVariables)?;
        self.remote_variables.insert(key.to_string(), values);
        Ok(())
    }

    async fn remote_variable_keys(&mut self) -> Result<Vec<String>> {
        self.call(false).await;
        self.require(Capability::RemoteVariables)?;
        Ok(self.remote_variables.keys().cloned().collect())
    }
}
