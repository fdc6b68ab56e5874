//! Control board: one joint group behind a shared device lock
//!
//! [`ControlBoard`] owns the raw device and the wraparound tracker behind a
//! single `tokio::sync::Mutex`, and presents every operation in logical axis
//! order and user units. Each raw call is bounded by the configured call
//! timeout; a timeout drops the guard and surfaces as
//! [`JointError::HardwareTimeout`].

use crate::{
    capability::{Capability, CapabilitySet},
    config::DeviceConfig,
    error::{JointError, Result},
    raw::{read_capability, write_capability, RawDevice},
    types::{CalibrationParams, ControlMode, Limits, MoveParameter, Pid, PidKind, QuantityKind},
    units::UnitMapper,
    winding::WraparoundTracker,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info};

/// Mutable device state. Only reachable through the board's lock.
struct DeviceState {
    raw: Box<dyn RawDevice>,
    tracker: WraparoundTracker,
    /// Hardware-ordered scratch buffer sized once at open
    scratch: Vec<f64>,
}

impl DeviceState {
    /// Raw offset between the device's unwrapped frame and encoder readings
    fn frame_offset(&self, hardware: usize) -> Result<f64> {
        self.tracker.frame_offset(hardware)
    }
}

/// One consistent snapshot of the group, logical order, user units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointSample {
    pub position: Vec<f64>,
    pub velocity: Option<Vec<f64>>,
    pub torque: Option<Vec<f64>>,
    pub current: Option<Vec<f64>>,
}

impl JointSample {
    pub fn new(axes: usize) -> Self {
        Self {
            position: vec![0.0; axes],
            ..Default::default()
        }
    }
}

async fn bounded<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(JointError::HardwareTimeout(limit)),
    }
}

#[derive(Clone)]
pub struct ControlBoard {
    name: String,
    mapper: Arc<UnitMapper>,
    capabilities: CapabilitySet,
    call_timeout: Duration,
    state: Arc<Mutex<DeviceState>>,
}

impl ControlBoard {
    /// Open a board over `raw`. The effective capability set is what the
    /// device reports, restricted to the configured allow-list.
    pub fn open(config: &DeviceConfig, raw: Box<dyn RawDevice>) -> Result<Self> {
        let mapper = config.unit_mapper()?;
        let axes = mapper.axes();

        if raw.axis_count() != axes {
            return Err(JointError::Config(format!(
                "device '{}' reports {} axes, configuration expects {}",
                config.name,
                raw.axis_count(),
                axes
            )));
        }

        let capabilities = raw.capabilities().intersection(&config.allowed_capabilities());
        let tracker = WraparoundTracker::new(axes, config.counter_bits)?;

        info!("Opened joint group '{}' with {} axes", config.name, axes);
        info!(
            "Capabilities: {}",
            capabilities.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
        );
        if let Some(bits) = config.counter_bits {
            info!("Wraparound tracking enabled for {}-bit counters", bits);
        }

        Ok(Self {
            name: config.name.clone(),
            mapper: Arc::new(mapper),
            capabilities,
            call_timeout: config.call_timeout(),
            state: Arc::new(Mutex::new(DeviceState {
                raw,
                tracker,
                scratch: vec![0.0; axes],
            })),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn axes(&self) -> usize {
        self.mapper.axes()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn mapper(&self) -> &UnitMapper {
        &self.mapper
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(JointError::Unsupported(capability))
        }
    }

    fn hardware(&self, axis: usize) -> Result<usize> {
        self.mapper.to_hardware_index(axis)
    }

    fn check_finite(values: &[f64]) -> Result<()> {
        match values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(JointError::Range(format!("value {} is not finite", index))),
            None => Ok(()),
        }
    }

    /// Every joint in range, no repeats, one value per joint.
    fn check_group(&self, joints: &[usize], values: usize) -> Result<()> {
        if joints.is_empty() || joints.len() != values {
            return Err(JointError::Range(format!(
                "{} values for {} joints",
                values,
                joints.len()
            )));
        }
        let mut seen = vec![false; self.axes()];
        for &joint in joints {
            let slot = seen
                .get_mut(joint)
                .ok_or_else(|| JointError::axis_out_of_range(joint, self.axes()))?;
            if *slot {
                return Err(JointError::Range(format!("joint {} listed twice", joint)));
            }
            *slot = true;
        }
        Ok(())
    }

    fn all_joints(&self) -> Vec<usize> {
        (0..self.axes()).collect()
    }

    // ---- measured quantities ----

    /// Measured value of one axis. Positions go through the wraparound tracker.
    pub async fn read(&self, kind: QuantityKind, axis: usize) -> Result<f64> {
        self.require(read_capability(kind))?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let raw = bounded(self.call_timeout, state.raw.get_raw(kind, hardware)).await?;
        let raw = match kind {
            QuantityKind::Position => state.tracker.update(hardware, raw)?.absolute,
            _ => raw,
        };
        self.mapper.to_user(kind, hardware, raw)
    }

    /// Measured value of every axis into `out`, under one lock acquisition.
    pub async fn read_all_into(&self, kind: QuantityKind, out: &mut [f64]) -> Result<()> {
        self.require(read_capability(kind))?;
        if out.len() != self.axes() {
            return Err(JointError::Range(format!("buffer of {} for {} axes", out.len(), self.axes())));
        }

        let mut guard = self.state.lock().await;
        Self::read_locked(&mut guard, &self.mapper, self.call_timeout, kind, out).await
    }

    pub async fn read_all(&self, kind: QuantityKind) -> Result<Vec<f64>> {
        let mut out = vec![0.0; self.axes()];
        self.read_all_into(kind, &mut out).await?;
        Ok(out)
    }

    async fn read_locked(
        state: &mut DeviceState,
        mapper: &UnitMapper,
        limit: Duration,
        kind: QuantityKind,
        out: &mut [f64],
    ) -> Result<()> {
        bounded(limit, state.raw.get_raw_all(kind, &mut state.scratch)).await?;
        if kind == QuantityKind::Position {
            for (hardware, value) in state.scratch.iter_mut().enumerate() {
                *value = state.tracker.update(hardware, *value)?.absolute;
            }
        }
        mapper.to_user_all(kind, &state.scratch, out)
    }

    /// Snapshot used by the streaming publisher. Extended quantities are
    /// included only when requested and supported.
    pub async fn sample_into(&self, extended: bool, sample: &mut JointSample) -> Result<()> {
        self.require(Capability::Encoders)?;
        let axes = self.axes();
        sample.position.resize(axes, 0.0);

        let mut guard = self.state.lock().await;
        Self::read_locked(&mut guard, &self.mapper, self.call_timeout, QuantityKind::Position, &mut sample.position).await?;

        if !extended {
            return Ok(());
        }
        for (kind, slot) in [
            (QuantityKind::Velocity, &mut sample.velocity),
            (QuantityKind::Torque, &mut sample.torque),
            (QuantityKind::Current, &mut sample.current),
        ] {
            if !self.capabilities.contains(read_capability(kind)) {
                *slot = None;
                continue;
            }
            let buffer = slot.get_or_insert_with(|| vec![0.0; axes]);
            Self::read_locked(&mut guard, &self.mapper, self.call_timeout, kind, buffer).await?;
        }
        Ok(())
    }

    // ---- references ----

    /// Command one axis. Position references are shifted by the tracker's
    /// frame offset so they share the frame of encoder readings.
    pub async fn write(&self, kind: QuantityKind, axis: usize, value: f64) -> Result<()> {
        self.require(write_capability(kind))?;
        Self::check_finite(&[value])?;
        let (hardware, raw) = self.mapper.user_to_raw(kind, axis, value)?;

        let mut guard = self.state.lock().await;
        let raw = match kind {
            QuantityKind::Position => raw + guard.frame_offset(hardware)?,
            _ => raw,
        };
        debug!("axis {} (hw {}) {:?} reference {} -> raw {}", axis, hardware, kind, value, raw);
        bounded(self.call_timeout, guard.raw.set_raw(kind, hardware, raw)).await
    }

    /// Command all axes; `values` is in logical order.
    pub async fn write_all(&self, kind: QuantityKind, values: &[f64]) -> Result<()> {
        self.write_many(kind, &self.all_joints(), values).await
    }

    /// Command a subset of axes. Nothing is written unless every joint and
    /// value is valid.
    pub async fn write_many(&self, kind: QuantityKind, joints: &[usize], values: &[f64]) -> Result<()> {
        self.require(write_capability(kind))?;
        self.check_group(joints, values.len())?;
        Self::check_finite(values)?;

        let mut converted = Vec::with_capacity(joints.len());
        for (&joint, &value) in joints.iter().zip(values) {
            converted.push(self.mapper.user_to_raw(kind, joint, value)?);
        }

        let mut guard = self.state.lock().await;
        for (hardware, raw) in converted {
            let raw = match kind {
                QuantityKind::Position => raw + guard.frame_offset(hardware)?,
                _ => raw,
            };
            bounded(self.call_timeout, guard.raw.set_raw(kind, hardware, raw)).await?;
        }
        Ok(())
    }

    /// Last commanded reference of one axis.
    pub async fn reference(&self, kind: QuantityKind, axis: usize) -> Result<f64> {
        self.require(write_capability(kind))?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        let raw = bounded(self.call_timeout, guard.raw.get_reference_raw(kind, hardware)).await?;
        let raw = match kind {
            QuantityKind::Position => raw - guard.frame_offset(hardware)?,
            _ => raw,
        };
        self.mapper.to_user(kind, hardware, raw)
    }

    pub async fn references(&self, kind: QuantityKind) -> Result<Vec<f64>> {
        self.require(write_capability(kind))?;
        let mut out = vec![0.0; self.axes()];

        let mut guard = self.state.lock().await;
        for (axis, slot) in out.iter_mut().enumerate() {
            let hardware = self.hardware(axis)?;
            let raw = bounded(self.call_timeout, guard.raw.get_reference_raw(kind, hardware)).await?;
            let raw = match kind {
                QuantityKind::Position => raw - guard.frame_offset(hardware)?,
                _ => raw,
            };
            *slot = self.mapper.to_user(kind, hardware, raw)?;
        }
        Ok(out)
    }

    // ---- encoders ----

    /// Redefine the current position of `axis` as `value` user units.
    /// Runs under the device lock, so no sample interleaves.
    pub async fn set_encoder(&self, axis: usize, value: f64) -> Result<()> {
        self.set_encoders_many(&[axis], &[value]).await
    }

    pub async fn set_encoders(&self, values: &[f64]) -> Result<()> {
        self.set_encoders_many(&self.all_joints(), values).await
    }

    pub async fn set_encoders_many(&self, joints: &[usize], values: &[f64]) -> Result<()> {
        self.require(Capability::Encoders)?;
        self.check_group(joints, values.len())?;
        Self::check_finite(values)?;

        let mut targets = Vec::with_capacity(joints.len());
        for (&joint, &value) in joints.iter().zip(values) {
            targets.push(self.mapper.user_to_raw(QuantityKind::Position, joint, value)?);
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        for (hardware, target) in targets {
            let current = bounded(self.call_timeout, state.raw.get_raw(QuantityKind::Position, hardware)).await?;
            // count any wrap since the last sample before it moves into the offset
            state.tracker.update(hardware, current)?;
            state.tracker.define_zero(hardware, current, -target)?;
            debug!("hw axis {} re-referenced at raw {} to {}", hardware, current, target);
        }
        Ok(())
    }

    /// Zero the hardware counter and the tracker.
    pub async fn reset_encoder(&self, axis: usize) -> Result<()> {
        self.reset_encoders_many(&[axis]).await
    }

    pub async fn reset_encoders(&self) -> Result<()> {
        self.reset_encoders_many(&self.all_joints()).await
    }

    pub async fn reset_encoders_many(&self, joints: &[usize]) -> Result<()> {
        self.require(Capability::Encoders)?;
        self.check_group(joints, joints.len())?;

        let mut guard = self.state.lock().await;
        for &joint in joints {
            let hardware = self.hardware(joint)?;
            bounded(self.call_timeout, guard.raw.reset_counter(hardware)).await?;
            guard.tracker.reset(hardware)?;
        }
        Ok(())
    }

    // ---- pid ----

    pub async fn pid(&self, kind: PidKind, axis: usize) -> Result<Pid> {
        self.require(Capability::Pid)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        let raw = bounded(self.call_timeout, guard.raw.get_pid_raw(kind, hardware)).await?;
        self.mapper.pid_to_user(kind, hardware, &raw)
    }

    pub async fn pids(&self, kind: PidKind) -> Result<Vec<Pid>> {
        self.require(Capability::Pid)?;
        let mut out = Vec::with_capacity(self.axes());

        let mut guard = self.state.lock().await;
        for axis in 0..self.axes() {
            let hardware = self.hardware(axis)?;
            let raw = bounded(self.call_timeout, guard.raw.get_pid_raw(kind, hardware)).await?;
            out.push(self.mapper.pid_to_user(kind, hardware, &raw)?);
        }
        Ok(out)
    }

    pub async fn set_pid(&self, kind: PidKind, axis: usize, pid: Pid) -> Result<()> {
        self.set_pids_many(kind, &[axis], &[pid]).await
    }

    pub async fn set_pids(&self, kind: PidKind, pids: &[Pid]) -> Result<()> {
        self.set_pids_many(kind, &self.all_joints(), pids).await
    }

    pub async fn set_pids_many(&self, kind: PidKind, joints: &[usize], pids: &[Pid]) -> Result<()> {
        self.require(Capability::Pid)?;
        self.check_group(joints, pids.len())?;
        if pids.iter().any(|pid| !pid.is_finite()) {
            return Err(JointError::Range("pid contains a non-finite value".to_string()));
        }

        let mut converted = Vec::with_capacity(pids.len());
        for (&joint, pid) in joints.iter().zip(pids) {
            let hardware = self.hardware(joint)?;
            converted.push((hardware, self.mapper.pid_to_hardware(kind, hardware, pid)?));
        }

        let mut guard = self.state.lock().await;
        for (hardware, raw) in converted {
            bounded(self.call_timeout, guard.raw.set_pid_raw(kind, hardware, raw)).await?;
        }
        Ok(())
    }

    // ---- limits ----

    pub async fn limits(&self, axis: usize) -> Result<Limits> {
        self.require(Capability::Limits)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        let raw = bounded(self.call_timeout, guard.raw.get_limits_raw(hardware)).await?;
        let offset = guard.frame_offset(hardware)?;
        self.mapper.limits_to_user(QuantityKind::Position, hardware, Limits::new(raw.min - offset, raw.max - offset))
    }

    pub async fn set_limits(&self, axis: usize, limits: Limits) -> Result<()> {
        self.require(Capability::Limits)?;
        Self::check_finite(&[limits.min, limits.max])?;
        let hardware = self.hardware(axis)?;
        let raw = self.mapper.limits_to_hardware(QuantityKind::Position, hardware, limits)?;

        let mut guard = self.state.lock().await;
        let offset = guard.frame_offset(hardware)?;
        bounded(
            self.call_timeout,
            guard.raw.set_limits_raw(hardware, Limits::new(raw.min + offset, raw.max + offset)),
        )
        .await
    }

    /// Velocity limits in user velocity units
    pub async fn velocity_limits(&self, axis: usize) -> Result<Limits> {
        self.require(Capability::Limits)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        let raw = bounded(self.call_timeout, guard.raw.get_velocity_limits_raw(hardware)).await?;
        self.mapper.limits_to_user(QuantityKind::Velocity, hardware, raw)
    }

    pub async fn set_velocity_limits(&self, axis: usize, limits: Limits) -> Result<()> {
        self.require(Capability::Limits)?;
        Self::check_finite(&[limits.min, limits.max])?;
        let hardware = self.hardware(axis)?;
        let raw = self.mapper.limits_to_hardware(QuantityKind::Velocity, hardware, limits)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.set_velocity_limits_raw(hardware, raw)).await
    }

    // ---- control modes ----

    pub async fn control_mode(&self, axis: usize) -> Result<ControlMode> {
        self.require(Capability::ControlMode)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.get_control_mode(hardware)).await
    }

    pub async fn control_modes(&self) -> Result<Vec<ControlMode>> {
        self.require(Capability::ControlMode)?;
        let mut out = Vec::with_capacity(self.axes());

        let mut guard = self.state.lock().await;
        for axis in 0..self.axes() {
            let hardware = self.hardware(axis)?;
            out.push(bounded(self.call_timeout, guard.raw.get_control_mode(hardware)).await?);
        }
        Ok(out)
    }

    pub async fn set_control_mode(&self, axis: usize, mode: ControlMode) -> Result<()> {
        self.set_control_modes_many(&[axis], &[mode]).await
    }

    pub async fn set_control_modes(&self, modes: &[ControlMode]) -> Result<()> {
        self.set_control_modes_many(&self.all_joints(), modes).await
    }

    pub async fn set_control_modes_many(&self, joints: &[usize], modes: &[ControlMode]) -> Result<()> {
        self.require(Capability::ControlMode)?;
        self.check_group(joints, modes.len())?;
        if let Some(mode) = modes.iter().find(|mode| !mode.is_settable()) {
            return Err(JointError::Protocol(format!("control mode '{}' cannot be requested", mode.name())));
        }

        let mut guard = self.state.lock().await;
        for (&joint, &mode) in joints.iter().zip(modes) {
            let hardware = self.hardware(joint)?;
            bounded(self.call_timeout, guard.raw.set_control_mode(hardware, mode)).await?;
        }
        Ok(())
    }

    // ---- position moves ----

    /// Move each listed axis by a delta from its current position reference.
    pub async fn move_relative_many(&self, joints: &[usize], deltas: &[f64]) -> Result<()> {
        self.require(Capability::PositionControl)?;
        self.check_group(joints, deltas.len())?;
        Self::check_finite(deltas)?;

        let mut converted = Vec::with_capacity(joints.len());
        for (&joint, &delta) in joints.iter().zip(deltas) {
            let hardware = self.hardware(joint)?;
            converted.push((hardware, self.mapper.span_to_hardware(QuantityKind::Position, hardware, delta)?));
        }

        let mut guard = self.state.lock().await;
        for (hardware, delta) in converted {
            bounded(self.call_timeout, guard.raw.relative_move_raw(hardware, delta)).await?;
        }
        Ok(())
    }

    pub async fn move_relative(&self, axis: usize, delta: f64) -> Result<()> {
        self.move_relative_many(&[axis], &[delta]).await
    }

    pub async fn motion_done(&self, axis: usize) -> Result<bool> {
        self.motion_done_many(&[axis]).await
    }

    /// True once every listed axis has finished its move
    pub async fn motion_done_many(&self, joints: &[usize]) -> Result<bool> {
        self.require(Capability::PositionControl)?;
        self.check_group(joints, joints.len())?;

        let mut guard = self.state.lock().await;
        for &joint in joints {
            let hardware = self.hardware(joint)?;
            if !bounded(self.call_timeout, guard.raw.check_motion_done(hardware)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Speed or acceleration used by position moves, user units
    pub async fn move_parameter(&self, parameter: MoveParameter, axis: usize) -> Result<f64> {
        self.require(Capability::PositionControl)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        let raw = bounded(self.call_timeout, guard.raw.get_move_parameter_raw(parameter, hardware)).await?;
        self.mapper.span_to_user(parameter.quantity(), hardware, raw)
    }

    pub async fn move_parameters(&self, parameter: MoveParameter) -> Result<Vec<f64>> {
        self.require(Capability::PositionControl)?;
        let mut out = vec![0.0; self.axes()];

        let mut guard = self.state.lock().await;
        for (axis, slot) in out.iter_mut().enumerate() {
            let hardware = self.hardware(axis)?;
            let raw = bounded(self.call_timeout, guard.raw.get_move_parameter_raw(parameter, hardware)).await?;
            *slot = self.mapper.span_to_user(parameter.quantity(), hardware, raw)?;
        }
        Ok(out)
    }

    pub async fn set_move_parameter(&self, parameter: MoveParameter, axis: usize, value: f64) -> Result<()> {
        self.set_move_parameters_many(parameter, &[axis], &[value]).await
    }

    /// Magnitudes only; negative values are rejected before any write.
    pub async fn set_move_parameters_many(&self, parameter: MoveParameter, joints: &[usize], values: &[f64]) -> Result<()> {
        self.require(Capability::PositionControl)?;
        self.check_group(joints, values.len())?;
        Self::check_finite(values)?;
        if let Some(value) = values.iter().find(|v| **v < 0.0) {
            return Err(JointError::Range(format!("{} must not be negative, got {}", parameter.name(), value)));
        }

        let mut converted = Vec::with_capacity(joints.len());
        for (&joint, &value) in joints.iter().zip(values) {
            let hardware = self.hardware(joint)?;
            let raw = self.mapper.span_to_hardware(parameter.quantity(), hardware, value)?;
            converted.push((hardware, raw.abs()));
        }

        let mut guard = self.state.lock().await;
        for (hardware, raw) in converted {
            bounded(self.call_timeout, guard.raw.set_move_parameter_raw(parameter, hardware, raw)).await?;
        }
        Ok(())
    }

    // ---- calibration, parking, stopping ----

    pub async fn calibrate(&self, axis: usize, params: Option<CalibrationParams>) -> Result<()> {
        self.require(Capability::Calibration)?;
        let hardware = self.hardware(axis)?;
        info!("Calibrating axis {} (hw {})", axis, hardware);

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.calibrate(hardware, params)).await
    }

    pub async fn calibration_done(&self, axis: usize) -> Result<bool> {
        self.require(Capability::Calibration)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.is_calibration_done(hardware)).await
    }

    pub async fn park(&self, wait: bool) -> Result<()> {
        self.require(Capability::Calibration)?;
        info!("Parking joint group '{}'", self.name);

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.park(wait)).await
    }

    pub async fn stop(&self, axis: usize) -> Result<()> {
        self.require(Capability::PositionControl)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.stop(hardware)).await
    }

    pub async fn stop_all(&self) -> Result<()> {
        self.require(Capability::PositionControl)?;
        info!("Stopping all axes of '{}'", self.name);

        let mut guard = self.state.lock().await;
        for hardware in 0..self.axes() {
            bounded(self.call_timeout, guard.raw.stop(hardware)).await?;
        }
        Ok(())
    }

    // ---- amplifiers ----

    pub async fn amp_status(&self, axis: usize) -> Result<i64> {
        self.require(Capability::Amplifier)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.amp_status(hardware)).await
    }

    pub async fn amp_statuses(&self) -> Result<Vec<i64>> {
        self.require(Capability::Amplifier)?;
        let mut out = Vec::with_capacity(self.axes());

        let mut guard = self.state.lock().await;
        for axis in 0..self.axes() {
            let hardware = self.hardware(axis)?;
            out.push(bounded(self.call_timeout, guard.raw.amp_status(hardware)).await?);
        }
        Ok(out)
    }

    pub async fn enable_amp(&self, axis: usize) -> Result<()> {
        self.require(Capability::Amplifier)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.enable_amp(hardware)).await
    }

    pub async fn disable_amp(&self, axis: usize) -> Result<()> {
        self.require(Capability::Amplifier)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.disable_amp(hardware)).await
    }

    /// Current limit in user current units
    pub async fn max_current(&self, axis: usize) -> Result<f64> {
        self.require(Capability::Amplifier)?;
        let hardware = self.hardware(axis)?;

        let mut guard = self.state.lock().await;
        let raw = bounded(self.call_timeout, guard.raw.get_max_current_raw(hardware)).await?;
        self.mapper.to_user(QuantityKind::Current, hardware, raw)
    }

    pub async fn set_max_current(&self, axis: usize, value: f64) -> Result<()> {
        self.require(Capability::Amplifier)?;
        Self::check_finite(&[value])?;
        let (hardware, raw) = self.mapper.user_to_raw(QuantityKind::Current, axis, value)?;

        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.set_max_current_raw(hardware, raw)).await
    }

    // ---- remote variables ----

    pub async fn remote_variable(&self, key: &str) -> Result<Vec<String>> {
        self.require(Capability::RemoteVariables)?;
        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.get_remote_variable(key)).await
    }

    pub async fn set_remote_variable(&self, key: &str, values: Vec<String>) -> Result<()> {
        self.require(Capability::RemoteVariables)?;
        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.set_remote_variable(key, values)).await
    }

    pub async fn remote_variable_keys(&self) -> Result<Vec<String>> {
        self.require(Capability::RemoteVariables)?;
        let mut guard = self.state.lock().await;
        bounded(self.call_timeout, guard.raw.remote_variable_keys()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sim::{SimProbe, SimulatedDevice},
        units::{UnitConversion, UnitsConfig},
    };

    fn device_config(axes: usize) -> DeviceConfig {
        DeviceConfig {
            name: "test".to_string(),
            axes,
            axis_map: None,
            units: UnitsConfig::default(),
            counter_bits: None,
            capabilities: None,
            call_timeout_ms: Some(50),
        }
    }

    fn open(config: &DeviceConfig, device: SimulatedDevice) -> (ControlBoard, Arc<SimProbe>) {
        let probe = device.probe();
        (ControlBoard::open(config, Box::new(device)).unwrap(), probe)
    }

    #[tokio::test]
    async fn test_axis_count_mismatch_is_configuration_error() {
        let result = ControlBoard::open(&device_config(3), Box::new(SimulatedDevice::with_axes(2)));
        assert!(matches!(result, Err(JointError::Config(_))));
    }

    #[tokio::test]
    async fn test_allow_list_restricts_capabilities() {
        let mut config = device_config(1);
        config.capabilities = Some(vec![Capability::Encoders]);
        let (board, probe) = open(&config, SimulatedDevice::with_axes(1));

        assert!(matches!(
            board.write(QuantityKind::Position, 0, 1.0).await,
            Err(JointError::Unsupported(Capability::PositionControl))
        ));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_set_encoder_redefines_reading() {
        let mut config = device_config(2);
        config.units.position = Some(UnitConversion { scales: vec![100.0, 100.0], zeros: vec![10.0, 0.0] });
        config.counter_bits = Some(16);
        let (board, _probe) = open(&config, SimulatedDevice::new(2, Some(16), &Default::default()));

        board.write(QuantityKind::Position, 1, 2.0).await.unwrap();
        assert_eq!(board.read(QuantityKind::Position, 1).await.unwrap(), 2.0);

        board.set_encoder(1, 5.0).await.unwrap();
        assert_eq!(board.read(QuantityKind::Position, 1).await.unwrap(), 5.0);

        // references follow the re-referenced frame
        board.write(QuantityKind::Position, 1, 6.0).await.unwrap();
        assert!((board.read(QuantityKind::Position, 1).await.unwrap() - 6.0).abs() < 1e-9);
        assert!((board.reference(QuantityKind::Position, 1).await.unwrap() - 6.0).abs() < 1e-9);

        board.set_encoders(&[0.5, 0.0]).await.unwrap();
        let positions = board.read_all(QuantityKind::Position).await.unwrap();
        assert!((positions[0] - 0.5).abs() < 1e-9);
        assert!(positions[1].abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_group_write_validates_before_writing() {
        let (board, probe) = open(&device_config(3), SimulatedDevice::with_axes(3));

        let bad = [
            board.write_many(QuantityKind::Position, &[0, 5], &[1.0, 2.0]).await,
            board.write_many(QuantityKind::Position, &[0, 0], &[1.0, 2.0]).await,
            board.write_all(QuantityKind::Position, &[1.0, 2.0]).await,
            board.write_all(QuantityKind::Position, &[1.0, f64::NAN, 3.0]).await,
        ];
        for result in bad {
            assert!(matches!(result, Err(JointError::Range(_))));
        }
        assert_eq!(probe.writes(), 0);

        board.write_many(QuantityKind::Position, &[2, 0], &[3.0, 1.0]).await.unwrap();
        assert_eq!(board.read_all(QuantityKind::Position).await.unwrap(), vec![1.0, 0.0, 3.0]);
    }

    #[tokio::test]
    async fn test_pid_and_limits_round_trip_in_user_units() {
        let mut config = device_config(1);
        config.units.position = Some(UnitConversion::uniform(1, 1000.0));
        config.units.pwm = Some(UnitConversion::uniform(1, 2.0));
        let (board, _probe) = open(&config, SimulatedDevice::with_axes(1));

        let pid = Pid { kp: 3.0, ki: 0.5, max_output: 10.0, ..Default::default() };
        board.set_pid(PidKind::Position, 0, pid).await.unwrap();
        let back = board.pid(PidKind::Position, 0).await.unwrap();
        assert!((back.kp - 3.0).abs() < 1e-9);
        assert!((back.max_output - 10.0).abs() < 1e-9);
        assert_eq!(board.pids(PidKind::Velocity).await.unwrap(), vec![Pid::default()]);

        board.set_limits(0, Limits::new(-1.5, 1.5)).await.unwrap();
        let limits = board.limits(0).await.unwrap();
        assert!((limits.min + 1.5).abs() < 1e-9 && (limits.max - 1.5).abs() < 1e-9);

        board.write(QuantityKind::Position, 0, 3.0).await.unwrap();
        assert!((board.read(QuantityKind::Position, 0).await.unwrap() - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_hardware_fault_mode_cannot_be_requested() {
        let (board, probe) = open(&device_config(1), SimulatedDevice::with_axes(1));
        assert!(matches!(
            board.set_control_mode(0, ControlMode::HardwareFault).await,
            Err(JointError::Protocol(_))
        ));
        assert_eq!(probe.writes(), 0);

        board.set_control_modes(&[ControlMode::Velocity]).await.unwrap();
        assert_eq!(board.control_modes().await.unwrap(), vec![ControlMode::Velocity]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out_and_releases_lock() {
        let (board, probe) = open(&device_config(1), SimulatedDevice::with_axes(1));
        probe.stall_next(Duration::from_millis(500));

        assert!(matches!(
            board.read(QuantityKind::Position, 0).await,
            Err(JointError::HardwareTimeout(_))
        ));
        assert_eq!(board.read(QuantityKind::Position, 0).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_sample_includes_supported_extended_quantities() {
        let device = SimulatedDevice::with_axes(2).with_capabilities(CapabilitySet::all().without(Capability::Torque));
        let (board, _probe) = open(&device_config(2), device);
        board.write(QuantityKind::Current, 1, 0.25).await.unwrap();

        let mut sample = JointSample::new(2);
        board.sample_into(true, &mut sample).await.unwrap();
        assert!(sample.velocity.is_some());
        assert!(sample.torque.is_none());
        assert_eq!(sample.current, Some(vec![0.0, 0.25]));

        let mut basic = JointSample::new(2);
        board.sample_into(false, &mut basic).await.unwrap();
        assert!(basic.velocity.is_none());
    }
}
