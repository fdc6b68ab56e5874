//! Raw device interface
//!
//! Everything here is in hardware units and hardware axis order. Drivers
//! implement whichever methods their board supports and report the matching
//! [`CapabilitySet`]; the defaults answer [`JointError::Unsupported`].

use crate::{
    capability::{Capability, CapabilitySet},
    error::{JointError, Result},
    types::{CalibrationParams, ControlMode, Limits, MoveParameter, Pid, PidKind, QuantityKind},
};
use async_trait::async_trait;

/// Capability that gates reading a measured quantity.
pub fn read_capability(kind: QuantityKind) -> Capability {
    match kind {
        QuantityKind::Position => Capability::Encoders,
        QuantityKind::Velocity => Capability::EncoderSpeeds,
        QuantityKind::Acceleration => Capability::EncoderAccelerations,
        QuantityKind::Torque => Capability::Torque,
        QuantityKind::Current => Capability::Current,
        QuantityKind::Pwm => Capability::Pwm,
    }
}

/// Capability that gates commanding a reference of the given quantity.
pub fn write_capability(kind: QuantityKind) -> Capability {
    match kind {
        QuantityKind::Position => Capability::PositionControl,
        QuantityKind::Velocity | QuantityKind::Acceleration => Capability::VelocityControl,
        QuantityKind::Torque => Capability::Torque,
        QuantityKind::Current => Capability::Current,
        QuantityKind::Pwm => Capability::Pwm,
    }
}

/// Hardware collaborator behind a joint group.
///
/// Calls may block on I/O; callers bound each one with a timeout.
#[async_trait]
pub trait RawDevice: Send {
    /// Operations this board implements. Read once when the board is opened.
    fn capabilities(&self) -> CapabilitySet;

    fn axis_count(&self) -> usize;

    /// Measured value (encoder ticks, ticks/s, raw torque, ...)
    async fn get_raw(&mut self, kind: QuantityKind, axis: usize) -> Result<f64>;

    /// Fill `out` with one measured value per hardware axis.
    async fn get_raw_all(&mut self, kind: QuantityKind, out: &mut [f64]) -> Result<()> {
        for (axis, slot) in out.iter_mut().enumerate() {
            *slot = self.get_raw(kind, axis).await?;
        }
        Ok(())
    }

    /// Command a reference value
    async fn set_raw(&mut self, kind: QuantityKind, axis: usize, value: f64) -> Result<()> {
        let _ = (axis, value);
        Err(JointError::Unsupported(write_capability(kind)))
    }

    /// Last commanded reference
    async fn get_reference_raw(&mut self, kind: QuantityKind, axis: usize) -> Result<f64> {
        let _ = axis;
        Err(JointError::Unsupported(write_capability(kind)))
    }

    /// Move by `delta` ticks from the current position reference.
    async fn relative_move_raw(&mut self, axis: usize, delta: f64) -> Result<()> {
        let target = self.get_reference_raw(QuantityKind::Position, axis).await? + delta;
        self.set_raw(QuantityKind::Position, axis, target).await
    }

    async fn check_motion_done(&mut self, axis: usize) -> Result<bool> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::PositionControl))
    }

    /// Reference speed (ticks/s) or acceleration (ticks/s^2) of position moves
    async fn get_move_parameter_raw(&mut self, parameter: MoveParameter, axis: usize) -> Result<f64> {
        let _ = (parameter, axis);
        Err(JointError::Unsupported(Capability::PositionControl))
    }

    async fn set_move_parameter_raw(&mut self, parameter: MoveParameter, axis: usize, value: f64) -> Result<()> {
        let _ = (parameter, axis, value);
        Err(JointError::Unsupported(Capability::PositionControl))
    }

    async fn get_pid_raw(&mut self, kind: PidKind, axis: usize) -> Result<Pid> {
        let _ = (kind, axis);
        Err(JointError::Unsupported(Capability::Pid))
    }

    async fn set_pid_raw(&mut self, kind: PidKind, axis: usize, pid: Pid) -> Result<()> {
        let _ = (kind, axis, pid);
        Err(JointError::Unsupported(Capability::Pid))
    }

    async fn get_limits_raw(&mut self, axis: usize) -> Result<Limits> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Limits))
    }

    async fn set_limits_raw(&mut self, axis: usize, limits: Limits) -> Result<()> {
        let _ = (axis, limits);
        Err(JointError::Unsupported(Capability::Limits))
    }

    async fn get_velocity_limits_raw(&mut self, axis: usize) -> Result<Limits> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Limits))
    }

    async fn set_velocity_limits_raw(&mut self, axis: usize, limits: Limits) -> Result<()> {
        let _ = (axis, limits);
        Err(JointError::Unsupported(Capability::Limits))
    }

    async fn get_control_mode(&mut self, axis: usize) -> Result<ControlMode> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::ControlMode))
    }

    async fn set_control_mode(&mut self, axis: usize, mode: ControlMode) -> Result<()> {
        let _ = (axis, mode);
        Err(JointError::Unsupported(Capability::ControlMode))
    }

    /// Zero the hardware position counter
    async fn reset_counter(&mut self, axis: usize) -> Result<()> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Encoders))
    }

    async fn calibrate(&mut self, axis: usize, params: Option<CalibrationParams>) -> Result<()> {
        let _ = (axis, params);
        Err(JointError::Unsupported(Capability::Calibration))
    }

    async fn is_calibration_done(&mut self, axis: usize) -> Result<bool> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Calibration))
    }

    /// Move every axis to its park position. `wait` blocks until done.
    async fn park(&mut self, wait: bool) -> Result<()> {
        let _ = wait;
        Err(JointError::Unsupported(Capability::Calibration))
    }

    /// Hold the axis at its current position
    async fn stop(&mut self, axis: usize) -> Result<()> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::PositionControl))
    }

    /// Amplifier status word
    async fn amp_status(&mut self, axis: usize) -> Result<i64> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Amplifier))
    }

    async fn enable_amp(&mut self, axis: usize) -> Result<()> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Amplifier))
    }

    async fn disable_amp(&mut self, axis: usize) -> Result<()> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Amplifier))
    }

    async fn get_max_current_raw(&mut self, axis: usize) -> Result<f64> {
        let _ = axis;
        Err(JointError::Unsupported(Capability::Amplifier))
    }

    async fn set_max_current_raw(&mut self, axis: usize, value: f64) -> Result<()> {
        let _ = (axis, value);
        Err(JointError::Unsupported(Capability::Amplifier))
    }

    async fn get_remote_variable(&mut self, key: &str) -> Result<Vec<String>> {
        let _ = key;
        Err(JointError::Unsupported(Capability::RemoteVariables))
    }

    async fn set_remote_variable(&mut self, key: &str, values: Vec<String>) -> Result<()> {
        let _ = (key, values);
        Err(JointError::Unsupported(Capability::RemoteVariables))
    }

    async fn remote_variable_keys(&mut self) -> Result<Vec<String>> {
        Err(JointError::Unsupported(Capability::RemoteVariables))
    }
}
