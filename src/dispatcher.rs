//! Command dispatcher
//!
//! Turns one [`Request`] into exactly one [`Reply`]. The `(opcode, target)`
//! surface is declared once in [`ROUTES`]; each route names the capability
//! it needs and how it is addressed. Validation runs in a fixed order
//! before any hardware access:
//!
//! 1. the route exists (otherwise a protocol error)
//! 2. the capability is present (otherwise unsupported, logged once)
//! 3. the axis index is in range
//! 4. the payload decodes
//!
//! Only then is the control board called.

use crate::{
    capability::Capability,
    controller::ControlBoard,
    error::{ErrorKind, JointError, Result},
    protocol::{Opcode, Reply, Request, Target, Value},
    types::{CalibrationParams, ControlMode, Limits, MoveParameter, Pid, PidKind, QuantityKind},
};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// How a route addresses the joint group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Exactly one axis
    Axis,
    /// One axis, or the whole group when omitted
    OptionalAxis,
    /// Whole group, or the `joints` subset
    Group,
    /// Not axis-specific
    Board,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub op: Opcode,
    pub target: Option<Target>,
    pub capability: Option<Capability>,
    pub addressing: Addressing,
    pub args: &'static str,
    pub about: &'static str,
}

const fn route(
    op: Opcode,
    target: Option<Target>,
    capability: Option<Capability>,
    addressing: Addressing,
    args: &'static str,
    about: &'static str,
) -> Route {
    Route { op, target, capability, addressing, args, about }
}

use Addressing::{Axis, Board, Group, OptionalAxis};
use Capability as C;
use Opcode::{Get, Set};

pub const ROUTES: &[Route] = &[
    route(Get, Some(Target::Axes), None, Board, "", "number of axes"),
    route(Get, Some(Target::Enc), Some(C::Encoders), Axis, "", "encoder position"),
    route(Get, Some(Target::Encs), Some(C::Encoders), Group, "", "all encoder positions"),
    route(Get, Some(Target::Esp), Some(C::EncoderSpeeds), Axis, "", "encoder speed"),
    route(Get, Some(Target::Esps), Some(C::EncoderSpeeds), Group, "", "all encoder speeds"),
    route(Get, Some(Target::Eacc), Some(C::EncoderAccelerations), Axis, "", "encoder acceleration"),
    route(Get, Some(Target::Eaccs), Some(C::EncoderAccelerations), Group, "", "all encoder accelerations"),
    route(Get, Some(Target::Ref), Some(C::PositionControl), Axis, "", "position reference"),
    route(Get, Some(Target::Refs), Some(C::PositionControl), Group, "", "all position references"),
    route(Get, Some(Target::Don), Some(C::PositionControl), Axis, "", "whether the position move finished"),
    route(Get, Some(Target::Dons), Some(C::PositionControl), Group, "", "whether every position move finished"),
    route(Get, Some(Target::Vel), Some(C::PositionControl), Axis, "", "reference speed of position moves"),
    route(Get, Some(Target::Vels), Some(C::PositionControl), Group, "", "all reference speeds"),
    route(Get, Some(Target::Acc), Some(C::PositionControl), Axis, "", "reference acceleration of position moves"),
    route(Get, Some(Target::Accs), Some(C::PositionControl), Group, "", "all reference accelerations"),
    route(Get, Some(Target::Vmo), Some(C::VelocityControl), Axis, "", "velocity reference"),
    route(Get, Some(Target::Vmos), Some(C::VelocityControl), Group, "", "all velocity references"),
    route(Get, Some(Target::Pid), Some(C::Pid), Axis, "", "pid gains [kind]"),
    route(Get, Some(Target::Pids), Some(C::Pid), Group, "", "all pid gains [kind]"),
    route(Get, Some(Target::Llim), Some(C::Limits), Axis, "", "position limits (min max)"),
    route(Get, Some(Target::Vlim), Some(C::Limits), Axis, "", "velocity limits (min max)"),
    route(Get, Some(Target::Cmod), Some(C::ControlMode), Axis, "", "control mode"),
    route(Get, Some(Target::Cmds), Some(C::ControlMode), Group, "", "all control modes"),
    route(Get, Some(Target::Trq), Some(C::Torque), Axis, "", "measured torque"),
    route(Get, Some(Target::Trqs), Some(C::Torque), Group, "", "all measured torques"),
    route(Get, Some(Target::Cur), Some(C::Current), Axis, "", "measured current"),
    route(Get, Some(Target::Curs), Some(C::Current), Group, "", "all measured currents"),
    route(Get, Some(Target::Pwm), Some(C::Pwm), Axis, "", "pwm output"),
    route(Get, Some(Target::Pwms), Some(C::Pwm), Group, "", "all pwm outputs"),
    route(Get, Some(Target::Asta), Some(C::Amplifier), Axis, "", "amplifier status"),
    route(Get, Some(Target::Astas), Some(C::Amplifier), Group, "", "all amplifier statuses"),
    route(Get, Some(Target::Maxc), Some(C::Amplifier), Axis, "", "maximum current"),
    route(Get, Some(Target::Rvar), Some(C::RemoteVariables), Board, "<key>", "remote variable"),
    route(Get, Some(Target::Lvar), Some(C::RemoteVariables), Board, "", "remote variable keys"),
    route(Set, Some(Target::Ref), Some(C::PositionControl), Axis, "<position>", "position reference"),
    route(Set, Some(Target::Refs), Some(C::PositionControl), Group, "<positions...>", "position references"),
    route(Set, Some(Target::Rel), Some(C::PositionControl), Axis, "<delta>", "relative position move"),
    route(Set, Some(Target::Rels), Some(C::PositionControl), Group, "<deltas...>", "relative position moves"),
    route(Set, Some(Target::Vel), Some(C::PositionControl), Axis, "<speed>", "reference speed of position moves"),
    route(Set, Some(Target::Vels), Some(C::PositionControl), Group, "<speeds...>", "reference speeds"),
    route(Set, Some(Target::Acc), Some(C::PositionControl), Axis, "<acceleration>", "reference acceleration of position moves"),
    route(Set, Some(Target::Accs), Some(C::PositionControl), Group, "<accelerations...>", "reference accelerations"),
    route(Set, Some(Target::Vmo), Some(C::VelocityControl), Axis, "<velocity>", "velocity reference"),
    route(Set, Some(Target::Vmos), Some(C::VelocityControl), Group, "<velocities...>", "velocity references"),
    route(Set, Some(Target::Enc), Some(C::Encoders), Axis, "<position>", "redefine encoder position"),
    route(Set, Some(Target::Encs), Some(C::Encoders), Group, "<positions...>", "redefine encoder positions"),
    route(Set, Some(Target::EReset), Some(C::Encoders), Axis, "", "reset encoder to zero"),
    route(Set, Some(Target::EResets), Some(C::Encoders), Group, "", "reset all encoders to zero"),
    route(Set, Some(Target::Pid), Some(C::Pid), Axis, "<9 gains>", "pid gains [kind]"),
    route(Set, Some(Target::Pids), Some(C::Pid), Group, "<9 gains per axis>", "pid gains [kind]"),
    route(Set, Some(Target::Llim), Some(C::Limits), Axis, "<min> <max>", "position limits"),
    route(Set, Some(Target::Vlim), Some(C::Limits), Axis, "<min> <max>", "velocity limits"),
    route(Set, Some(Target::Cmod), Some(C::ControlMode), Axis, "<mode>", "control mode"),
    route(Set, Some(Target::Cmds), Some(C::ControlMode), Group, "<modes...>", "control modes"),
    route(Set, Some(Target::Trq), Some(C::Torque), Axis, "<torque>", "torque reference"),
    route(Set, Some(Target::Trqs), Some(C::Torque), Group, "<torques...>", "torque references"),
    route(Set, Some(Target::Cur), Some(C::Current), Axis, "<current>", "current reference"),
    route(Set, Some(Target::Curs), Some(C::Current), Group, "<currents...>", "current references"),
    route(Set, Some(Target::Pwm), Some(C::Pwm), Axis, "<pwm>", "pwm reference"),
    route(Set, Some(Target::Pwms), Some(C::Pwm), Group, "<pwms...>", "pwm references"),
    route(Set, Some(Target::Aen), Some(C::Amplifier), Axis, "", "enable amplifier"),
    route(Set, Some(Target::Adis), Some(C::Amplifier), Axis, "", "disable amplifier"),
    route(Set, Some(Target::Maxc), Some(C::Amplifier), Axis, "<current>", "maximum current"),
    route(Set, Some(Target::Rvar), Some(C::RemoteVariables), Board, "<key> <values...>", "remote variable"),
    route(Opcode::Calibrate, None, Some(C::Calibration), Axis, "", "start calibration"),
    route(Opcode::CalibrateWithParams, None, Some(C::Calibration), Axis, "<type> <p1> <p2> <p3>", "start calibration with parameters"),
    route(Opcode::CalibrateDone, None, Some(C::Calibration), Axis, "", "whether calibration finished"),
    route(Opcode::Park, None, Some(C::Calibration), Board, "[wait]", "move to park position"),
    route(Opcode::Stop, None, Some(C::PositionControl), OptionalAxis, "", "stop one axis or all"),
    route(Opcode::Help, None, None, Board, "", "list commands"),
];

impl Route {
    pub fn find(op: Opcode, target: Option<Target>) -> Option<&'static Route> {
        ROUTES.iter().find(|r| r.op == op && r.target == target)
    }

    /// One-line usage, e.g. `set ref <axis> <position>: position reference`
    pub fn usage(&self) -> String {
        let mut parts = vec![self.op.token().to_string()];
        if let Some(target) = self.target {
            parts.push(target.token().to_string());
        }
        match self.addressing {
            Axis => parts.push("<axis>".to_string()),
            OptionalAxis => parts.push("[axis]".to_string()),
            Group | Board => {}
        }
        if !self.args.is_empty() {
            parts.push(self.args.to_string());
        }
        format!("{}: {}", parts.join(" "), self.about)
    }
}

fn number(payload: &[Value], index: usize) -> Result<f64> {
    payload
        .get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| JointError::Protocol(format!("payload[{}] must be a number", index)))
}

fn numbers(payload: &[Value]) -> Result<Vec<f64>> {
    payload
        .iter()
        .enumerate()
        .map(|(i, v)| v.as_f64().ok_or_else(|| JointError::Protocol(format!("payload[{}] must be a number", i))))
        .collect()
}

fn text(payload: &[Value], index: usize) -> Result<&str> {
    payload
        .get(index)
        .and_then(Value::as_text)
        .ok_or_else(|| JointError::Protocol(format!("payload[{}] must be a string", index)))
}

fn mode(token: &str) -> Result<ControlMode> {
    ControlMode::parse(token).ok_or_else(|| JointError::Protocol(format!("unknown control mode '{}'", token)))
}

/// Pids as objects, or flattened as nine numbers each
fn pids(payload: &[Value]) -> Result<Vec<Pid>> {
    if payload.iter().all(|v| v.as_pid().is_some()) && !payload.is_empty() {
        return Ok(payload.iter().filter_map(Value::as_pid).copied().collect());
    }
    let flat = numbers(payload)?;
    if flat.is_empty() || flat.len() % Pid::FIELDS != 0 {
        return Err(JointError::Protocol(format!(
            "pid payload needs {} numbers per axis, got {}",
            Pid::FIELDS,
            flat.len()
        )));
    }
    Ok(flat.chunks(Pid::FIELDS).filter_map(Pid::from_slice).collect())
}

fn to_values(values: Vec<f64>) -> Vec<Value> {
    values.into_iter().map(Value::Number).collect()
}

pub struct CommandDispatcher {
    board: ControlBoard,
    unsupported_reported: AtomicU32,
}

impl CommandDispatcher {
    pub fn new(board: ControlBoard) -> Self {
        Self {
            board,
            unsupported_reported: AtomicU32::new(0),
        }
    }

    pub fn board(&self) -> &ControlBoard {
        &self.board
    }

    /// Usage lines for every route
    pub fn help() -> Vec<String> {
        ROUTES.iter().map(Route::usage).collect()
    }

    pub async fn dispatch(&self, request: &Request) -> Reply {
        match self.execute(request).await {
            Ok(payload) => Reply::ok(request.target, payload),
            Err(e) => {
                match e.kind() {
                    ErrorKind::Unsupported => {}
                    ErrorKind::Protocol | ErrorKind::Range => debug!("Rejected '{}': {}", request.to_text(), e),
                    _ => warn!("'{}' failed: {}", request.to_text(), e),
                }
                Reply::failed(&e)
            }
        }
    }

    fn report_unsupported(&self, capability: Capability) {
        let previous = self.unsupported_reported.fetch_or(capability.bit(), Ordering::Relaxed);
        if previous & capability.bit() == 0 {
            warn!("Device '{}' has no {} capability; such requests will fail", self.board.name(), capability);
        }
    }

    fn check_axis(&self, axis: Option<usize>) -> Result<usize> {
        let axis = axis.ok_or_else(|| JointError::Protocol("request needs an axis index".to_string()))?;
        if axis >= self.board.axes() {
            return Err(JointError::axis_out_of_range(axis, self.board.axes()));
        }
        Ok(axis)
    }

    fn joints(&self, request: &Request) -> Result<Vec<usize>> {
        match &request.joints {
            Some(joints) => {
                if let Some(&bad) = joints.iter().find(|&&j| j >= self.board.axes()) {
                    return Err(JointError::axis_out_of_range(bad, self.board.axes()));
                }
                Ok(joints.clone())
            }
            None => Ok((0..self.board.axes()).collect()),
        }
    }

    fn select<T: Clone>(values: Vec<T>, joints: &[usize]) -> Vec<T> {
        joints.iter().filter_map(|&j| values.get(j).cloned()).collect()
    }

    async fn execute(&self, request: &Request) -> Result<Vec<Value>> {
        let route = Route::find(request.op, request.target).ok_or_else(|| {
            JointError::Protocol(format!(
                "no command '{} {}'",
                request.op.token(),
                request.target.map(|t| t.token()).unwrap_or("")
            ))
        })?;

        if let Some(capability) = route.capability {
            if !self.board.capabilities().contains(capability) {
                self.report_unsupported(capability);
                return Err(JointError::Unsupported(capability));
            }
        }

        let axis = match route.addressing {
            Axis => Some(self.check_axis(request.axis)?),
            OptionalAxis => match request.axis {
                Some(_) => Some(self.check_axis(request.axis)?),
                None => None,
            },
            Group | Board => None,
        };

        match request.op {
            Opcode::Get => self.get(request, axis).await,
            Opcode::Set => self.set(request, axis).await,
            Opcode::Calibrate => {
                self.board.calibrate(self.check_axis(axis)?, None).await?;
                Ok(Vec::new())
            }
            Opcode::CalibrateWithParams => {
                let kind = number(&request.payload, 0)?;
                if kind < 0.0 || kind.fract() != 0.0 {
                    return Err(JointError::Protocol(format!("calibration type must be a non-negative integer, got {}", kind)));
                }
                let params = CalibrationParams {
                    kind: kind as u32,
                    param1: number(&request.payload, 1)?,
                    param2: number(&request.payload, 2)?,
                    param3: number(&request.payload, 3)?,
                };
                self.board.calibrate(self.check_axis(axis)?, Some(params)).await?;
                Ok(Vec::new())
            }
            Opcode::CalibrateDone => Ok(vec![Value::Bool(self.board.calibration_done(self.check_axis(axis)?).await?)]),
            Opcode::Park => {
                let wait = match request.payload.first() {
                    Some(value) => value
                        .as_bool()
                        .ok_or_else(|| JointError::Protocol("park wait flag must be a boolean".to_string()))?,
                    None => true,
                };
                self.board.park(wait).await?;
                Ok(Vec::new())
            }
            Opcode::Stop => {
                match axis {
                    Some(axis) => self.board.stop(axis).await?,
                    None => self.board.stop_all().await?,
                }
                Ok(Vec::new())
            }
            Opcode::Help => Ok(Self::help().into_iter().map(Value::Text).collect()),
        }
    }

    async fn read_one(&self, kind: QuantityKind, axis: Option<usize>) -> Result<Vec<Value>> {
        Ok(vec![Value::Number(self.board.read(kind, self.check_axis(axis)?).await?)])
    }

    async fn read_group(&self, kind: QuantityKind, request: &Request) -> Result<Vec<Value>> {
        let joints = self.joints(request)?;
        Ok(to_values(Self::select(self.board.read_all(kind).await?, &joints)))
    }

    async fn get(&self, request: &Request, axis: Option<usize>) -> Result<Vec<Value>> {
        let board = &self.board;
        let target = request.target.ok_or_else(|| JointError::Protocol("get needs a target".to_string()))?;
        let pid_kind = request.pid_kind.unwrap_or_default();

        match target {
            Target::Axes => Ok(vec![Value::Number(board.axes() as f64)]),
            Target::Enc => self.read_one(QuantityKind::Position, axis).await,
            Target::Encs => self.read_group(QuantityKind::Position, request).await,
            Target::Esp => self.read_one(QuantityKind::Velocity, axis).await,
            Target::Esps => self.read_group(QuantityKind::Velocity, request).await,
            Target::Eacc => self.read_one(QuantityKind::Acceleration, axis).await,
            Target::Eaccs => self.read_group(QuantityKind::Acceleration, request).await,
            Target::Trq => self.read_one(QuantityKind::Torque, axis).await,
            Target::Trqs => self.read_group(QuantityKind::Torque, request).await,
            Target::Cur => self.read_one(QuantityKind::Current, axis).await,
            Target::Curs => self.read_group(QuantityKind::Current, request).await,
            Target::Pwm => self.read_one(QuantityKind::Pwm, axis).await,
            Target::Pwms => self.read_group(QuantityKind::Pwm, request).await,
            Target::Ref => Ok(vec![Value::Number(board.reference(QuantityKind::Position, self.check_axis(axis)?).await?)]),
            Target::Refs => {
                let joints = self.joints(request)?;
                Ok(to_values(Self::select(board.references(QuantityKind::Position).await?, &joints)))
            }
            Target::Vmo => Ok(vec![Value::Number(board.reference(QuantityKind::Velocity, self.check_axis(axis)?).await?)]),
            Target::Vmos => {
                let joints = self.joints(request)?;
                Ok(to_values(Self::select(board.references(QuantityKind::Velocity).await?, &joints)))
            }
            Target::Don => Ok(vec![Value::Bool(board.motion_done(self.check_axis(axis)?).await?)]),
            Target::Dons => Ok(vec![Value::Bool(board.motion_done_many(&self.joints(request)?).await?)]),
            Target::Vel | Target::Acc => {
                let parameter = Self::move_parameter(target);
                Ok(vec![Value::Number(board.move_parameter(parameter, self.check_axis(axis)?).await?)])
            }
            Target::Vels | Target::Accs => {
                let joints = self.joints(request)?;
                let values = board.move_parameters(Self::move_parameter(target)).await?;
                Ok(to_values(Self::select(values, &joints)))
            }
            Target::Pid => Ok(vec![Value::Pid(board.pid(pid_kind, self.check_axis(axis)?).await?)]),
            Target::Pids => {
                let joints = self.joints(request)?;
                Ok(Self::select(board.pids(pid_kind).await?, &joints).into_iter().map(Value::Pid).collect())
            }
            Target::Llim => {
                let limits = board.limits(self.check_axis(axis)?).await?;
                Ok(vec![Value::Number(limits.min), Value::Number(limits.max)])
            }
            Target::Vlim => {
                let limits = board.velocity_limits(self.check_axis(axis)?).await?;
                Ok(vec![Value::Number(limits.min), Value::Number(limits.max)])
            }
            Target::Cmod => Ok(vec![Value::Text(board.control_mode(self.check_axis(axis)?).await?.name().to_string())]),
            Target::Cmds => {
                let joints = self.joints(request)?;
                Ok(Self::select(board.control_modes().await?, &joints)
                    .into_iter()
                    .map(|m| Value::Text(m.name().to_string()))
                    .collect())
            }
            Target::Asta => Ok(vec![Value::Number(board.amp_status(self.check_axis(axis)?).await? as f64)]),
            Target::Astas => {
                let joints = self.joints(request)?;
                Ok(Self::select(board.amp_statuses().await?, &joints)
                    .into_iter()
                    .map(|s| Value::Number(s as f64))
                    .collect())
            }
            Target::Maxc => Ok(vec![Value::Number(board.max_current(self.check_axis(axis)?).await?)]),
            Target::Rvar => {
                let key = text(&request.payload, 0)?;
                Ok(board.remote_variable(key).await?.into_iter().map(Value::Text).collect())
            }
            Target::Lvar => Ok(board.remote_variable_keys().await?.into_iter().map(Value::Text).collect()),
            other => Err(JointError::Protocol(format!("'{}' cannot be read", other))),
        }
    }

    async fn set(&self, request: &Request, axis: Option<usize>) -> Result<Vec<Value>> {
        let board = &self.board;
        let target = request.target.ok_or_else(|| JointError::Protocol("set needs a target".to_string()))?;
        let payload = &request.payload;
        let pid_kind: PidKind = request.pid_kind.unwrap_or_default();

        match target {
            Target::Ref | Target::Vmo | Target::Trq | Target::Cur | Target::Pwm => {
                let kind = Self::reference_kind(target);
                board.write(kind, self.check_axis(axis)?, number(payload, 0)?).await?;
            }
            Target::Refs | Target::Vmos | Target::Trqs | Target::Curs | Target::Pwms => {
                let kind = Self::reference_kind(target);
                let values = numbers(payload)?;
                board.write_many(kind, &self.joints(request)?, &values).await?;
            }
            Target::Rel => board.move_relative(self.check_axis(axis)?, number(payload, 0)?).await?,
            Target::Rels => board.move_relative_many(&self.joints(request)?, &numbers(payload)?).await?,
            Target::Vel | Target::Acc => {
                let parameter = Self::move_parameter(target);
                board.set_move_parameter(parameter, self.check_axis(axis)?, number(payload, 0)?).await?;
            }
            Target::Vels | Target::Accs => {
                let parameter = Self::move_parameter(target);
                let values = numbers(payload)?;
                board.set_move_parameters_many(parameter, &self.joints(request)?, &values).await?;
            }
            Target::Enc => board.set_encoder(self.check_axis(axis)?, number(payload, 0)?).await?,
            Target::Encs => board.set_encoders_many(&self.joints(request)?, &numbers(payload)?).await?,
            Target::EReset => board.reset_encoder(self.check_axis(axis)?).await?,
            Target::EResets => board.reset_encoders_many(&self.joints(request)?).await?,
            Target::Pid => {
                let pid = match pids(payload)?.as_slice() {
                    [pid] => *pid,
                    other => return Err(JointError::Protocol(format!("expected one pid, got {}", other.len()))),
                };
                board.set_pid(pid_kind, self.check_axis(axis)?, pid).await?;
            }
            Target::Pids => board.set_pids_many(pid_kind, &self.joints(request)?, &pids(payload)?).await?,
            Target::Llim => {
                let limits = Limits::new(number(payload, 0)?, number(payload, 1)?);
                board.set_limits(self.check_axis(axis)?, limits).await?;
            }
            Target::Vlim => {
                let limits = Limits::new(number(payload, 0)?, number(payload, 1)?);
                board.set_velocity_limits(self.check_axis(axis)?, limits).await?;
            }
            Target::Cmod => board.set_control_mode(self.check_axis(axis)?, mode(text(payload, 0)?)?).await?,
            Target::Cmds => {
                let modes = (0..payload.len())
                    .map(|i| text(payload, i).and_then(mode))
                    .collect::<Result<Vec<_>>>()?;
                board.set_control_modes_many(&self.joints(request)?, &modes).await?;
            }
            Target::Aen => board.enable_amp(self.check_axis(axis)?).await?,
            Target::Adis => board.disable_amp(self.check_axis(axis)?).await?,
            Target::Maxc => board.set_max_current(self.check_axis(axis)?, number(payload, 0)?).await?,
            Target::Rvar => {
                let key = text(payload, 0)?;
                let values = payload[1..].iter().map(|v| v.to_string()).collect();
                board.set_remote_variable(key, values).await?;
            }
            other => return Err(JointError::Protocol(format!("'{}' cannot be set", other))),
        }
        Ok(Vec::new())
    }

    fn reference_kind(target: Target) -> QuantityKind {
        match target {
            Target::Vmo | Target::Vmos => QuantityKind::Velocity,
            Target::Trq | Target::Trqs => QuantityKind::Torque,
            Target::Cur | Target::Curs => QuantityKind::Current,
            Target::Pwm | Target::Pwms => QuantityKind::Pwm,
            _ => QuantityKind::Position,
        }
    }

    fn move_parameter(target: Target) -> MoveParameter {
        match target {
            Target::Acc | Target::Accs => MoveParameter::Acceleration,
            _ => MoveParameter::Speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capability::CapabilitySet,
        config::DeviceConfig,
        protocol::Status,
        sim::{SimProbe, SimulatedDevice},
        units::{UnitConversion, UnitsConfig},
    };
    use std::sync::Arc;

    fn dispatcher(axes: usize, axis_map: Option<Vec<usize>>, device: SimulatedDevice) -> (CommandDispatcher, Arc<SimProbe>) {
        let config = DeviceConfig {
            name: "test".to_string(),
            axes,
            axis_map,
            units: UnitsConfig {
                position: Some(UnitConversion::uniform(axes, 1000.0)),
                ..Default::default()
            },
            counter_bits: None,
            capabilities: None,
            call_timeout_ms: Some(100),
        };
        let probe = device.probe();
        let board = ControlBoard::open(&config, Box::new(device)).unwrap();
        (CommandDispatcher::new(board), probe)
    }

    async fn send(dispatcher: &CommandDispatcher, line: &str) -> Reply {
        dispatcher.dispatch(&Request::parse(line).unwrap()).await
    }

    #[tokio::test]
    async fn test_scenario_permuted_position_write_and_read() {
        let (dispatcher, _probe) = dispatcher(3, Some(vec![2, 0, 1]), SimulatedDevice::with_axes(3));

        let reply = send(&dispatcher, "set ref 0 1.0").await;
        assert!(reply.is_ok());
        assert_eq!(reply.target, Some(Target::Ref));

        // raw 1000 landed on hardware axis 2, which is logical 0
        let raw_encs = send(&dispatcher, "get encs").await.numbers();
        assert_eq!(raw_encs, vec![1.0, 0.0, 0.0]);

        let reply = send(&dispatcher, "get enc 0").await;
        assert_eq!(reply.numbers(), vec![1.0]);
        assert_eq!(send(&dispatcher, "get ref 0").await.numbers(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_torque_gating_performs_no_raw_calls() {
        let device = SimulatedDevice::with_axes(2).with_capabilities(CapabilitySet::all().without(Capability::Torque));
        let (dispatcher, probe) = dispatcher(2, None, device);

        for line in ["set trq 0 1.5", "set trqs 1 2", "get trq 1", "get trqs"] {
            let reply = send(&dispatcher, line).await;
            assert_eq!(reply.status, Status::Failed, "{}", line);
            assert_eq!(reply.error.unwrap().kind, ErrorKind::Unsupported);
        }
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_group_set_with_bad_joint_writes_nothing() {
        let (dispatcher, probe) = dispatcher(3, None, SimulatedDevice::with_axes(3));

        let request = Request::set(Target::Refs).joints(vec![0, 7]).values([1.0, 2.0]);
        let reply = dispatcher.dispatch(&request).await;
        assert_eq!(reply.status, Status::Failed);
        assert_eq!(reply.error.unwrap().kind, ErrorKind::Range);

        let short = send(&dispatcher, "set refs 1 2").await;
        assert_eq!(short.status, Status::Failed);

        let mixed = send(&dispatcher, "set refs 1 two 3").await;
        assert_eq!(mixed.error.unwrap().kind, ErrorKind::Protocol);
        assert_eq!(probe.writes(), 0);

        let subset = Request::set(Target::Refs).joints(vec![2, 0]).values([0.3, 0.1]);
        assert!(dispatcher.dispatch(&subset).await.is_ok());
        let encs = send(&dispatcher, "get encs").await.numbers();
        assert!((encs[0] - 0.1).abs() < 1e-9 && encs[1] == 0.0 && (encs[2] - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_axis_out_of_range_never_reaches_device() {
        let (dispatcher, probe) = dispatcher(2, None, SimulatedDevice::with_axes(2));
        for line in ["get enc 2", "set ref 5 1.0", "calibrate 9", "stop 2"] {
            let reply = send(&dispatcher, line).await;
            assert_eq!(reply.error.unwrap().kind, ErrorKind::Range, "{}", line);
        }
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_route_is_protocol_error() {
        let (dispatcher, _probe) = dispatcher(1, None, SimulatedDevice::with_axes(1));
        let reply = dispatcher.dispatch(&Request::get(Target::EReset).axis(0)).await;
        assert_eq!(reply.error.unwrap().kind, ErrorKind::Protocol);

        let reply = dispatcher.dispatch(&Request::new(Opcode::Get)).await;
        assert_eq!(reply.status, Status::Failed);
    }

    #[tokio::test]
    async fn test_help_lists_routes_without_touching_hardware() {
        let (dispatcher, probe) = dispatcher(1, None, SimulatedDevice::with_axes(1));
        let reply = send(&dispatcher, "help").await;
        assert!(reply.is_ok());
        assert_eq!(reply.payload.len(), ROUTES.len());
        assert!(reply
            .payload
            .contains(&Value::Text("set ref <axis> <position>: position reference".to_string())));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_pid_modes_limits_and_amplifiers() {
        let (dispatcher, _probe) = dispatcher(2, None, SimulatedDevice::with_axes(2));

        assert!(send(&dispatcher, "set pid vel 1 2 0 0 0 10 0 1 0 0").await.is_ok());
        let reply = send(&dispatcher, "get pid vel 1").await;
        match &reply.payload[..] {
            [Value::Pid(pid)] => assert!((pid.kp - 2.0).abs() < 1e-9),
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(!send(&dispatcher, "set pid 1 2 3").await.is_ok());

        assert!(send(&dispatcher, "set cmod 0 velocity").await.is_ok());
        assert_eq!(send(&dispatcher, "get cmod 0").await.payload, vec![Value::Text("velocity".into())]);
        assert!(!send(&dispatcher, "set cmod 0 hw_fault").await.is_ok());

        assert!(send(&dispatcher, "set llim 1 2 -2").await.is_ok());
        assert_eq!(send(&dispatcher, "get llim 1").await.numbers(), vec![-2.0, 2.0]);

        assert!(send(&dispatcher, "set adis 1").await.is_ok());
        assert_eq!(send(&dispatcher, "get astas").await.numbers(), vec![1.0, 0.0]);
        assert_eq!(send(&dispatcher, "get axes").await.numbers(), vec![2.0]);
    }

    #[tokio::test]
    async fn test_calibration_park_stop_and_remote_variables() {
        let (dispatcher, _probe) = dispatcher(2, None, SimulatedDevice::with_axes(2));

        assert_eq!(send(&dispatcher, "caldone 0").await.payload, vec![Value::Bool(false)]);
        assert!(send(&dispatcher, "calp 0 1 0.5 0.5 0").await.is_ok());
        assert_eq!(send(&dispatcher, "caldone 0").await.payload, vec![Value::Bool(true)]);
        assert!(!send(&dispatcher, "calp 1 -1 0 0 0").await.is_ok());

        assert!(send(&dispatcher, "set refs 0.5 0.5").await.is_ok());
        assert!(send(&dispatcher, "park false").await.is_ok());
        assert_eq!(send(&dispatcher, "get encs").await.numbers(), vec![0.0, 0.0]);
        assert!(send(&dispatcher, "stop").await.is_ok());
        assert!(send(&dispatcher, "stop 1").await.is_ok());

        assert!(send(&dispatcher, "set rvar gains 1 2 3").await.is_ok());
        assert_eq!(
            send(&dispatcher, "get rvar gains").await.payload,
            vec![Value::Text("1".into()), Value::Text("2".into()), Value::Text("3".into())]
        );
        assert_eq!(send(&dispatcher, "get lvar").await.payload, vec![Value::Text("gains".into())]);
    }

    #[tokio::test]
    async fn test_group_sets_follow_joint_subset() {
        let (dispatcher, probe) = dispatcher(3, None, SimulatedDevice::with_axes(3));

        let modes = Request::set(Target::Cmds)
            .joints(vec![2, 0])
            .value("velocity".to_string())
            .value("torque".to_string());
        assert!(dispatcher.dispatch(&modes).await.is_ok());
        assert_eq!(
            send(&dispatcher, "get cmds").await.payload,
            vec![Value::Text("torque".into()), Value::Text("position".into()), Value::Text("velocity".into())]
        );

        assert!(send(&dispatcher, "set encs 1 2 3").await.is_ok());
        let encs = Request::set(Target::Encs).joints(vec![1]).values([5.0]);
        assert!(dispatcher.dispatch(&encs).await.is_ok());
        assert_eq!(send(&dispatcher, "get encs").await.numbers(), vec![1.0, 5.0, 3.0]);

        let resets = Request::set(Target::EResets).joints(vec![2, 0]);
        assert!(dispatcher.dispatch(&resets).await.is_ok());
        assert_eq!(send(&dispatcher, "get encs").await.numbers(), vec![0.0, 5.0, 0.0]);

        let pid = Pid { kp: 4.0, ..Default::default() };
        let pids = Request::set(Target::Pids).pid_kind(PidKind::Torque).joints(vec![1]).value(pid);
        assert!(dispatcher.dispatch(&pids).await.is_ok());
        let reply = dispatcher.dispatch(&Request::get(Target::Pids).pid_kind(PidKind::Torque)).await;
        let gains: Vec<f64> = reply.payload.iter().filter_map(Value::as_pid).map(|p| p.kp).collect();
        assert_eq!(gains, vec![0.0, 4.0, 0.0]);

        let writes = probe.writes();
        let short = Request::set(Target::Cmds).joints(vec![0, 1]).value("idle".to_string());
        assert_eq!(dispatcher.dispatch(&short).await.error.unwrap().kind, ErrorKind::Range);
        let repeated = Request::set(Target::EResets).joints(vec![1, 1]);
        assert_eq!(dispatcher.dispatch(&repeated).await.error.unwrap().kind, ErrorKind::Range);
        assert_eq!(probe.writes(), writes);
    }

    #[tokio::test]
    async fn test_relative_moves_reference_speeds_and_velocity_limits() {
        let (dispatcher, _probe) = dispatcher(2, None, SimulatedDevice::with_axes(2));

        assert!(send(&dispatcher, "set ref 0 0.5").await.is_ok());
        assert!(send(&dispatcher, "set rel 0 0.25").await.is_ok());
        let rels = Request::set(Target::Rels).joints(vec![1]).values([-1.0]);
        assert!(dispatcher.dispatch(&rels).await.is_ok());
        assert_eq!(send(&dispatcher, "get encs").await.numbers(), vec![0.75, -1.0]);
        assert_eq!(send(&dispatcher, "get don 0").await.payload, vec![Value::Bool(true)]);

        assert!(send(&dispatcher, "set vel 1 2.5").await.is_ok());
        assert!(send(&dispatcher, "set accs 10 20").await.is_ok());
        assert_eq!(send(&dispatcher, "get vels").await.numbers(), vec![0.0, 2.5]);
        assert_eq!(send(&dispatcher, "get acc 1").await.numbers(), vec![20.0]);
        assert_eq!(send(&dispatcher, "set vel 0 -1").await.error.unwrap().kind, ErrorKind::Range);

        assert!(send(&dispatcher, "set vlim 1 -0.5 0.5").await.is_ok());
        assert_eq!(send(&dispatcher, "get vlim 1").await.numbers(), vec![-0.5, 0.5]);
        assert!(send(&dispatcher, "set vmo 1 5").await.is_ok());
        assert_eq!(send(&dispatcher, "get vmo 1").await.numbers(), vec![5.0]);
        assert_eq!(send(&dispatcher, "get dons").await.payload, vec![Value::Bool(false)]);

        assert!(send(&dispatcher, "stop 1").await.is_ok());
        assert_eq!(send(&dispatcher, "get dons").await.payload, vec![Value::Bool(true)]);
    }

    #[tokio::test]
    async fn test_encoder_redefinition_and_reset() {
        let (dispatcher, _probe) = dispatcher(2, None, SimulatedDevice::with_axes(2));
        assert!(send(&dispatcher, "set ref 1 0.25").await.is_ok());
        assert!(send(&dispatcher, "set enc 1 2.0").await.is_ok());
        assert_eq!(send(&dispatcher, "get enc 1").await.numbers(), vec![2.0]);

        assert!(send(&dispatcher, "set e_reset 1").await.is_ok());
        assert_eq!(send(&dispatcher, "get enc 1").await.numbers(), vec![0.0]);
    }
}
