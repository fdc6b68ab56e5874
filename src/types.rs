//! Shared data model for joint groups

use serde::{Deserialize, Serialize};

/// Physical quantity carried by a raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    Position,
    Velocity,
    Acceleration,
    Torque,
    Current,
    Pwm,
}

impl QuantityKind {
    pub const ALL: [QuantityKind; 6] = [
        QuantityKind::Position,
        QuantityKind::Velocity,
        QuantityKind::Acceleration,
        QuantityKind::Torque,
        QuantityKind::Current,
        QuantityKind::Pwm,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Which control loop a [`Pid`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidKind {
    #[default]
    Position,
    Velocity,
    Torque,
    Current,
}

impl PidKind {
    pub const ALL: [PidKind; 4] = [PidKind::Position, PidKind::Velocity, PidKind::Torque, PidKind::Current];

    /// Quantity the loop measures
    pub fn feedback(self) -> QuantityKind {
        match self {
            PidKind::Position => QuantityKind::Position,
            PidKind::Velocity => QuantityKind::Velocity,
            PidKind::Torque => QuantityKind::Torque,
            PidKind::Current => QuantityKind::Current,
        }
    }

    /// Quantity the loop drives
    pub fn output(self) -> QuantityKind {
        QuantityKind::Pwm
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "position" | "pos" => Some(PidKind::Position),
            "velocity" | "vel" => Some(PidKind::Velocity),
            "torque" | "trq" => Some(PidKind::Torque),
            "current" | "cur" => Some(PidKind::Current),
            _ => None,
        }
    }
}

/// Trajectory setting applied to position-mode moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveParameter {
    Speed,
    Acceleration,
}

impl MoveParameter {
    /// Unit table the value converts through
    pub fn quantity(self) -> QuantityKind {
        match self {
            MoveParameter::Speed => QuantityKind::Velocity,
            MoveParameter::Acceleration => QuantityKind::Acceleration,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MoveParameter::Speed => "reference speed",
            MoveParameter::Acceleration => "reference acceleration",
        }
    }
}

/// PID gains and output shaping for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pid {
    pub kp: f64,
    pub kd: f64,
    pub ki: f64,
    pub max_integral: f64,
    pub max_output: f64,
    pub offset: f64,
    pub scale: f64,
    pub stiction_up: f64,
    pub stiction_down: f64,
}

impl Pid {
    /// Number of scalar fields, in the order of [`Pid::to_array`].
    pub const FIELDS: usize = 9;

    pub fn to_array(&self) -> [f64; Self::FIELDS] {
        [
            self.kp,
            self.kd,
            self.ki,
            self.max_integral,
            self.max_output,
            self.offset,
            self.scale,
            self.stiction_up,
            self.stiction_down,
        ]
    }

    pub fn from_slice(values: &[f64]) -> Option<Self> {
        if values.len() != Self::FIELDS {
            return None;
        }
        Some(Self {
            kp: values[0],
            kd: values[1],
            ki: values[2],
            max_integral: values[3],
            max_output: values[4],
            offset: values[5],
            scale: values[6],
            stiction_up: values[7],
            stiction_down: values[8],
        })
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Control mode of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    #[default]
    Idle,
    Position,
    PositionDirect,
    Velocity,
    Torque,
    ImpedancePosition,
    ImpedanceVelocity,
    Pwm,
    Current,
    Mixed,
    ForceIdle,
    HardwareFault,
}

impl ControlMode {
    pub fn name(self) -> &'static str {
        match self {
            ControlMode::Idle => "idle",
            ControlMode::Position => "position",
            ControlMode::PositionDirect => "position_direct",
            ControlMode::Velocity => "velocity",
            ControlMode::Torque => "torque",
            ControlMode::ImpedancePosition => "impedance_position",
            ControlMode::ImpedanceVelocity => "impedance_velocity",
            ControlMode::Pwm => "pwm",
            ControlMode::Current => "current",
            ControlMode::Mixed => "mixed",
            ControlMode::ForceIdle => "force_idle",
            ControlMode::HardwareFault => "hw_fault",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        [
            ControlMode::Idle,
            ControlMode::Position,
            ControlMode::PositionDirect,
            ControlMode::Velocity,
            ControlMode::Torque,
            ControlMode::ImpedancePosition,
            ControlMode::ImpedanceVelocity,
            ControlMode::Pwm,
            ControlMode::Current,
            ControlMode::Mixed,
            ControlMode::ForceIdle,
            ControlMode::HardwareFault,
        ]
        .into_iter()
        .find(|mode| mode.name() == token)
    }

    /// Modes a client may request; a fault is only ever reported.
    pub fn is_settable(self) -> bool {
        !matches!(self, ControlMode::HardwareFault)
    }
}

/// Parameters for a parameterised calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationParams {
    pub kind: u32,
    pub param1: f64,
    pub param2: f64,
    pub param3: f64,
}

/// Position limits for one axis, `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

impl Limits {
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }
}
