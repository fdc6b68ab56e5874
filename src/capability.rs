//! Capability sets
//!
//! A physical board rarely implements every raw operation. The set of
//! operations it does implement is captured once at open time as a
//! [`CapabilitySet`] and consulted before any request touches hardware.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently optional group of raw operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Encoders,
    EncoderSpeeds,
    EncoderAccelerations,
    PositionControl,
    VelocityControl,
    Pid,
    Limits,
    ControlMode,
    Torque,
    Current,
    Pwm,
    Amplifier,
    Calibration,
    RemoteVariables,
}

impl Capability {
    pub const ALL: [Capability; 14] = [
        Capability::Encoders,
        Capability::EncoderSpeeds,
        Capability::EncoderAccelerations,
        Capability::PositionControl,
        Capability::VelocityControl,
        Capability::Pid,
        Capability::Limits,
        Capability::ControlMode,
        Capability::Torque,
        Capability::Current,
        Capability::Pwm,
        Capability::Amplifier,
        Capability::Calibration,
        Capability::RemoteVariables,
    ];

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::Encoders => "encoders",
            Capability::EncoderSpeeds => "encoder_speeds",
            Capability::EncoderAccelerations => "encoder_accelerations",
            Capability::PositionControl => "position_control",
            Capability::VelocityControl => "velocity_control",
            Capability::Pid => "pid",
            Capability::Limits => "limits",
            Capability::ControlMode => "control_mode",
            Capability::Torque => "torque",
            Capability::Current => "current",
            Capability::Pwm => "pwm",
            Capability::Amplifier => "amplifier",
            Capability::Calibration => "calibration",
            Capability::RemoteVariables => "remote_variables",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitset of [`Capability`] values. Immutable once a board is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Capability::ALL.iter().copied().collect()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.0 &= !capability.bit();
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.iter().copied().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::empty();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}
