//! Error types for joint-group operations

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JointError>;

#[derive(Error, Debug)]
pub enum JointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported operation: device has no {0} capability")]
    Unsupported(Capability),

    #[error("Range error: {0}")]
    Range(String),

    #[error("Hardware call exceeded its {0:?} deadline")]
    HardwareTimeout(Duration),

    #[error("Wraparound ambiguity on hardware axis {axis}: step of {step} ticks exceeds half the counter range")]
    WraparoundAmbiguity { axis: usize, step: f64 },

    #[error("Hardware failure: {0}")]
    Hardware(String),

    #[error("Request channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error class carried in failure replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Protocol,
    Unsupported,
    Range,
    HardwareTimeout,
    WraparoundAmbiguity,
    Hardware,
    Internal,
}

impl JointError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JointError::Config(_) => ErrorKind::Configuration,
            JointError::Protocol(_) | JointError::Json(_) => ErrorKind::Protocol,
            JointError::Unsupported(_) => ErrorKind::Unsupported,
            JointError::Range(_) => ErrorKind::Range,
            JointError::HardwareTimeout(_) => ErrorKind::HardwareTimeout,
            JointError::WraparoundAmbiguity { .. } => ErrorKind::WraparoundAmbiguity,
            JointError::Hardware(_) => ErrorKind::Hardware,
            JointError::ChannelClosed | JointError::Io(_) | JointError::Yaml(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn axis_out_of_range(axis: usize, axes: usize) -> Self {
        JointError::Range(format!("axis {} outside [0, {})", axis, axes))
    }
}
