//! Configuration loading for the joint-group daemon

use crate::{
    capability::{Capability, CapabilitySet},
    error::{JointError, Result},
    units::{AxisMap, UnitMapper, UnitsConfig},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, time::Duration};

/// Environment variable consulted when no `--config` is given
pub const CONFIG_ENV: &str = "JOINTD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default_config.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub device: DeviceConfig,
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub command: CommandConfig,
    pub simulation: Option<SimulationConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub name: String,
    pub axes: usize,
    /// `axis_map[logical] = hardware`; identity when absent
    pub axis_map: Option<Vec<usize>>,
    #[serde(default)]
    pub units: UnitsConfig,
    /// Width of the hardware position counter, enables wraparound tracking
    pub counter_bits: Option<u32>,
    /// Allow-list intersected with what the device reports
    pub capabilities: Option<Vec<Capability>>,
    pub call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishingConfig {
    pub pub_rate_hz: u32,
    pub decimal_places: Option<u32>,
    pub sample_timeout_ms: Option<u64>,
    /// Publish velocity, torque and current alongside position
    pub extended: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Frontend {
    #[default]
    Stdio,
    Zenoh,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CommandConfig {
    pub queue_depth: Option<usize>,
    #[serde(default)]
    pub frontend: Frontend,
    pub key_prefix: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub latency_ms: Option<u64>,
    /// Capabilities the simulated board reports; all when absent
    pub capabilities: Option<Vec<Capability>>,
    /// Starting position per hardware axis, in raw ticks
    #[serde(default)]
    pub initial_positions: Vec<f64>,
    #[serde(default)]
    pub remote_variables: BTreeMap<String, Vec<String>>,
}

impl DaemonConfig {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| JointError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: DaemonConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not need the device itself. Unit tables and the axis
    /// map are validated again when the mapper is built.
    pub fn validate(&self) -> Result<()> {
        self.device.unit_mapper()?;
        if let Some(bits) = self.device.counter_bits {
            if !(2..=52).contains(&bits) {
                return Err(JointError::Config(format!("counter_bits must be in [2, 52], got {}", bits)));
            }
        }
        if self.publishing.pub_rate_hz == 0 {
            return Err(JointError::Config("pub_rate_hz must be positive".to_string()));
        }
        if self.command.queue_depth() == 0 {
            return Err(JointError::Config("queue_depth must be positive".to_string()));
        }
        if let Some(simulation) = &self.simulation {
            if !simulation.initial_positions.is_empty() && simulation.initial_positions.len() != self.device.axes {
                return Err(JointError::Config(format!(
                    "simulation has {} initial positions for {} axes",
                    simulation.initial_positions.len(),
                    self.device.axes
                )));
            }
        }
        Ok(())
    }
}

impl DeviceConfig {
    pub fn unit_mapper(&self) -> Result<UnitMapper> {
        let axis_map = match &self.axis_map {
            Some(map) => {
                if map.len() != self.axes {
                    return Err(JointError::Config(format!(
                        "axis_map has {} entries for {} axes",
                        map.len(),
                        self.axes
                    )));
                }
                AxisMap::new(map.clone())?
            }
            None => AxisMap::identity(self.axes)?,
        };
        UnitMapper::new(axis_map, &self.units)
    }

    pub fn allowed_capabilities(&self) -> CapabilitySet {
        match &self.capabilities {
            Some(list) => list.iter().copied().collect(),
            None => CapabilitySet::all(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.unwrap_or(500))
    }
}

impl PublishingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.pub_rate_hz.max(1) as f64)
    }

    /// Bound on one sample; one period unless configured
    pub fn sample_timeout(&self) -> Duration {
        self.sample_timeout_ms.map(Duration::from_millis).unwrap_or_else(|| self.period())
    }

    pub fn extended(&self) -> bool {
        self.extended.unwrap_or(false)
    }
}

impl CommandConfig {
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(50)
    }

    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or("jointd")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(5000))
    }
}

impl SimulationConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms.unwrap_or(0))
    }

    pub fn reported_capabilities(&self) -> CapabilitySet {
        match &self.capabilities {
            Some(list) => list.iter().copied().collect(),
            None => CapabilitySet::all(),
        }
    }
}
