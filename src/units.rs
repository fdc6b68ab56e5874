//! Axis remapping and unit conversion
//!
//! Logical (user-facing) axis indices are permuted onto hardware indices by an
//! [`AxisMap`], and every physical quantity is converted between hardware
//! ticks and user units with a per-axis `(scale, zero)` pair:
//!
//! ```text
//! raw  = user * scale + zero
//! user = (raw - zero) / scale
//! ```
//!
//! `scale` is expressed in ticks per user unit (e.g. encoder ticks per
//! radian). Tables are indexed by logical axis; lookups that start from a
//! hardware index map through the inverse permutation first.

use crate::{
    error::{JointError, Result},
    types::{Limits, Pid, PidKind, QuantityKind},
};
use serde::{Deserialize, Serialize};

/// Bijection between logical and hardware axis indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisMap {
    to_hardware: Vec<usize>,
    to_logical: Vec<usize>,
}

impl AxisMap {
    /// `map[logical] = hardware`. Rejects empty maps, out-of-range entries
    /// and duplicates.
    pub fn new(map: Vec<usize>) -> Result<Self> {
        let axes = map.len();
        if axes == 0 {
            return Err(JointError::Config("axis map must not be empty".to_string()));
        }

        let mut to_logical = vec![usize::MAX; axes];
        for (logical, &hardware) in map.iter().enumerate() {
            if hardware >= axes {
                return Err(JointError::Config(format!(
                    "axis map entry {} -> {} outside [0, {})",
                    logical, hardware, axes
                )));
            }
            if to_logical[hardware] != usize::MAX {
                return Err(JointError::Config(format!(
                    "hardware axis {} mapped twice (logical {} and {})",
                    hardware, to_logical[hardware], logical
                )));
            }
            to_logical[hardware] = logical;
        }

        Ok(Self { to_hardware: map, to_logical })
    }

    pub fn identity(axes: usize) -> Result<Self> {
        Self::new((0..axes).collect())
    }

    pub fn axes(&self) -> usize {
        self.to_hardware.len()
    }

    pub fn to_hardware(&self, logical: usize) -> Result<usize> {
        self.to_hardware
            .get(logical)
            .copied()
            .ok_or_else(|| JointError::axis_out_of_range(logical, self.axes()))
    }

    pub fn to_logical(&self, hardware: usize) -> Result<usize> {
        self.to_logical
            .get(hardware)
            .copied()
            .ok_or_else(|| JointError::axis_out_of_range(hardware, self.axes()))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.to_hardware
    }
}

/// Per-axis conversion table for one quantity, as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UnitConversion {
    /// Ticks per user unit, one per logical axis
    pub scales: Vec<f64>,
    /// Raw value at user zero; empty means all zeros
    #[serde(default)]
    pub zeros: Vec<f64>,
}

impl UnitConversion {
    pub fn uniform(axes: usize, scale: f64) -> Self {
        Self { scales: vec![scale; axes], zeros: Vec::new() }
    }
}

/// Unit tables for every quantity kind. Missing tables default to unity,
/// except velocity and acceleration which inherit the position scales
/// (encoder ticks per second and per second squared).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UnitsConfig {
    pub position: Option<UnitConversion>,
    pub velocity: Option<UnitConversion>,
    pub acceleration: Option<UnitConversion>,
    pub torque: Option<UnitConversion>,
    pub current: Option<UnitConversion>,
    pub pwm: Option<UnitConversion>,
}

impl UnitsConfig {
    fn table(&self, kind: QuantityKind) -> Option<&UnitConversion> {
        match kind {
            QuantityKind::Position => self.position.as_ref(),
            QuantityKind::Velocity => self.velocity.as_ref(),
            QuantityKind::Acceleration => self.acceleration.as_ref(),
            QuantityKind::Torque => self.torque.as_ref(),
            QuantityKind::Current => self.current.as_ref(),
            QuantityKind::Pwm => self.pwm.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Conversion {
    scale: f64,
    zero: f64,
}

impl Conversion {
    fn to_raw(&self, user: f64) -> f64 {
        user * self.scale + self.zero
    }

    fn to_user(&self, raw: f64) -> f64 {
        (raw - self.zero) / self.scale
    }
}

/// Immutable axis permutation plus unit tables, shared by the dispatcher
/// and the publisher.
#[derive(Debug, Clone)]
pub struct UnitMapper {
    axis_map: AxisMap,
    tables: Vec<Vec<Conversion>>,
}

impl UnitMapper {
    pub fn new(axis_map: AxisMap, units: &UnitsConfig) -> Result<Self> {
        let axes = axis_map.axes();
        let mut tables = Vec::with_capacity(QuantityKind::ALL.len());

        for kind in QuantityKind::ALL {
            let inherited = match kind {
                QuantityKind::Velocity | QuantityKind::Acceleration => units.position.as_ref().map(|p| UnitConversion {
                    scales: p.scales.clone(),
                    zeros: Vec::new(),
                }),
                _ => None,
            };
            let table = units.table(kind).cloned().or(inherited);
            tables.push(Self::build_table(kind, axes, table.as_ref())?);
        }

        Ok(Self { axis_map, tables })
    }

    /// Identity permutation with unity scales
    pub fn identity(axes: usize) -> Result<Self> {
        Self::new(AxisMap::identity(axes)?, &UnitsConfig::default())
    }

    fn build_table(kind: QuantityKind, axes: usize, table: Option<&UnitConversion>) -> Result<Vec<Conversion>> {
        let Some(table) = table else {
            return Ok(vec![Conversion { scale: 1.0, zero: 0.0 }; axes]);
        };

        if table.scales.len() != axes {
            return Err(JointError::Config(format!(
                "{:?} table has {} scales for {} axes",
                kind,
                table.scales.len(),
                axes
            )));
        }
        if !table.zeros.is_empty() && table.zeros.len() != axes {
            return Err(JointError::Config(format!(
                "{:?} table has {} zeros for {} axes",
                kind,
                table.zeros.len(),
                axes
            )));
        }

        table
            .scales
            .iter()
            .enumerate()
            .map(|(axis, &scale)| {
                let zero = table.zeros.get(axis).copied().unwrap_or(0.0);
                if !scale.is_finite() || scale == 0.0 {
                    return Err(JointError::Config(format!("{:?} scale for axis {} must be finite and non-zero", kind, axis)));
                }
                if !zero.is_finite() {
                    return Err(JointError::Config(format!("{:?} zero for axis {} must be finite", kind, axis)));
                }
                Ok(Conversion { scale, zero })
            })
            .collect()
    }

    pub fn axes(&self) -> usize {
        self.axis_map.axes()
    }

    pub fn axis_map(&self) -> &AxisMap {
        &self.axis_map
    }

    pub fn to_hardware_index(&self, logical: usize) -> Result<usize> {
        self.axis_map.to_hardware(logical)
    }

    pub fn to_logical_index(&self, hardware: usize) -> Result<usize> {
        self.axis_map.to_logical(hardware)
    }

    fn conversion(&self, kind: QuantityKind, hardware: usize) -> Result<Conversion> {
        let logical = self.axis_map.to_logical(hardware)?;
        Ok(self.tables[kind.index()][logical])
    }

    /// Convert a raw value read from `hardware` axis to user units.
    pub fn to_user(&self, kind: QuantityKind, hardware: usize, raw: f64) -> Result<f64> {
        Ok(self.conversion(kind, hardware)?.to_user(raw))
    }

    /// Convert a user value destined for `hardware` axis to raw units.
    pub fn to_hardware(&self, kind: QuantityKind, hardware: usize, user: f64) -> Result<f64> {
        Ok(self.conversion(kind, hardware)?.to_raw(user))
    }

    /// Map a logical axis and convert its user value in one step.
    pub fn user_to_raw(&self, kind: QuantityKind, logical: usize, user: f64) -> Result<(usize, f64)> {
        let hardware = self.axis_map.to_hardware(logical)?;
        Ok((hardware, self.tables[kind.index()][logical].to_raw(user)))
    }

    /// Permute and convert a whole hardware-ordered vector into a
    /// logical-ordered one.
    pub fn to_user_all(&self, kind: QuantityKind, raw: &[f64], user: &mut [f64]) -> Result<()> {
        self.check_batch(raw.len())?;
        self.check_batch(user.len())?;
        let table = &self.tables[kind.index()];
        for (hardware, &value) in raw.iter().enumerate() {
            let logical = self.axis_map.to_logical[hardware];
            user[logical] = table[logical].to_user(value);
        }
        Ok(())
    }

    /// Permute and convert a whole logical-ordered vector into a
    /// hardware-ordered one.
    pub fn to_hardware_all(&self, kind: QuantityKind, user: &[f64], raw: &mut [f64]) -> Result<()> {
        self.check_batch(user.len())?;
        self.check_batch(raw.len())?;
        let table = &self.tables[kind.index()];
        for (logical, &value) in user.iter().enumerate() {
            raw[self.axis_map.to_hardware[logical]] = table[logical].to_raw(value);
        }
        Ok(())
    }

    fn check_batch(&self, len: usize) -> Result<()> {
        if len != self.axes() {
            return Err(JointError::Range(format!("batch of {} values for {} axes", len, self.axes())));
        }
        Ok(())
    }

    /// Gains scale by output/feedback, output-side terms by output only.
    pub fn pid_to_hardware(&self, kind: PidKind, hardware: usize, pid: &Pid) -> Result<Pid> {
        let feedback = self.conversion(kind.feedback(), hardware)?.scale;
        let output = self.conversion(kind.output(), hardware)?.scale;
        let gain = output / feedback;
        Ok(Pid {
            kp: pid.kp * gain,
            kd: pid.kd * gain,
            ki: pid.ki * gain,
            max_integral: pid.max_integral * output,
            max_output: pid.max_output * output,
            offset: pid.offset * output,
            scale: pid.scale,
            stiction_up: pid.stiction_up * output,
            stiction_down: pid.stiction_down * output,
        })
    }

    pub fn pid_to_user(&self, kind: PidKind, hardware: usize, pid: &Pid) -> Result<Pid> {
        let feedback = self.conversion(kind.feedback(), hardware)?.scale;
        let output = self.conversion(kind.output(), hardware)?.scale;
        let gain = output / feedback;
        Ok(Pid {
            kp: pid.kp / gain,
            kd: pid.kd / gain,
            ki: pid.ki / gain,
            max_integral: pid.max_integral / output,
            max_output: pid.max_output / output,
            offset: pid.offset / output,
            scale: pid.scale,
            stiction_up: pid.stiction_up / output,
            stiction_down: pid.stiction_down / output,
        })
    }

    /// Limits of `kind`; a negative scale swaps the bounds.
    pub fn limits_to_hardware(&self, kind: QuantityKind, hardware: usize, limits: Limits) -> Result<Limits> {
        let conversion = self.conversion(kind, hardware)?;
        Ok(Limits::new(conversion.to_raw(limits.min), conversion.to_raw(limits.max)))
    }

    pub fn limits_to_user(&self, kind: QuantityKind, hardware: usize, limits: Limits) -> Result<Limits> {
        let conversion = self.conversion(kind, hardware)?;
        Ok(Limits::new(conversion.to_user(limits.min), conversion.to_user(limits.max)))
    }

    /// Differences and magnitudes scale without the zero offset.
    pub fn span_to_hardware(&self, kind: QuantityKind, hardware: usize, user: f64) -> Result<f64> {
        Ok(user * self.conversion(kind, hardware)?.scale)
    }

    pub fn span_to_user(&self, kind: QuantityKind, hardware: usize, raw: f64) -> Result<f64> {
        Ok(raw / self.conversion(kind, hardware)?.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scenario_mapper() -> UnitMapper {
        let units = UnitsConfig {
            position: Some(UnitConversion::uniform(3, 1000.0)),
            ..Default::default()
        };
        UnitMapper::new(AxisMap::new(vec![2, 0, 1]).unwrap(), &units).unwrap()
    }

    #[test]
    fn test_axis_map_rejects_invalid_permutations() {
        assert!(matches!(AxisMap::new(vec![]), Err(JointError::Config(_))));
        assert!(matches!(AxisMap::new(vec![0, 0, 1]), Err(JointError::Config(_))));
        assert!(matches!(AxisMap::new(vec![0, 3, 1]), Err(JointError::Config(_))));
        assert!(AxisMap::new(vec![1, 2, 0]).is_ok());
    }

    #[test]
    fn test_index_lookup_out_of_range_is_an_error() {
        let mapper = scenario_mapper();
        assert!(matches!(mapper.to_hardware_index(3), Err(JointError::Range(_))));
        assert!(matches!(mapper.to_logical_index(7), Err(JointError::Range(_))));
    }

    #[test]
    fn test_scenario_position_mapping() {
        let mapper = scenario_mapper();

        let (hardware, raw) = mapper.user_to_raw(QuantityKind::Position, 0, 1.0).unwrap();
        assert_eq!(hardware, 2);
        assert_eq!(raw, 1000.0);
        assert_eq!(mapper.to_user(QuantityKind::Position, 2, 1000.0).unwrap(), 1.0);
        assert_eq!(mapper.to_logical_index(2).unwrap(), 0);
    }

    #[test]
    fn test_batch_conversion_permutes() {
        let mapper = scenario_mapper();
        let user = [1.0, 2.0, 3.0];
        let mut raw = [0.0; 3];
        mapper.to_hardware_all(QuantityKind::Position, &user, &mut raw).unwrap();
        assert_eq!(raw, [2000.0, 3000.0, 1000.0]);

        let mut back = [0.0; 3];
        mapper.to_user_all(QuantityKind::Position, &raw, &mut back).unwrap();
        assert_eq!(back, user);

        let mut short = [0.0; 2];
        assert!(matches!(
            mapper.to_hardware_all(QuantityKind::Position, &user, &mut short),
            Err(JointError::Range(_))
        ));
    }

    #[test]
    fn test_velocity_inherits_position_scale_without_zero() {
        let units = UnitsConfig {
            position: Some(UnitConversion { scales: vec![100.0], zeros: vec![50.0] }),
            ..Default::default()
        };
        let mapper = UnitMapper::new(AxisMap::identity(1).unwrap(), &units).unwrap();
        assert_eq!(mapper.to_hardware(QuantityKind::Position, 0, 1.0).unwrap(), 150.0);
        assert_eq!(mapper.to_hardware(QuantityKind::Velocity, 0, 1.0).unwrap(), 100.0);
        assert_eq!(mapper.to_hardware(QuantityKind::Torque, 0, 1.0).unwrap(), 1.0);
    }

    #[test]
    fn test_bad_tables_are_configuration_errors() {
        let wrong_len = UnitsConfig {
            torque: Some(UnitConversion::uniform(2, 1.0)),
            ..Default::default()
        };
        assert!(matches!(
            UnitMapper::new(AxisMap::identity(3).unwrap(), &wrong_len),
            Err(JointError::Config(_))
        ));

        let zero_scale = UnitsConfig {
            current: Some(UnitConversion::uniform(3, 0.0)),
            ..Default::default()
        };
        assert!(matches!(
            UnitMapper::new(AxisMap::identity(3).unwrap(), &zero_scale),
            Err(JointError::Config(_))
        ));
    }

    #[test]
    fn test_negative_scale_swaps_limits() {
        let units = UnitsConfig {
            position: Some(UnitConversion::uniform(1, -10.0)),
            ..Default::default()
        };
        let mapper = UnitMapper::new(AxisMap::identity(1).unwrap(), &units).unwrap();
        let raw = mapper.limits_to_hardware(QuantityKind::Position, 0, Limits::new(-1.0, 2.0)).unwrap();
        assert_eq!(raw, Limits { min: -20.0, max: 10.0 });
        let user = mapper.limits_to_user(QuantityKind::Position, 0, raw).unwrap();
        assert_eq!(user, Limits { min: -1.0, max: 2.0 });
    }

    #[test]
    fn test_spans_ignore_zero_offset() {
        let units = UnitsConfig {
            position: Some(UnitConversion { scales: vec![100.0, 100.0], zeros: vec![50.0, 0.0] }),
            velocity: Some(UnitConversion { scales: vec![10.0, 20.0], zeros: Vec::new() }),
            ..Default::default()
        };
        let mapper = UnitMapper::new(AxisMap::new(vec![1, 0]).unwrap(), &units).unwrap();

        // hardware 1 is logical 0, whose zero is 50
        assert_eq!(mapper.span_to_hardware(QuantityKind::Position, 1, 0.5).unwrap(), 50.0);
        assert_eq!(mapper.to_hardware(QuantityKind::Position, 1, 0.5).unwrap(), 100.0);
        assert_eq!(mapper.span_to_user(QuantityKind::Velocity, 0, 40.0).unwrap(), 2.0);

        let limits = mapper.limits_to_hardware(QuantityKind::Velocity, 1, Limits::new(-1.0, 3.0)).unwrap();
        assert_eq!(limits, Limits { min: -10.0, max: 30.0 });
    }

    #[test]
    fn test_pid_conversion_scales_gains_by_output_over_feedback() {
        let units = UnitsConfig {
            position: Some(UnitConversion::uniform(1, 1000.0)),
            pwm: Some(UnitConversion::uniform(1, 10.0)),
            ..Default::default()
        };
        let mapper = UnitMapper::new(AxisMap::identity(1).unwrap(), &units).unwrap();
        let pid = Pid { kp: 100.0, max_output: 50.0, scale: 3.0, ..Default::default() };

        let raw = mapper.pid_to_hardware(PidKind::Position, 0, &pid).unwrap();
        assert!((raw.kp - 1.0).abs() < 1e-12);
        assert!((raw.max_output - 500.0).abs() < 1e-12);
        assert_eq!(raw.scale, 3.0);
    }

    fn random_mapper() -> impl Strategy<Value = (UnitMapper, Vec<usize>)> {
        (1usize..8)
            .prop_flat_map(|axes| {
                (
                    Just((0..axes).collect::<Vec<usize>>()).prop_shuffle(),
                    prop::collection::vec(prop_oneof![0.01f64..1.0e4, -1.0e4f64..-0.01], axes * 6),
                    prop::collection::vec(-1.0e3f64..1.0e3, axes * 6),
                )
            })
            .prop_map(|(map, scales, zeros)| {
                let axes = map.len();
                let table = |k: usize| {
                    Some(UnitConversion {
                        scales: scales[k * axes..(k + 1) * axes].to_vec(),
                        zeros: zeros[k * axes..(k + 1) * axes].to_vec(),
                    })
                };
                let units = UnitsConfig {
                    position: table(0),
                    velocity: table(1),
                    acceleration: table(2),
                    torque: table(3),
                    current: table(4),
                    pwm: table(5),
                };
                (UnitMapper::new(AxisMap::new(map.clone()).unwrap(), &units).unwrap(), map)
            })
    }

    proptest! {
        #[test]
        fn prop_axis_map_is_a_bijection((mapper, map) in random_mapper()) {
            for (logical, &hardware) in map.iter().enumerate() {
                prop_assert_eq!(mapper.to_hardware_index(logical).unwrap(), hardware);
                prop_assert_eq!(mapper.to_logical_index(hardware).unwrap(), logical);
                prop_assert_eq!(mapper.to_hardware_index(mapper.to_logical_index(hardware).unwrap()).unwrap(), hardware);
                prop_assert_eq!(mapper.to_logical_index(mapper.to_hardware_index(logical).unwrap()).unwrap(), logical);
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn prop_unit_round_trip((mapper, _map) in random_mapper(), raw in -1.0e6f64..1.0e6, axis_seed in 0usize..64) {
            let hardware = axis_seed % mapper.axes();
            for kind in QuantityKind::ALL {
                let user = mapper.to_user(kind, hardware, raw).unwrap();
                let back = mapper.to_hardware(kind, hardware, user).unwrap();
                let tolerance = 1e-6 * raw.abs().max(1.0);
                prop_assert!((back - raw).abs() <= tolerance, "{:?}: {} -> {} -> {}", kind, raw, user, back);
            }
        }

        #[test]
        fn prop_pid_round_trip((mapper, _map) in random_mapper(), gains in prop::collection::vec(-1.0e3f64..1.0e3, 9)) {
            let pid = Pid::from_slice(&gains).unwrap();
            for kind in PidKind::ALL {
                let raw = mapper.pid_to_hardware(kind, 0, &pid).unwrap();
                let back = mapper.pid_to_user(kind, 0, &raw).unwrap();
                for (a, b) in pid.to_array().iter().zip(back.to_array().iter()) {
                    prop_assert!((a - b).abs() <= 1e-6 * a.abs().max(1.0));
                }
            }
        }
    }
}
