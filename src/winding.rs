//! Wraparound tracking for fixed-width position counters
//!
//! Hardware counters of `B` bits cover `[-R/2, R/2)` with `R = 2^B`. The
//! tracker keeps a signed winding count per axis and reconstructs an
//! unbounded absolute position:
//!
//! ```text
//! absolute = winding * R + raw - zero_reference
//! ```
//!
//! A wrap is recognised when the sign of the new sample flips while the
//! previous sample sat beyond a quarter range on the other side. The quarter
//! margin keeps jitter around the boundary from being counted twice.
//!
//! Re-referencing restarts the winding count, so the tracker also keeps a
//! frame offset: the unwrapped device position minus the absolute reading.
//! Position references go to the device as `absolute + frame_offset`.

use crate::error::{JointError, Result};
use tracing::warn;

/// Per-axis tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionCounterState {
    pub last_raw_sample: Option<f64>,
    pub winding_count: i64,
    pub zero_reference: f64,
    /// Unwrapped device position minus absolute position
    pub frame_offset: f64,
}

/// Result of feeding one raw sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPosition {
    pub absolute: f64,
    /// Set when the step between samples exceeded half the counter range
    pub ambiguous: bool,
}

#[derive(Debug, Clone)]
pub struct WraparoundTracker {
    range: Option<f64>,
    axes: Vec<MotionCounterState>,
}

impl WraparoundTracker {
    /// `counter_bits = None` disables wrap detection; only the zero
    /// reference is applied.
    pub fn new(axes: usize, counter_bits: Option<u32>) -> Result<Self> {
        let range = match counter_bits {
            None => None,
            Some(bits) if (2..=52).contains(&bits) => Some((1u64 << bits) as f64),
            Some(bits) => {
                return Err(JointError::Config(format!("counter_bits must be in [2, 52], got {}", bits)));
            }
        };

        Ok(Self {
            range,
            axes: vec![MotionCounterState::default(); axes],
        })
    }

    pub fn range(&self) -> Option<f64> {
        self.range
    }

    pub fn state(&self, axis: usize) -> Result<&MotionCounterState> {
        let axes = self.axes.len();
        self.axes.get(axis).ok_or_else(|| JointError::axis_out_of_range(axis, axes))
    }

    fn state_mut(&mut self, axis: usize) -> Result<&mut MotionCounterState> {
        let axes = self.axes.len();
        self.axes.get_mut(axis).ok_or_else(|| JointError::axis_out_of_range(axis, axes))
    }

    /// Feed the latest raw counter value of hardware `axis`.
    pub fn update(&mut self, axis: usize, raw: f64) -> Result<TrackedPosition> {
        let range = self.range;
        let state = self.state_mut(axis)?;
        let mut ambiguous = false;

        if let (Some(range), Some(prev)) = (range, state.last_raw_sample) {
            let quarter = range / 4.0;
            let delta_winding = if raw < 0.0 && prev > quarter {
                1
            } else if raw > 0.0 && prev < -quarter {
                -1
            } else {
                0
            };
            state.winding_count += delta_winding;

            let step = delta_winding as f64 * range + raw - prev;
            if step.abs() > range / 2.0 {
                ambiguous = true;
                warn!("{}", JointError::WraparoundAmbiguity { axis, step });
            }
        }

        state.last_raw_sample = Some(raw);
        let winding = state.winding_count as f64 * range.unwrap_or(0.0);

        Ok(TrackedPosition {
            absolute: winding + raw - state.zero_reference,
            ambiguous,
        })
    }

    /// Re-reference `axis`: the zero reference becomes `current_raw + value`
    /// and the winding count restarts at zero. The next reading at the same
    /// counter value is therefore `-value`. Windings seen so far move into
    /// the frame offset.
    pub fn define_zero(&mut self, axis: usize, current_raw: f64, value: f64) -> Result<()> {
        let range = self.range.unwrap_or(0.0);
        let state = self.state_mut(axis)?;
        let absolute = state.winding_count as f64 * range + current_raw - state.zero_reference;
        state.frame_offset += absolute + value;
        state.zero_reference = current_raw + value;
        state.winding_count = 0;
        state.last_raw_sample = Some(current_raw);
        Ok(())
    }

    /// Forget everything about `axis` after its hardware counter was zeroed.
    pub fn reset(&mut self, axis: usize) -> Result<()> {
        let state = self.state_mut(axis)?;
        *state = MotionCounterState {
            last_raw_sample: Some(0.0),
            ..Default::default()
        };
        Ok(())
    }

    pub fn frame_offset(&self, axis: usize) -> Result<f64> {
        Ok(self.state(axis)?.frame_offset)
    }

    /// Absolute position for a value that was just read, without consuming
    /// it as a new sample.
    pub fn absolute_of(&self, axis: usize, raw: f64) -> Result<f64> {
        let state = self.state(axis)?;
        Ok(state.winding_count as f64 * self.range.unwrap_or(0.0) + raw - state.zero_reference)
    }
}

/// Fold a continuous value into the signed counter window `[-R/2, R/2)`.
pub fn wrap_counter(value: f64, range: f64) -> f64 {
    (value + range / 2.0).rem_euclid(range) - range / 2.0
}
