use burn::prelude::*;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::error::{Result, S5Error};

/// How irregular sampling times reach the layer stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepMode {
    /// Discard timestamps; every step uses the learned step size.
    Ignore,
    /// Elapsed time drives the discretization of every step.
    Integrate,
    /// Like `Integrate`, and the elapsed time is also appended to each
    /// observation as an extra input feature.
    Append,
}

impl TimestepMode {
    /// Map the two boolean switches of the original configuration surface.
    pub fn from_flags(use_integration_timestep: bool, append_integration_timestep: bool) -> Self {
        match (use_integration_timestep, append_integration_timestep) {
            (_, true) => Self::Append,
            (true, false) => Self::Integrate,
            (false, false) => Self::Ignore,
        }
    }

    pub fn uses_timesteps(&self) -> bool {
        !matches!(self, Self::Ignore)
    }

    /// Features added to every observation before the input encoder.
    pub fn extra_features(&self) -> usize {
        match self {
            Self::Append => 1,
            _ => 0,
        }
    }
}

/// A batch of observation sequences with optional timestamps and validity mask.
///
/// - observations: `[batch, time, d_input]`
/// - timestamps: `[batch, time]`, absolute sample times
/// - mask: `[batch, time]`, true for real (non-padded) steps
#[derive(Clone, Debug)]
pub struct SequenceBatch<B: Backend> {
    pub observations: Tensor<B, 3>,
    pub timestamps: Option<Tensor<B, 2>>,
    pub mask: Option<Tensor<B, 2, Bool>>,
}

impl<B: Backend> SequenceBatch<B> {
    pub fn new(observations: Tensor<B, 3>) -> Self {
        Self { observations, timestamps: None, mask: None }
    }

    pub fn with_timestamps(mut self, timestamps: Tensor<B, 2>) -> Self {
        self.timestamps = Some(timestamps);
        self
    }

    pub fn with_mask(mut self, mask: Tensor<B, 2, Bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Check that timestamps and mask line up with the observations.
    pub fn validate(&self) -> Result<()> {
        let [batch, len, _] = self.observations.dims();
        if let Some(timestamps) = &self.timestamps {
            let actual = timestamps.dims();
            if actual != [batch, len] {
                return Err(S5Error::TimestampShape { expected: [batch, len], actual });
            }
        }
        if let Some(mask) = &self.mask {
            let actual = mask.dims();
            if actual != [batch, len] {
                return Err(S5Error::MaskShape { expected: [batch, len], actual });
            }
        }
        Ok(())
    }
}

/// Layer-stack input after timestep handling.
#[derive(Clone, Debug)]
pub struct AdaptedSequence<B: Backend> {
    /// `[batch, time, d_input + extra_features]`
    pub inputs: Tensor<B, 3>,
    /// Per-step elapsed time `[batch, time]`, absent in `Ignore` mode.
    pub elapsed: Option<Tensor<B, 2>>,
    pub mask: Option<Tensor<B, 2, Bool>>,
}

/// Produces per-step time deltas and the optional elapsed-time feature.
#[derive(Clone, Debug, PartialEq)]
pub struct IrregularTimeAdapter {
    mode: TimestepMode,
    d_input: usize,
    first_step_dt: f64,
}

impl IrregularTimeAdapter {
    pub fn new(mode: TimestepMode, d_input: usize, first_step_dt: f64) -> Self {
        Self { mode, d_input, first_step_dt }
    }

    pub fn mode(&self) -> TimestepMode {
        self.mode
    }

    /// Width of the adapted inputs.
    pub fn input_width(&self) -> usize {
        self.d_input + self.mode.extra_features()
    }

    /// Shape and mode checks shared by every forward path.
    pub fn check<B: Backend>(&self, batch: &SequenceBatch<B>) -> Result<()> {
        batch.validate()?;
        let [_, _, d_input] = batch.observations.dims();
        if d_input != self.d_input {
            return Err(S5Error::InputDim { expected: self.d_input, actual: d_input });
        }
        if self.mode.uses_timesteps() && batch.timestamps.is_none() {
            return Err(S5Error::MissingTimestamps(self.mode));
        }
        Ok(())
    }

    pub fn adapt<B: Backend>(&self, batch: SequenceBatch<B>) -> Result<AdaptedSequence<B>> {
        self.check(&batch)?;

        let SequenceBatch { observations, timestamps, mask } = batch;
        let elapsed = match (self.mode, timestamps) {
            (TimestepMode::Ignore, timestamps) => {
                if timestamps.is_some() {
                    log::debug!("timestep mode ignore: discarding timestamps");
                }
                None
            }
            (mode, None) => return Err(S5Error::MissingTimestamps(mode)),
            (_, Some(timestamps)) => Some(elapsed_times(timestamps, self.first_step_dt)),
        };

        let inputs = match (&self.mode, &elapsed) {
            (TimestepMode::Append, Some(dt)) => {
                Tensor::cat(vec![observations, dt.clone().unsqueeze_dim(2)], 2)
            }
            _ => observations,
        };

        Ok(AdaptedSequence { inputs, elapsed, mask })
    }
}

/// Time since the previous sample; the first step gets `first_step_dt`.
pub fn elapsed_times<B: Backend>(timestamps: Tensor<B, 2>, first_step_dt: f64) -> Tensor<B, 2> {
    let [batch, len] = timestamps.dims();
    if len == 0 {
        return timestamps;
    }
    let first = Tensor::full([batch, 1], first_step_dt, &timestamps.device());
    if len == 1 {
        return first;
    }
    let diffs = timestamps.clone().narrow(1, 1, len - 1) - timestamps.narrow(1, 0, len - 1);
    Tensor::cat(vec![first, diffs], 1)
}
