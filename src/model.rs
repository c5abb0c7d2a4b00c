use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::error::{Result, S5Error};
use crate::s5_encoder::{StackedEncoder, StackedEncoderConfig};
use crate::time_adapter::SequenceBatch;

/// How the per-step features are reduced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionMode {
    /// Mean over valid steps.
    Pool,
    /// Last valid step of every sequence.
    Last,
    /// Keep every step, e.g. for dense regression targets.
    PerStep,
}

#[derive(Config, Debug)]
pub struct S5ModelConfig {
    pub encoder: StackedEncoderConfig,
    #[config(default = "ReductionMode::Pool")]
    pub mode: ReductionMode,
    /// Width of an optional linear readout applied after the reduction.
    pub d_output: Option<usize>,
}

impl S5ModelConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<S5Model<B>> {
        if self.d_output == Some(0) {
            return Err(S5Error::InvalidConfig("d_output must be non-zero".to_string()));
        }
        let encoder = self.encoder.init(device)?;
        let d_model = self.encoder.layer.ssm.d_model;
        let decoder = self
            .d_output
            .map(|d_output| LinearConfig::new(d_model, d_output).init(device));
        Ok(S5Model { encoder, decoder, mode: Ignored(self.mode) })
    }
}

/// Either one vector per sequence or one per step.
#[derive(Clone, Debug)]
pub enum ModelOutput<B: Backend> {
    /// `[batch, features]`
    Pooled(Tensor<B, 2>),
    /// `[batch, time, features]`
    PerStep(Tensor<B, 3>),
}

impl<B: Backend> ModelOutput<B> {
    pub fn into_pooled(self) -> Option<Tensor<B, 2>> {
        match self {
            Self::Pooled(x) => Some(x),
            Self::PerStep(_) => None,
        }
    }

    pub fn into_per_step(self) -> Option<Tensor<B, 3>> {
        match self {
            Self::PerStep(x) => Some(x),
            Self::Pooled(_) => None,
        }
    }
}

/// S5 sequence model: stacked encoder, reduction over time, optional readout.
#[derive(Module, Debug)]
pub struct S5Model<B: Backend> {
    encoder: StackedEncoder<B>,
    decoder: Option<Linear<B>>,
    mode: Ignored<ReductionMode>,
}

impl<B: Backend> S5Model<B> {
    /// An empty batch (zero time steps) reduces to zero features without
    /// running the layer stack.
    pub fn forward(&self, batch: SequenceBatch<B>) -> Result<ModelOutput<B>> {
        let [batch_size, len, _] = batch.observations.dims();
        if len == 0 {
            self.encoder.adapter().check(&batch)?;
            return Ok(self.empty_output(batch_size, &batch.observations.device()));
        }

        let mask = batch.mask.clone();
        let features = self.encoder.forward(batch)?;

        let output = match self.mode.0 {
            ReductionMode::Pool => ModelOutput::Pooled(self.decode(masked_mean_pool(features, mask))),
            ReductionMode::Last => ModelOutput::Pooled(self.decode(last_valid_step(features, mask))),
            ReductionMode::PerStep => ModelOutput::PerStep(self.decode(features)),
        };
        Ok(output)
    }

    fn empty_output(&self, batch_size: usize, device: &B::Device) -> ModelOutput<B> {
        let d_model = self.encoder.d_model();
        match self.mode.0 {
            ReductionMode::Pool | ReductionMode::Last => {
                ModelOutput::Pooled(self.decode(Tensor::zeros([batch_size, d_model], device)))
            }
            ReductionMode::PerStep => {
                let width = match &self.decoder {
                    Some(decoder) => decoder.weight.val().dims()[1],
                    None => d_model,
                };
                ModelOutput::PerStep(Tensor::zeros([batch_size, 0, width], device))
            }
        }
    }

    fn decode<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match &self.decoder {
            Some(decoder) => decoder.forward(x),
            None => x,
        }
    }

    pub fn encoder(&self) -> &StackedEncoder<B> {
        &self.encoder
    }

    pub fn stabilize(mut self) -> Self {
        self.encoder = self.encoder.stabilize();
        self
    }
}

/// Mean over valid steps, `[batch, time, H]` to `[batch, H]`.
///
/// Padded entries are zeroed before summing, so non-finite padding cannot
/// leak into the mean. A sequence with no valid step pools to zeros.
pub fn masked_mean_pool<B: Backend>(x: Tensor<B, 3>, mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 2> {
    let [batch, len, h] = x.dims();
    if len == 0 {
        return Tensor::zeros([batch, h], &x.device());
    }
    match mask {
        None => x.mean_dim(1).squeeze::<2>(1),
        Some(valid) => {
            let counts = valid.clone().float().sum_dim(1).clamp_min(1.0).unsqueeze_dim::<3>(2);
            let pad = valid.bool_not().unsqueeze_dim::<3>(2).repeat_dim(2, h);
            x.mask_fill(pad, 0.0).sum_dim(1).div(counts).squeeze::<2>(1)
        }
    }
}

/// Features at the last valid step, `[batch, time, H]` to `[batch, H]`.
///
/// Padding is expected at the end of each row. Rows without a valid step,
/// and empty sequences, give zeros.
pub fn last_valid_step<B: Backend>(x: Tensor<B, 3>, mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 2> {
    let [batch, len, h] = x.dims();
    if len == 0 {
        return Tensor::zeros([batch, h], &x.device());
    }
    match mask {
        None => x.narrow(1, len - 1, 1).squeeze::<2>(1),
        Some(valid) => {
            let counts = valid.int().sum_dim(1);
            let empty = counts.clone().equal_elem(0).unsqueeze_dim::<3>(2).repeat_dim(2, h);
            let index = counts
                .sub_scalar(1)
                .clamp_min(0)
                .unsqueeze_dim::<3>(2)
                .repeat_dim(2, h);
            x.gather(1, index).mask_fill(empty, 0.0).squeeze::<2>(1)
        }
    }
}
