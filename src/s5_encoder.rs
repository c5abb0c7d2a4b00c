use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::backend::Backend;

use crate::error::{Result, S5Error};
use crate::s5_layer::{SequenceLayer, SequenceLayerConfig};
use crate::time_adapter::{IrregularTimeAdapter, SequenceBatch, TimestepMode};

/// Configuration for a stack of S5 layers behind a linear input encoder.
#[derive(Config, Debug)]
pub struct StackedEncoderConfig {
    /// Width of the raw observations.
    pub d_input: usize,
    /// Shared by every layer of the stack; `layer.ssm.d_model` is the stack width.
    pub layer: SequenceLayerConfig,
    #[config(default = "1")]
    pub n_layers: usize,
    /// Feed measured elapsed times into the discretization.
    #[config(default = "true")]
    pub use_integration_timestep: bool,
    /// Also append elapsed time to every observation.
    #[config(default = "false")]
    pub append_integration_timestep: bool,
    /// Elapsed time assumed for the first sample of every sequence.
    #[config(default = "0.1")]
    pub first_step_dt: f64,
}

impl StackedEncoderConfig {
    pub fn timestep_mode(&self) -> TimestepMode {
        TimestepMode::from_flags(self.use_integration_timestep, self.append_integration_timestep)
    }

    pub fn validate(&self) -> Result<()> {
        self.layer.validate()?;
        if self.d_input == 0 || self.n_layers == 0 {
            return Err(S5Error::InvalidConfig(format!(
                "d_input ({}) and n_layers ({}) must be non-zero",
                self.d_input, self.n_layers
            )));
        }
        if !(self.first_step_dt >= 0.0) || !self.first_step_dt.is_finite() {
            return Err(S5Error::InvalidConfig(format!(
                "first_step_dt {} must be finite and >= 0",
                self.first_step_dt
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<StackedEncoder<B>> {
        self.validate()?;
        let adapter = IrregularTimeAdapter::new(self.timestep_mode(), self.d_input, self.first_step_dt);
        let d_model = self.layer.ssm.d_model;

        let encoder = LinearConfig::new(adapter.input_width(), d_model).init(device);
        let layers = (0..self.n_layers)
            .map(|_| self.layer.init(device))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "S5 encoder: {} -> {} over {} layer(s), timesteps: {:?}",
            adapter.input_width(),
            d_model,
            self.n_layers,
            adapter.mode(),
        );

        Ok(StackedEncoder { encoder, layers, adapter: Ignored(adapter) })
    }
}

/// Linear input encoder followed by residual S5 layers.
///
/// Every layer sees the same elapsed times and padding mask.
#[derive(Module, Debug)]
pub struct StackedEncoder<B: Backend> {
    encoder: Linear<B>,
    layers: Vec<SequenceLayer<B>>,
    adapter: Ignored<IrregularTimeAdapter>,
}

impl<B: Backend> StackedEncoder<B> {
    /// Observations `[batch, time, d_input]` to features `[batch, time, d_model]`.
    pub fn forward(&self, batch: SequenceBatch<B>) -> Result<Tensor<B, 3>> {
        let adapted = self.adapter.0.adapt(batch)?;
        log::debug!(
            "encoder forward: inputs {:?}, per-step dt: {}, masked: {}",
            adapted.inputs.dims(),
            adapted.elapsed.is_some(),
            adapted.mask.is_some(),
        );

        let mut x = self.encoder.forward(adapted.inputs);
        for layer in &self.layers {
            x = layer.forward(x, adapted.elapsed.clone(), adapted.mask.clone());
        }
        Ok(x)
    }

    /// Width of the features every layer produces.
    pub fn d_model(&self) -> usize {
        self.encoder.weight.val().dims()[1]
    }

    pub fn adapter(&self) -> &IrregularTimeAdapter {
        &self.adapter.0
    }

    pub fn layers(&self) -> &[SequenceLayer<B>] {
        &self.layers
    }

    /// Clip every layer's eigenvalues; see [`crate::StateSpaceParams::stabilize`].
    pub fn stabilize(mut self) -> Self {
        self.layers = self.layers.into_iter().map(SequenceLayer::stabilize).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s5_params::S5SsmConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn config(append: bool) -> StackedEncoderConfig {
        StackedEncoderConfig::new(2, SequenceLayerConfig::new(S5SsmConfig::new(8, 8)))
            .with_n_layers(2)
            .with_append_integration_timestep(append)
    }

    #[test]
    fn test_append_widens_encoder_input() {
        let device = Default::default();
        let plain = config(false).init::<TestBackend>(&device).unwrap();
        let append = config(true).init::<TestBackend>(&device).unwrap();
        assert_eq!(plain.adapter().input_width(), 2);
        assert_eq!(append.adapter().input_width(), 3);
        assert_eq!(append.layers().len(), 2);
    }

    #[test]
    fn test_forward_with_irregular_timestamps() {
        let device = Default::default();
        let encoder = config(true).init::<TestBackend>(&device).unwrap();
        let observations = Tensor::random([3, 5, 2], Distribution::Normal(0.0, 1.0), &device);
        let timestamps = Tensor::<TestBackend, 1, Int>::arange(0..5, &device)
            .float()
            .powf_scalar(1.5)
            .unsqueeze_dim::<2>(0)
            .repeat_dim(0, 3);
        let out = encoder
            .forward(SequenceBatch::new(observations).with_timestamps(timestamps))
            .unwrap();
        assert_eq!(out.dims(), [3, 5, 8]);
    }

    #[test]
    fn test_missing_timestamps_is_an_error() {
        let device = Default::default();
        let encoder = config(false).init::<TestBackend>(&device).unwrap();
        let observations = Tensor::random([1, 4, 2], Distribution::Normal(0.0, 1.0), &device);
        let err = encoder.forward(SequenceBatch::new(observations)).unwrap_err();
        assert_eq!(err, S5Error::MissingTimestamps(TimestepMode::Integrate));
    }

    #[test]
    fn test_zero_layers_rejected() {
        let result = config(false).with_n_layers(0).init::<TestBackend>(&Default::default());
        assert!(result.is_err());
    }
}
