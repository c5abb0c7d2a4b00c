use burn::module::Ignored;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear,
    LinearConfig,
};
use burn::prelude::*;
use burn::tensor::activation::{gelu, sigmoid};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::error::{Result, S5Error};
use crate::s5_core::apply_s5_ssm;
use crate::s5_params::{S5SsmConfig, StateSpaceParams};

/// Nonlinear map applied to the SSM output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `gelu(y)`
    Gelu,
    /// `W1 gelu(y) * sigmoid(W2 gelu(y))`
    FullGlu,
    /// `gelu(y) * sigmoid(W2 gelu(y))`
    HalfGlu1,
    /// `y * sigmoid(W2 gelu(y))`, GELU only on the gate input
    HalfGlu2,
}

/// Configuration for one residual S5 sequence layer.
#[derive(Config, Debug)]
pub struct SequenceLayerConfig {
    pub ssm: S5SsmConfig,
    #[config(default = "Activation::Gelu")]
    pub activation: Activation,
    #[config(default = "0.0")]
    pub dropout: f64,
    /// Normalize before the SSM instead of after the residual add.
    #[config(default = "false")]
    pub prenorm: bool,
    /// BatchNorm over feature channels instead of LayerNorm.
    #[config(default = "false")]
    pub batchnorm: bool,
    /// Weight of the current batch in the BatchNorm running statistics.
    #[config(default = "0.1")]
    pub bn_momentum: f64,
}

impl SequenceLayerConfig {
    pub fn validate(&self) -> Result<()> {
        self.ssm.validate()?;
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(S5Error::InvalidConfig(format!(
                "dropout {} must lie in [0, 1)",
                self.dropout
            )));
        }
        if !(0.0..=1.0).contains(&self.bn_momentum) {
            return Err(S5Error::InvalidConfig(format!(
                "bn_momentum {} must lie in [0, 1]",
                self.bn_momentum
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SequenceLayer<B>> {
        self.validate()?;
        let d_model = self.ssm.d_model;
        let ssm = self.ssm.init(device)?;

        let out1 = matches!(self.activation, Activation::FullGlu)
            .then(|| LinearConfig::new(d_model, d_model).init(device));
        let out2 = matches!(
            self.activation,
            Activation::FullGlu | Activation::HalfGlu1 | Activation::HalfGlu2
        )
        .then(|| LinearConfig::new(d_model, d_model).init(device));

        let (layer_norm, batch_norm) = if self.batchnorm {
            let norm = BatchNormConfig::new(d_model)
                .with_momentum(self.bn_momentum)
                .init(device);
            (None, Some(norm))
        } else {
            (Some(LayerNormConfig::new(d_model).init(device)), None)
        };

        Ok(SequenceLayer {
            ssm,
            out1,
            out2,
            layer_norm,
            batch_norm,
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Ignored(self.activation),
            prenorm: self.prenorm,
        })
    }
}

/// One S5 layer: norm, SSM, activation, dropout and a residual connection.
///
/// Dropout follows burn's convention and only fires when the backend tracks
/// gradients, i.e. during training on an autodiff backend. The same switch
/// drives BatchNorm: in training its batch statistics include padded steps,
/// at inference it uses running statistics and padding has no effect on
/// valid steps.
#[derive(Module, Debug)]
pub struct SequenceLayer<B: Backend> {
    ssm: StateSpaceParams<B>,
    out1: Option<Linear<B>>,
    out2: Option<Linear<B>>,
    layer_norm: Option<LayerNorm<B>>,
    batch_norm: Option<BatchNorm<B, 1>>,
    dropout: Dropout,
    activation: Ignored<Activation>,
    prenorm: bool,
}

impl<B: Backend> SequenceLayer<B> {
    /// Input and output: `[batch, time, d_model]`.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        elapsed: Option<Tensor<B, 2>>,
        mask: Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 3> {
        let skip = input.clone();
        let x = if self.prenorm { self.norm(input) } else { input };

        let x = apply_s5_ssm(&self.ssm, x, elapsed, mask);
        let x = self.activate(x);

        let x = skip + x;
        if self.prenorm { x } else { self.norm(x) }
    }

    fn activate(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match self.activation.0 {
            Activation::Gelu => self.dropout.forward(gelu(x)),
            Activation::FullGlu => {
                let x = self.dropout.forward(gelu(x));
                let x = self.project(&self.out1, x.clone()) * sigmoid(self.project(&self.out2, x));
                self.dropout.forward(x)
            }
            Activation::HalfGlu1 => {
                let x = self.dropout.forward(gelu(x));
                let x = x.clone() * sigmoid(self.project(&self.out2, x));
                self.dropout.forward(x)
            }
            Activation::HalfGlu2 => {
                let gate_input = self.dropout.forward(gelu(x.clone()));
                let x = x * sigmoid(self.project(&self.out2, gate_input));
                self.dropout.forward(x)
            }
        }
    }

    fn project(&self, linear: &Option<Linear<B>>, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match linear {
            Some(linear) => linear.forward(x),
            None => x,
        }
    }

    fn norm(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        if let Some(norm) = &self.batch_norm {
            // BatchNorm wants channels on axis 1
            norm.forward(x.swap_dims(1, 2)).swap_dims(1, 2)
        } else if let Some(norm) = &self.layer_norm {
            norm.forward(x)
        } else {
            x
        }
    }

    pub fn ssm(&self) -> &StateSpaceParams<B> {
        &self.ssm
    }

    pub fn stabilize(mut self) -> Self {
        self.ssm = self.ssm.stabilize();
        self
    }
}
