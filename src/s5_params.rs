use burn::module::{Ignored, Param};
use burn::prelude::*;
use burn::tensor::{backend::Backend, Distribution};
use serde::{Deserialize, Serialize};

use crate::complex::ComplexTensor;
use crate::discretize::Discretization;
use crate::error::{Result, S5Error};

/// Eigenvalue initialisation for one block of the diagonal state matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EigenInit {
    /// `-1/2 + i*pi*n`
    S4dLin,
    /// `-1/2 + i*(N/pi)*(N/(2n+1) - 1)`
    S4dInv,
    /// Log-uniform decay rates, uniform frequencies.
    Random,
}

/// Initialisation of the output projection `C`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CInit {
    LecunNormal,
    /// Standard normal, clipped at two sigma.
    TruncStandardNormal,
    ComplexNormal,
}

/// Configuration of one diagonal S5 state-space system.
#[derive(Config, Debug)]
pub struct S5SsmConfig {
    /// H: width of the layer input and output.
    pub d_model: usize,
    /// P: state size before conjugate halving.
    pub ssm_size: usize,
    /// Number of blocks the eigenvalue initialisation is tiled over.
    #[config(default = "1")]
    pub blocks: usize,
    #[config(default = "EigenInit::S4dLin")]
    pub eigen_init: EigenInit,
    #[config(default = "CInit::LecunNormal")]
    pub c_init: CInit,
    #[config(default = "Discretization::Zoh")]
    pub discretization: Discretization,
    #[config(default = "0.001")]
    pub dt_min: f64,
    #[config(default = "0.1")]
    pub dt_max: f64,
    /// Share a single learned step size across all state channels.
    #[config(default = "false")]
    pub dt_global: bool,
    /// Clamp eigenvalue real parts to `max_real_eig`.
    #[config(default = "false")]
    pub clip_eigs: bool,
    #[config(default = "-1e-4")]
    pub max_real_eig: f64,
    /// Store only one member of each conjugate pair.
    #[config(default = "true")]
    pub conj_sym: bool,
    #[config(default = "false")]
    pub bidirectional: bool,
    /// Uniform multiplier on every step size, learned or measured.
    #[config(default = "1.0")]
    pub step_rescale: f64,
}

impl S5SsmConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(S5Error::InvalidConfig(msg));
        if self.d_model == 0 || self.ssm_size == 0 || self.blocks == 0 {
            return fail(format!(
                "d_model ({}), ssm_size ({}) and blocks ({}) must be non-zero",
                self.d_model, self.ssm_size, self.blocks
            ));
        }
        if self.ssm_size % self.blocks != 0 {
            return fail(format!(
                "ssm_size {} is not divisible by blocks {}",
                self.ssm_size, self.blocks
            ));
        }
        if (self.ssm_size / self.blocks) % 2 != 0 {
            return fail(format!(
                "block size {} must be even to hold conjugate pairs",
                self.ssm_size / self.blocks
            ));
        }
        if !(self.dt_min > 0.0) || self.dt_min > self.dt_max {
            return fail(format!(
                "need 0 < dt_min <= dt_max, got [{}, {}]",
                self.dt_min, self.dt_max
            ));
        }
        if !(self.max_real_eig < 0.0) {
            return fail(format!("max_real_eig {} must be negative", self.max_real_eig));
        }
        if !(self.step_rescale > 0.0) {
            return fail(format!("step_rescale {} must be positive", self.step_rescale));
        }
        Ok(())
    }

    /// Number of stored state channels.
    pub fn state_size(&self) -> usize {
        if self.conj_sym { self.ssm_size / 2 } else { self.ssm_size }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<StateSpaceParams<B>> {
        StateSpaceParams::new(self, device)
    }
}

/// Continuous-time parameters of a diagonal S5 system.
///
/// `lambda` is the diagonal of the state matrix, `B` maps the H input
/// channels into the P state channels, `C` maps them back, and `D` is an
/// elementwise feedthrough. With `conj_sym` the implicit conjugate half is
/// folded in by doubling the real part of the readout.
#[derive(Module, Debug)]
pub struct StateSpaceParams<B: Backend> {
    /// Re(lambda), [P]
    lambda_re: Param<Tensor<B, 1>>,
    /// Im(lambda), [P]
    lambda_im: Param<Tensor<B, 1>>,
    /// Input projection, [P, H]
    b_re: Param<Tensor<B, 2>>,
    b_im: Param<Tensor<B, 2>>,
    /// Output projection, [H, P]
    c_re: Param<Tensor<B, 2>>,
    c_im: Param<Tensor<B, 2>>,
    /// Output projection of the time-reversed pass, [H, P]
    c_back_re: Option<Param<Tensor<B, 2>>>,
    c_back_im: Option<Param<Tensor<B, 2>>>,
    /// Feedthrough, [H]
    d: Param<Tensor<B, 1>>,
    /// log of the learned step, [1] when global, [P] otherwise
    log_step: Param<Tensor<B, 1>>,
    discretization: Ignored<Discretization>,
    conj_sym: bool,
    clip_eigs: bool,
    max_real_eig: f64,
    dt_min: f64,
    dt_max: f64,
    step_rescale: f64,
}

impl<B: Backend> StateSpaceParams<B> {
    pub fn new(config: &S5SsmConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let h = config.d_model;
        let p = config.state_size();

        let lambda = init_eigenvalues::<B>(
            config.eigen_init,
            config.ssm_size / config.blocks,
            config.blocks,
            config.conj_sym,
            device,
        );
        let b = init_input_matrix::<B>(p, h, device);
        let c = init_output_matrix::<B>(config.c_init, h, p, device);
        let c_back = config
            .bidirectional
            .then(|| init_output_matrix::<B>(config.c_init, h, p, device));
        let d = Tensor::random([h], Distribution::Normal(0.0, 1.0), device);
        let log_step = init_log_step::<B>(
            if config.dt_global { 1 } else { p },
            config.dt_min,
            config.dt_max,
            device,
        );

        log::info!(
            "S5 ssm: H={} P={} (ssm_size={}, blocks={}, conj_sym={}, {:?}, {:?}, bidirectional={})",
            h,
            p,
            config.ssm_size,
            config.blocks,
            config.conj_sym,
            config.eigen_init,
            config.discretization,
            config.bidirectional,
        );

        Ok(Self::assemble(config, lambda, b, c, c_back, d, log_step))
    }

    /// Build from explicit tensors; shapes are checked against `config`.
    pub fn from_parts(
        config: &S5SsmConfig,
        lambda: ComplexTensor<B, 1>,
        b: ComplexTensor<B, 2>,
        c: ComplexTensor<B, 2>,
        d: Tensor<B, 1>,
        log_step: Tensor<B, 1>,
    ) -> Result<Self> {
        config.validate()?;
        let h = config.d_model;
        let p = config.state_size();
        let step_len = if config.dt_global { 1 } else { p };

        let check = |name: &str, actual: &[usize], expected: &[usize]| {
            if actual == expected {
                Ok(())
            } else {
                Err(S5Error::InvalidConfig(format!(
                    "{name} has shape {actual:?}, expected {expected:?}"
                )))
            }
        };
        check("lambda", &lambda.dims(), &[p])?;
        check("B", &b.dims(), &[p, h])?;
        check("C", &c.dims(), &[h, p])?;
        check("D", &d.dims(), &[h])?;
        check("log_step", &log_step.dims(), &[step_len])?;

        let c_back = config.bidirectional.then(|| c.clone());
        Ok(Self::assemble(config, lambda, b, c, c_back, d, log_step))
    }

    fn assemble(
        config: &S5SsmConfig,
        lambda: ComplexTensor<B, 1>,
        b: ComplexTensor<B, 2>,
        c: ComplexTensor<B, 2>,
        c_back: Option<ComplexTensor<B, 2>>,
        d: Tensor<B, 1>,
        log_step: Tensor<B, 1>,
    ) -> Self {
        let (c_back_re, c_back_im) = match c_back {
            Some(c_back) => (
                Some(Param::from_tensor(c_back.re)),
                Some(Param::from_tensor(c_back.im)),
            ),
            None => (None, None),
        };
        Self {
            lambda_re: Param::from_tensor(lambda.re),
            lambda_im: Param::from_tensor(lambda.im),
            b_re: Param::from_tensor(b.re),
            b_im: Param::from_tensor(b.im),
            c_re: Param::from_tensor(c.re),
            c_im: Param::from_tensor(c.im),
            c_back_re,
            c_back_im,
            d: Param::from_tensor(d),
            log_step: Param::from_tensor(log_step),
            discretization: Ignored(config.discretization),
            conj_sym: config.conj_sym,
            clip_eigs: config.clip_eigs,
            max_real_eig: config.max_real_eig,
            dt_min: config.dt_min,
            dt_max: config.dt_max,
            step_rescale: config.step_rescale,
        }
    }

    /// Replace the backward readout of a bidirectional system.
    pub fn with_backward_output(mut self, c_back: ComplexTensor<B, 2>) -> Self {
        self.c_back_re = Some(Param::from_tensor(c_back.re));
        self.c_back_im = Some(Param::from_tensor(c_back.im));
        self
    }

    /// Eigenvalues as used by the forward pass (clipped when `clip_eigs`).
    pub fn eigenvalues(&self) -> ComplexTensor<B, 1> {
        let re = self.lambda_re.val();
        let re = if self.clip_eigs { re.clamp_max(self.max_real_eig) } else { re };
        ComplexTensor::new(re, self.lambda_im.val())
    }

    /// Eigenvalues exactly as stored.
    pub fn raw_eigenvalues(&self) -> ComplexTensor<B, 1> {
        ComplexTensor::new(self.lambda_re.val(), self.lambda_im.val())
    }

    /// Clip stored eigenvalue real parts to `max_real_eig`.
    ///
    /// Meant to run after an optimizer step pushed the system out of the
    /// stable half-plane. Shapes are untouched. A no-op unless `clip_eigs`.
    pub fn stabilize(mut self) -> Self {
        if !self.clip_eigs {
            log::warn!("stabilize() called with clip_eigs disabled; parameters left as is");
            return self;
        }
        let bound = self.max_real_eig;
        self.lambda_re = self.lambda_re.map(|re| re.clamp_max(bound));
        log::debug!("eigenvalue real parts clipped to <= {bound}");
        self
    }

    /// Overwrite the stored eigenvalues, e.g. to emulate an external update.
    pub fn with_eigenvalues(mut self, lambda: ComplexTensor<B, 1>) -> Self {
        self.lambda_re = Param::from_tensor(lambda.re);
        self.lambda_im = Param::from_tensor(lambda.im);
        self
    }

    /// B, [P, H]
    pub fn input_matrix(&self) -> ComplexTensor<B, 2> {
        ComplexTensor::new(self.b_re.val(), self.b_im.val())
    }

    /// C, [H, P]
    pub fn output_matrix(&self) -> ComplexTensor<B, 2> {
        ComplexTensor::new(self.c_re.val(), self.c_im.val())
    }

    pub fn backward_output_matrix(&self) -> Option<ComplexTensor<B, 2>> {
        match (&self.c_back_re, &self.c_back_im) {
            (Some(re), Some(im)) => Some(ComplexTensor::new(re.val(), im.val())),
            _ => None,
        }
    }

    /// D, [H]
    pub fn feedthrough(&self) -> Tensor<B, 1> {
        self.d.val()
    }

    /// Learned step size after clamping and rescaling, [1] or [P].
    pub fn timescale(&self) -> Tensor<B, 1> {
        self.log_step.val().exp().clamp(self.dt_min, self.dt_max) * self.step_rescale
    }

    pub fn step_rescale(&self) -> f64 {
        self.step_rescale
    }

    pub fn discretization(&self) -> Discretization {
        self.discretization.0
    }

    pub fn conj_sym(&self) -> bool {
        self.conj_sym
    }

    pub fn is_bidirectional(&self) -> bool {
        self.c_back_re.is_some()
    }

    pub fn state_size(&self) -> usize {
        self.lambda_re.val().dims()[0]
    }

    pub fn d_model(&self) -> usize {
        self.d.val().dims()[0]
    }
}

/// Eigenvalues of one block, tiled `blocks` times.
///
/// Only the upper-half-plane member of each conjugate pair is kept when
/// `conj_sym`; otherwise the conjugates follow the block they belong to.
pub fn init_eigenvalues<B: Backend>(
    scheme: EigenInit,
    block_size: usize,
    blocks: usize,
    conj_sym: bool,
    device: &B::Device,
) -> ComplexTensor<B, 1> {
    let pairs = block_size / 2;
    let n = block_size as f32;
    let pi = std::f32::consts::PI;

    let half: ComplexTensor<B, 1> = match scheme {
        EigenInit::S4dLin => {
            let im: Vec<f32> = (0..pairs).map(|k| pi * k as f32).collect();
            ComplexTensor::new(
                Tensor::full([pairs], -0.5, device),
                Tensor::from_data(TensorData::new(im, [pairs]), device),
            )
        }
        EigenInit::S4dInv => {
            let im: Vec<f32> = (0..pairs)
                .map(|k| (n / pi) * (n / (2.0 * k as f32 + 1.0) - 1.0))
                .collect();
            ComplexTensor::new(
                Tensor::full([pairs], -0.5, device),
                Tensor::from_data(TensorData::new(im, [pairs]), device),
            )
        }
        EigenInit::Random => {
            let log_decay: Tensor<B, 1> = Tensor::random(
                [pairs],
                Distribution::Uniform(0.01f64.ln(), 0.0),
                device,
            );
            let freq = Tensor::random(
                [pairs],
                Distribution::Uniform(0.0, (pi * pairs as f32) as f64),
                device,
            );
            ComplexTensor::new(log_decay.exp().neg(), freq)
        }
    };

    let block = if conj_sym {
        half
    } else {
        ComplexTensor::cat(vec![half.clone(), half.conj()], 0)
    };
    ComplexTensor::cat(vec![block; blocks], 0)
}

/// LeCun-normal complex input projection, [P, H].
pub fn init_input_matrix<B: Backend>(
    state_size: usize,
    d_model: usize,
    device: &B::Device,
) -> ComplexTensor<B, 2> {
    let std = (1.0 / (2.0 * d_model as f64)).sqrt();
    ComplexTensor::new(
        Tensor::random([state_size, d_model], Distribution::Normal(0.0, std), device),
        Tensor::random([state_size, d_model], Distribution::Normal(0.0, std), device),
    )
}

/// Complex output projection, [H, P].
pub fn init_output_matrix<B: Backend>(
    scheme: CInit,
    d_model: usize,
    state_size: usize,
    device: &B::Device,
) -> ComplexTensor<B, 2> {
    let shape = [d_model, state_size];
    let normal = |std: f64| Tensor::<B, 2>::random(shape, Distribution::Normal(0.0, std), device);
    match scheme {
        CInit::LecunNormal => {
            let std = (1.0 / (2.0 * state_size as f64)).sqrt();
            ComplexTensor::new(normal(std), normal(std))
        }
        CInit::TruncStandardNormal => {
            ComplexTensor::new(normal(1.0).clamp(-2.0, 2.0), normal(1.0).clamp(-2.0, 2.0))
        }
        CInit::ComplexNormal => {
            let std = 0.5f64.sqrt();
            ComplexTensor::new(normal(std), normal(std))
        }
    }
}

/// Log-uniform step sizes on `[dt_min, dt_max]`.
pub fn init_log_step<B: Backend>(
    len: usize,
    dt_min: f64,
    dt_max: f64,
    device: &B::Device,
) -> Tensor<B, 1> {
    if dt_min >= dt_max {
        return Tensor::full([len], dt_min.ln(), device);
    }
    Tensor::random([len], Distribution::Uniform(dt_min.ln(), dt_max.ln()), device)
}
