use burn::prelude::*;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::complex::ComplexTensor;

/// Below this `|lambda * delta|`, ZOH uses a Taylor series for
/// `(e^z - 1) / z` instead of dividing a cancelled difference.
pub const ZOH_SERIES_RADIUS: f64 = 0.1;

/// Rule for turning continuous dynamics into a per-step update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discretization {
    /// Zero-order hold: exact for inputs held constant over the step.
    Zoh,
    /// Bilinear (Tustin) transform.
    Bilinear,
}

/// Discrete diagonal operator for one or many steps.
///
/// `lambda_bar` is the diagonal of `A_bar`. `gamma` is the diagonal scale
/// with `B_bar = diag(gamma) * B`, so the driven term of a step is
/// `gamma * (B u)` and the `[P, H]` matrix never has to be materialised
/// per step.
#[derive(Clone, Debug)]
pub struct DiscreteStep<B: Backend, const D: usize> {
    pub lambda_bar: ComplexTensor<B, D>,
    pub gamma: ComplexTensor<B, D>,
}

impl<B: Backend> DiscreteStep<B, 1> {
    /// Explicit `B_bar = diag(gamma) * B` for a single step size.
    pub fn input_matrix(&self, b: ComplexTensor<B, 2>) -> ComplexTensor<B, 2> {
        let gamma: ComplexTensor<B, 2> = self.gamma.clone().unsqueeze_dim(1);
        gamma.mul(b)
    }
}

/// Discretize `lambda` with step sizes `delta`.
///
/// `lambda` and `delta` only need to broadcast against each other, e.g.
/// `[1, 1, P]` eigenvalues with `[B, L, 1]` per-step deltas. At `delta = 0`
/// both rules give `lambda_bar = 1` and `gamma = 0`.
pub fn discretize<B: Backend, const D: usize>(
    method: Discretization,
    lambda: ComplexTensor<B, D>,
    delta: Tensor<B, D>,
) -> DiscreteStep<B, D> {
    match method {
        Discretization::Zoh => discretize_zoh(lambda, delta),
        Discretization::Bilinear => discretize_bilinear(lambda, delta),
    }
}

/// `lambda_bar = exp(lambda * delta)`, `gamma = (lambda_bar - 1) / lambda`.
///
/// Where `z = lambda * delta` is small (including `lambda = 0`), `gamma` is
/// `delta * (1 + z/2 + z^2/6 + z^3/24)`; the truncation error there is
/// below `|z|^4 / 120`, and `exp(z) - 1` is never formed in float.
pub fn discretize_zoh<B: Backend, const D: usize>(
    lambda: ComplexTensor<B, D>,
    delta: Tensor<B, D>,
) -> DiscreteStep<B, D> {
    let z = lambda.clone().mul_real(delta.clone());
    let lambda_bar = z.clone().exp();

    let shape = z.dims();
    let small = z.norm_sqr().lower_elem(ZOH_SERIES_RADIUS * ZOH_SERIES_RADIUS);

    let series = z.clone().scale(1.0 / 24.0).add_real_scalar(1.0 / 6.0);
    let series = z.clone().mul(series).add_real_scalar(0.5);
    let series = z.mul(series).add_real_scalar(1.0).mul_real(delta);

    // Keep the unused branch finite so masked entries carry no NaN gradients.
    let safe_lambda = lambda.expand_to(shape).mask_fill(small.clone(), 1.0, 0.0);
    let exact = lambda_bar.clone().add_real_scalar(-1.0).div(safe_lambda);

    let gamma = ComplexTensor::new(
        exact.re.mask_where(small.clone(), series.re),
        exact.im.mask_where(small, series.im),
    );
    DiscreteStep { lambda_bar, gamma }
}

/// `lambda_bar = (1 + lambda*delta/2) / (1 - lambda*delta/2)`,
/// `gamma = delta / (1 - lambda*delta/2)`.
pub fn discretize_bilinear<B: Backend, const D: usize>(
    lambda: ComplexTensor<B, D>,
    delta: Tensor<B, D>,
) -> DiscreteStep<B, D> {
    let half = lambda.mul_real(delta.clone()).scale(0.5);
    let inv_denom = half.clone().scale(-1.0).add_real_scalar(1.0).recip();
    let lambda_bar = half.add_real_scalar(1.0).mul(inv_denom.clone());
    let gamma = inv_denom.mul_real(delta);
    DiscreteStep { lambda_bar, gamma }
}
