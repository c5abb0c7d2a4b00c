//! Core S5 forward computation: discretize, scan, read out.
//!
//! Shapes: input `u` is `[batch, time, H]`, hidden states are
//! `[batch, time, P]` complex, output `y` is `[batch, time, H]` real:
//!
//! `x_t = A_bar_t x_{t-1} + B_bar_t u_t`, `y_t = Re(C x_t) + D u_t`
//!
//! with the real part doubled when only half of each conjugate pair is
//! stored. A bidirectional system adds `Re(C_back x'_t)` from a scan run
//! backwards in time.

use burn::prelude::*;
use burn::tensor::backend::Backend;

use crate::complex::ComplexTensor;
use crate::discretize::discretize;
use crate::parallel_scan::{parallel_scan, ScanElement};
use crate::s5_params::StateSpaceParams;

/// Step size for every `(batch, time, state)` position, broadcastable.
///
/// Measured elapsed times give `[batch, time, 1]`; without them the learned
/// timescale gives `[1, 1, 1]` (global) or `[1, 1, P]`.
pub fn step_sizes<B: Backend>(
    params: &StateSpaceParams<B>,
    elapsed: Option<Tensor<B, 2>>,
) -> Tensor<B, 3> {
    match elapsed {
        Some(dt) => dt.unsqueeze_dim::<3>(2) * params.step_rescale(),
        None => {
            let step = params.timescale();
            let n = step.dims()[0];
            step.reshape([1, 1, n])
        }
    }
}

/// `B u` for every step, `[batch, time, P]`.
pub fn project_input<B: Backend>(b: ComplexTensor<B, 2>, input: Tensor<B, 3>) -> ComplexTensor<B, 3> {
    let [batch, len, h] = input.dims();
    let p = b.dims()[0];
    let flat = input.reshape([batch * len, h]);
    ComplexTensor::new(
        flat.clone().matmul(b.re.transpose()).reshape([batch, len, p]),
        flat.matmul(b.im.transpose()).reshape([batch, len, p]),
    )
}

/// `Re(C x)` for every step, `[batch, time, H]`, doubled for conjugate-symmetric storage.
pub fn readout<B: Backend>(
    c: ComplexTensor<B, 2>,
    states: ComplexTensor<B, 3>,
    conj_sym: bool,
) -> Tensor<B, 3> {
    let [batch, len, p] = states.dims();
    let h = c.dims()[0];
    let re = states.re.reshape([batch * len, p]).matmul(c.re.transpose());
    let im = states.im.reshape([batch * len, p]).matmul(c.im.transpose());
    let y = (re - im).reshape([batch, len, h]);
    if conj_sym { y * 2.0 } else { y }
}

/// Discretized `(A_bar_t, B_bar_t u_t)` pairs ready for the scan, with
/// padded steps already turned into no-ops.
pub fn scan_elements<B: Backend>(
    params: &StateSpaceParams<B>,
    input: Tensor<B, 3>,
    elapsed: Option<Tensor<B, 2>>,
    mask: Option<Tensor<B, 2, Bool>>,
) -> ScanElement<B> {
    let [batch, len, _] = input.dims();
    let p = params.state_size();

    let lambda: ComplexTensor<B, 3> = params.eigenvalues().reshape([1, 1, p]);
    let delta = step_sizes(params, elapsed);
    let step = discretize(params.discretization(), lambda, delta);

    let bu = project_input(params.input_matrix(), input);
    let elements = ScanElement::new(
        step.lambda_bar.expand_to([batch, len, p]),
        step.gamma.mul(bu),
    );
    match mask {
        Some(valid) => elements.with_padding(valid),
        None => elements,
    }
}

/// Hidden states `[batch, time, P]` of the forward-in-time pass.
pub fn hidden_states<B: Backend>(
    params: &StateSpaceParams<B>,
    input: Tensor<B, 3>,
    elapsed: Option<Tensor<B, 2>>,
    mask: Option<Tensor<B, 2, Bool>>,
) -> ComplexTensor<B, 3> {
    parallel_scan(scan_elements(params, input, elapsed, mask))
}

/// Apply the S5 system to `input` `[batch, time, H]`.
pub fn apply_s5_ssm<B: Backend>(
    params: &StateSpaceParams<B>,
    input: Tensor<B, 3>,
    elapsed: Option<Tensor<B, 2>>,
    mask: Option<Tensor<B, 2, Bool>>,
) -> Tensor<B, 3> {
    let [_, len, h] = input.dims();
    let elements = scan_elements(params, input.clone(), elapsed, mask);

    let states = parallel_scan(elements.clone());
    let mut output = readout(params.output_matrix(), states, params.conj_sym());

    if let Some(c_back) = params.backward_output_matrix() {
        let reversed = reverse_time(elements, len);
        let states = parallel_scan(reversed);
        let states = reverse_states(states, len);
        output = output + readout(c_back, states, params.conj_sym());
    }

    output + input * params.feedthrough().reshape([1, 1, h])
}

fn reversed_index<B: Backend>(len: usize, device: &B::Device) -> Tensor<B, 1, Int> {
    let index: Vec<i64> = (0..len as i64).rev().collect();
    Tensor::from_data(TensorData::new(index, [len]), device)
}

fn reverse_time<B: Backend>(elements: ScanElement<B>, len: usize) -> ScanElement<B> {
    let index = reversed_index::<B>(len, &elements.a.device());
    ScanElement::new(
        elements.a.select(1, index.clone()),
        elements.b.select(1, index),
    )
}

fn reverse_states<B: Backend>(states: ComplexTensor<B, 3>, len: usize) -> ComplexTensor<B, 3> {
    let index = reversed_index::<B>(len, &states.device());
    states.select(1, index)
}
