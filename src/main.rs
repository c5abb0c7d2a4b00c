use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use s5_rust::{
    device::{init_device, Backend, Device},
    ReductionMode, S5ModelConfig, S5SsmConfig, SequenceBatch, SequenceLayerConfig,
    StackedEncoderConfig,
};

const BATCH: usize = 4;
const SEQ_LEN: usize = 64;

/// Damped pendulum `(angle, angular velocity)` observed at irregular times.
fn pendulum_batch(rng: &mut StdRng, device: &Device) -> SequenceBatch<Backend> {
    let mut observations = Vec::with_capacity(BATCH * SEQ_LEN * 2);
    let mut timestamps = Vec::with_capacity(BATCH * SEQ_LEN);
    let mut valid = Vec::with_capacity(BATCH * SEQ_LEN);

    for row in 0..BATCH {
        let damping = rng.random_range(0.05..0.4);
        let omega = rng.random_range(1.0..3.0);
        let phase = rng.random_range(0.0..std::f64::consts::TAU);
        // later rows are shorter and padded at the end
        let len = SEQ_LEN - row * SEQ_LEN / 8;

        let mut t = 0.0f64;
        for step in 0..SEQ_LEN {
            t += rng.random_range(0.02..0.3);
            let envelope = (-damping * t).exp();
            let theta = omega * t + phase;
            let angle = envelope * theta.cos();
            let velocity = -envelope * (damping * theta.cos() + omega * theta.sin());
            observations.push(angle as f32);
            observations.push(velocity as f32);
            timestamps.push(t as f32);
            valid.push(step < len);
        }
    }

    SequenceBatch::new(Tensor::from_data(TensorData::new(observations, [BATCH, SEQ_LEN, 2]), device))
        .with_timestamps(Tensor::from_data(TensorData::new(timestamps, [BATCH, SEQ_LEN]), device))
        .with_mask(Tensor::from_data(TensorData::new(valid, [BATCH, SEQ_LEN]), device))
}

fn main() {
    let device = init_device();
    println!("Device selected: {:?}", device);

    let ssm = S5SsmConfig::new(16, 8).with_blocks(2);
    let encoder = StackedEncoderConfig::new(2, SequenceLayerConfig::new(ssm).with_prenorm(true))
        .with_n_layers(2)
        .with_append_integration_timestep(true);
    let config = S5ModelConfig::new(encoder)
        .with_mode(ReductionMode::PerStep)
        .with_d_output(Some(2));
    println!("Model config:\n{}", config);

    let model = match config.init::<Backend>(&device) {
        Ok(model) => model,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    println!("S5 model created, {} parameters", model.num_params());

    let mut rng = StdRng::seed_from_u64(42);
    let batch = pendulum_batch(&mut rng, &device);
    println!("Input shape: {:?}", batch.observations.dims());

    let output = match model.forward(batch) {
        Ok(output) => output,
        Err(err) => {
            eprintln!("forward pass failed: {err}");
            std::process::exit(1);
        }
    };

    if let Some(per_step) = output.into_per_step() {
        println!("Per-step output shape: {:?}", per_step.dims());
        let max = per_step.clone().abs().max().into_scalar();
        let mean = per_step.mean().into_scalar();
        println!("Output |max| = {:.4}, mean = {:.4}", max, mean);
        if max.is_finite() {
            println!("✓ Forward pass healthy");
        } else {
            println!("✗ Non-finite output");
        }
    }
}
