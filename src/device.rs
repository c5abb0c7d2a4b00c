//! Backend selection for the demo and benchmarks.
//!
//! CPU (`NdArray`) by default; build with `--features wgpu` for the GPU backend.

use burn::backend::Autodiff;
use std::sync::OnceLock;

#[cfg(not(feature = "wgpu"))]
mod selected {
    pub type Backend = burn::backend::NdArray<f32>;
    pub type Device = burn::backend::ndarray::NdArrayDevice;
}

#[cfg(feature = "wgpu")]
mod selected {
    pub type Backend = burn::backend::Wgpu<f32, i32>;
    pub type Device = burn::backend::wgpu::WgpuDevice;
}

/// Backend used by the binaries.
pub type Backend = selected::Backend;

pub type Device = selected::Device;

/// Autodiff wrapper for training.
pub type AutodiffBackend = Autodiff<Backend>;

static DEVICE: OnceLock<Device> = OnceLock::new();

/// Returns the shared default device, created on first use.
pub fn init_device() -> Device {
    DEVICE
        .get_or_init(|| {
            let device = Device::default();
            log::info!("initialized device {:?}", device);
            device
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;

    #[test]
    fn test_device_initialization() {
        let device = init_device();
        let t = Tensor::<Backend, 1>::from_data([1.0, 2.0, 3.0], &device);
        let sum = (t.clone() + t).sum().into_scalar();
        assert!((sum - 12.0).abs() < 1e-6);
        assert_eq!(format!("{:?}", init_device()), format!("{:?}", device));
    }
}
