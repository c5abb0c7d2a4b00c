use burn::prelude::*;
use burn::tensor::backend::Backend;

/// Complex-valued tensor stored as a pair of real tensors.
///
/// Burn has no complex dtype, so the diagonal state-space layer keeps its
/// eigenvalues, projections and hidden states split into real and imaginary
/// parts. Both halves always share one shape; operations broadcast the same
/// way the underlying real ops do.
#[derive(Clone, Debug)]
pub struct ComplexTensor<B: Backend, const D: usize> {
    pub re: Tensor<B, D>,
    pub im: Tensor<B, D>,
}

impl<B: Backend, const D: usize> ComplexTensor<B, D> {
    pub fn new(re: Tensor<B, D>, im: Tensor<B, D>) -> Self {
        Self { re, im }
    }

    /// Lift a real tensor onto the real axis.
    pub fn from_real(re: Tensor<B, D>) -> Self {
        let im = re.zeros_like();
        Self { re, im }
    }

    pub fn zeros(shape: [usize; D], device: &B::Device) -> Self {
        Self::new(Tensor::zeros(shape, device), Tensor::zeros(shape, device))
    }

    /// Multiplicative identity `1 + 0i` of the given shape.
    pub fn ones(shape: [usize; D], device: &B::Device) -> Self {
        Self::new(Tensor::ones(shape, device), Tensor::zeros(shape, device))
    }

    pub fn dims(&self) -> [usize; D] {
        self.re.dims()
    }

    pub fn device(&self) -> B::Device {
        self.re.device()
    }

    pub fn add(self, other: Self) -> Self {
        Self::new(self.re + other.re, self.im + other.im)
    }

    pub fn sub(self, other: Self) -> Self {
        Self::new(self.re - other.re, self.im - other.im)
    }

    /// `(a + bi)(c + di) = (ac - bd) + (ad + bc)i`
    pub fn mul(self, other: Self) -> Self {
        let re = self.re.clone() * other.re.clone() - self.im.clone() * other.im.clone();
        let im = self.re * other.im + self.im * other.re;
        Self::new(re, im)
    }

    /// Multiply by a real tensor (broadcasting).
    pub fn mul_real(self, factor: Tensor<B, D>) -> Self {
        Self::new(self.re * factor.clone(), self.im * factor)
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.re * factor, self.im * factor)
    }

    /// Shift along the real axis.
    pub fn add_real_scalar(self, value: f64) -> Self {
        Self::new(self.re + value, self.im)
    }

    /// `|z|^2`
    pub fn norm_sqr(&self) -> Tensor<B, D> {
        self.re.clone() * self.re.clone() + self.im.clone() * self.im.clone()
    }

    pub fn conj(self) -> Self {
        Self::new(self.re, self.im.neg())
    }

    /// `1 / z = conj(z) / |z|^2`; no guard against `z = 0`.
    pub fn recip(self) -> Self {
        let denom = self.norm_sqr();
        Self::new(self.re / denom.clone(), self.im.neg() / denom)
    }

    pub fn div(self, other: Self) -> Self {
        self.mul(other.recip())
    }

    /// `exp(a + bi) = e^a (cos b + i sin b)`
    pub fn exp(self) -> Self {
        let magnitude = self.re.exp();
        Self::new(
            magnitude.clone() * self.im.clone().cos(),
            magnitude * self.im.sin(),
        )
    }

    /// Overwrite masked entries with `re + im*i`.
    pub fn mask_fill(self, mask: Tensor<B, D, Bool>, re: f64, im: f64) -> Self {
        Self::new(self.re.mask_fill(mask.clone(), re), self.im.mask_fill(mask, im))
    }

    pub fn narrow(self, dim: usize, start: usize, length: usize) -> Self {
        Self::new(
            self.re.narrow(dim, start, length),
            self.im.narrow(dim, start, length),
        )
    }

    pub fn select(self, dim: usize, indices: Tensor<B, 1, Int>) -> Self {
        Self::new(self.re.select(dim, indices.clone()), self.im.select(dim, indices))
    }

    pub fn cat(items: Vec<Self>, dim: usize) -> Self {
        let (re, im): (Vec<_>, Vec<_>) = items.into_iter().map(|z| (z.re, z.im)).unzip();
        Self::new(Tensor::cat(re, dim), Tensor::cat(im, dim))
    }

    pub fn reshape<const D2: usize>(self, shape: [usize; D2]) -> ComplexTensor<B, D2> {
        ComplexTensor::new(self.re.reshape(shape), self.im.reshape(shape))
    }

    pub fn unsqueeze_dim<const D2: usize>(self, dim: usize) -> ComplexTensor<B, D2> {
        ComplexTensor::new(self.re.unsqueeze_dim(dim), self.im.unsqueeze_dim(dim))
    }

    /// Materialize a broadcastable tensor at the full `shape`.
    pub fn expand_to(self, shape: [usize; D]) -> Self {
        let ones = Tensor::<B, D>::ones(shape, &self.device());
        self.mul_real(ones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(re: f32, im: f32) -> ComplexTensor<TestBackend, 1> {
        let device = Default::default();
        ComplexTensor::new(
            Tensor::from_data(TensorData::new(vec![re], [1]), &device),
            Tensor::from_data(TensorData::new(vec![im], [1]), &device),
        )
    }

    fn values(z: ComplexTensor<TestBackend, 1>) -> (f32, f32) {
        let re = z.re.into_data().to_vec::<f32>().unwrap()[0];
        let im = z.im.into_data().to_vec::<f32>().unwrap()[0];
        (re, im)
    }

    #[test]
    fn test_mul_and_div_are_inverse() {
        let a = scalar(1.5, -0.5);
        let b = scalar(-0.25, 2.0);

        let (re, im) = values(a.clone().mul(b.clone()));
        assert!((re - (1.5 * -0.25 - (-0.5 * 2.0))).abs() < 1e-6);
        assert!((im - (1.5 * 2.0 + -0.5 * -0.25)).abs() < 1e-6);

        let (re, im) = values(a.mul(b.clone()).div(b));
        assert!((re - 1.5).abs() < 1e-5);
        assert!((im + 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_exp_matches_euler() {
        let (re, im) = values(scalar(-0.5, std::f32::consts::FRAC_PI_2).exp());
        assert!(re.abs() < 1e-6);
        assert!((im - (-0.5f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_conj_and_norm() {
        let z = scalar(3.0, 4.0);
        let norm = z.norm_sqr().into_data().to_vec::<f32>().unwrap()[0];
        assert_eq!(norm, 25.0);
        assert_eq!(values(z.conj()), (3.0, -4.0));
    }
}
