use burn::tensor::backend::Backend;
use burn::tensor::{Data, ElementConversion, Shape, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;

/// Draws a tensor of i.i.d. standard normal values from `rng`.
pub(crate) fn randn<B: Backend, R: Rng + ?Sized, const D: usize>(
    rng: &mut R,
    dims: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let num_elements = dims.iter().product();
    let mut values = Vec::with_capacity(num_elements);
    for _ in 0..num_elements {
        let value: f32 = rng.sample(StandardNormal);
        values.push(value.elem());
    }

    let data: Data<B::FloatElem, D> = Data::new(values, Shape::new(dims));
    Tensor::from_data(data, device)
}

/// One value per sample, shaped `[batch_size, 1, 1, 1]` so it broadcasts over an image batch.
pub(crate) fn per_sample<B: Backend, I>(values: I, device: &B::Device) -> Tensor<B, 4>
where
    I: IntoIterator<Item = f64>,
{
    let values: Vec<B::FloatElem> = values.into_iter().map(|v| v.elem()).collect();
    let batch_size = values.len();

    let data: Data<B::FloatElem, 4> = Data::new(values, Shape::new([batch_size, 1, 1, 1]));
    Tensor::from_data(data, device)
}

/// Timesteps as the `[batch_size, 1]` float tensor a denoiser consumes.
pub(crate) fn timestep_tensor<B: Backend>(timesteps: &[usize], device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<B::FloatElem> = timesteps.iter().map(|&t| (t as f64).elem()).collect();

    let data: Data<B::FloatElem, 2> = Data::new(values, Shape::new([timesteps.len(), 1]));
    Tensor::from_data(data, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_randn_is_reproducible() {
        let device = <TestBackend as Backend>::Device::default();
        let mut rng = StdRng::seed_from_u64(7);
        let first: Tensor<TestBackend, 4> = randn(&mut rng, [2, 1, 3, 3], &device);
        let mut rng = StdRng::seed_from_u64(7);
        let second: Tensor<TestBackend, 4> = randn(&mut rng, [2, 1, 3, 3], &device);

        assert_eq!(first.shape(), Shape::from([2, 1, 3, 3]));
        first.to_data().assert_approx_eq(&second.to_data(), 6);
    }

    #[test]
    fn test_randn_statistics() {
        let device = <TestBackend as Backend>::Device::default();
        let mut rng = StdRng::seed_from_u64(0);
        let noise: Tensor<TestBackend, 2> = randn(&mut rng, [100, 100], &device);

        let values = noise.into_data().convert::<f32>().value;
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;

        assert!(mean.abs() < 0.05);
        assert!((var - 1.).abs() < 0.05);
    }

    #[test]
    fn test_per_sample_and_timesteps() {
        let device = <TestBackend as Backend>::Device::default();

        let coefficients = per_sample::<TestBackend, _>([0.5, 2.0], &device);
        assert_eq!(coefficients.shape(), Shape::from([2, 1, 1, 1]));
        coefficients
            .to_data()
            .assert_approx_eq(&Data::from([[[[0.5]]], [[[2.0]]]]), 3);

        let timesteps = timestep_tensor::<TestBackend>(&[9, 0], &device);
        assert_eq!(timesteps.shape(), Shape::from([2, 1]));
        timesteps
            .to_data()
            .assert_approx_eq(&Data::from([[9.0], [0.0]]), 3);
    }
}
